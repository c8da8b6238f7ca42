//! Counter-offer arithmetic
//!
//! Pure functions over `Decimal`; all state handling lives in the engine.
//! The gap-closing rates shrink as the gap widens and as rounds accumulate,
//! so repeated application converges on `max_acceptable` from below.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// What to do with an inbound counter-offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterDecision {
    /// Their price is within our ceiling: take it
    Accept { final_price: Decimal },
    /// Propose a new price
    Counter { new_offer: Decimal },
    /// Out of rounds: restate the current offer, no further increase
    FinalOffer { offer: Decimal },
}

/// Evaluate a seller counter against the current offer state.
///
/// `round_number` is the number of the most recent round at the time the
/// counter arrives (1 after our initial offer).
pub fn evaluate_counter(
    their_counter: Decimal,
    our_offer: Decimal,
    max_acceptable: Decimal,
    round_number: u32,
    max_rounds: u32,
) -> CounterDecision {
    if their_counter <= max_acceptable {
        return CounterDecision::Accept {
            final_price: their_counter,
        };
    }

    if round_number >= max_rounds {
        return CounterDecision::FinalOffer { offer: our_offer };
    }

    // Their price is over our ceiling but we still have rounds: close part
    // of the gap. The 10%-over threshold does not change the formula, only
    // documents the band where agreement is still plausible.
    CounterDecision::Counter {
        new_offer: next_offer(their_counter, our_offer, max_acceptable, round_number),
    }
}

/// Gap-closing step, clamped to `max_acceptable`
fn next_offer(
    their_counter: Decimal,
    our_offer: Decimal,
    max_acceptable: Decimal,
    round_number: u32,
) -> Decimal {
    let gap = their_counter - our_offer;
    // multiplier floors at zero so deep rounds can never walk the offer back
    let round_multiplier =
        (Decimal::ONE - Decimal::from(round_number) * dec!(0.1)).max(Decimal::ZERO);

    let raw = if gap <= dec!(50) {
        our_offer + gap * dec!(0.6)
    } else if gap <= dec!(100) {
        our_offer + gap * dec!(0.4) * round_multiplier
    } else {
        let capped_step = (gap * dec!(0.3) * round_multiplier)
            .min((max_acceptable - our_offer) * dec!(0.5));
        our_offer + capped_step
    };

    raw.min(max_acceptable).round_dp(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_within_ceiling() {
        let decision = evaluate_counter(dec!(790), dec!(700), dec!(800), 1, 3);
        assert_eq!(
            decision,
            CounterDecision::Accept {
                final_price: dec!(790)
            }
        );
    }

    #[test]
    fn test_mid_gap_counter_moves_toward_ceiling() {
        // our=700, theirs=760, max=800, round=1:
        // gap=60, multiplier=0.9 → 700 + 60*0.4*0.9 = 721.6
        let decision = evaluate_counter(dec!(760), dec!(700), dec!(800), 1, 3);
        match decision {
            CounterDecision::Counter { new_offer } => {
                assert_eq!(new_offer, dec!(721.6));
                assert!(new_offer > dec!(700) && new_offer < dec!(760));
            }
            other => panic!("expected counter, got {other:?}"),
        }
    }

    #[test]
    fn test_small_gap_closes_sixty_percent() {
        // theirs over the ceiling, gap=40 → 300 + 40*0.6 = 324
        let decision = evaluate_counter(dec!(340), dec!(300), dec!(330), 1, 3);
        assert_eq!(
            decision,
            CounterDecision::Counter {
                new_offer: dec!(324)
            }
        );
    }

    #[test]
    fn test_large_gap_is_capped_by_headroom() {
        // gap=150, round=1: step = min(150*0.3*0.9, (850-700)*0.5) = min(40.5, 75) = 40.5
        let decision = evaluate_counter(dec!(850.01), dec!(700), dec!(850), 1, 5);
        assert_eq!(
            decision,
            CounterDecision::Counter {
                new_offer: dec!(740.5)
            }
        );
    }

    #[test]
    fn test_out_of_rounds_pins_offer() {
        let decision = evaluate_counter(dec!(820), dec!(721.6), dec!(800), 2, 2);
        assert_eq!(
            decision,
            CounterDecision::FinalOffer {
                offer: dec!(721.6)
            }
        );
    }

    #[test]
    fn test_offer_never_exceeds_ceiling() {
        // huge close rate on a small gap right under the ceiling
        let decision = evaluate_counter(dec!(805), dec!(799), dec!(800), 1, 5);
        match decision {
            CounterDecision::Counter { new_offer } => assert!(new_offer <= dec!(800)),
            other => panic!("expected counter, got {other:?}"),
        }
    }

    #[test]
    fn test_repeated_application_converges() {
        let max = dec!(800);
        let mut our = dec!(700);
        let mut their = dec!(860);
        let mut accepted = false;

        for round in 1..=6u32 {
            match evaluate_counter(their, our, max, round, 8) {
                CounterDecision::Accept { .. } => {
                    accepted = true;
                    break;
                }
                CounterDecision::Counter { new_offer } => {
                    assert!(new_offer >= our, "offer must not decrease");
                    assert!(new_offer <= max);
                    our = new_offer;
                    // seller comes down a little each round
                    their -= dec!(15);
                }
                CounterDecision::FinalOffer { .. } => break,
            }
        }

        assert!(accepted || our > dec!(700), "offer must move toward the ceiling");
    }
}
