//! Negotiation strategies
//!
//! A closed set: adding or removing a strategy is a compile-checked change
//! (every `match` below is exhaustive). Strategy *content* (the persuasion
//! wording) lives with the message-rendering collaborator; here we carry
//! only the mechanics each strategy drives.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::Opportunity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStrategy {
    /// Lead with cash-in-hand urgency; few rounds, fast follow-ups
    UrgentCash,
    /// Neighborly tone; moderate pace
    FriendlyLocal,
    /// Low-ball and wait; many rounds, slow follow-ups
    PatientCollector,
}

/// Mechanics a strategy drives
#[derive(Debug, Clone, Copy)]
pub struct StrategyParams {
    /// Rounds of counter-offers before pinning the price
    pub max_rounds: u32,
    /// Delay before nudging a silent seller
    pub follow_up_delay: Duration,
    /// Nudges before the thread expires
    pub max_follow_ups: u32,
    /// Opening offer = max_acceptable * (1 - opening_discount)
    pub opening_discount: Decimal,
}

impl NegotiationStrategy {
    pub fn params(&self) -> StrategyParams {
        match self {
            Self::UrgentCash => StrategyParams {
                max_rounds: 2,
                follow_up_delay: Duration::from_secs(4 * 3600),
                max_follow_ups: 1,
                opening_discount: dec!(0.25),
            },
            Self::FriendlyLocal => StrategyParams {
                max_rounds: 3,
                follow_up_delay: Duration::from_secs(24 * 3600),
                max_follow_ups: 2,
                opening_discount: dec!(0.15),
            },
            Self::PatientCollector => StrategyParams {
                max_rounds: 5,
                follow_up_delay: Duration::from_secs(48 * 3600),
                max_follow_ups: 3,
                opening_discount: dec!(0.30),
            },
        }
    }

    /// Opening offer for a given ceiling, rounded to cents
    pub fn opening_offer(&self, max_acceptable: Decimal) -> Decimal {
        (max_acceptable * (Decimal::ONE - self.params().opening_discount)).round_dp(2)
    }

    /// Pick a strategy from what we know about the opportunity
    pub fn for_opportunity(opportunity: &Opportunity) -> Self {
        if opportunity.demand_score >= dec!(0.7) {
            // hot item: the seller has other buyers, move fast
            Self::UrgentCash
        } else if opportunity.risk_score >= dec!(0.5) {
            Self::PatientCollector
        } else {
            Self::FriendlyLocal
        }
    }
}

impl fmt::Display for NegotiationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UrgentCash => "urgent_cash",
            Self::FriendlyLocal => "friendly_local",
            Self::PatientCollector => "patient_collector",
        };
        write!(f, "{s}")
    }
}
