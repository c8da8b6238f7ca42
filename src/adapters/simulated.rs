//! Simulated collaborators
//!
//! Deterministic stand-ins for the real scraping/LLM integrations. They
//! back dry-run mode and the integration tests: same inputs, same outputs,
//! no clocks, no network.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use super::traits::{
    CommandParser, DealAnalyzer, ListingCreator, MessageClassifier, OpportunityFinder,
};
use crate::domain::{
    DealAnalysis, DealVerdict, ListingResult, MessageAssessment, MessageIntent, NegotiationThread,
    Opportunity, ParsedCommand, Platform, PurchasedItem, SearchParams, Sentiment,
};
use crate::error::{ReflipError, Result};

/// Pull the first `$123` or `$123.45` out of a string
pub fn extract_price(text: &str) -> Option<Decimal> {
    let idx = text.find('$')?;
    let tail = &text[idx + 1..];
    let end = tail
        .find(|c: char| !c.is_ascii_digit() && c != '.' && c != ',')
        .unwrap_or(tail.len());
    let raw = tail[..end].replace(',', "");
    raw.parse::<Decimal>().ok()
}

/// Keyword-driven parser for commands like
/// "buy 2 mechanical keyboards under $500 and resell them"
pub struct SimulatedParser;

#[async_trait]
impl CommandParser for SimulatedParser {
    async fn parse(&self, text: &str) -> Result<ParsedCommand> {
        let budget = extract_price(text)
            .ok_or_else(|| ReflipError::Parse(format!("no budget amount in: {text}")))?;
        if budget <= Decimal::ZERO {
            return Err(ReflipError::Parse("budget must be positive".to_string()));
        }

        let words: Vec<&str> = text.split_whitespace().collect();
        let quantity = words
            .iter()
            .find_map(|w| w.parse::<u32>().ok())
            .unwrap_or(1);

        // category = words between the quantity (or "buy") and the price clause
        let start = words
            .iter()
            .position(|w| w.parse::<u32>().is_ok())
            .map(|i| i + 1)
            .or_else(|| words.iter().position(|w| w.eq_ignore_ascii_case("buy")).map(|i| i + 1))
            .unwrap_or(0);
        let end = words
            .iter()
            .position(|w| {
                w.eq_ignore_ascii_case("under")
                    || w.eq_ignore_ascii_case("for")
                    || w.starts_with('$')
            })
            .unwrap_or(words.len());
        let category = if start < end {
            words[start..end].join(" ")
        } else {
            return Err(ReflipError::Parse(format!("no item category in: {text}")));
        };

        let action = if text.to_lowercase().contains("resell") || text.to_lowercase().contains("flip")
        {
            "resell".to_string()
        } else {
            "buy".to_string()
        };

        Ok(ParsedCommand {
            budget,
            quantity,
            category,
            action,
            constraints: Vec::new(),
        })
    }
}

/// Generates plausible listings priced below the search ceiling.
/// Seeded from the category so runs are repeatable.
pub struct SimulatedFinder {
    /// How many opportunities to fabricate per search
    pub results_per_search: usize,
}

impl Default for SimulatedFinder {
    fn default() -> Self {
        Self {
            results_per_search: 3,
        }
    }
}

#[async_trait]
impl OpportunityFinder for SimulatedFinder {
    async fn find(&self, params: &SearchParams) -> Result<Vec<Opportunity>> {
        let seed = params
            .category
            .bytes()
            .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u64));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut opportunities = Vec::with_capacity(self.results_per_search);
        for i in 0..self.results_per_search {
            // ask 55-90% of the ceiling so every find is at least plausible
            let price_pct = Decimal::from(rng.gen_range(55..=90)) / dec!(100);
            let asking_price = (params.max_price * price_pct).round_dp(2);
            let profit_margin = Decimal::from(rng.gen_range(5..=40)) / dec!(100);
            let risk_score = Decimal::from(rng.gen_range(5..=80)) / dec!(100);
            let demand_score = Decimal::from(rng.gen_range(20..=95)) / dec!(100);

            opportunities.push(Opportunity {
                id: Uuid::new_v4(),
                title: format!("{} (listing {})", params.category, i + 1),
                asking_price,
                profit_margin,
                risk_score,
                demand_score,
                platform_fee_rate: dec!(0.10),
                seller_contact: format!("seller{}@marketplace.example", i + 1),
                url: format!("https://marketplace.example/{}/{}", params.category, i + 1),
                discovered_at: chrono::Utc::now(),
            });
        }

        Ok(opportunities)
    }
}

/// Margin/risk thresholds standing in for the real deal model
pub struct SimulatedAnalyzer;

#[async_trait]
impl DealAnalyzer for SimulatedAnalyzer {
    async fn analyze(&self, opportunity: &Opportunity) -> Result<DealAnalysis> {
        let (verdict, max_price, reasoning) = if opportunity.risk_score >= dec!(0.7) {
            (
                DealVerdict::Pass,
                Decimal::ZERO,
                vec![format!("risk score {} too high", opportunity.risk_score)],
            )
        } else if opportunity.profit_margin >= dec!(0.25) && opportunity.risk_score < dec!(0.3) {
            (
                DealVerdict::Buy,
                opportunity.asking_price,
                vec![
                    format!("margin {} clears bar at asking", opportunity.profit_margin),
                    "low risk".to_string(),
                ],
            )
        } else if opportunity.profit_margin >= dec!(0.10) {
            (
                DealVerdict::Negotiate,
                (opportunity.asking_price * dec!(0.90)).round_dp(2),
                vec![format!(
                    "margin {} works below asking",
                    opportunity.profit_margin
                )],
            )
        } else {
            (
                DealVerdict::Pass,
                Decimal::ZERO,
                vec![format!("margin {} too thin", opportunity.profit_margin)],
            )
        };

        let confidence = (Decimal::ONE - opportunity.risk_score).round_dp(2);

        Ok(DealAnalysis {
            opportunity_id: opportunity.id,
            verdict,
            confidence,
            max_price,
            reasoning,
        })
    }
}

/// Keyword classifier for seller replies
pub struct SimulatedClassifier;

#[async_trait]
impl MessageClassifier for SimulatedClassifier {
    async fn classify(
        &self,
        message: &str,
        _thread: &NegotiationThread,
    ) -> Result<MessageAssessment> {
        let lower = message.to_lowercase();
        let extracted_price = extract_price(message);

        let (intent, sentiment) = if lower.contains("deal")
            || lower.contains("accept")
            || lower.contains("sold")
            || lower.contains("it's yours")
        {
            (MessageIntent::Accept, Sentiment::Positive)
        } else if lower.contains("no thanks")
            || lower.contains("not interested")
            || lower.contains("already sold")
        {
            (MessageIntent::Reject, Sentiment::Negative)
        } else if extracted_price.is_some() {
            (MessageIntent::Counter, Sentiment::Neutral)
        } else if lower.contains('?') {
            (MessageIntent::Question, Sentiment::Neutral)
        } else if lower.contains("lowest") || lower.contains("best price") {
            (MessageIntent::Negotiate, Sentiment::Neutral)
        } else {
            (MessageIntent::Unclear, Sentiment::Neutral)
        };

        let mut concerns = Vec::new();
        if lower.contains("shipping") {
            concerns.push("shipping".to_string());
        }
        if lower.contains("condition") || lower.contains("scratch") {
            concerns.push("condition".to_string());
        }

        Ok(MessageAssessment {
            intent,
            extracted_price,
            sentiment,
            concerns,
        })
    }
}

/// Always-succeeds lister stamping fake listing ids
pub struct SimulatedLister;

#[async_trait]
impl ListingCreator for SimulatedLister {
    async fn create_listing(
        &self,
        item: &PurchasedItem,
        platforms: &[Platform],
    ) -> Result<Vec<ListingResult>> {
        Ok(platforms
            .iter()
            .map(|&platform| ListingResult {
                platform,
                listing_id: Some(format!("sim-{}-{}", platform, &item.id.to_string()[..8])),
                listed_price: item.target_resale_price,
                success: true,
                error: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parser_extracts_fields() {
        let parsed = SimulatedParser
            .parse("buy 2 mechanical keyboards under $500 and resell them")
            .await
            .unwrap();
        assert_eq!(parsed.budget, dec!(500));
        assert_eq!(parsed.quantity, 2);
        assert_eq!(parsed.category, "mechanical keyboards");
        assert_eq!(parsed.action, "resell");
    }

    #[tokio::test]
    async fn test_parser_rejects_missing_budget() {
        let err = SimulatedParser
            .parse("buy some keyboards")
            .await
            .unwrap_err();
        assert!(matches!(err, ReflipError::Parse(_)));
    }

    #[test]
    fn test_extract_price() {
        assert_eq!(extract_price("how about $760?"), Some(dec!(760)));
        assert_eq!(extract_price("I can do $1,250.50 cash"), Some(dec!(1250.50)));
        assert_eq!(extract_price("no numbers here"), None);
    }

    #[tokio::test]
    async fn test_finder_is_deterministic_and_under_ceiling() {
        let params = SearchParams {
            category: "mechanical keyboards".to_string(),
            max_price: dec!(500),
            quantity: 2,
            constraints: Vec::new(),
        };
        let finder = SimulatedFinder::default();
        let first = finder.find(&params).await.unwrap();
        let second = finder.find(&params).await.unwrap();

        assert_eq!(first.len(), 3);
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.asking_price, b.asking_price);
            assert!(a.asking_price <= params.max_price);
        }
    }

    #[tokio::test]
    async fn test_classifier_intents() {
        let thread = NegotiationThread::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            crate::negotiation::NegotiationStrategy::FriendlyLocal,
            "seller@example.com",
            dec!(700),
            dec!(800),
        );
        let classifier = SimulatedClassifier;

        let accept = classifier.classify("ok deal, it's yours", &thread).await.unwrap();
        assert_eq!(accept.intent, MessageIntent::Accept);

        let counter = classifier
            .classify("I could go down to $760", &thread)
            .await
            .unwrap();
        assert_eq!(counter.intent, MessageIntent::Counter);
        assert_eq!(counter.extracted_price, Some(dec!(760)));

        let reject = classifier
            .classify("no thanks, already sold", &thread)
            .await
            .unwrap();
        assert_eq!(reject.intent, MessageIntent::Reject);

        let question = classifier
            .classify("what condition is it in?", &thread)
            .await
            .unwrap();
        assert_eq!(question.intent, MessageIntent::Question);
        assert!(question.concerns.contains(&"condition".to_string()));
    }
}
