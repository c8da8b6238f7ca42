//! Marketplace-facing types: parsed commands, opportunities, analyses,
//! purchased items, listings

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Structured parameters extracted from a natural-language command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedCommand {
    /// Hard spending limit for the whole command
    pub budget: Decimal,
    /// How many items to buy
    pub quantity: u32,
    /// Item category to hunt, e.g. "mechanical keyboards"
    pub category: String,
    /// What to do with purchases, e.g. "resell"
    pub action: String,
    /// Free-form constraints ("local pickup only", "min 20% margin")
    #[serde(default)]
    pub constraints: Vec<String>,
}

/// Search parameters handed to the finder collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub category: String,
    pub max_price: Decimal,
    pub quantity: u32,
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl From<&ParsedCommand> for SearchParams {
    fn from(params: &ParsedCommand) -> Self {
        Self {
            category: params.category.clone(),
            max_price: params.budget,
            quantity: params.quantity,
            constraints: params.constraints.clone(),
        }
    }
}

/// A scraped marketplace listing enriched with market data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    pub asking_price: Decimal,
    /// Expected resale profit after fees, as a fraction of asking price
    pub profit_margin: Decimal,
    /// 0 (safe) .. 1 (avoid)
    pub risk_score: Decimal,
    /// 0 (dead) .. 1 (hot)
    pub demand_score: Decimal,
    /// Fee rate of the platform the item would be resold on
    pub platform_fee_rate: Decimal,
    pub seller_contact: String,
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

/// Analyzer verdict on one opportunity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DealVerdict {
    /// Worth it at asking price
    Buy,
    /// Worth it below `max_price`
    Negotiate,
    /// Not worth pursuing
    Pass,
}

impl fmt::Display for DealVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "BUY",
            Self::Negotiate => "NEGOTIATE",
            Self::Pass => "PASS",
        };
        write!(f, "{s}")
    }
}

/// Full analyzer output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DealAnalysis {
    pub opportunity_id: Uuid,
    pub verdict: DealVerdict,
    /// 0 .. 1
    pub confidence: Decimal,
    /// Ceiling the analyzer considers worth paying
    pub max_price: Decimal,
    pub reasoning: Vec<String>,
}

/// An item we actually bought
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchasedItem {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub command_id: Uuid,
    pub title: String,
    pub purchase_price: Decimal,
    pub target_resale_price: Decimal,
    pub purchased_at: DateTime<Utc>,
}

/// Resale platforms the lister can publish to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ebay,
    FacebookMarketplace,
    Craigslist,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ebay => "ebay",
            Self::FacebookMarketplace => "facebook_marketplace",
            Self::Craigslist => "craigslist",
        };
        write!(f, "{s}")
    }
}

/// Outcome of one listing attempt on one platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingResult {
    pub platform: Platform,
    pub listing_id: Option<String>,
    pub listed_price: Decimal,
    pub success: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_search_params_from_parsed_command() {
        let parsed = ParsedCommand {
            budget: dec!(500),
            quantity: 2,
            category: "mechanical keyboards".to_string(),
            action: "resell".to_string(),
            constraints: vec!["local pickup".to_string()],
        };
        let params = SearchParams::from(&parsed);
        assert_eq!(params.max_price, dec!(500));
        assert_eq!(params.quantity, 2);
        assert_eq!(params.constraints.len(), 1);
    }
}
