//! Collaborator contracts
//!
//! The engine treats parsing, discovery, analysis, message classification,
//! and listing creation as substitutable black boxes. Anything satisfying
//! these traits can drive a workflow: scrapers, LLM pipelines, or the
//! simulated implementations used for dry runs and tests.

use async_trait::async_trait;

use crate::domain::{
    DealAnalysis, ListingResult, MessageAssessment, NegotiationThread, Opportunity, ParsedCommand,
    Platform, PurchasedItem, SearchParams,
};
use crate::error::Result;

/// Natural-language command → structured parameters
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandParser: Send + Sync {
    async fn parse(&self, text: &str) -> Result<ParsedCommand>;
}

/// Marketplace discovery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OpportunityFinder: Send + Sync {
    async fn find(&self, params: &SearchParams) -> Result<Vec<Opportunity>>;
}

/// Deal analysis: buy, negotiate, or pass
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DealAnalyzer: Send + Sync {
    async fn analyze(&self, opportunity: &Opportunity) -> Result<DealAnalysis>;
}

/// Inbound seller-message classification
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageClassifier: Send + Sync {
    async fn classify(
        &self,
        message: &str,
        thread: &NegotiationThread,
    ) -> Result<MessageAssessment>;
}

/// Publishes a purchased item for resale
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ListingCreator: Send + Sync {
    async fn create_listing(
        &self,
        item: &PurchasedItem,
        platforms: &[Platform],
    ) -> Result<Vec<ListingResult>>;
}
