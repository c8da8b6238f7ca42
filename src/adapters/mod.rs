//! Collaborator seams and their simulated implementations

pub mod simulated;
pub mod traits;

pub use simulated::{
    extract_price, SimulatedAnalyzer, SimulatedClassifier, SimulatedFinder, SimulatedLister,
    SimulatedParser,
};
pub use traits::{CommandParser, DealAnalyzer, ListingCreator, MessageClassifier, OpportunityFinder};
