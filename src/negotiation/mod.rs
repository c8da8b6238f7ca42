//! Multi-round negotiation: strategies, counter-offer math, and the
//! per-thread state machine engine

pub mod counter;
pub mod engine;
pub mod strategy;

pub use counter::{evaluate_counter, CounterDecision};
pub use engine::{NegotiationEngine, ThreadOutcome};
pub use strategy::{NegotiationStrategy, StrategyParams};
