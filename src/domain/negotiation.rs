//! Negotiation thread and round types
//!
//! One thread per opportunity being negotiated. Rounds are an append-only
//! sequence with strictly increasing numbers starting at 1; `current_offer`
//! always reflects the most recent outbound round.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::negotiation::NegotiationStrategy;

/// Thread lifecycle:
/// `Active → {Negotiating, Accepted, Rejected, FinalOffer} → {Accepted, Rejected, Expired}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    /// Opening offer sent, no substantive reply yet
    Active,
    /// Counter-offers being exchanged
    Negotiating,
    Accepted,
    Rejected,
    /// Price pinned; seller takes it or leaves it
    FinalOffer,
    Expired,
}

impl ThreadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Expired)
    }
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Negotiating => "negotiating",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::FinalOffer => "final_offer",
            Self::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// Direction/purpose of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundKind {
    InitialOffer,
    CounterResponse,
    FollowUp,
}

/// Whose message this round records. Fixed at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// We sent this message to the seller
    Sent,
    /// The seller's message, recorded verbatim
    Received,
}

/// One message exchange within a thread. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationRound {
    /// Strictly increasing from 1, never reused
    pub number: u32,
    pub timestamp: DateTime<Utc>,
    pub kind: RoundKind,
    pub status: RoundStatus,
    pub our_offer: Option<Decimal>,
    pub their_offer: Option<Decimal>,
    pub message: String,
    pub message_id: Option<String>,
}

/// Seller-message classification produced by the classifier collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageIntent {
    Accept,
    Counter,
    Reject,
    Question,
    Negotiate,
    Unclear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

/// Classifier output for one inbound message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageAssessment {
    pub intent: MessageIntent,
    pub extracted_price: Option<Decimal>,
    pub sentiment: Sentiment,
    pub concerns: Vec<String>,
}

/// Per-opportunity conversation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationThread {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub command_id: Uuid,
    pub strategy: NegotiationStrategy,
    pub seller_contact: String,
    pub rounds: Vec<NegotiationRound>,
    pub status: ThreadStatus,
    /// Most recent outbound offer
    pub current_offer: Decimal,
    /// Hard ceiling; offers never exceed this
    pub max_acceptable: Decimal,
    pub follow_up_count: u32,
    pub last_response_at: Option<DateTime<Utc>>,
    /// Set when status becomes Accepted
    pub final_price: Option<Decimal>,
    /// Bumped on every inbound response; stale follow-up timers compare
    /// against it and no-op
    pub response_generation: u64,
    pub created_at: DateTime<Utc>,
}

impl NegotiationThread {
    pub fn new(
        opportunity_id: Uuid,
        command_id: Uuid,
        strategy: NegotiationStrategy,
        seller_contact: impl Into<String>,
        opening_offer: Decimal,
        max_acceptable: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            opportunity_id,
            command_id,
            strategy,
            seller_contact: seller_contact.into(),
            rounds: Vec::new(),
            status: ThreadStatus::Active,
            current_offer: opening_offer,
            max_acceptable,
            follow_up_count: 0,
            last_response_at: None,
            final_price: None,
            response_generation: 0,
            created_at: Utc::now(),
        }
    }

    /// Number the next appended round will carry
    pub fn next_round_number(&self) -> u32 {
        self.rounds.last().map(|r| r.number).unwrap_or(0) + 1
    }

    /// Append a round, assigning the next number. Offers on outbound rounds
    /// update `current_offer`.
    pub fn append_round(
        &mut self,
        kind: RoundKind,
        status: RoundStatus,
        our_offer: Option<Decimal>,
        their_offer: Option<Decimal>,
        message: impl Into<String>,
        message_id: Option<String>,
    ) {
        let round = NegotiationRound {
            number: self.next_round_number(),
            timestamp: Utc::now(),
            kind,
            status,
            our_offer,
            their_offer,
            message: message.into(),
            message_id,
        };
        if let Some(offer) = our_offer {
            self.current_offer = offer;
        }
        self.rounds.push(round);
    }
}
