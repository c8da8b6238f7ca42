//! Budget row and summary types
//!
//! A budget belongs to exactly one command and is mutated only through the
//! ledger operations in `crate::ledger`. The core invariant is
//! `spent + reserved + remaining == total` with all three non-negative.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    /// Accepting reservations and spends
    Active,
    /// Fully spent: remaining and reserved are both zero
    Exhausted,
    /// Closed by the owning command; no further mutations
    Completed,
}

impl BudgetStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl fmt::Display for BudgetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

/// Funds tracking for one command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub command_id: Uuid,
    pub total: Decimal,
    pub spent: Decimal,
    pub reserved: Decimal,
    pub remaining: Decimal,
    pub status: BudgetStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Budget {
    /// Fresh budget: nothing spent, nothing reserved, everything remaining
    pub fn new(command_id: Uuid, total: Decimal, expiry_days: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            command_id,
            total,
            spent: Decimal::ZERO,
            reserved: Decimal::ZERO,
            remaining: total,
            status: BudgetStatus::Active,
            created_at: now,
            expires_at: now + chrono::Duration::days(expiry_days),
        }
    }

    /// True when the accounting identity holds
    pub fn invariant_holds(&self) -> bool {
        self.spent + self.reserved + self.remaining == self.total
            && self.spent >= Decimal::ZERO
            && self.reserved >= Decimal::ZERO
            && self.remaining >= Decimal::ZERO
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn summary(&self) -> BudgetSummary {
        let utilization_percent = if self.total.is_zero() {
            Decimal::ZERO
        } else {
            (self.spent + self.reserved) / self.total * Decimal::ONE_HUNDRED
        };
        BudgetSummary {
            budget_id: self.id,
            total: self.total,
            spent: self.spent,
            reserved: self.reserved,
            remaining: self.remaining,
            status: self.status,
            utilization_percent,
        }
    }
}

/// Read-only view exposed on the query surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub budget_id: Uuid,
    pub total: Decimal,
    pub spent: Decimal,
    pub reserved: Decimal,
    pub remaining: Decimal,
    pub status: BudgetStatus,
    pub utilization_percent: Decimal,
}

impl fmt::Display for BudgetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: ${:.2} | Spent: ${:.2} | Reserved: ${:.2} | Remaining: ${:.2} | Used: {:.1}% | {}",
            self.total,
            self.spent,
            self.reserved,
            self.remaining,
            self.utilization_percent,
            self.status
        )
    }
}
