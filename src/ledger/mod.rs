//! Budget ledger
//!
//! Centralized fund management for commands:
//! - Reserve-before-spend admission control
//! - Atomic read-modify-write per budget (single lock, one critical section)
//! - Loud invariant enforcement: spent + reserved + remaining == total
//!
//! Separating reserve from spend lets the executor hold a price ceiling
//! through a multi-round negotiation without risking double-spend when two
//! opportunities run concurrently against the same budget.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{Budget, BudgetStatus, BudgetSummary};
use crate::error::LedgerError;

type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Coordinator-owned budget registry. Clone-friendly; clones share state.
#[derive(Clone)]
pub struct BudgetLedger {
    budgets: Arc<RwLock<HashMap<Uuid, Budget>>>,
    /// Days until a fresh budget expires
    expiry_days: i64,
}

impl Default for BudgetLedger {
    fn default() -> Self {
        Self::new(7)
    }
}

impl BudgetLedger {
    pub fn new(expiry_days: i64) -> Self {
        Self {
            budgets: Arc::new(RwLock::new(HashMap::new())),
            expiry_days,
        }
    }

    /// Initialize a budget for a command: nothing spent, nothing reserved
    pub async fn create(&self, command_id: Uuid, total: Decimal) -> LedgerResult<Budget> {
        if total < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount { amount: total });
        }
        let budget = Budget::new(command_id, total, self.expiry_days);
        info!(
            budget_id = %budget.id,
            command_id = %command_id,
            total = %total,
            "budget created"
        );
        self.budgets.write().await.insert(budget.id, budget.clone());
        Ok(budget)
    }

    /// Reserve funds ahead of an external action that may spend money.
    /// Returns false (no state change) when `amount` exceeds remaining.
    /// This is the sole admission-control point.
    pub async fn reserve(&self, budget_id: Uuid, amount: Decimal) -> LedgerResult<bool> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount { amount });
        }
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .get_mut(&budget_id)
            .ok_or(LedgerError::NotFound { budget_id })?;

        if !budget.status.is_open() {
            return Err(LedgerError::Closed {
                status: budget.status.to_string(),
            });
        }
        if budget.is_expired(Utc::now()) {
            return Err(LedgerError::Expired {
                expired_at: budget.expires_at,
            });
        }

        if amount > budget.remaining {
            debug!(
                budget_id = %budget_id,
                requested = %amount,
                remaining = %budget.remaining,
                "reservation denied"
            );
            return Ok(false);
        }

        budget.remaining -= amount;
        budget.reserved += amount;
        Self::check_invariant(budget)?;

        info!(
            budget_id = %budget_id,
            amount = %amount,
            reserved = %budget.reserved,
            remaining = %budget.remaining,
            "funds reserved"
        );
        Ok(true)
    }

    /// Return previously reserved funds (approval rejected, negotiation
    /// failed). Clamps to zero if `amount` exceeds reserved, which is not expected
    /// in correct use, so it warns.
    pub async fn release(&self, budget_id: Uuid, amount: Decimal) -> LedgerResult<()> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount { amount });
        }
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .get_mut(&budget_id)
            .ok_or(LedgerError::NotFound { budget_id })?;

        let returned = amount.min(budget.reserved);
        if returned < amount {
            warn!(
                budget_id = %budget_id,
                requested = %amount,
                reserved = %budget.reserved,
                "release clamped to reserved balance"
            );
        }
        budget.reserved -= returned;
        budget.remaining += returned;
        Self::check_invariant(budget)?;

        info!(budget_id = %budget_id, amount = %returned, "funds released");
        Ok(())
    }

    /// Convert reserved funds into spent. Any excess over the reserved
    /// balance comes out of remaining; if even that cannot cover it the
    /// caller has a bug and the mutation is rejected loudly.
    pub async fn spend(&self, budget_id: Uuid, amount: Decimal) -> LedgerResult<()> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::NegativeAmount { amount });
        }
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .get_mut(&budget_id)
            .ok_or(LedgerError::NotFound { budget_id })?;

        if !budget.status.is_open() {
            return Err(LedgerError::Closed {
                status: budget.status.to_string(),
            });
        }

        let from_reserved = amount.min(budget.reserved);
        let overflow = amount - from_reserved;
        if overflow > budget.remaining {
            return Err(LedgerError::InvariantViolated {
                budget_id,
                total: budget.total,
                spent: budget.spent + amount,
                reserved: budget.reserved - from_reserved,
                remaining: budget.remaining - overflow,
            });
        }

        budget.reserved -= from_reserved;
        budget.remaining -= overflow;
        budget.spent += amount;
        Self::check_invariant(budget)?;

        if budget.remaining.is_zero() && budget.reserved.is_zero() {
            budget.status = BudgetStatus::Exhausted;
            info!(budget_id = %budget_id, "budget exhausted");
        }

        info!(
            budget_id = %budget_id,
            amount = %amount,
            spent = %budget.spent,
            remaining = %budget.remaining,
            "funds spent"
        );
        Ok(())
    }

    /// Read-only affordability check against remaining funds
    pub async fn can_afford(&self, budget_id: Uuid, amount: Decimal) -> LedgerResult<bool> {
        let budgets = self.budgets.read().await;
        let budget = budgets
            .get(&budget_id)
            .ok_or(LedgerError::NotFound { budget_id })?;
        Ok(budget.status.is_open()
            && !budget.is_expired(Utc::now())
            && amount <= budget.remaining)
    }

    /// Terminal marker: no further reserve/spend permitted
    pub async fn complete(&self, budget_id: Uuid) -> LedgerResult<()> {
        let mut budgets = self.budgets.write().await;
        let budget = budgets
            .get_mut(&budget_id)
            .ok_or(LedgerError::NotFound { budget_id })?;
        budget.status = BudgetStatus::Completed;
        info!(budget_id = %budget_id, "budget completed");
        Ok(())
    }

    /// Query-surface snapshot
    pub async fn summary(&self, budget_id: Uuid) -> LedgerResult<BudgetSummary> {
        let budgets = self.budgets.read().await;
        budgets
            .get(&budget_id)
            .map(Budget::summary)
            .ok_or(LedgerError::NotFound { budget_id })
    }

    /// Full row clone (persistence write-through)
    pub async fn get(&self, budget_id: Uuid) -> LedgerResult<Budget> {
        let budgets = self.budgets.read().await;
        budgets
            .get(&budget_id)
            .cloned()
            .ok_or(LedgerError::NotFound { budget_id })
    }

    fn check_invariant(budget: &Budget) -> LedgerResult<()> {
        if budget.invariant_holds() {
            Ok(())
        } else {
            Err(LedgerError::InvariantViolated {
                budget_id: budget.id,
                total: budget.total,
                spent: budget.spent,
                reserved: budget.reserved,
                remaining: budget.remaining,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    async fn ledger_with_budget(total: Decimal) -> (BudgetLedger, Uuid) {
        let ledger = BudgetLedger::new(7);
        let budget = ledger.create(Uuid::new_v4(), total).await.unwrap();
        (ledger, budget.id)
    }

    #[tokio::test]
    async fn test_reserve_spend_scenario() {
        // total=500: reserve 300, spend 300, then a 250 reserve must fail
        let (ledger, id) = ledger_with_budget(dec!(500)).await;

        assert!(ledger.reserve(id, dec!(300)).await.unwrap());
        let s = ledger.summary(id).await.unwrap();
        assert_eq!(
            (s.spent, s.reserved, s.remaining),
            (dec!(0), dec!(300), dec!(200))
        );

        ledger.spend(id, dec!(300)).await.unwrap();
        let s = ledger.summary(id).await.unwrap();
        assert_eq!(
            (s.spent, s.reserved, s.remaining),
            (dec!(300), dec!(0), dec!(200))
        );

        // only 200 remaining
        assert!(!ledger.reserve(id, dec!(250)).await.unwrap());

        // nothing reserved: release is a clamped no-op
        ledger.release(id, dec!(50)).await.unwrap();
        let s = ledger.summary(id).await.unwrap();
        assert_eq!(
            (s.spent, s.reserved, s.remaining),
            (dec!(300), dec!(0), dec!(200))
        );
    }

    #[tokio::test]
    async fn test_failed_reserve_leaves_state_unchanged() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;
        let before = ledger.summary(id).await.unwrap();

        assert!(!ledger.reserve(id, dec!(150)).await.unwrap());

        let after = ledger.summary(id).await.unwrap();
        assert_eq!(before.remaining, after.remaining);
        assert_eq!(before.reserved, after.reserved);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;
        assert!(ledger.reserve(id, dec!(100)).await.unwrap());
        ledger.spend(id, dec!(100)).await.unwrap();

        let s = ledger.summary(id).await.unwrap();
        assert_eq!(s.status, BudgetStatus::Exhausted);

        // exhausted budget rejects further reservations
        assert!(matches!(
            ledger.reserve(id, dec!(1)).await,
            Err(LedgerError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_completed_budget_rejects_mutation() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;
        ledger.complete(id).await.unwrap();

        assert!(matches!(
            ledger.reserve(id, dec!(10)).await,
            Err(LedgerError::Closed { .. })
        ));
        assert!(matches!(
            ledger.spend(id, dec!(10)).await,
            Err(LedgerError::Closed { .. })
        ));
        assert!(!ledger.can_afford(id, dec!(10)).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_reservations_never_overcommit() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(
                async move { ledger.reserve(id, dec!(30)).await },
            ));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() {
                granted += 1;
            }
        }

        // 100 / 30 admits at most 3 reservations
        assert_eq!(granted, 3);
        let s = ledger.summary(id).await.unwrap();
        assert_eq!(s.reserved, dec!(90));
        assert_eq!(s.remaining, dec!(10));
        assert_eq!(s.spent + s.reserved + s.remaining, dec!(100));
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;
        assert!(matches!(
            ledger.reserve(id, dec!(-5)).await,
            Err(LedgerError::NegativeAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_spend_beyond_funds_is_loud() {
        let (ledger, id) = ledger_with_budget(dec!(100)).await;
        assert!(ledger.reserve(id, dec!(50)).await.unwrap());

        // 150 > reserved 50 + remaining 50: caller bug, rejected loudly
        assert!(matches!(
            ledger.spend(id, dec!(150)).await,
            Err(LedgerError::InvariantViolated { .. })
        ));

        // state unchanged by the rejected spend
        let s = ledger.summary(id).await.unwrap();
        assert_eq!(s.spent + s.reserved + s.remaining, dec!(100));
    }
}
