//! Account ledger boundary.
//!
//! Balances are owned by an external ledger. The engine only issues
//! increments and decrements, each tagged with the reason it happened, and
//! groups everything one order execution produces into a single batch. A
//! batch applies completely or not at all, and re-applying a batch id is a
//! no-op.

use crate::types::{OrderId, Quote, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerReason {
    MarginLock,
    MarginRelease,
    PnlSettlement,
    Commission,
    /// House side of a commission charge.
    CommissionIncome,
    /// Funds entering from outside the engine (deposits, test seeding).
    ExternalCredit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub user_id: UserId,
    pub delta: Quote,
    pub reason: LedgerReason,
}

impl LedgerEntry {
    pub fn new(user_id: UserId, delta: Quote, reason: LedgerReason) -> Self {
        Self {
            user_id,
            delta,
            reason,
        }
    }
}

/// Idempotency key. one batch per executed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(pub u64);

impl From<OrderId> for BatchId {
    fn from(id: OrderId) -> Self {
        BatchId(id.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBatch {
    pub id: BatchId,
    pub entries: Vec<LedgerEntry>,
}

impl LedgerBatch {
    pub fn new(id: BatchId) -> Self {
        Self {
            id,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, user_id: UserId, delta: Quote, reason: LedgerReason) {
        if !delta.is_zero() {
            self.entries.push(LedgerEntry::new(user_id, delta, reason));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn net_for(&self, user_id: UserId) -> Quote {
        self.entries
            .iter()
            .filter(|e| e.user_id == user_id)
            .map(|e| e.delta)
            .sum()
    }

    pub fn total(&self, reason: LedgerReason) -> Quote {
        self.entries
            .iter()
            .filter(|e| e.reason == reason)
            .map(|e| e.delta)
            .sum()
    }

    /// Sum of all deltas. commission charged and credited cancel out, so a
    /// balanced batch nets to the P&L settled minus margin moved.
    pub fn net(&self) -> Quote {
        self.entries.iter().map(|e| e.delta).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient funds for {user_id}: required {required}, available {available}")]
    InsufficientFunds {
        user_id: UserId,
        required: Quote,
        available: Quote,
    },

    #[error("Batch {0:?} was never applied")]
    UnknownBatch(BatchId),

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

/// External balance authority. calls are blocking I/O from the engine's view.
pub trait AccountLedger: Send + Sync {
    fn balance(&self, user_id: UserId) -> Result<Quote, LedgerError>;

    fn adjust_balance(&self, entry: &LedgerEntry) -> Result<Quote, LedgerError>;

    /// Atomic and idempotent per batch id.
    fn apply_batch(&self, batch: &LedgerBatch) -> Result<(), LedgerError>;

    /// Compensates a batch that was applied but whose surrounding
    /// transaction could not commit.
    fn reverse_batch(&self, id: BatchId) -> Result<(), LedgerError>;
}

#[derive(Debug, Default)]
struct LedgerState {
    balances: HashMap<UserId, Quote>,
    applied: HashMap<BatchId, LedgerBatch>,
}

impl LedgerState {
    fn balance(&self, user_id: UserId) -> Quote {
        self.balances.get(&user_id).copied().unwrap_or_default()
    }

    /// A user may not end a batch overdrawn if the batch locks margin for
    /// them. settlement-only batches may leave a deficit (losses beyond margin).
    fn check(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        let mut projected: HashMap<UserId, (Quote, bool)> = HashMap::new();
        for entry in &batch.entries {
            let slot = projected
                .entry(entry.user_id)
                .or_insert_with(|| (self.balance(entry.user_id), false));
            slot.0 = slot.0.add(entry.delta);
            slot.1 |= entry.reason == LedgerReason::MarginLock;
        }

        for (user_id, (after, locks_margin)) in projected {
            if locks_margin && after.is_negative() {
                let available = self.balance(user_id);
                return Err(LedgerError::InsufficientFunds {
                    user_id,
                    required: available.sub(after),
                    available,
                });
            }
        }
        Ok(())
    }

    fn apply(&mut self, entries: &[LedgerEntry]) {
        for entry in entries {
            let balance = self.balances.entry(entry.user_id).or_default();
            *balance = balance.add(entry.delta);
        }
    }
}

/// In-process ledger for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn credit(&self, user_id: UserId, amount: Quote) {
        let mut state = self.state.lock();
        state.apply(&[LedgerEntry::new(user_id, amount, LedgerReason::ExternalCredit)]);
    }

    pub fn balances(&self) -> HashMap<UserId, Quote> {
        self.state.lock().balances.clone()
    }

    pub fn total_balance(&self) -> Quote {
        self.state.lock().balances.values().sum()
    }
}

impl AccountLedger for InMemoryLedger {
    fn balance(&self, user_id: UserId) -> Result<Quote, LedgerError> {
        Ok(self.state.lock().balance(user_id))
    }

    fn adjust_balance(&self, entry: &LedgerEntry) -> Result<Quote, LedgerError> {
        let mut state = self.state.lock();
        let current = state.balance(entry.user_id);
        let after = current.add(entry.delta);
        if after.is_negative() && entry.delta.is_negative() {
            return Err(LedgerError::InsufficientFunds {
                user_id: entry.user_id,
                required: entry.delta.abs(),
                available: current,
            });
        }
        state.apply(std::slice::from_ref(entry));
        Ok(after)
    }

    fn apply_batch(&self, batch: &LedgerBatch) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        if state.applied.contains_key(&batch.id) {
            debug!(batch = batch.id.0, "ledger batch already applied");
            return Ok(());
        }
        state.check(batch)?;
        state.apply(&batch.entries);
        state.applied.insert(batch.id, batch.clone());
        Ok(())
    }

    fn reverse_batch(&self, id: BatchId) -> Result<(), LedgerError> {
        let mut state = self.state.lock();
        let batch = state.applied.remove(&id).ok_or(LedgerError::UnknownBatch(id))?;
        let reversal: Vec<LedgerEntry> = batch
            .entries
            .iter()
            .map(|e| LedgerEntry::new(e.user_id, e.delta.negate(), e.reason))
            .collect();
        state.apply(&reversal);
        warn!(batch = id.0, entries = reversal.len(), "ledger batch reversed");
        Ok(())
    }
}
