//! Credit reservation/finalization lifecycle (spec §8, component C7).
//!
//! The engine never touches a ledger directly — it only calls
//! [`CreditService`], an external collaborator implemented against real
//! storage by `db`. Everything here is pure accounting: how much to
//! reserve up front, whether a given node may still run, and how to
//! settle the reservation once the execution ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::executor::{accrued_credits, TokenUsage};
use crate::model::{BuiltWorkflow, NodeType};

/// A pre-flight reservation request and the service's answer.
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    pub execution_id: Uuid,
    pub reserved: i64,
}

/// External collaborator owning the actual credit ledger. Implemented by
/// `db` against Postgres; engine tests use an in-memory stand-in.
#[async_trait]
pub trait CreditService: Send + Sync {
    /// Reserve `amount` credits for `execution_id` before any node runs.
    /// Returns `Ok(false)` (not an error) if the account can't cover the
    /// reservation — the caller decides whether to refuse the execution.
    async fn reserve(&self, execution_id: Uuid, amount: i64) -> anyhow::Result<bool>;

    /// Currently available (unreserved) balance for the account backing
    /// `execution_id`.
    async fn available_balance(&self, execution_id: Uuid) -> anyhow::Result<i64>;

    /// Release the outstanding reservation and debit `actual` instead,
    /// once an execution reaches a terminal state.
    async fn finalize(&self, execution_id: Uuid, reserved: i64, actual: i64) -> anyhow::Result<()>;
}

/// Sum of each node's default credit cost across the whole workflow —
/// the pre-flight estimate before any node has actually run (§8.1).
pub fn estimate_cost(workflow: &BuiltWorkflow) -> i64 {
    workflow
        .nodes
        .values()
        .map(|n| crate::executor::default_credit_cost(n.node_type))
        .sum()
}

/// Reservation amount: the estimate plus a 20% buffer (§8.1), rounded up.
pub fn reservation_amount(workflow: &BuiltWorkflow) -> i64 {
    let estimate = estimate_cost(workflow);
    ((estimate as f64) * 1.2).ceil() as i64
}

/// Running tally of credits spent so far in an execution, and the grace
/// overdraft rule that lets an in-flight execution finish its last node
/// even if it slightly overruns the reservation (§8.4).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CreditLedger {
    pub reserved: i64,
    pub accrued: i64,
}

impl CreditLedger {
    pub fn new(reserved: i64) -> Self {
        Self { reserved, accrued: 0 }
    }

    /// True if a node estimated to cost `next_cost` may still be
    /// dispatched: either it fits within what's left of the reservation,
    /// or the overdraft it would cause is under 10% of the reservation
    /// (§8.4 "shouldAllowExecution" grace rule — prevents a workflow from
    /// stalling one node short of completion over a rounding difference).
    pub fn should_allow_execution(&self, next_cost: i64) -> bool {
        let remaining = self.reserved - self.accrued;
        if next_cost <= remaining {
            return true;
        }
        let overdraft = next_cost - remaining;
        let grace = (self.reserved as f64 * 0.10).ceil() as i64;
        overdraft <= grace
    }

    pub fn accrue(&mut self, node_type: NodeType, token_usage: Option<TokenUsage>) {
        self.accrued += accrued_credits(node_type, token_usage);
    }

    /// Residual to release back to the account once the execution is
    /// terminal: whatever part of the reservation wasn't spent. Can be
    /// negative if the grace overdraft was used — callers clamp to 0 and
    /// let `finalize`'s `actual` carry the true debit.
    pub fn residual(&self) -> i64 {
        self.reserved - self.accrued
    }
}

/// An in-memory `CreditService` with a fixed starting balance per
/// execution, useful for engine tests and for callers (the CLI's
/// `execute`/`resume`) that want to run a workflow without a real
/// ledger backing it.
#[derive(Debug)]
pub struct InMemoryCreditService {
    balance: std::sync::Mutex<std::collections::HashMap<Uuid, i64>>,
    starting_balance: i64,
}

impl InMemoryCreditService {
    pub fn new(starting_balance: i64) -> Self {
        Self { balance: std::sync::Mutex::new(std::collections::HashMap::new()), starting_balance }
    }
}

#[async_trait]
impl CreditService for InMemoryCreditService {
    async fn reserve(&self, execution_id: Uuid, amount: i64) -> anyhow::Result<bool> {
        let mut accounts = self.balance.lock().unwrap();
        let balance = accounts.entry(execution_id).or_insert(self.starting_balance);
        if *balance >= amount {
            *balance -= amount;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn available_balance(&self, execution_id: Uuid) -> anyhow::Result<i64> {
        let accounts = self.balance.lock().unwrap();
        Ok(*accounts.get(&execution_id).unwrap_or(&self.starting_balance))
    }

    async fn finalize(&self, execution_id: Uuid, reserved: i64, actual: i64) -> anyhow::Result<()> {
        let mut accounts = self.balance.lock().unwrap();
        let balance = accounts.entry(execution_id).or_insert(self.starting_balance);
        *balance += reserved - actual;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_overdraft_allows_small_overrun() {
        let ledger = CreditLedger { reserved: 100, accrued: 95 };
        // needs 10, only 5 left -> 5 overdraft, grace is ceil(10) = 10
        assert!(ledger.should_allow_execution(10));
    }

    #[test]
    fn grace_overdraft_rejects_large_overrun() {
        let ledger = CreditLedger { reserved: 100, accrued: 50 };
        // needs 80, 50 left -> 30 overdraft, grace is 10
        assert!(!ledger.should_allow_execution(80));
    }

    #[test]
    fn fits_within_remaining_always_allowed() {
        let ledger = CreditLedger { reserved: 100, accrued: 10 };
        assert!(ledger.should_allow_execution(90));
    }

    #[test]
    fn accrue_tracks_llm_token_cost() {
        let mut ledger = CreditLedger::new(50);
        ledger.accrue(NodeType::Llm, Some(TokenUsage { input_tokens: 300, output_tokens: 0 }));
        assert_eq!(ledger.accrued, 3);
        assert_eq!(ledger.residual(), 47);
    }

    #[tokio::test]
    async fn in_memory_credit_service_tracks_balance_per_execution() {
        let service = InMemoryCreditService::new(100);
        let execution_id = Uuid::new_v4();

        assert!(service.reserve(execution_id, 60).await.unwrap());
        assert_eq!(service.available_balance(execution_id).await.unwrap(), 40);
        assert!(!service.reserve(execution_id, 50).await.unwrap());

        service.finalize(execution_id, 60, 45).await.unwrap();
        assert_eq!(service.available_balance(execution_id).await.unwrap(), 55);

        let other_execution = Uuid::new_v4();
        assert_eq!(service.available_balance(other_execution).await.unwrap(), 100);
    }
}
