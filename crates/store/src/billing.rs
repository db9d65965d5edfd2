//! Billing ledger hook.
//!
//! Usage is billed from the persisted `assistant_response_end` record, not
//! from the live stream: the record is written exactly once per turn, so
//! the deduction happens exactly once per turn. A deduction failure is
//! logged and never fails the save that triggered it.

use std::collections::HashMap;

use parking_lot::RwLock;

use tl_domain::error::{Error, Result};
use tl_domain::message::TokenUsage;

/// Outcome of one deduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeductOutcome {
    pub success: bool,
    /// Dollar cost of this turn.
    pub cost: f64,
    /// Account balance after the deduction.
    pub new_total: f64,
}

#[async_trait::async_trait]
pub trait BillingLedger: Send + Sync {
    async fn deduct(
        &self,
        account_id: &str,
        model: &str,
        usage: &TokenUsage,
        thread_id: &str,
        message_id: &str,
    ) -> Result<DeductOutcome>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory reference ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-1M-token pricing for one model family.
#[derive(Debug, Clone)]
pub struct ModelPricing {
    pub name_contains: &'static str,
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_creation_per_million: f64,
}

const PRICING: &[ModelPricing] = &[
    ModelPricing {
        name_contains: "claude",
        input_per_million: 3.0,
        output_per_million: 15.0,
        cache_read_per_million: 0.30,
        cache_creation_per_million: 3.75,
    },
    ModelPricing {
        name_contains: "gpt-4o",
        input_per_million: 2.5,
        output_per_million: 10.0,
        cache_read_per_million: 1.25,
        cache_creation_per_million: 0.0,
    },
    ModelPricing {
        name_contains: "gemini",
        input_per_million: 1.25,
        output_per_million: 5.0,
        cache_read_per_million: 0.31,
        cache_creation_per_million: 0.0,
    },
];

const DEFAULT_PRICING: ModelPricing = ModelPricing {
    name_contains: "",
    input_per_million: 1.0,
    output_per_million: 2.0,
    cache_read_per_million: 0.1,
    cache_creation_per_million: 0.0,
};

fn pricing_for(model: &str) -> &'static ModelPricing {
    let lower = model.to_lowercase();
    PRICING
        .iter()
        .find(|p| lower.contains(p.name_contains))
        .unwrap_or(&DEFAULT_PRICING)
}

/// Dollar cost of one turn's usage. Cached prompt tokens are billed at
/// their own rates; `prompt_tokens` excludes them on providers that report
/// cache figures.
pub fn token_cost(model: &str, usage: &TokenUsage) -> f64 {
    let p = pricing_for(model);
    let m = 1_000_000.0;
    usage.prompt_tokens as f64 * p.input_per_million / m
        + usage.completion_tokens as f64 * p.output_per_million / m
        + usage.cache_read_input_tokens as f64 * p.cache_read_per_million / m
        + usage.cache_creation_input_tokens as f64 * p.cache_creation_per_million / m
}

/// In-memory ledger for embedding and tests.
#[derive(Default)]
pub struct MemoryLedger {
    balances: RwLock<HashMap<String, f64>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, account_id: &str, amount: f64) {
        self.balances.write().insert(account_id.to_string(), amount);
    }

    pub fn balance(&self, account_id: &str) -> f64 {
        self.balances.read().get(account_id).copied().unwrap_or(0.0)
    }
}

#[async_trait::async_trait]
impl BillingLedger for MemoryLedger {
    async fn deduct(
        &self,
        account_id: &str,
        model: &str,
        usage: &TokenUsage,
        _thread_id: &str,
        _message_id: &str,
    ) -> Result<DeductOutcome> {
        let cost = token_cost(model, usage);
        let mut balances = self.balances.write();
        let balance = balances.entry(account_id.to_string()).or_insert(0.0);
        *balance -= cost;
        Ok(DeductOutcome {
            success: true,
            cost,
            new_total: *balance,
        })
    }
}

/// A ledger whose deductions always fail, for exercising the
/// failure-is-not-fatal path.
pub struct FailingLedger;

#[async_trait::async_trait]
impl BillingLedger for FailingLedger {
    async fn deduct(
        &self,
        _account_id: &str,
        _model: &str,
        _usage: &TokenUsage,
        _thread_id: &str,
        _message_id: &str,
    ) -> Result<DeductOutcome> {
        Err(Error::Other("ledger unavailable".into()))
    }
}
