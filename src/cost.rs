//! Cost accounting.
//!
//! Converts the aggregated token usage of one conversational turn into a
//! monetary estimate and forwards a single record to the external ledger.
//! A ledger failure is logged, never surfaced: accounting must not block
//! the response path.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::collab::CostLedger;
use crate::llm::TokenUsage;

/// Whether a turn was served as a stream or a batch response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnMode {
    Streaming,
    Batch,
}

/// One turn's usage event, as forwarded to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub tenant_id: String,
    pub agent_id: String,
    pub session_id: Option<Uuid>,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub total_cost: Decimal,
    pub duration_ms: u64,
    pub tool_call_count: u32,
    pub mode: TurnMode,
}

/// Cost per 1K input/output tokens for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPrice {
    pub input_per_1k: Decimal,
    pub output_per_1k: Decimal,
}

const PRICE_TABLE: &[(&str, ModelPrice)] = &[
    (
        "gpt-4o-mini",
        ModelPrice {
            input_per_1k: dec!(0.00015),
            output_per_1k: dec!(0.0006),
        },
    ),
    (
        "gpt-4o",
        ModelPrice {
            input_per_1k: dec!(0.0025),
            output_per_1k: dec!(0.01),
        },
    ),
    (
        "o4-mini",
        ModelPrice {
            input_per_1k: dec!(0.0011),
            output_per_1k: dec!(0.0044),
        },
    ),
    (
        "o3",
        ModelPrice {
            input_per_1k: dec!(0.002),
            output_per_1k: dec!(0.008),
        },
    ),
    (
        "claude-sonnet-4",
        ModelPrice {
            input_per_1k: dec!(0.003),
            output_per_1k: dec!(0.015),
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPrice {
            input_per_1k: dec!(0.0008),
            output_per_1k: dec!(0.004),
        },
    ),
];

/// Fallback for models missing from the table.
const DEFAULT_PRICE: ModelPrice = ModelPrice {
    input_per_1k: dec!(0.003),
    output_per_1k: dec!(0.015),
};

/// Price for a model: exact table match first, then base-name prefix
/// (handles dated variants like `claude-sonnet-4-20250514`), then the
/// global default.
pub fn price_for(model: &str) -> ModelPrice {
    for (name, price) in PRICE_TABLE {
        if model == *name {
            return *price;
        }
    }
    for (name, price) in PRICE_TABLE {
        if model.starts_with(*name) {
            return *price;
        }
    }
    DEFAULT_PRICE
}

/// Identity of the party a turn is billed to.
#[derive(Debug, Clone)]
pub struct CostSubject {
    pub tenant_id: String,
    pub agent_id: String,
    pub session_id: Option<Uuid>,
    pub user_id: String,
}

/// Records one cost event per orchestration turn.
pub struct CostAccountant {
    ledger: Arc<dyn CostLedger>,
}

impl CostAccountant {
    pub fn new(ledger: Arc<dyn CostLedger>) -> Self {
        Self { ledger }
    }

    /// Compute a turn's cost from its aggregated usage and forward it to
    /// the ledger. A ledger failure is logged and swallowed; the computed
    /// record is returned either way.
    #[allow(clippy::too_many_arguments)]
    pub async fn record(
        &self,
        subject: &CostSubject,
        provider: &str,
        model: &str,
        usage: TokenUsage,
        duration: Duration,
        tool_call_count: u32,
        mode: TurnMode,
    ) -> CostRecord {
        let record = compute_record(subject, provider, model, usage, duration, tool_call_count, mode);
        if let Err(err) = self.ledger.append(&record).await {
            warn!(
                tenant = %record.tenant_id,
                model = %record.model,
                error = %err,
                "cost ledger append failed"
            );
        }
        record
    }
}

fn compute_record(
    subject: &CostSubject,
    provider: &str,
    model: &str,
    usage: TokenUsage,
    duration: Duration,
    tool_call_count: u32,
    mode: TurnMode,
) -> CostRecord {
    let price = price_for(model);
    let per_k = dec!(1000);
    let input_cost = Decimal::from(usage.input_tokens) * price.input_per_1k / per_k;
    let output_cost = Decimal::from(usage.output_tokens) * price.output_per_1k / per_k;
    CostRecord {
        tenant_id: subject.tenant_id.clone(),
        agent_id: subject.agent_id.clone(),
        session_id: subject.session_id,
        user_id: subject.user_id.clone(),
        provider: provider.to_string(),
        model: model.to_string(),
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.total(),
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
        duration_ms: duration.as_millis() as u64,
        tool_call_count,
        mode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollabError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[test]
    fn exact_model_price_wins() {
        assert_eq!(price_for("gpt-4o").input_per_1k, dec!(0.0025));
        assert_eq!(price_for("gpt-4o-mini").input_per_1k, dec!(0.00015));
    }

    #[test]
    fn dated_variant_falls_back_to_base_name() {
        assert_eq!(
            price_for("claude-sonnet-4-20250514"),
            price_for("claude-sonnet-4")
        );
    }

    #[test]
    fn unknown_model_uses_default() {
        assert_eq!(price_for("mystery-model-9000"), DEFAULT_PRICE);
    }

    fn subject() -> CostSubject {
        CostSubject {
            tenant_id: "acme".into(),
            agent_id: "agent-1".into(),
            session_id: Some(Uuid::new_v4()),
            user_id: "user-1".into(),
        }
    }

    #[test]
    fn cost_math_uses_per_1k_rates() {
        let record = compute_record(
            &subject(),
            "openai",
            "gpt-4o",
            TokenUsage {
                input_tokens: 2000,
                output_tokens: 1000,
            },
            Duration::from_millis(1500),
            2,
            TurnMode::Batch,
        );
        assert_eq!(record.input_cost, dec!(0.005));
        assert_eq!(record.output_cost, dec!(0.01));
        assert_eq!(record.total_cost, dec!(0.015));
        assert_eq!(record.total_tokens, 3000);
        assert_eq!(record.duration_ms, 1500);
    }

    #[derive(Default)]
    struct FailingLedger {
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl CostLedger for FailingLedger {
        async fn append(&self, _record: &CostRecord) -> Result<(), CollabError> {
            *self.attempts.lock().unwrap() += 1;
            Err(CollabError::Unavailable("ledger down".into()))
        }
    }

    #[tokio::test]
    async fn ledger_failure_is_swallowed() {
        let ledger = Arc::new(FailingLedger::default());
        let accountant = CostAccountant::new(Arc::clone(&ledger) as Arc<dyn CostLedger>);
        let record = accountant
            .record(
                &subject(),
                "openai",
                "gpt-4o",
                TokenUsage {
                    input_tokens: 10,
                    output_tokens: 5,
                },
                Duration::from_millis(10),
                0,
                TurnMode::Streaming,
            )
            .await;
        assert_eq!(*ledger.attempts.lock().unwrap(), 1);
        assert_eq!(record.total_tokens, 15);
    }
}
