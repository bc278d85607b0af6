use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::registry::schema::ParamSchema;

/// Outcome of running an action. Actions report failure as data; the
/// executor turns it into a failed execution record rather than an error
/// bubbling into the agent loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ActionResult {
    Success {
        #[serde(default)]
        payload: Value,
    },
    Failure {
        error: String,
    },
}

impl ActionResult {
    pub fn success(payload: Value) -> Self {
        Self::Success { payload }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A single invocable operation exposed by an integration bundle.
///
/// `name` is the bare action name; the registry namespaces it with the
/// bundle name when building the model-facing tool set.
#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Declarative parameter schema, compiled once per tool set.
    fn schema(&self) -> ParamSchema;

    /// Execute with already-validated arguments. Implementations report
    /// problems through `ActionResult::Failure`, not panics.
    async fn run(&self, ctx: &ExecutionContext, arguments: Value) -> ActionResult;
}
