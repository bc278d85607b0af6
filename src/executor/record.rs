use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::collab::ActionMeta;

/// Lifecycle state of one action invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Started,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Ephemeral record of one action invocation, forwarded to the status
/// publisher at each lifecycle transition.
///
/// Status is monotonic: once terminal, later transitions are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: Uuid,
    /// Qualified `bundle/action` id.
    pub action_id: String,
    pub meta: ActionMeta,
    /// Arguments after interpolation.
    pub arguments: Value,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn started(action_id: impl Into<String>, meta: ActionMeta, arguments: Value) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            action_id: action_id.into(),
            meta,
            arguments,
            status: ExecutionStatus::Started,
            payload: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn complete(&mut self, payload: Value) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Completed;
        self.payload = Some(payload);
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn complete_is_terminal() {
        let mut record =
            ExecutionRecord::started("jira/fetchTickets", ActionMeta::degraded("jira/fetchTickets"), json!({}));
        record.complete(json!({"tickets": []}));
        assert_eq!(record.status, ExecutionStatus::Completed);
        record.fail("too late");
        assert_eq!(record.status, ExecutionStatus::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn fail_is_terminal() {
        let mut record =
            ExecutionRecord::started("jira/fetchTickets", ActionMeta::degraded("jira/fetchTickets"), json!({}));
        record.fail("boom");
        record.complete(json!({}));
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert!(record.payload.is_none());
    }

    #[test]
    fn degraded_meta_splits_qualified_id() {
        let meta = ActionMeta::degraded("jira/fetchTickets");
        assert_eq!(meta.service_name, "jira");
        assert_eq!(meta.title, "fetchTickets");
    }
}
