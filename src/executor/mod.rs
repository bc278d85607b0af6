//! Action executor.
//!
//! Takes one model-requested tool call, resolves it against a tool set,
//! interpolates session placeholders into the arguments, runs the action,
//! and reports lifecycle status to the publisher. The executor never
//! returns an error to the loop driving it: every failure mode collapses
//! into a failed record plus an error-carrying string payload the model
//! can read as a tool result.

mod interpolate;
mod record;

pub use interpolate::interpolate;
pub use record::{ExecutionRecord, ExecutionStatus};

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::warn;

use crate::collab::{ActionCatalog, ActionMeta, SessionStore, StatusPublisher, TemplateRenderer};
use crate::context::{ExecutionContext, SessionRef};
use crate::error::{ExecutionError, Result};
use crate::llm::ToolCall;
use crate::registry::ToolSet;

/// What one invocation produced: the terminal record plus the string
/// payload fed back to the model.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub record: ExecutionRecord,
    pub content: String,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.record.status == ExecutionStatus::Completed
    }
}

/// Executes actions against a tool set.
pub struct ActionExecutor {
    sessions: Arc<dyn SessionStore>,
    catalog: Arc<dyn ActionCatalog>,
    renderer: Arc<dyn TemplateRenderer>,
    publisher: Arc<dyn StatusPublisher>,
}

impl ActionExecutor {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        catalog: Arc<dyn ActionCatalog>,
        renderer: Arc<dyn TemplateRenderer>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self {
            sessions,
            catalog,
            renderer,
            publisher,
        }
    }

    /// Run one tool call. Never returns an error: any failure becomes a
    /// failed record and an error payload.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        tools: &ToolSet,
        call: &ToolCall,
    ) -> ExecutionOutcome {
        let Some(tool) = tools.get(&call.name) else {
            let qualified = degraded_qualified_id(&call.name);
            let message = format!("Action {} not found", call.name);
            let mut record = ExecutionRecord::started(
                &qualified,
                ActionMeta::degraded(&qualified),
                call.arguments.clone(),
            );
            record.fail(&message);
            self.publish(ctx, &record).await;
            return ExecutionOutcome {
                record,
                content: error_content("ActionNotFound", &message),
            };
        };

        let meta = self
            .catalog
            .describe_action(&tool.qualified_id, &ctx.language)
            .await
            .unwrap_or_else(|| ActionMeta::degraded(&tool.qualified_id));

        let arguments = match ctx.session.persisted() {
            Some(session_id) => {
                interpolate(self.renderer.as_ref(), session_id, call.arguments.clone()).await
            }
            None => call.arguments.clone(),
        };

        let mut record =
            ExecutionRecord::started(&tool.qualified_id, meta.clone(), arguments.clone());
        self.publish(ctx, &record).await;

        // Long-running search actions get extra progress signal around the
        // real call, independent of its own status.
        let mut search_progress = if is_file_search(&tool.action_name, &meta) {
            let progress = ExecutionRecord::started(&tool.qualified_id, meta.clone(), Value::Null);
            self.publish(ctx, &progress).await;
            Some(progress)
        } else {
            None
        };

        let outcome = if let Err(issues) = tool.validator.validate(&arguments) {
            let reason = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            record.fail(&reason);
            self.publish(ctx, &record).await;
            ExecutionOutcome {
                content: error_content("ValidationError", &reason),
                record,
            }
        } else {
            match tool.action.run(ctx, arguments).await {
                crate::registry::ActionResult::Success { payload } => {
                    let content = success_content(&payload);
                    record.complete(payload);
                    self.publish(ctx, &record).await;
                    ExecutionOutcome { record, content }
                }
                crate::registry::ActionResult::Failure { error } => {
                    record.fail(&error);
                    self.publish(ctx, &record).await;
                    ExecutionOutcome {
                        content: error_content("ActionFailed", &error),
                        record,
                    }
                }
            }
        };

        if let Some(progress) = search_progress.as_mut() {
            progress.complete(Value::Null);
            self.publish(ctx, progress).await;
        }

        outcome
    }

    /// Legacy entry point: derive the execution context from session state
    /// first. Rejects malformed session references immediately; the
    /// never-throws guarantee applies only past context derivation.
    pub async fn execute_for_session(
        &self,
        tools: &ToolSet,
        call: &ToolCall,
        session: &str,
        tenant_id: &str,
    ) -> Result<ExecutionOutcome> {
        let session_ref = SessionRef::parse(session)
            .ok_or_else(|| ExecutionError::InvalidSession(session.to_string()))?;
        let ctx = match session_ref {
            SessionRef::Stateless => ExecutionContext::stateless(tenant_id, "", ""),
            SessionRef::Persisted(id) => {
                let profile = self.sessions.context_for_session(id).await?;
                ExecutionContext::new(
                    profile.tenant_id,
                    session_ref,
                    profile.user_id,
                    profile.agent_id,
                    profile.language,
                )
            }
        };
        Ok(self.execute(&ctx, tools, call).await)
    }

    /// Best-effort status publication. Stateless invocations have no one
    /// to notify; publisher failures are logged and discarded.
    async fn publish(&self, ctx: &ExecutionContext, record: &ExecutionRecord) {
        let Some(session_id) = ctx.session.persisted() else {
            return;
        };
        if let Err(err) = self.publisher.publish(session_id, record).await {
            warn!(
                session = %session_id,
                action = %record.action_id,
                error = %err,
                "status publication failed"
            );
        }
    }
}

/// Best-effort inverse of the `bundle_action` namespacing, for building
/// degraded metadata when a tool is unknown.
fn degraded_qualified_id(model_name: &str) -> String {
    match model_name.split_once('_') {
        Some((bundle, action)) => format!("{}/{}", bundle, action),
        None => model_name.to_string(),
    }
}

fn is_file_search(action_name: &str, meta: &ActionMeta) -> bool {
    let name = action_name.to_lowercase();
    if name.contains("filesearch") || name.contains("file_search") {
        return true;
    }
    let haystack = format!("{} {}", meta.title, meta.description).to_lowercase();
    haystack.contains("file search") || haystack.contains("document search")
}

fn success_content(payload: &Value) -> String {
    let empty = match payload {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    };
    if empty {
        return "Action completed successfully.".to_string();
    }
    match payload {
        Value::String(s) => s.clone(),
        other => serde_json::to_string(other).unwrap_or_else(|_| other.to_string()),
    }
}

fn error_content(name: &str, message: &str) -> String {
    json!({"error": {"name": name, "message": message}}).to_string()
}
