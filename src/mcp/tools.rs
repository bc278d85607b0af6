//! Dispatcher tool table.
//!
//! Each tool is a thin adapter: validate arguments against a declared
//! schema, call the backing domain service, and hand the result back as
//! text for the protocol envelope. The table is fixed at construction.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::collab::{AgentDirectory, WorkspaceSearch};
use crate::executor::ActionExecutor;
use crate::mcp::session::Principal;
use crate::registry::{BundleContext, CompiledValidator, ParamSchema, ParamType, ToolSetCache};

const DEFAULT_SEARCH_LIMIT: usize = 10;
const DISPATCHER_AGENT: &str = "dispatcher";

/// Result of one tool call, pre-envelope.
#[derive(Debug, Clone)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
}

/// Failure modes the server maps onto JSON-RPC error codes.
#[derive(Debug)]
pub enum ToolCallError {
    UnknownTool(String),
    InvalidParams(String),
    Internal(String),
}

struct ToolSpec {
    name: &'static str,
    description: &'static str,
    schema: ParamSchema,
    validator: CompiledValidator,
}

impl ToolSpec {
    fn new(name: &'static str, description: &'static str, schema: ParamSchema) -> Self {
        let validator = schema.compile();
        Self {
            name,
            description,
            schema,
            validator,
        }
    }
}

/// The dispatcher's fixed tool set plus the services behind it.
pub struct Toolbox {
    directory: Arc<dyn AgentDirectory>,
    workspace: Arc<dyn WorkspaceSearch>,
    executor: Arc<ActionExecutor>,
    tool_sets: Arc<ToolSetCache>,
    specs: Vec<ToolSpec>,
}

impl Toolbox {
    pub fn new(
        directory: Arc<dyn AgentDirectory>,
        workspace: Arc<dyn WorkspaceSearch>,
        executor: Arc<ActionExecutor>,
        tool_sets: Arc<ToolSetCache>,
    ) -> Self {
        let specs = vec![
            ToolSpec::new(
                "agents_list",
                "List the agents hosted for this tenant.",
                ParamSchema::object(),
            ),
            ToolSpec::new(
                "teams_list",
                "List the agent teams configured for this tenant.",
                ParamSchema::object(),
            ),
            ToolSpec::new(
                "workspace_search",
                "Search the tenant workspace for relevant content.",
                ParamSchema::object()
                    .with_property("query", ParamSchema::string("Search query"), true)
                    .with_property(
                        "limit",
                        ParamSchema::new(ParamType::Integer)
                            .with_description("Maximum number of hits"),
                        false,
                    ),
            ),
            ToolSpec::new(
                "action_execute",
                "Execute a registered action by its tool name.",
                ParamSchema::object()
                    .with_property(
                        "action",
                        ParamSchema::string("Tool name, e.g. jira_fetchTickets"),
                        true,
                    )
                    .with_property(
                        "arguments",
                        ParamSchema::new(ParamType::Object)
                            .with_description("Arguments for the action"),
                        false,
                    )
                    .with_property(
                        "agent_id",
                        ParamSchema::string("Agent whose tool set to execute against"),
                        false,
                    ),
            ),
        ];
        Self {
            directory,
            workspace,
            executor,
            tool_sets,
            specs,
        }
    }

    /// Tool descriptions for `tools/list`.
    pub fn list(&self) -> Value {
        let tools: Vec<Value> = self
            .specs
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "inputSchema": spec.schema.to_json_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Dispatch `tools/call`. Arguments are validated against the tool's
    /// schema before any handler runs.
    pub async fn call(
        &self,
        principal: &Principal,
        name: &str,
        arguments: Value,
    ) -> Result<ToolReply, ToolCallError> {
        let spec = self
            .specs
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| ToolCallError::UnknownTool(name.to_string()))?;

        if let Err(issues) = spec.validator.validate(&arguments) {
            let detail = issues
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ToolCallError::InvalidParams(detail));
        }

        match name {
            "agents_list" => self.agents_list(principal).await,
            "teams_list" => self.teams_list(principal).await,
            "workspace_search" => self.workspace_search(principal, &arguments).await,
            "action_execute" => self.action_execute(principal, &arguments).await,
            other => Err(ToolCallError::UnknownTool(other.to_string())),
        }
    }

    async fn agents_list(&self, principal: &Principal) -> Result<ToolReply, ToolCallError> {
        let agents = self
            .directory
            .list_agents(&principal.tenant_id)
            .await
            .map_err(|err| ToolCallError::Internal(err.to_string()))?;
        Ok(reply_json(&agents)?)
    }

    async fn teams_list(&self, principal: &Principal) -> Result<ToolReply, ToolCallError> {
        let teams = self
            .directory
            .list_teams(&principal.tenant_id)
            .await
            .map_err(|err| ToolCallError::Internal(err.to_string()))?;
        Ok(reply_json(&teams)?)
    }

    async fn workspace_search(
        &self,
        principal: &Principal,
        arguments: &Value,
    ) -> Result<ToolReply, ToolCallError> {
        let query = arguments["query"].as_str().unwrap_or_default();
        let limit = arguments["limit"]
            .as_u64()
            .map(|limit| limit as usize)
            .unwrap_or(DEFAULT_SEARCH_LIMIT);
        let hits = self
            .workspace
            .search(&principal.tenant_id, query, limit)
            .await
            .map_err(|err| ToolCallError::Internal(err.to_string()))?;
        Ok(reply_json(&hits)?)
    }

    async fn action_execute(
        &self,
        principal: &Principal,
        arguments: &Value,
    ) -> Result<ToolReply, ToolCallError> {
        let action = arguments["action"].as_str().unwrap_or_default().to_string();
        let action_arguments = arguments
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let agent_id = arguments["agent_id"]
            .as_str()
            .unwrap_or(DISPATCHER_AGENT)
            .to_string();

        let ctx =
            ExecutionContext::stateless(&principal.tenant_id, &principal.user_id, &agent_id);
        let bundle_ctx = BundleContext::new(&principal.tenant_id, &agent_id, &principal.user_id);
        let tools = self.tool_sets.tool_set(&bundle_ctx, None).await;
        let call = crate::llm::ToolCall {
            id: Uuid::new_v4().to_string(),
            name: action,
            arguments: action_arguments,
        };
        let outcome = self.executor.execute(&ctx, &tools, &call).await;
        let is_error = !outcome.is_success();
        Ok(ToolReply {
            text: outcome.content,
            is_error,
        })
    }
}

fn reply_json<T: serde::Serialize>(value: &T) -> Result<ToolReply, ToolCallError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| ToolCallError::Internal(err.to_string()))?;
    Ok(ToolReply {
        text,
        is_error: false,
    })
}
