//! Action registry: integration bundles, tool-set construction, and the
//! per-profile tool-set cache.
//!
//! A *tool set* is the model-facing view of the actions available to one
//! agent profile. Building it walks every registered bundle, namespaces
//! each action as `bundle_action`, intersects with the profile's allow
//! list, and compiles each parameter schema into a validator stored next
//! to the action.

pub mod action;
pub mod bundle;
pub mod cache;
pub mod schema;

pub use action::{Action, ActionResult};
pub use bundle::{BundleContext, BundleFactory, BundleRegistry, IntegrationBundle};
pub use cache::ToolSetCache;
pub use schema::{CompiledValidator, ParamSchema, ParamType, ValidationIssue};

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::warn;

use crate::llm::ToolDefinition;

/// One action as exposed to models, with its precompiled validator.
#[derive(Clone)]
pub struct RegisteredTool {
    /// Model-facing name: `bundle_action`.
    pub model_name: String,
    /// Qualified id used by allow lists and catalogs: `bundle/action`.
    pub qualified_id: String,
    pub bundle: String,
    pub action_name: String,
    pub description: String,
    /// JSON Schema rendering of the action's parameters.
    pub parameters: serde_json::Value,
    pub validator: Arc<CompiledValidator>,
    pub action: Arc<dyn Action>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("model_name", &self.model_name)
            .field("qualified_id", &self.qualified_id)
            .finish()
    }
}

/// The tools available to one agent profile, keyed by model-facing name.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, RegisteredTool>,
}

impl ToolSet {
    pub fn get(&self, model_name: &str) -> Option<&RegisteredTool> {
        self.tools.get(model_name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|tool| ToolDefinition {
                name: tool.model_name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Build the tool set for one profile.
///
/// Bundles initialize concurrently, each against the requesting identity.
/// A bundle that fails to initialize is logged and skipped; it never
/// poisons the rest of the set. `allow_list` holds qualified
/// `bundle/action` ids; `None` means everything is allowed.
pub async fn build_tool_set(
    registry: &BundleRegistry,
    ctx: &BundleContext,
    allow_list: Option<&[String]>,
) -> ToolSet {
    let inits = registry.bundles().iter().map(|bundle| async move {
        let name = bundle.name().to_string();
        (name, bundle.actions(ctx).await)
    });

    let mut tools = BTreeMap::new();
    for (bundle_name, outcome) in join_all(inits).await {
        let actions = match outcome {
            Ok(actions) => actions,
            Err(err) => {
                warn!(bundle = %bundle_name, error = %err, "integration bundle failed to initialize, skipping");
                continue;
            }
        };
        for action in actions {
            let qualified_id = format!("{}/{}", bundle_name, action.name());
            if let Some(allowed) = allow_list {
                if !allowed.iter().any(|id| id == &qualified_id) {
                    continue;
                }
            }
            let model_name = format!("{}_{}", bundle_name, action.name());
            if tools.contains_key(&model_name) {
                warn!(tool = %model_name, bundle = %bundle_name, "duplicate tool name, dropping later registration");
                continue;
            }
            let schema = action.schema();
            tools.insert(
                model_name.clone(),
                RegisteredTool {
                    model_name,
                    qualified_id,
                    bundle: bundle_name.clone(),
                    action_name: action.name().to_string(),
                    description: action.description().to_string(),
                    parameters: schema.to_json_schema(),
                    validator: Arc::new(schema.compile()),
                    action,
                },
            );
        }
    }

    ToolSet { tools }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::error::RegistryError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoAction {
        name: &'static str,
    }

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "echoes its arguments"
        }

        fn schema(&self) -> ParamSchema {
            ParamSchema::object().with_property("text", ParamSchema::string("Text to echo"), true)
        }

        async fn run(&self, _ctx: &ExecutionContext, arguments: Value) -> ActionResult {
            ActionResult::success(arguments)
        }
    }

    struct StaticBundle {
        name: &'static str,
        actions: Vec<&'static str>,
    }

    #[async_trait]
    impl IntegrationBundle for StaticBundle {
        fn name(&self) -> &str {
            self.name
        }

        async fn actions(
            &self,
            _ctx: &BundleContext,
        ) -> Result<Vec<Arc<dyn Action>>, RegistryError> {
            Ok(self
                .actions
                .iter()
                .map(|name| Arc::new(EchoAction { name }) as Arc<dyn Action>)
                .collect())
        }
    }

    struct BrokenBundle;

    #[async_trait]
    impl IntegrationBundle for BrokenBundle {
        fn name(&self) -> &str {
            "broken"
        }

        async fn actions(
            &self,
            _ctx: &BundleContext,
        ) -> Result<Vec<Arc<dyn Action>>, RegistryError> {
            Err(RegistryError::BundleInit {
                bundle: "broken".into(),
                reason: "missing base url".into(),
            })
        }
    }

    struct IdentityCapturingBundle {
        seen: Arc<std::sync::Mutex<Option<BundleContext>>>,
    }

    #[async_trait]
    impl IntegrationBundle for IdentityCapturingBundle {
        fn name(&self) -> &str {
            "audit"
        }

        async fn actions(
            &self,
            ctx: &BundleContext,
        ) -> Result<Vec<Arc<dyn Action>>, RegistryError> {
            *self.seen.lock().unwrap() = Some(ctx.clone());
            Ok(vec![Arc::new(EchoAction { name: "log" })])
        }
    }

    fn ctx() -> BundleContext {
        BundleContext::new("acme", "agent-1", "user-1")
    }

    fn registry() -> BundleRegistry {
        let mut registry = BundleRegistry::new();
        registry.register(Arc::new(StaticBundle {
            name: "jira",
            actions: vec!["fetchTickets", "createTicket"],
        }));
        registry.register(Arc::new(StaticBundle {
            name: "web",
            actions: vec!["search"],
        }));
        registry
    }

    #[tokio::test]
    async fn namespaced_names_and_qualified_ids() {
        let set = build_tool_set(&registry(), &ctx(), None).await;
        assert_eq!(set.len(), 3);
        let tool = set.get("jira_fetchTickets").unwrap();
        assert_eq!(tool.qualified_id, "jira/fetchTickets");
        assert_eq!(tool.bundle, "jira");
        assert_eq!(tool.action_name, "fetchTickets");
    }

    #[tokio::test]
    async fn allow_list_intersects() {
        let allowed = vec!["jira/fetchTickets".to_string(), "web/search".to_string()];
        let set = build_tool_set(&registry(), &ctx(), Some(&allowed)).await;
        assert_eq!(set.len(), 2);
        assert!(set.get("jira_createTicket").is_none());
    }

    #[tokio::test]
    async fn empty_allow_list_yields_empty_set() {
        let set = build_tool_set(&registry(), &ctx(), Some(&[])).await;
        assert!(set.is_empty());
    }

    #[tokio::test]
    async fn bundles_receive_the_request_identity() {
        let seen = Arc::new(std::sync::Mutex::new(None));
        let mut registry = BundleRegistry::new();
        registry.register(Arc::new(IdentityCapturingBundle {
            seen: Arc::clone(&seen),
        }));
        let set = build_tool_set(&registry, &ctx(), None).await;
        assert!(set.get("audit_log").is_some());
        let captured = seen.lock().unwrap().clone().unwrap();
        assert_eq!(captured.tenant_id, "acme");
        assert_eq!(captured.agent_id, "agent-1");
        assert_eq!(captured.user_id, "user-1");
    }

    #[tokio::test]
    async fn factory_registration_builds_the_bundle() {
        let factory: BundleFactory = || {
            Arc::new(StaticBundle {
                name: "web",
                actions: vec!["search"],
            })
        };
        let mut registry = BundleRegistry::new();
        registry.register_factory(factory);
        let set = build_tool_set(&registry, &ctx(), None).await;
        assert!(set.get("web_search").is_some());
    }

    #[tokio::test]
    async fn broken_bundle_is_contained() {
        let mut registry = registry();
        registry.register(Arc::new(BrokenBundle));
        let set = build_tool_set(&registry, &ctx(), None).await;
        assert_eq!(set.len(), 3);
    }

    #[tokio::test]
    async fn definitions_carry_json_schema() {
        let set = build_tool_set(&registry(), &ctx(), None).await;
        let defs = set.definitions();
        let def = defs.iter().find(|d| d.name == "web_search").unwrap();
        assert_eq!(def.parameters["type"], json!("object"));
        assert_eq!(def.parameters["required"][0], json!("text"));
    }
}
