//! Switchboard - Multi-Tenant Agent Hosting Engine
//!
//! Hosts conversational agents for many tenants on one process: each
//! agent gets a model, a prompt, and an allow-listed set of integration
//! actions, and the engine drives the tool-calling loop between them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Entry Surfaces                           │
//! │   ┌──────────────────┐        ┌───────────────────────────┐  │
//! │   │ Orchestrator     │        │ Protocol Dispatcher (MCP) │  │
//! │   │ run_turn / stream│        │ JSON-RPC over HTTP        │  │
//! │   └────────┬─────────┘        └────────────┬──────────────┘  │
//! └────────────┼───────────────────────────────┼─────────────────┘
//!              ▼                               ▼
//!      ┌───────────────┐              ┌────────────────┐
//!      │ Provider      │              │ Action         │
//!      │ Resolver      │              │ Registry       │
//!      │ Trimmer, Cost │              │ + Executor     │
//!      └───────────────┘              └────────────────┘
//! ```
//!
//! Persistence, auth, status delivery, templating, and workspace search
//! are collaborator traits ([`collab`]); the engine holds no global
//! state beyond explicit per-profile caches.

pub mod collab;
pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod executor;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod registry;
pub mod testing;
pub mod trim;

pub use config::EngineConfig;
pub use error::{Error, Result};

/// Re-export commonly used types.
pub mod prelude {
    pub use crate::collab::{
        ActionCatalog, ActionMeta, AttachmentFetcher, CostLedger, SessionProfile, SessionStore,
        StatusPublisher, TemplateRenderer,
    };
    pub use crate::config::EngineConfig;
    pub use crate::context::{ExecutionContext, SessionRef};
    pub use crate::cost::{CostAccountant, CostRecord, TurnMode};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ActionExecutor, ExecutionRecord, ExecutionStatus};
    pub use crate::llm::{ChatMessage, ModelProvider, ProviderResolver, TokenUsage, ToolCall};
    pub use crate::orchestrator::{Orchestrator, TurnEvent, TurnInput, TurnOutput};
    pub use crate::registry::{
        build_tool_set, Action, ActionResult, BundleContext, BundleRegistry, IntegrationBundle,
        ParamSchema, ToolSet, ToolSetCache,
    };
}
