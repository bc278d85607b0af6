//! Collaborator interfaces.
//!
//! The engine owns orchestration but delegates persistence, metadata,
//! status fan-out, accounting, and content retrieval to the host through
//! these traits. Hosts wire real backends; tests wire the doubles in
//! [`crate::testing`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CollabError;
use crate::executor::ExecutionRecord;
use crate::llm::ChatMessage;

/// Everything the engine needs to know about a session to run a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProfile {
    pub tenant_id: String,
    pub user_id: String,
    pub agent_id: String,
    /// BCP 47 language tag for display metadata.
    pub language: String,
    /// Qualified `bundle/action` ids this profile may call; `None` means
    /// everything registered.
    pub allowed_action_ids: Option<Vec<String>>,
    /// Provider key ("openai", "anthropic", ...).
    pub model_provider: String,
    pub model_id: String,
    /// Agent system prompt.
    pub prompt_text: String,
    /// Context window budget in tokens for history trimming.
    pub max_tokens: usize,
}

/// Conversation persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve the profile backing a session id.
    async fn context_for_session(&self, session_id: Uuid) -> Result<SessionProfile, CollabError>;

    /// Append one message to the session transcript.
    async fn append_message(
        &self,
        session_id: Uuid,
        message: ChatMessage,
    ) -> Result<(), CollabError>;

    /// Full transcript in chronological order.
    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, CollabError>;
}

/// Display metadata for an action, localized per request language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub service_name: String,
    pub title: String,
    pub description: String,
    pub icon: Option<String>,
}

impl ActionMeta {
    /// Fallback metadata derived from a qualified id when the catalog has
    /// nothing better.
    pub fn degraded(qualified_id: &str) -> Self {
        let (service, action) = qualified_id
            .split_once('/')
            .unwrap_or((qualified_id, qualified_id));
        Self {
            service_name: service.to_string(),
            title: action.to_string(),
            description: String::new(),
            icon: None,
        }
    }
}

/// Localized action metadata lookups.
#[async_trait]
pub trait ActionCatalog: Send + Sync {
    /// `None` when the catalog does not know the action; callers fall back
    /// to [`ActionMeta::degraded`].
    async fn describe_action(&self, qualified_id: &str, language: &str) -> Option<ActionMeta>;
}

/// Best-effort template rendering for `{{placeholder}}` argument values.
///
/// The `{{` delimiter is an engine-level contract: the executor only
/// invokes the renderer for strings containing `{{`, so implementations
/// must use that placeholder syntax to be seen at all.
#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    /// Render a template in the scope of a session. Implementations leave
    /// unknown placeholders untouched rather than failing.
    async fn render(&self, session_id: Uuid, template: &str) -> Result<String, CollabError>;
}

/// Fan-out of execution record lifecycle events.
///
/// Publication is fire-and-forget from the executor's point of view: a
/// failing publisher is logged and never affects the execution outcome.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, session_id: Uuid, record: &ExecutionRecord) -> Result<(), CollabError>;
}

/// Durable cost accounting sink.
#[async_trait]
pub trait CostLedger: Send + Sync {
    async fn append(&self, record: &crate::cost::CostRecord) -> Result<(), CollabError>;
}

/// Fetched attachment bytes plus the content type the source reported.
#[derive(Debug, Clone)]
pub struct FetchedAttachment {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Retrieval of user-attached content by URL.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedAttachment, CollabError>;
}

/// A hosted agent, as listed through the protocol dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// A team of agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub id: String,
    pub name: String,
    pub agent_ids: Vec<String>,
}

/// Tenant-scoped directory of agents and teams.
#[async_trait]
pub trait AgentDirectory: Send + Sync {
    async fn list_agents(&self, tenant_id: &str) -> Result<Vec<AgentSummary>, CollabError>;

    async fn list_teams(&self, tenant_id: &str) -> Result<Vec<TeamSummary>, CollabError>;
}

/// One workspace search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Tenant-scoped workspace content search.
#[async_trait]
pub trait WorkspaceSearch: Send + Sync {
    async fn search(
        &self,
        tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollabError>;
}
