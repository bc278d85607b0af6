//! In-memory collaborator implementations for tests and local runs.
//!
//! Everything here is deliberately simple: state behind a `Mutex`, no
//! I/O. The binary also wires these in when no real backends are
//! configured, so the dispatcher can run standalone.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::collab::{
    ActionCatalog, ActionMeta, AgentDirectory, AgentSummary, AttachmentFetcher, CostLedger,
    FetchedAttachment, SearchHit, SessionProfile, SessionStore, StatusPublisher, TeamSummary,
    TemplateRenderer, WorkspaceSearch,
};
use crate::context::ExecutionContext;
use crate::cost::CostRecord;
use crate::error::{CollabError, ProviderError, RegistryError};
use crate::executor::ExecutionRecord;
use crate::llm::{
    ChatMessage, ModelProvider, ProviderResolver, ToolCompletionRequest, ToolCompletionResponse,
};
use crate::mcp::{Principal, TokenVerifier};
use crate::registry::{Action, ActionResult, BundleContext, IntegrationBundle, ParamSchema};
use std::sync::Arc;

/// Session store holding profiles and transcripts in memory.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<Uuid, (SessionProfile, Vec<ChatMessage>)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session_id: Uuid, profile: SessionProfile) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id, (profile, Vec::new()));
    }

    /// Snapshot of a session's transcript.
    pub fn transcript(&self, session_id: Uuid) -> Vec<ChatMessage> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(_, messages)| messages.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn context_for_session(&self, session_id: Uuid) -> Result<SessionProfile, CollabError> {
        self.sessions
            .lock()
            .unwrap()
            .get(&session_id)
            .map(|(profile, _)| profile.clone())
            .ok_or_else(|| CollabError::NotFound(session_id.to_string()))
    }

    async fn append_message(
        &self,
        session_id: Uuid,
        message: ChatMessage,
    ) -> Result<(), CollabError> {
        let mut sessions = self.sessions.lock().unwrap();
        let (_, messages) = sessions
            .get_mut(&session_id)
            .ok_or_else(|| CollabError::NotFound(session_id.to_string()))?;
        messages.push(message);
        Ok(())
    }

    async fn list_messages(&self, session_id: Uuid) -> Result<Vec<ChatMessage>, CollabError> {
        Ok(self.transcript(session_id))
    }
}

/// Catalog backed by a fixed map of qualified action ids.
#[derive(Default)]
pub struct StaticCatalog {
    entries: HashMap<String, ActionMeta>,
}

impl StaticCatalog {
    pub fn with(mut self, qualified_id: impl Into<String>, meta: ActionMeta) -> Self {
        self.entries.insert(qualified_id.into(), meta);
        self
    }
}

#[async_trait]
impl ActionCatalog for StaticCatalog {
    async fn describe_action(&self, qualified_id: &str, _language: &str) -> Option<ActionMeta> {
        self.entries.get(qualified_id).cloned()
    }
}

/// Renderer substituting from a fixed placeholder map.
#[derive(Default)]
pub struct MapRenderer {
    replacements: HashMap<String, String>,
}

impl MapRenderer {
    pub fn with(mut self, placeholder: impl Into<String>, value: impl Into<String>) -> Self {
        self.replacements.insert(placeholder.into(), value.into());
        self
    }
}

#[async_trait]
impl TemplateRenderer for MapRenderer {
    async fn render(&self, _session_id: Uuid, template: &str) -> Result<String, CollabError> {
        let mut out = template.to_string();
        for (placeholder, value) in &self.replacements {
            out = out.replace(placeholder, value);
        }
        Ok(out)
    }
}

/// Publisher that records everything it is handed.
#[derive(Default)]
pub struct RecordingPublisher {
    records: Mutex<Vec<(Uuid, ExecutionRecord)>>,
}

impl RecordingPublisher {
    pub fn records(&self) -> Vec<(Uuid, ExecutionRecord)> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusPublisher for RecordingPublisher {
    async fn publish(&self, session_id: Uuid, record: &ExecutionRecord) -> Result<(), CollabError> {
        self.records
            .lock()
            .unwrap()
            .push((session_id, record.clone()));
        Ok(())
    }
}

/// Ledger that records appended cost events.
#[derive(Default)]
pub struct RecordingLedger {
    records: Mutex<Vec<CostRecord>>,
}

impl RecordingLedger {
    pub fn records(&self) -> Vec<CostRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl CostLedger for RecordingLedger {
    async fn append(&self, record: &CostRecord) -> Result<(), CollabError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Fetcher serving a fixed url -> bytes map.
#[derive(Default)]
pub struct StaticFetcher {
    files: HashMap<String, FetchedAttachment>,
}

impl StaticFetcher {
    pub fn with(
        mut self,
        url: impl Into<String>,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Self {
        self.files.insert(
            url.into(),
            FetchedAttachment {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl AttachmentFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAttachment, CollabError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| CollabError::NotFound(url.to_string()))
    }
}

/// Model provider that replays a scripted sequence of responses.
pub struct ScriptedProvider {
    provider_key: String,
    model: String,
    script: Mutex<VecDeque<Result<ToolCompletionResponse, ProviderError>>>,
}

impl ScriptedProvider {
    pub fn new(provider_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            model: model.into(),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(self, response: Result<ToolCompletionResponse, ProviderError>) -> Self {
        self.script.lock().unwrap().push_back(response);
        self
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn provider_key(&self) -> &str {
        &self.provider_key
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete_with_tools(
        &self,
        _request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, ProviderError> {
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(ProviderError::InvalidResponse {
                provider: self.provider_key.clone(),
                reason: "script exhausted".to_string(),
            })
        })
    }
}

/// Resolver that always hands back one provider.
pub struct FixedResolver {
    provider: Arc<dyn ModelProvider>,
}

impl FixedResolver {
    pub fn new(provider: Arc<dyn ModelProvider>) -> Self {
        Self { provider }
    }
}

impl ProviderResolver for FixedResolver {
    fn resolve_model(
        &self,
        _provider_key: &str,
        _model_id: &str,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        Ok(Arc::clone(&self.provider))
    }
}

/// Directory with fixed agents and teams.
#[derive(Default)]
pub struct StaticDirectory {
    pub agents: Vec<AgentSummary>,
    pub teams: Vec<TeamSummary>,
}

#[async_trait]
impl AgentDirectory for StaticDirectory {
    async fn list_agents(&self, _tenant_id: &str) -> Result<Vec<AgentSummary>, CollabError> {
        Ok(self.agents.clone())
    }

    async fn list_teams(&self, _tenant_id: &str) -> Result<Vec<TeamSummary>, CollabError> {
        Ok(self.teams.clone())
    }
}

/// Workspace search over a fixed hit list.
#[derive(Default)]
pub struct StaticWorkspace {
    pub hits: Vec<SearchHit>,
}

#[async_trait]
impl WorkspaceSearch for StaticWorkspace {
    async fn search(
        &self,
        _tenant_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, CollabError> {
        Ok(self
            .hits
            .iter()
            .filter(|hit| query.is_empty() || hit.title.contains(query) || hit.snippet.contains(query))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Verifier accepting a fixed token -> principal map.
#[derive(Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, Principal>,
}

impl StaticVerifier {
    pub fn with(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Option<Principal> {
        self.tokens.get(token).cloned()
    }
}

/// Action backed by a plain function.
pub struct FnAction {
    name: &'static str,
    description: &'static str,
    schema: ParamSchema,
    handler: Box<dyn Fn(Value) -> ActionResult + Send + Sync>,
}

impl FnAction {
    pub fn new(
        name: &'static str,
        description: &'static str,
        schema: ParamSchema,
        handler: impl Fn(Value) -> ActionResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            description,
            schema,
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl Action for FnAction {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn schema(&self) -> ParamSchema {
        self.schema.clone()
    }

    async fn run(&self, _ctx: &ExecutionContext, arguments: Value) -> ActionResult {
        (self.handler)(arguments)
    }
}

/// Bundle serving a fixed action list.
pub struct StaticBundle {
    name: &'static str,
    actions: Vec<Arc<dyn Action>>,
}

impl StaticBundle {
    pub fn new(name: &'static str, actions: Vec<Arc<dyn Action>>) -> Self {
        Self { name, actions }
    }
}

#[async_trait]
impl IntegrationBundle for StaticBundle {
    fn name(&self) -> &str {
        self.name
    }

    async fn actions(&self, _ctx: &BundleContext) -> Result<Vec<Arc<dyn Action>>, RegistryError> {
        Ok(self.actions.clone())
    }
}
