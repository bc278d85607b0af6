//! Orchestration loop.
//!
//! Drives one conversational turn end to end: resolve the session
//! profile, ingest attachments, persist the user turn, build the tool
//! set, resolve the model, trim history to budget, then loop between the
//! model and the action executor up to the step bound. Terminal text is
//! cleaned, persisted, and accounted before it is returned.

pub mod attachments;
mod text;

pub use attachments::{Attachment, Ingested};
pub use text::{clean_text, extract_json};

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::collab::{AttachmentFetcher, SessionProfile, SessionStore};
use crate::config::EngineConfig;
use crate::context::{ExecutionContext, SessionRef};
use crate::cost::{CostAccountant, CostRecord, CostSubject, TurnMode};
use crate::error::{CollabError, OrchestratorError, ProviderError, Result};
use crate::executor::ActionExecutor;
use crate::llm::{
    ChatMessage, ModelProvider, ProviderResolver, StreamEvent, TokenUsage, ToolCompletionRequest,
    ToolCompletionResponse,
};
use crate::registry::{BundleContext, ToolSet, ToolSetCache};
use crate::trim::{estimate_tokens, trim_to_budget};

/// Input for one conversational turn.
#[derive(Debug, Clone, Default)]
pub struct TurnInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

impl TurnInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

/// What a batch turn produced.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub text: String,
    pub usage: TokenUsage,
    pub tool_call_count: u32,
    /// `None` when the turn short-circuited before any model call.
    pub cost: Option<CostRecord>,
}

/// Events surfaced to a streaming client.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    TextDelta(String),
    ToolStarted { name: String },
    ToolFinished { name: String, success: bool },
    Done { text: String, usage: TokenUsage },
    Error(String),
}

/// Where the system prompt goes for a given provider. Chosen once per
/// turn, never per step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemPlacement {
    SeparateField,
    FirstMessage,
}

fn system_placement(provider_key: &str) -> SystemPlacement {
    match provider_key {
        "anthropic" => SystemPlacement::SeparateField,
        _ => SystemPlacement::FirstMessage,
    }
}

struct TurnPrep {
    session_id: Uuid,
    profile: SessionProfile,
    ctx: ExecutionContext,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolSet>,
    messages: Vec<ChatMessage>,
    system: Option<String>,
}

enum Prepared {
    Ready(Box<TurnPrep>),
    ShortCircuit(TurnOutput),
}

struct DriveOutcome {
    text: String,
    usage: TokenUsage,
    tool_call_count: u32,
}

/// The conversational driver.
pub struct Orchestrator {
    sessions: Arc<dyn SessionStore>,
    tool_sets: Arc<ToolSetCache>,
    executor: Arc<ActionExecutor>,
    resolver: Arc<dyn ProviderResolver>,
    accountant: Arc<CostAccountant>,
    fetcher: Arc<dyn AttachmentFetcher>,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        tool_sets: Arc<ToolSetCache>,
        executor: Arc<ActionExecutor>,
        resolver: Arc<dyn ProviderResolver>,
        accountant: Arc<CostAccountant>,
        fetcher: Arc<dyn AttachmentFetcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            sessions,
            tool_sets,
            executor,
            resolver,
            accountant,
            fetcher,
            config,
        }
    }

    /// Run one turn synchronously and return the final text.
    pub async fn run_turn(&self, session_id: Uuid, input: TurnInput) -> Result<TurnOutput> {
        let prep = match self.prepare(session_id, input).await? {
            Prepared::ShortCircuit(output) => return Ok(output),
            Prepared::Ready(prep) => prep,
        };
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.config.batch_timeout, self.drive(&prep, None))
            .await
            .map_err(|_| OrchestratorError::Timeout(self.config.batch_timeout))??;
        self.finalize(&prep, outcome, started, TurnMode::Batch).await
    }

    /// Run one turn in streaming mode. The receiver is handed back
    /// immediately; a background task drains the model, executes tools,
    /// and persists the final turn and cost record.
    pub async fn run_turn_streaming(
        self: Arc<Self>,
        session_id: Uuid,
        input: TurnInput,
    ) -> Result<mpsc::Receiver<TurnEvent>> {
        let (tx, rx) = mpsc::channel(32);
        let prep = match self.prepare(session_id, input).await? {
            Prepared::ShortCircuit(output) => {
                let _ = tx.send(TurnEvent::TextDelta(output.text.clone())).await;
                let _ = tx
                    .send(TurnEvent::Done {
                        text: output.text,
                        usage: TokenUsage::default(),
                    })
                    .await;
                return Ok(rx);
            }
            Prepared::Ready(prep) => prep,
        };

        let orchestrator = Arc::clone(&self);
        tokio::spawn(async move {
            let started = Instant::now();
            let result = match orchestrator.drive(&prep, Some(&tx)).await {
                Ok(outcome) => {
                    let usage = outcome.usage;
                    orchestrator
                        .finalize(&prep, outcome, started, TurnMode::Streaming)
                        .await
                        .map(|output| TurnEvent::Done {
                            text: output.text,
                            usage,
                        })
                }
                Err(err) => Err(err),
            };
            match result {
                Ok(done) => {
                    let _ = tx.send(done).await;
                }
                Err(err) => {
                    error!(session = %prep.session_id, error = %err, "streaming turn failed");
                    let _ = tx.send(TurnEvent::Error(err.to_string())).await;
                }
            }
        });
        Ok(rx)
    }

    /// Batch turn whose final answer is parsed (and if necessary repaired)
    /// as a JSON object.
    pub async fn run_turn_structured(&self, session_id: Uuid, input: TurnInput) -> Result<Value> {
        let output = self.run_turn(session_id, input).await?;
        if let Ok(value) = serde_json::from_str(&output.text) {
            return Ok(value);
        }
        let repaired = extract_json(&output.text).ok_or_else(|| {
            OrchestratorError::StructuredOutput("no JSON object in model output".to_string())
        })?;
        serde_json::from_str(repaired)
            .map_err(|err| OrchestratorError::StructuredOutput(err.to_string()).into())
    }

    async fn prepare(&self, session_id: Uuid, input: TurnInput) -> Result<Prepared> {
        let profile = match self.sessions.context_for_session(session_id).await {
            Ok(profile) => profile,
            Err(CollabError::NotFound(_)) => {
                return Err(OrchestratorError::SessionNotFound(session_id).into())
            }
            Err(err) => return Err(err.into()),
        };

        let user_message = match attachments::ingest(
            self.fetcher.as_ref(),
            &input.text,
            &input.attachments,
            self.config.attachment_text_cap,
        )
        .await?
        {
            Ingested::Message(message) => message,
            Ingested::Unsupported { ack } => {
                // No model call, no cost: persist both turns and answer
                // with the canned acknowledgement.
                self.sessions
                    .append_message(session_id, ChatMessage::user(&input.text))
                    .await?;
                self.sessions
                    .append_message(session_id, ChatMessage::assistant(&ack))
                    .await?;
                return Ok(Prepared::ShortCircuit(TurnOutput {
                    text: ack,
                    usage: TokenUsage::default(),
                    tool_call_count: 0,
                    cost: None,
                }));
            }
        };

        self.sessions.append_message(session_id, user_message).await?;

        let bundle_ctx = BundleContext::new(
            &profile.tenant_id,
            &profile.agent_id,
            &profile.user_id,
        );
        let tools = self
            .tool_sets
            .tool_set(&bundle_ctx, profile.allowed_action_ids.as_deref())
            .await;

        let provider = self
            .resolver
            .resolve_model(&profile.model_provider, &profile.model_id)
            .map_err(|err| self.classify_provider_error(&profile, err))?;

        let history = self.sessions.list_messages(session_id).await?;
        let (mut messages, tokens_used) = trim_to_budget(&history, profile.max_tokens);
        if messages.is_empty() {
            if let Some(last) = history.last() {
                return Err(OrchestratorError::ContentTooLarge {
                    estimated: estimate_tokens(last),
                    budget: profile.max_tokens,
                }
                .into());
            }
        }
        debug!(session = %session_id, kept = messages.len(), tokens_used, "trimmed history");

        let system = match system_placement(provider.provider_key()) {
            SystemPlacement::SeparateField => Some(profile.prompt_text.clone()),
            SystemPlacement::FirstMessage => {
                messages.insert(0, ChatMessage::system(&profile.prompt_text));
                None
            }
        };

        let ctx = ExecutionContext::new(
            profile.tenant_id.clone(),
            SessionRef::Persisted(session_id),
            profile.user_id.clone(),
            profile.agent_id.clone(),
            profile.language.clone(),
        );

        Ok(Prepared::Ready(Box::new(TurnPrep {
            session_id,
            profile,
            ctx,
            provider,
            tools,
            messages,
            system,
        })))
    }

    /// The model/tool loop. Exceeding the step bound terminates with
    /// whatever partial text exists; that is not a failure.
    async fn drive(
        &self,
        prep: &TurnPrep,
        emitter: Option<&mpsc::Sender<TurnEvent>>,
    ) -> Result<DriveOutcome> {
        let mut messages = prep.messages.clone();
        let mut usage = TokenUsage::default();
        let mut tool_call_count = 0u32;
        let mut last_text = String::new();

        for step in 0..self.config.max_tool_steps {
            let mut request =
                ToolCompletionRequest::new(messages.clone(), prep.tools.definitions())
                    .with_max_tokens(self.config.max_response_tokens)
                    .with_temperature(self.config.temperature);
            if let Some(system) = &prep.system {
                request = request.with_system(system.clone());
            }

            let response = match self.call_model(prep, request, emitter).await {
                Ok(response) => response,
                Err(err) => return Err(self.surface_provider_error(prep, err).await),
            };
            usage.add(response.usage);
            if let Some(content) = &response.content {
                if !content.is_empty() {
                    last_text = content.clone();
                }
            }

            if response.tool_calls.is_empty() {
                return Ok(DriveOutcome {
                    text: last_text,
                    usage,
                    tool_call_count,
                });
            }

            messages.push(ChatMessage::assistant_with_tool_calls(
                response.content.clone(),
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                tool_call_count += 1;
                if let Some(tx) = emitter {
                    let _ = tx
                        .send(TurnEvent::ToolStarted {
                            name: call.name.clone(),
                        })
                        .await;
                }
                let outcome = self.executor.execute(&prep.ctx, &prep.tools, call).await;
                if let Some(tx) = emitter {
                    let _ = tx
                        .send(TurnEvent::ToolFinished {
                            name: call.name.clone(),
                            success: outcome.is_success(),
                        })
                        .await;
                }
                messages.push(ChatMessage::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    outcome.content,
                ));
            }
            debug!(session = %prep.session_id, step, "tool step completed");
        }

        warn!(
            session = %prep.session_id,
            bound = self.config.max_tool_steps,
            "tool step bound reached, returning partial text"
        );
        Ok(DriveOutcome {
            text: last_text,
            usage,
            tool_call_count,
        })
    }

    async fn call_model(
        &self,
        prep: &TurnPrep,
        request: ToolCompletionRequest,
        emitter: Option<&mpsc::Sender<TurnEvent>>,
    ) -> std::result::Result<ToolCompletionResponse, ProviderError> {
        let Some(tx) = emitter else {
            return prep.provider.complete_with_tools(request).await;
        };

        let mut rx = prep.provider.stream_with_tools(request).await?;
        let mut content = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::TextDelta(delta) => {
                    content.push_str(&delta);
                    let _ = tx.send(TurnEvent::TextDelta(delta)).await;
                }
                StreamEvent::ToolCall(call) => tool_calls.push(call),
                StreamEvent::Usage(u) => usage = u,
                StreamEvent::Done => break,
                StreamEvent::Error(reason) => {
                    return Err(ProviderError::RequestFailed {
                        provider: prep.provider.provider_key().to_string(),
                        reason,
                    })
                }
            }
        }
        Ok(ToolCompletionResponse {
            content: (!content.is_empty()).then_some(content),
            tool_calls,
            usage,
        })
    }

    /// Credential problems become a distinguishable error and leave an
    /// audit trail in the session; everything else propagates after a log.
    async fn surface_provider_error(&self, prep: &TurnPrep, err: ProviderError) -> crate::error::Error {
        if err.is_credential_error() {
            let note = format!(
                "Invalid {} API key configured for this agent. Update the credential and try again.",
                prep.provider.provider_key()
            );
            self.persist_system_note(prep.session_id, &note).await;
            return OrchestratorError::Authentication {
                provider: prep.provider.provider_key().to_string(),
                message: err.to_string(),
            }
            .into();
        }
        error!(
            session = %prep.session_id,
            provider = prep.provider.provider_key(),
            model = prep.provider.model_name(),
            error = %err,
            "model call failed"
        );
        err.into()
    }

    /// Same classification as [`surface_provider_error`] for failures
    /// before a provider handle exists (e.g. missing credential).
    fn classify_provider_error(
        &self,
        profile: &SessionProfile,
        err: ProviderError,
    ) -> crate::error::Error {
        if err.is_credential_error() {
            return OrchestratorError::Authentication {
                provider: profile.model_provider.clone(),
                message: err.to_string(),
            }
            .into();
        }
        err.into()
    }

    async fn finalize(
        &self,
        prep: &TurnPrep,
        outcome: DriveOutcome,
        started: Instant,
        mode: TurnMode,
    ) -> Result<TurnOutput> {
        let text = clean_text(&outcome.text);

        // No text with tool activity is legitimate; no text and no tool
        // activity means the model produced nothing at all.
        if text.is_empty() && outcome.tool_call_count == 0 {
            let note = format!(
                "The {} model returned no output. Check the agent's model configuration.",
                prep.provider.provider_key()
            );
            self.persist_system_note(prep.session_id, &note).await;
            return Err(OrchestratorError::NoOutput {
                provider: prep.provider.provider_key().to_string(),
            }
            .into());
        }

        if !text.is_empty() {
            self.sessions
                .append_message(prep.session_id, ChatMessage::assistant(&text))
                .await?;
        }

        let subject = CostSubject {
            tenant_id: prep.profile.tenant_id.clone(),
            agent_id: prep.profile.agent_id.clone(),
            session_id: Some(prep.session_id),
            user_id: prep.profile.user_id.clone(),
        };
        let cost = self
            .accountant
            .record(
                &subject,
                prep.provider.provider_key(),
                prep.provider.model_name(),
                outcome.usage,
                started.elapsed(),
                outcome.tool_call_count,
                mode,
            )
            .await;

        Ok(TurnOutput {
            text,
            usage: outcome.usage,
            tool_call_count: outcome.tool_call_count,
            cost: Some(cost),
        })
    }

    async fn persist_system_note(&self, session_id: Uuid, note: &str) {
        if let Err(err) = self
            .sessions
            .append_message(session_id, ChatMessage::system(note))
            .await
        {
            warn!(session = %session_id, error = %err, "failed to persist system note");
        }
    }
}
