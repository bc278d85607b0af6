//! End-to-end turns through the orchestration loop with scripted models
//! and in-memory collaborators.

use std::sync::Arc;

use serde_json::json;
use uuid::Uuid;

use switchboard::collab::SessionProfile;
use switchboard::config::EngineConfig;
use switchboard::cost::{CostAccountant, TurnMode};
use switchboard::error::{Error, OrchestratorError, ProviderError};
use switchboard::executor::{ActionExecutor, ExecutionStatus};
use switchboard::llm::{Role, TokenUsage, ToolCall, ToolCompletionResponse};
use switchboard::orchestrator::{Attachment, Orchestrator, TurnEvent, TurnInput};
use switchboard::registry::{Action, ActionResult, BundleRegistry, ParamSchema, ToolSetCache};
use switchboard::testing::{
    FixedResolver, FnAction, MapRenderer, MemorySessionStore, RecordingLedger, RecordingPublisher,
    ScriptedProvider, StaticBundle, StaticCatalog, StaticFetcher,
};

struct Harness {
    orchestrator: Arc<Orchestrator>,
    sessions: Arc<MemorySessionStore>,
    publisher: Arc<RecordingPublisher>,
    ledger: Arc<RecordingLedger>,
    provider: Arc<ScriptedProvider>,
    session_id: Uuid,
}

fn profile(max_tokens: usize) -> SessionProfile {
    SessionProfile {
        tenant_id: "acme".into(),
        user_id: "user-1".into(),
        agent_id: "agent-1".into(),
        language: "en".into(),
        allowed_action_ids: Some(vec!["jira/fetchTickets".into()]),
        model_provider: "openai".into(),
        model_id: "gpt-4o".into(),
        prompt_text: "You are a helpful ticket assistant.".into(),
        max_tokens,
    }
}

fn registry() -> BundleRegistry {
    let schema =
        ParamSchema::object().with_property("status", ParamSchema::string("Status filter"), false);
    let action = FnAction::new("fetchTickets", "Fetch tickets", schema, |_args| {
        ActionResult::success(json!({"tickets": [{"key": "SB-1", "status": "open"}]}))
    });
    let actions: Vec<Arc<dyn Action>> = vec![Arc::new(action)];
    let mut registry = BundleRegistry::new();
    registry.register(Arc::new(StaticBundle::new("jira", actions)));
    registry
}

fn harness_with(
    provider: ScriptedProvider,
    fetcher: StaticFetcher,
    profile: SessionProfile,
    config: EngineConfig,
) -> Harness {
    let sessions = Arc::new(MemorySessionStore::new());
    let session_id = Uuid::new_v4();
    sessions.insert(session_id, profile);
    let provider = Arc::new(provider);

    let publisher = Arc::new(RecordingPublisher::default());
    let ledger = Arc::new(RecordingLedger::default());
    let tool_sets = Arc::new(ToolSetCache::new(Arc::new(registry())));
    let executor = Arc::new(ActionExecutor::new(
        sessions.clone(),
        Arc::new(StaticCatalog::default()),
        Arc::new(MapRenderer::default()),
        publisher.clone(),
    ));
    let accountant = Arc::new(CostAccountant::new(ledger.clone()));
    let orchestrator = Arc::new(Orchestrator::new(
        sessions.clone(),
        tool_sets,
        executor,
        Arc::new(FixedResolver::new(provider.clone())),
        accountant,
        Arc::new(fetcher),
        config,
    ));

    Harness {
        orchestrator,
        sessions,
        publisher,
        ledger,
        provider,
        session_id,
    }
}

fn harness(provider: ScriptedProvider) -> Harness {
    harness_with(
        provider,
        StaticFetcher::default(),
        profile(8000),
        EngineConfig::default(),
    )
}

fn tool_call_response(name: &str, arguments: serde_json::Value) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: None,
        tool_calls: vec![ToolCall {
            id: format!("call-{}", name),
            name: name.into(),
            arguments,
        }],
        usage: TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
        },
    }
}

fn text_response(text: &str) -> ToolCompletionResponse {
    ToolCompletionResponse {
        content: Some(text.into()),
        tool_calls: Vec::new(),
        usage: TokenUsage {
            input_tokens: 150,
            output_tokens: 30,
        },
    }
}

#[tokio::test]
async fn tool_call_turn_produces_text_status_and_cost() {
    let provider = ScriptedProvider::new("openai", "gpt-4o")
        .push(Ok(tool_call_response(
            "jira_fetchTickets",
            json!({"status": "open"}),
        )))
        .push(Ok(text_response("You have one open ticket: SB-1.")));
    let h = harness(provider);

    let output = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("show open tickets"))
        .await
        .unwrap();

    assert_eq!(output.text, "You have one open ticket: SB-1.");
    assert_eq!(output.tool_call_count, 1);
    assert_eq!(h.provider.remaining(), 0);

    // Exactly one started and one completed record for the action.
    let statuses: Vec<ExecutionStatus> = h
        .publisher
        .records()
        .iter()
        .map(|(_, record)| record.status)
        .collect();
    assert_eq!(
        statuses,
        vec![ExecutionStatus::Started, ExecutionStatus::Completed]
    );
    assert!(h
        .publisher
        .records()
        .iter()
        .all(|(_, record)| record.action_id == "jira/fetchTickets"));

    // Usage aggregates across both steps, not just the last one.
    let costs = h.ledger.records();
    assert_eq!(costs.len(), 1);
    assert_eq!(costs[0].input_tokens, 250);
    assert_eq!(costs[0].output_tokens, 50);
    assert_eq!(costs[0].tool_call_count, 1);
    assert_eq!(costs[0].mode, TurnMode::Batch);

    // User turn and final assistant turn are persisted; intermediates are not.
    let transcript = h.sessions.transcript(h.session_id);
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role, Role::User);
    assert_eq!(transcript[1].role, Role::Assistant);
}

#[tokio::test]
async fn unsupported_attachment_short_circuits_without_model_or_cost() {
    let provider =
        ScriptedProvider::new("openai", "gpt-4o").push(Ok(text_response("should not be called")));
    let h = harness(provider);

    let input = TurnInput {
        text: "summarize this recording".into(),
        attachments: vec![Attachment {
            name: "standup.mp4".into(),
            url: "https://files/standup.mp4".into(),
            media_type: Some("video/mp4".into()),
        }],
    };
    let output = h.orchestrator.run_turn(h.session_id, input).await.unwrap();

    assert!(output.text.contains("standup.mp4"));
    assert!(output.text.contains("https://files/standup.mp4"));
    assert!(output.cost.is_none());
    assert!(h.ledger.records().is_empty());

    let transcript = h.sessions.transcript(h.session_id);
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].text(), output.text);
}

#[tokio::test]
async fn credential_error_is_distinguishable_and_audited() {
    let provider = ScriptedProvider::new("anthropic", "claude-sonnet-4-20250514").push(Err(
        ProviderError::Authentication {
            provider: "anthropic".into(),
            reason: "invalid x-api-key".into(),
        },
    ));
    let h = harness_with(
        provider,
        StaticFetcher::default(),
        SessionProfile {
            model_provider: "anthropic".into(),
            model_id: "claude-sonnet-4".into(),
            ..profile(8000)
        },
        EngineConfig::default(),
    );

    let err = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("hello"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Orchestrator(OrchestratorError::Authentication { .. })
    ));

    // The failure leaves an audit trail in the session.
    let transcript = h.sessions.transcript(h.session_id);
    assert!(transcript
        .iter()
        .any(|m| m.role == Role::System && m.text().contains("API key")));
}

#[tokio::test]
async fn oversized_message_is_a_size_error_not_truncation() {
    let provider = ScriptedProvider::new("openai", "gpt-4o");
    let h = harness_with(
        provider,
        StaticFetcher::default(),
        profile(20),
        EngineConfig::default(),
    );

    let err = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("x".repeat(4000)))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Orchestrator(OrchestratorError::ContentTooLarge { .. })
    ));
    assert!(h.ledger.records().is_empty());
}

#[tokio::test]
async fn step_bound_terminates_with_partial_text_not_failure() {
    let provider = ScriptedProvider::new("openai", "gpt-4o")
        .push(Ok(tool_call_response("jira_fetchTickets", json!({}))))
        .push(Ok(tool_call_response("jira_fetchTickets", json!({}))));
    let mut config = EngineConfig::default();
    config.max_tool_steps = 2;
    let h = harness_with(provider, StaticFetcher::default(), profile(8000), config);

    let output = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("keep fetching"))
        .await
        .unwrap();
    assert_eq!(output.tool_call_count, 2);
    assert!(output.text.is_empty());
    assert_eq!(h.ledger.records().len(), 1);
}

#[tokio::test]
async fn no_text_and_no_tools_is_an_error() {
    let provider = ScriptedProvider::new("openai", "gpt-4o").push(Ok(ToolCompletionResponse {
        content: None,
        tool_calls: Vec::new(),
        usage: TokenUsage::default(),
    }));
    let h = harness(provider);

    let err = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("hello"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Orchestrator(OrchestratorError::NoOutput { .. })
    ));
}

#[tokio::test]
async fn structured_mode_repairs_json_wrapped_in_prose() {
    let provider = ScriptedProvider::new("openai", "gpt-4o").push(Ok(text_response(
        "Sure, here is the result: {\"answer\": 42} Let me know if you need more.",
    )));
    let h = harness(provider);

    let value = h
        .orchestrator
        .run_turn_structured(h.session_id, TurnInput::text("answer as json"))
        .await
        .unwrap();
    assert_eq!(value, json!({"answer": 42}));
}

#[tokio::test]
async fn streaming_turn_emits_deltas_and_persists_in_background() {
    let provider = ScriptedProvider::new("openai", "gpt-4o")
        .push(Ok(tool_call_response(
            "jira_fetchTickets",
            json!({"status": "open"}),
        )))
        .push(Ok(text_response("SB-1 is open.")));
    let h = harness(provider);

    let mut rx = Arc::clone(&h.orchestrator)
        .run_turn_streaming(h.session_id, TurnInput::text("show open tickets"))
        .await
        .unwrap();

    let mut deltas = String::new();
    let mut tool_events = 0;
    let mut done_text = None;
    while let Some(event) = rx.recv().await {
        match event {
            TurnEvent::TextDelta(delta) => deltas.push_str(&delta),
            TurnEvent::ToolStarted { .. } | TurnEvent::ToolFinished { .. } => tool_events += 1,
            TurnEvent::Done { text, .. } => {
                done_text = Some(text);
                break;
            }
            TurnEvent::Error(err) => panic!("unexpected stream error: {}", err),
        }
    }

    assert_eq!(done_text.as_deref(), Some("SB-1 is open."));
    assert_eq!(deltas, "SB-1 is open.");
    assert_eq!(tool_events, 2);

    let transcript = h.sessions.transcript(h.session_id);
    assert_eq!(transcript.last().map(|m| m.text()), Some("SB-1 is open.".into()));
    assert_eq!(h.ledger.records().len(), 1);
    assert_eq!(h.ledger.records()[0].mode, TurnMode::Streaming);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let provider = ScriptedProvider::new("openai", "gpt-4o");
    let h = harness(provider);

    let err = h
        .orchestrator
        .run_turn(Uuid::new_v4(), TurnInput::text("hello"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Orchestrator(OrchestratorError::SessionNotFound(_))
    ));
}

#[tokio::test]
async fn disallowed_action_fails_as_tool_result_not_turn_error() {
    // The model asks for an action outside the profile's allow list; the
    // executor reports it back as a failed tool result and the model
    // recovers with text.
    let provider = ScriptedProvider::new("openai", "gpt-4o")
        .push(Ok(tool_call_response("jira_createTicket", json!({}))))
        .push(Ok(text_response("I cannot create tickets here.")));
    let h = harness(provider);

    let output = h
        .orchestrator
        .run_turn(h.session_id, TurnInput::text("create a ticket"))
        .await
        .unwrap();
    assert_eq!(output.text, "I cannot create tickets here.");
    let records = h.publisher.records();
    assert_eq!(records.last().map(|(_, r)| r.status), Some(ExecutionStatus::Failed));
}
