//! Switchboard - Main entry point.
//!
//! Runs the protocol dispatcher with in-memory collaborators. Production
//! hosts embed the library and wire real backends instead.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard::collab::{AgentSummary, SearchHit, TeamSummary};
use switchboard::config::EngineConfig;
use switchboard::executor::ActionExecutor;
use switchboard::mcp::{self, McpState, Principal, SessionTable, Toolbox};
use switchboard::registry::{BundleRegistry, ToolSetCache};
use switchboard::testing::{
    MapRenderer, MemorySessionStore, RecordingPublisher, StaticCatalog, StaticDirectory,
    StaticVerifier, StaticWorkspace,
};

#[derive(Debug, Parser)]
#[command(name = "switchboard", about = "Multi-tenant agent hosting engine")]
struct Cli {
    /// Address to bind the dispatcher to (overrides SWITCHBOARD_BIND_ADDR).
    #[arg(long)]
    bind: Option<String>,

    /// Accept this bearer token for a local "dev" tenant.
    #[arg(long)]
    dev_token: Option<String>,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }

    let registry = Arc::new(BundleRegistry::new());
    let tool_sets = Arc::new(ToolSetCache::new(registry));

    let sessions = Arc::new(MemorySessionStore::new());
    let executor = Arc::new(ActionExecutor::new(
        sessions,
        Arc::new(StaticCatalog::default()),
        Arc::new(MapRenderer::default()),
        Arc::new(RecordingPublisher::default()),
    ));
    let mut verifier = StaticVerifier::default();
    if let Some(token) = cli.dev_token {
        tracing::warn!("dev token enabled; all requests with it map to tenant \"dev\"");
        verifier = verifier.with(
            token,
            Principal {
                tenant_id: "dev".to_string(),
                user_id: "dev".to_string(),
            },
        );
    }

    let toolbox = Toolbox::new(
        Arc::new(StaticDirectory {
            agents: vec![AgentSummary {
                id: "dispatcher".to_string(),
                name: "Dispatcher".to_string(),
                description: "Local development agent".to_string(),
            }],
            teams: Vec::<TeamSummary>::new(),
        }),
        Arc::new(StaticWorkspace {
            hits: Vec::<SearchHit>::new(),
        }),
        executor,
        tool_sets,
    );

    let state = Arc::new(McpState {
        verifier: Arc::new(verifier),
        sessions: SessionTable::new(config.dispatcher_session_ttl),
        toolbox,
    });

    mcp::serve(state, &config.bind_addr).await?;
    Ok(())
}
