//! Engine configuration.
//!
//! Everything is read once from the environment at startup (a `.env` file
//! is honored by the binary). Missing optional values fall back to
//! defaults; malformed values are reported with the offending key.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::llm::ProviderKind;

/// API credentials per provider. Absent credentials surface as
/// authentication errors at turn time, not at startup, so a deployment
/// can run with a subset of providers configured.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub openai: Option<SecretString>,
    pub anthropic: Option<SecretString>,
}

impl ProviderCredentials {
    pub fn for_provider(&self, kind: ProviderKind) -> Option<SecretString> {
        match kind {
            ProviderKind::OpenAi => self.openai.clone(),
            ProviderKind::Anthropic => self.anthropic.clone(),
        }
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("openai", &self.openai.is_some())
            .field("anthropic", &self.anthropic.is_some())
            .finish()
    }
}

/// Tunables for the orchestration loop and protocol dispatcher.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on tool-calling steps within one turn.
    pub max_tool_steps: usize,
    /// Completion token cap passed to providers on every model call.
    pub max_response_tokens: u32,
    /// Sampling temperature passed to providers.
    pub temperature: f32,
    /// Wall-clock limit for a batch turn.
    pub batch_timeout: Duration,
    /// Per-file character cap for extracted attachment text.
    pub attachment_text_cap: usize,
    /// Idle lifetime of a dispatcher session.
    pub dispatcher_session_ttl: Duration,
    /// Address the dispatcher binds to.
    pub bind_addr: String,
    pub credentials: ProviderCredentials,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_tool_steps: 10,
            max_response_tokens: 4096,
            temperature: 0.7,
            batch_timeout: Duration::from_secs(300),
            attachment_text_cap: 100_000,
            dispatcher_session_ttl: Duration::from_secs(1800),
            bind_addr: "0.0.0.0:8080".to_string(),
            credentials: ProviderCredentials::default(),
        }
    }
}

impl EngineConfig {
    /// Load from `SWITCHBOARD_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            max_tool_steps: env_parse("SWITCHBOARD_MAX_TOOL_STEPS", defaults.max_tool_steps)?,
            max_response_tokens: env_parse(
                "SWITCHBOARD_MAX_RESPONSE_TOKENS",
                defaults.max_response_tokens,
            )?,
            temperature: env_parse("SWITCHBOARD_TEMPERATURE", defaults.temperature)?,
            batch_timeout: Duration::from_secs(env_parse(
                "SWITCHBOARD_BATCH_TIMEOUT_SECS",
                defaults.batch_timeout.as_secs(),
            )?),
            attachment_text_cap: env_parse(
                "SWITCHBOARD_ATTACHMENT_TEXT_CAP",
                defaults.attachment_text_cap,
            )?,
            dispatcher_session_ttl: Duration::from_secs(env_parse(
                "SWITCHBOARD_SESSION_TTL_SECS",
                defaults.dispatcher_session_ttl.as_secs(),
            )?),
            bind_addr: std::env::var("SWITCHBOARD_BIND_ADDR").unwrap_or(defaults.bind_addr),
            credentials: ProviderCredentials {
                openai: env_secret("OPENAI_API_KEY"),
                anthropic: env_secret("ANTHROPIC_API_KEY"),
            },
        })
    }
}

fn env_secret(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(SecretString::new)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("cannot parse {:?}", raw),
        }),
        Err(_) => Ok(default),
    }
}
