//! Error types for Switchboard.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    #[error("Collaborator error: {0}")]
    Collab(#[from] CollabError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Action registry errors.
///
/// `BundleInit` is contained at the registry boundary: a bundle that fails
/// to initialize contributes no actions and the build continues.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Integration bundle {bundle} failed to initialize: {reason}")]
    BundleInit { bundle: String, reason: String },
}

/// Action execution errors.
///
/// Action-level failures never surface here: the executor converts them
/// into an error-carrying payload the model reads as a tool result. Only
/// failures before a context exists are real errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Invalid session reference: {0}")]
    InvalidSession(String),
}

/// Model provider errors.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Authentication failed for provider {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Unknown provider key: {0}")]
    UnknownProvider(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ProviderError {
    /// Whether this error indicates a bad or missing credential.
    ///
    /// Providers are inconsistent about status codes, so in addition to the
    /// structured `Authentication` variant this sniffs well-known phrases
    /// out of request failures.
    pub fn is_credential_error(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::RequestFailed { reason, .. } | Self::InvalidResponse { reason, .. } => {
                let lower = reason.to_lowercase();
                lower.contains("invalid api key")
                    || lower.contains("incorrect api key")
                    || lower.contains("unauthorized")
                    || lower.contains("authentication_error")
                    || lower.contains("invalid x-api-key")
            }
            _ => false,
        }
    }
}

/// Orchestration loop errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),

    #[error("Message too large: estimated {estimated} tokens, budget {budget}")]
    ContentTooLarge { estimated: usize, budget: usize },

    #[error("Invalid {provider} credential: {message}")]
    Authentication { provider: String, message: String },

    #[error("Model produced no output (provider {provider})")]
    NoOutput { provider: String },

    #[error("Turn timed out after {0:?}")]
    Timeout(Duration),

    #[error("Structured output is not valid JSON: {0}")]
    StructuredOutput(String),
}

/// Errors surfaced by external collaborators (stores, publishers, fetchers).
#[derive(Debug, thiserror::Error)]
pub enum CollabError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),
}

/// Result type alias for the engine.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_error_structured_variant() {
        let err = ProviderError::Authentication {
            provider: "openai".into(),
            reason: "401".into(),
        };
        assert!(err.is_credential_error());
    }

    #[test]
    fn credential_error_sniffed_from_message() {
        let err = ProviderError::RequestFailed {
            provider: "anthropic".into(),
            reason: "HTTP 400: authentication_error: invalid x-api-key".into(),
        };
        assert!(err.is_credential_error());
    }

    #[test]
    fn transient_error_is_not_credential() {
        let err = ProviderError::RateLimited {
            provider: "openai".into(),
            retry_after: None,
        };
        assert!(!err.is_credential_error());
    }
}
