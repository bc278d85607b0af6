//! Model provider resolution.
//!
//! Maps a (provider key, model identifier) pair to a concrete callable
//! provider. A static catalog keyed by logical model name takes precedence
//! over the caller-supplied provider key, so operators can retire or rename
//! concrete provider model strings without touching configured agents.

use std::str::FromStr;
use std::sync::Arc;

use secrecy::SecretString;

use crate::error::ProviderError;
use crate::llm::{AnthropicProvider, ModelProvider, OpenAiProvider};

/// Known provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    OpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn key(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "azure-openai" | "openai-compatible" => Ok(Self::OpenAi),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            other => Err(ProviderError::UnknownProvider(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Reasoning effort hint for models that accept one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Fixed per-model invocation options recorded in the catalog.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOptions {
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// One catalog row: logical name -> concrete (provider, model, options).
struct CatalogEntry {
    provider: ProviderKind,
    model: &'static str,
    options: ModelOptions,
}

/// Static configuration table keyed by logical model name.
///
/// Logical names include retired aliases that previously configured agents
/// may still carry.
fn catalog_lookup(model_id: &str) -> Option<CatalogEntry> {
    let entry = |provider, model| CatalogEntry {
        provider,
        model,
        options: ModelOptions::default(),
    };
    let reasoning = |provider, model, effort| CatalogEntry {
        provider,
        model,
        options: ModelOptions {
            reasoning_effort: Some(effort),
        },
    };

    match model_id {
        // OpenAI family, including legacy aliases.
        "gpt-4o" | "gpt-4-turbo" => Some(entry(ProviderKind::OpenAi, "gpt-4o")),
        "gpt-4o-mini" | "gpt-3.5-turbo" => Some(entry(ProviderKind::OpenAi, "gpt-4o-mini")),
        "gpt-4.1" => Some(entry(ProviderKind::OpenAi, "gpt-4.1")),
        "gpt-4.1-mini" => Some(entry(ProviderKind::OpenAi, "gpt-4.1-mini")),
        "o3" => Some(reasoning(ProviderKind::OpenAi, "o3", ReasoningEffort::Medium)),
        "o4-mini" => Some(reasoning(
            ProviderKind::OpenAi,
            "o4-mini",
            ReasoningEffort::Medium,
        )),
        // Anthropic family.
        "claude-sonnet-4" | "claude-3-5-sonnet" | "claude-3-sonnet" => Some(entry(
            ProviderKind::Anthropic,
            "claude-sonnet-4-20250514",
        )),
        "claude-3-5-haiku" | "claude-3-haiku" => Some(entry(
            ProviderKind::Anthropic,
            "claude-3-5-haiku-20241022",
        )),
        _ => None,
    }
}

/// Collapse unrecognized variants of a reasoning-model family to the
/// family's base name ("o3-2025-04-16" -> "o3").
fn normalize_reasoning_variant(model_id: &str) -> &str {
    for family in ["o4-mini", "o3-mini", "o3", "o1"] {
        if model_id == family {
            return model_id;
        }
        if let Some(rest) = model_id.strip_prefix(family) {
            if rest.starts_with('-') {
                return family;
            }
        }
    }
    model_id
}

/// Resolution seam used by the orchestration loop. Hosts can swap in
/// custom model wiring; tests script providers through it.
pub trait ProviderResolver: Send + Sync {
    fn resolve_model(
        &self,
        provider_key: &str,
        model_id: &str,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError>;
}

/// Default resolver: picks the configured credential for the resolved
/// provider and builds a real client.
pub struct CredentialResolver {
    credentials: crate::config::ProviderCredentials,
}

impl CredentialResolver {
    pub fn new(credentials: crate::config::ProviderCredentials) -> Self {
        Self { credentials }
    }
}

impl ProviderResolver for CredentialResolver {
    fn resolve_model(
        &self,
        provider_key: &str,
        model_id: &str,
    ) -> Result<Arc<dyn ModelProvider>, ProviderError> {
        let kind = resolved_kind(provider_key, model_id)?;
        let credential =
            self.credentials
                .for_provider(kind)
                .ok_or_else(|| ProviderError::Authentication {
                    provider: kind.key().to_string(),
                    reason: "no credential configured".to_string(),
                })?;
        resolve(provider_key, model_id, credential)
    }
}

/// The provider a `(provider_key, model_id)` pair resolves to, before a
/// credential is attached. Callers use this to pick which credential to
/// hand to [`resolve`].
pub fn resolved_kind(provider_key: &str, model_id: &str) -> Result<ProviderKind, ProviderError> {
    match catalog_lookup(model_id) {
        Some(entry) => Ok(entry.provider),
        None => ProviderKind::from_str(provider_key),
    }
}

/// Resolve a (provider key, model identifier, credential) triple to a
/// concrete provider handle.
///
/// Catalog hits override the caller's provider key; misses fall back to the
/// caller's key with the literal model name, normalizing reasoning-family
/// variants to their base name.
pub fn resolve(
    provider_key: &str,
    model_id: &str,
    credential: SecretString,
) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    let (provider, model, options) = match catalog_lookup(model_id) {
        Some(entry) => (entry.provider, entry.model.to_string(), entry.options),
        None => {
            let provider = ProviderKind::from_str(provider_key)?;
            let model = normalize_reasoning_variant(model_id).to_string();
            (provider, model, ModelOptions::default())
        }
    };

    tracing::debug!(
        requested_provider = provider_key,
        requested_model = model_id,
        resolved_provider = %provider,
        resolved_model = %model,
        "Resolved model provider"
    );

    match provider {
        ProviderKind::OpenAi => Ok(Arc::new(OpenAiProvider::new(model, credential, options))),
        ProviderKind::Anthropic => Ok(Arc::new(AnthropicProvider::new(model, credential))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_overrides_caller_provider_key() {
        let handle = resolve(
            "anthropic",
            "gpt-4o-mini",
            SecretString::new("sk-test".into()),
        )
        .unwrap();
        assert_eq!(handle.provider_key(), "openai");
        assert_eq!(handle.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn legacy_alias_maps_to_replacement() {
        let handle = resolve("openai", "gpt-3.5-turbo", SecretString::new("k".into())).unwrap();
        assert_eq!(handle.model_name(), "gpt-4o-mini");
    }

    #[test]
    fn catalog_miss_uses_caller_key_and_literal_model() {
        let handle = resolve(
            "anthropic",
            "claude-experimental-2",
            SecretString::new("k".into()),
        )
        .unwrap();
        assert_eq!(handle.provider_key(), "anthropic");
        assert_eq!(handle.model_name(), "claude-experimental-2");
    }

    #[test]
    fn reasoning_variant_collapses_to_family_base() {
        assert_eq!(normalize_reasoning_variant("o3-2025-04-16"), "o3");
        assert_eq!(normalize_reasoning_variant("o4-mini-high"), "o4-mini");
        assert_eq!(normalize_reasoning_variant("o3"), "o3");
        assert_eq!(normalize_reasoning_variant("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn unknown_provider_key_rejected() {
        let err = resolve("mystery", "unlisted-model", SecretString::new("k".into()));
        assert!(matches!(err, Err(ProviderError::UnknownProvider(_))));
    }
}
