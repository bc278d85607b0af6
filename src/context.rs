//! Per-turn execution identity.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sentinel accepted by the legacy executor entry point for invocations
/// that have no backing persisted session.
pub const STATELESS_SESSION: &str = "stateless";

/// Reference to the conversation a turn belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRef {
    /// No persisted session backs this invocation. Nothing is notified and
    /// nothing is interpolated.
    Stateless,
    /// A persisted session.
    Persisted(Uuid),
}

impl SessionRef {
    /// Parse a wire-format session reference.
    ///
    /// Accepts the stateless sentinel or a UUID; anything else is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw == STATELESS_SESSION {
            return Some(Self::Stateless);
        }
        Uuid::parse_str(raw).ok().map(Self::Persisted)
    }

    pub fn persisted(&self) -> Option<Uuid> {
        match self {
            Self::Persisted(id) => Some(*id),
            Self::Stateless => None,
        }
    }

    pub fn is_stateless(&self) -> bool {
        matches!(self, Self::Stateless)
    }
}

impl std::fmt::Display for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stateless => write!(f, "{}", STATELESS_SESSION),
            Self::Persisted(id) => write!(f, "{}", id),
        }
    }
}

/// Immutable identity bundle for one request/turn.
///
/// Constructed once at the edge and passed by reference down the call
/// chain. Never stored in a singleton, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub tenant_id: String,
    pub session: SessionRef,
    pub user_id: String,
    pub agent_id: String,
    /// BCP 47 language tag used for display metadata lookups.
    pub language: String,
}

impl ExecutionContext {
    pub fn new(
        tenant_id: impl Into<String>,
        session: SessionRef,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            session,
            user_id: user_id.into(),
            agent_id: agent_id.into(),
            language: language.into(),
        }
    }

    /// Context for a session-less invocation (e.g. protocol dispatcher calls).
    pub fn stateless(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self::new(tenant_id, SessionRef::Stateless, user_id, agent_id, "en")
    }

    pub fn is_stateless(&self) -> bool {
        self.session.is_stateless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stateless_sentinel() {
        assert_eq!(SessionRef::parse("stateless"), Some(SessionRef::Stateless));
    }

    #[test]
    fn parse_uuid_reference() {
        let id = Uuid::new_v4();
        assert_eq!(
            SessionRef::parse(&id.to_string()),
            Some(SessionRef::Persisted(id))
        );
    }

    #[test]
    fn parse_garbage_rejected() {
        assert_eq!(SessionRef::parse("not-a-session"), None);
        assert_eq!(SessionRef::parse(""), None);
    }

    #[test]
    fn display_round_trips() {
        let id = Uuid::new_v4();
        let r = SessionRef::Persisted(id);
        assert_eq!(SessionRef::parse(&r.to_string()), Some(r));
        assert_eq!(
            SessionRef::parse(&SessionRef::Stateless.to_string()),
            Some(SessionRef::Stateless)
        );
    }
}
