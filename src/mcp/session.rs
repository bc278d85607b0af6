//! Dispatcher session tracking.
//!
//! Sessions are transport-level: they tie an `Mcp-Session-Id` header to a
//! bearer-derived tenant/user pair for the idle lifetime configured on
//! the server. Expired entries are pruned lazily on access; a stale id
//! from an authenticated caller is replaced, never rejected.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

/// Who a dispatcher session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub tenant_id: String,
    pub user_id: String,
}

struct Entry {
    principal: Principal,
    last_seen: Instant,
}

/// In-memory session table with idle expiry.
pub struct SessionTable {
    ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Mint a fresh session id for a principal.
    pub async fn mint(&self, principal: Principal) -> String {
        let id = Uuid::new_v4().to_string();
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        entries.insert(
            id.clone(),
            Entry {
                principal,
                last_seen: Instant::now(),
            },
        );
        id
    }

    /// Validate a session id, refreshing its idle timer on hit. Expired
    /// ids behave exactly like unknown ones.
    pub async fn touch(&self, id: &str) -> Option<Principal> {
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        let entry = entries.get_mut(id)?;
        entry.last_seen = Instant::now();
        Some(entry.principal.clone())
    }

    /// Remove a session. Returns whether it existed (and was live).
    pub async fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock().await;
        Self::prune(&mut entries, self.ttl);
        entries.remove(id).is_some()
    }

    fn prune(entries: &mut HashMap<String, Entry>, ttl: Duration) {
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_seen) < ttl);
    }
}
