use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::registry::{build_tool_set, BundleContext, BundleRegistry, ToolSet};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    context: BundleContext,
    /// Sorted allow list, or `None` for unrestricted profiles.
    allow_list: Option<Vec<String>>,
}

/// Cache of built tool sets, keyed by request identity and allow list.
///
/// An explicit object owned by the engine rather than a module-level
/// static, so tests and multi-engine hosts get isolated caches. Reads are
/// lock-free snapshots via `Arc`; a rebuild replaces the whole entry.
pub struct ToolSetCache {
    registry: Arc<BundleRegistry>,
    entries: RwLock<HashMap<CacheKey, Arc<ToolSet>>>,
}

impl ToolSetCache {
    pub fn new(registry: Arc<BundleRegistry>) -> Self {
        Self {
            registry,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the tool set for a profile, building and caching it on miss.
    /// The build runs against the same identity the entry is keyed by.
    pub async fn tool_set(
        &self,
        ctx: &BundleContext,
        allow_list: Option<&[String]>,
    ) -> Arc<ToolSet> {
        let key = CacheKey {
            context: ctx.clone(),
            allow_list: allow_list.map(|ids| {
                let mut sorted = ids.to_vec();
                sorted.sort();
                sorted
            }),
        };

        if let Some(found) = self.entries.read().await.get(&key) {
            return Arc::clone(found);
        }

        let built = Arc::new(build_tool_set(&self.registry, ctx, allow_list).await);
        debug!(
            agent_id = %ctx.agent_id,
            user_id = %ctx.user_id,
            tools = built.len(),
            "built tool set"
        );
        self.entries
            .write()
            .await
            .insert(key, Arc::clone(&built));
        built
    }

    /// Drop every cached set for an agent, e.g. after its profile changed.
    pub async fn invalidate_agent(&self, agent_id: &str) {
        self.entries
            .write()
            .await
            .retain(|key, _| key.context.agent_id != agent_id);
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}
