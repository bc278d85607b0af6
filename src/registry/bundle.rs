use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::registry::action::Action;

/// Identity a tool set is built for.
///
/// Handed to every bundle at init so it can resolve per-tenant
/// configuration or probe capability for the requesting agent and user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct BundleContext {
    pub tenant_id: String,
    pub agent_id: String,
    pub user_id: String,
}

impl BundleContext {
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// A named group of actions backing one integration (e.g. `jira`, `web`).
///
/// Initialization is async and fallible: bundles typically probe
/// configuration or remote capability lists when producing their actions.
#[async_trait]
pub trait IntegrationBundle: Send + Sync {
    /// Bundle name, the namespace prefix of its actions' tool names.
    fn name(&self) -> &str;

    /// Produce the bundle's actions for one request identity. A failure
    /// here is contained by the registry: the bundle contributes nothing
    /// and the build continues.
    async fn actions(&self, ctx: &BundleContext) -> Result<Vec<Arc<dyn Action>>, RegistryError>;
}

/// Factory producing a bundle instance. Registered at compile time; no
/// runtime discovery or reflection.
pub type BundleFactory = fn() -> Arc<dyn IntegrationBundle>;

/// The set of integration bundles known to the engine.
///
/// Built once at startup from compile-time factories plus any dynamically
/// constructed bundles the host wires in.
#[derive(Default)]
pub struct BundleRegistry {
    bundles: Vec<Arc<dyn IntegrationBundle>>,
}

impl BundleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle from a compile-time factory.
    pub fn register_factory(&mut self, factory: BundleFactory) -> &mut Self {
        self.bundles.push(factory());
        self
    }

    /// Register an already constructed bundle.
    pub fn register(&mut self, bundle: Arc<dyn IntegrationBundle>) -> &mut Self {
        self.bundles.push(bundle);
        self
    }

    pub fn bundles(&self) -> &[Arc<dyn IntegrationBundle>] {
        &self.bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }
}

impl std::fmt::Debug for BundleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.bundles.iter().map(|b| b.name()).collect();
        f.debug_struct("BundleRegistry")
            .field("bundles", &names)
            .finish()
    }
}
