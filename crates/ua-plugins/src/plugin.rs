//! Core plugin trait and types

use async_trait::async_trait;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use tracing::Span;

use ua_core::Result;
use ua_model::{AddressSpace, ModelBuilder, RollbackLedger};

use crate::events::EventService;
use crate::vapix::VapixConnector;

/// Bumped whenever `Plugin` or `PluginDescriptor` change shape
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Host-provided services shared by every plugin
#[derive(Clone)]
pub struct Services {
    pub vapix: Arc<dyn VapixConnector>,
    pub events: Arc<dyn EventService>,
}

/// Everything a plugin's construct entry point may use
///
/// Node creation goes through `model()`, which records every created node in
/// this attempt's ledger.
pub struct ConstructContext<'a> {
    engine: Arc<dyn AddressSpace>,
    span: Span,
    params: Value,
    services: Services,
    ledger: &'a mut RollbackLedger,
}

impl<'a> ConstructContext<'a> {
    pub fn new(
        engine: Arc<dyn AddressSpace>,
        span: Span,
        params: Value,
        services: Services,
        ledger: &'a mut RollbackLedger,
    ) -> Self {
        Self {
            engine,
            span,
            params,
            services,
            ledger,
        }
    }

    /// Handle to the live graph, kept by plugins for their callbacks
    pub fn engine(&self) -> &Arc<dyn AddressSpace> {
        &self.engine
    }

    /// The plugin's logger
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn params(&self) -> &Value {
        &self.params
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn ledger(&self) -> &RollbackLedger {
        &*self.ledger
    }

    pub fn add_namespace(&self, uri: &str) -> u16 {
        self.engine.add_namespace(uri)
    }

    /// Rollback-aware node creation in `namespace`
    pub fn model(&mut self, namespace: u16) -> ModelBuilder<'_> {
        ModelBuilder::new(self.engine.as_ref(), &mut *self.ledger, namespace)
    }
}

/// The three entry points of a plugin
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Unique name for this plugin
    fn name(&self) -> &str;

    /// Build this plugin's part of the information model
    ///
    /// On error every node created through the context is rolled back and
    /// `destroy` is called to release whatever else was set up.
    async fn construct(&mut self, ctx: &mut ConstructContext<'_>) -> Result<()>;

    /// Release subscriptions, timers and caches. Never deletes nodes and may
    /// be called more than once.
    async fn destroy(&mut self);

    /// Convert to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Boxed plugin type
pub type BoxedPlugin = Box<dyn Plugin>;

/// Entry in the factory table
#[derive(Clone, Copy)]
pub struct PluginDescriptor {
    pub abi_version: u32,
    pub name: &'static str,
    pub create: fn() -> BoxedPlugin,
}

impl PluginDescriptor {
    pub const fn new(name: &'static str, create: fn() -> BoxedPlugin) -> Self {
        Self {
            abi_version: PLUGIN_ABI_VERSION,
            name,
            create,
        }
    }
}

impl std::fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("abi_version", &self.abi_version)
            .field("name", &self.name)
            .finish()
    }
}
