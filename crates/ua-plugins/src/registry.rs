//! Plugin host: factory table, instance bookkeeping and lifecycle hooks

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use ua_core::{Error, Result};
use ua_model::AddressSpace;

use crate::default_registry::PluginHostConfig;
use crate::lifecycle::{self, PluginInstance, PluginState};
use crate::plugin::{PluginDescriptor, Services, PLUGIN_ABI_VERSION};

/// Plugin lifecycle event
#[derive(Debug, Clone)]
pub enum PluginEvent {
    Loading { name: String },
    Activated { name: String },
    Failed { name: String, error: String },
    Destroyed { name: String },
}

/// Hook handler type
pub type HookHandler = Arc<dyn Fn(&PluginEvent) -> anyhow::Result<()> + Send + Sync>;

/// Loads plugins from registered factories into one engine
pub struct PluginHost {
    engine: Arc<dyn AddressSpace>,
    services: Services,
    factories: HashMap<&'static str, PluginDescriptor>,
    instances: Arc<RwLock<Vec<PluginInstance>>>,
    hooks: Arc<RwLock<Vec<HookHandler>>>,
    loading: Mutex<HashSet<String>>,
}

/// Holds a plugin name in the host's loading set until dropped
struct LoadingSlot<'a> {
    loading: &'a Mutex<HashSet<String>>,
    name: String,
}

impl<'a> LoadingSlot<'a> {
    fn claim(loading: &'a Mutex<HashSet<String>>, name: &str) -> Option<Self> {
        if !loading.lock().insert(name.to_string()) {
            return None;
        }
        Some(Self {
            loading,
            name: name.to_string(),
        })
    }
}

impl Drop for LoadingSlot<'_> {
    fn drop(&mut self) {
        self.loading.lock().remove(&self.name);
    }
}

impl PluginHost {
    pub fn new(engine: Arc<dyn AddressSpace>, services: Services) -> Self {
        Self {
            engine,
            services,
            factories: HashMap::new(),
            instances: Arc::new(RwLock::new(Vec::new())),
            hooks: Arc::new(RwLock::new(Vec::new())),
            loading: Mutex::new(HashSet::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn AddressSpace> {
        &self.engine
    }

    /// Add a factory to the table
    pub fn register_factory(&mut self, descriptor: PluginDescriptor) -> Result<()> {
        if self.factories.contains_key(descriptor.name) {
            return Err(Error::plugin(format!("Plugin '{}' is already registered", descriptor.name)));
        }
        self.factories.insert(descriptor.name, descriptor);
        Ok(())
    }

    /// Registered factory names, sorted
    pub fn factories(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Register a hook for plugin events
    pub async fn register_hook(&self, handler: HookHandler) {
        let mut hooks = self.hooks.write().await;
        hooks.push(handler);
    }

    /// Emit an event to all hooks
    async fn emit_event(&self, event: PluginEvent) {
        let hooks = self.hooks.read().await;
        for hook in hooks.iter() {
            if let Err(e) = hook(&event) {
                warn!("Hook error: {}", e);
            }
        }
    }

    /// Create and construct one plugin
    ///
    /// A setup failure (unknown factory, ABI mismatch, name mismatch) leaves
    /// nothing behind. A construct failure leaves a Failed instance whose
    /// nodes have been rolled back.
    pub async fn load(&self, name: &str, params: Value) -> Result<()> {
        let descriptor = *self
            .factories
            .get(name)
            .ok_or_else(|| Error::not_found(format!("Unknown plugin: {}", name)))?;

        self.emit_event(PluginEvent::Loading { name: name.to_string() }).await;

        if descriptor.abi_version != PLUGIN_ABI_VERSION {
            return Err(Error::plugin(format!(
                "Plugin setup failure: '{}' has ABI version {}, expected {}",
                name, descriptor.abi_version, PLUGIN_ABI_VERSION
            )));
        }

        let plugin = (descriptor.create)();
        if plugin.name() != descriptor.name {
            return Err(Error::plugin(format!(
                "Plugin setup failure: factory '{}' created plugin '{}'",
                descriptor.name,
                plugin.name()
            )));
        }

        // Released only after the instance is stored
        let _slot = LoadingSlot::claim(&self.loading, name)
            .ok_or_else(|| Error::plugin(format!("Plugin '{}' is already being loaded", name)))?;
        {
            let instances = self.instances.read().await;
            if instances.iter().any(|i| i.name() == name) {
                return Err(Error::plugin(format!("Plugin '{}' is already loaded", name)));
            }
        }

        let mut instance = PluginInstance::new(name, plugin);
        let result = lifecycle::construct(&mut instance, self.engine.clone(), &self.services, params).await;

        // Setup-time refusals leave the instance Unloaded; nothing to keep
        if instance.state() != PluginState::Unloaded {
            self.instances.write().await.push(instance);
        }

        match result {
            Ok(()) => {
                self.emit_event(PluginEvent::Activated { name: name.to_string() }).await;
                Ok(())
            }
            Err(e) => {
                self.emit_event(PluginEvent::Failed {
                    name: name.to_string(),
                    error: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Load every enabled plugin in order
    ///
    /// A failing plugin is logged and skipped. A rollback failure stops
    /// loading unless the config says otherwise. Returns the number of
    /// active plugins.
    pub async fn load_all(&self, config: &PluginHostConfig) -> Result<usize> {
        let enabled = config.enabled_or(self.factories());

        for plugin_name in &enabled {
            let params = config.plugin_configs.get(plugin_name).cloned().unwrap_or(Value::Null);
            match self.load(plugin_name, params).await {
                Ok(()) => {
                    info!("✅ Loaded plugin: {}", plugin_name);
                }
                Err(e) if e.is_fatal() && config.abort_on_rollback_failure => {
                    error!("Stopping plugin loading after {}: {}", plugin_name, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("⚠️ Failed to load plugin {}: {}", plugin_name, e);
                }
            }
        }

        let active = self.active_plugins().await.len();
        info!("📦 Loaded {} plugins", active);
        Ok(active)
    }

    /// Names of Active plugins, in load order
    pub async fn active_plugins(&self) -> Vec<String> {
        let instances = self.instances.read().await;
        instances
            .iter()
            .filter(|i| i.state() == PluginState::Active)
            .map(|i| i.name().to_string())
            .collect()
    }

    pub async fn state_of(&self, name: &str) -> Option<PluginState> {
        let instances = self.instances.read().await;
        instances.iter().find(|i| i.name() == name).map(|i| i.state())
    }

    pub async fn history_of(&self, name: &str) -> Option<Vec<PluginState>> {
        let instances = self.instances.read().await;
        instances.iter().find(|i| i.name() == name).map(|i| i.history().to_vec())
    }

    pub async fn failure_of(&self, name: &str) -> Option<String> {
        let instances = self.instances.read().await;
        instances
            .iter()
            .find(|i| i.name() == name)
            .and_then(|i| i.failure().map(str::to_string))
    }

    /// Call destroy on every kept instance, newest first
    pub async fn destroy_all(&self) -> Result<()> {
        let mut destroyed = Vec::new();
        {
            let mut instances = self.instances.write().await;
            for instance in instances.iter_mut().rev() {
                if instance.state() == PluginState::Destroyed {
                    continue;
                }
                info!("Unload plugin '{}'", instance.name());
                lifecycle::destroy(instance).await?;
                destroyed.push(instance.name().to_string());
            }
        }

        for name in destroyed {
            self.emit_event(PluginEvent::Destroyed { name }).await;
        }
        Ok(())
    }

    pub async fn count(&self) -> usize {
        self.instances.read().await.len()
    }
}
