//! ua-plugins: Plugin host for the OPC-UA information model
//!
//! Features:
//! - Factory table of compiled-in plugins
//! - Lifecycle state machine with rollback of failed constructs
//! - Property accessors backing variable nodes from plugin caches
//! - System event subscriptions and VAPIX device access
//! - Lifecycle hooks

pub mod accessor;
pub mod builtin;
pub mod events;
pub mod lifecycle;
pub mod plugin;
pub mod registry;
pub mod vapix;

pub mod default_registry;

pub use accessor::{PropertyAccessor, PropertyBinding};
pub use default_registry::{builtin_descriptors, default_host, PluginHostConfig};
pub use events::{Event, EventFilter, EventService, EventValue, LocalEventBus, SubscriptionId};
pub use lifecycle::{PluginInstance, PluginState};
pub use plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor, Services, PLUGIN_ABI_VERSION};
pub use registry::{HookHandler, PluginEvent, PluginHost};
pub use vapix::{DefaultVapixConnector, VapixConnector, VapixError, VapixTransport};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::accessor::{PropertyAccessor, PropertyBinding};
    pub use super::events::{Event, EventFilter, EventService, SubscriptionId, TNS1, TNSAXIS};
    pub use super::plugin::{BoxedPlugin, ConstructContext, Plugin, PluginDescriptor};
    pub use super::registry::PluginHost;
    pub use super::vapix::{json_method, VapixError, VapixTransport};
}
