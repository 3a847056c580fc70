//! The graph-store interface consumed by the mutation facade, the rollback
//! executor and the request dispatcher.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use ua_core::{NodeClass, NodeId, QualifiedName, StatusCode, Variant};

use crate::node::{MethodAttributes, NewNode, ValueSource};
use crate::registry::CustomTypeRegistry;

/// Result of a single graph-store primitive
pub type StoreResult<T> = std::result::Result<T, StatusCode>;

/// Active head of the custom data-type override chain
pub type RegistryHead = Option<Arc<CustomTypeRegistry>>;

/// An event after it was triggered
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub event_id: NodeId,
    pub event_type: NodeId,
    pub origin: NodeId,
    pub fields: BTreeMap<String, Variant>,
    pub emitted_at: DateTime<Utc>,
}

impl EmittedEvent {
    pub fn field(&self, name: &str) -> Option<&Variant> {
        self.fields.get(name)
    }
}

/// Opaque graph-mutation and event-publishing service
///
/// All calls are synchronous and complete before returning.
pub trait AddressSpace: Send + Sync {
    /// Register a namespace URI, returning its index (existing index if known)
    fn add_namespace(&self, uri: &str) -> u16;

    fn namespace_index(&self, uri: &str) -> Option<u16>;

    fn create_node(&self, request: NewNode) -> StoreResult<NodeId>;

    /// Delete a node. With `delete_references` every edge touching it goes
    /// too, and hierarchical children left without a parent are deleted.
    fn delete_node(&self, id: &NodeId, delete_references: bool) -> StoreResult<()>;

    fn add_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        target: &NodeId,
        is_forward: bool,
    ) -> StoreResult<()>;

    /// Current head of the custom data-type registry
    fn custom_types(&self) -> RegistryHead;

    /// Replace the head of the custom data-type registry
    fn set_custom_types(&self, head: RegistryHead);

    fn contains(&self, id: &NodeId) -> bool;

    fn node_class(&self, id: &NodeId) -> StoreResult<NodeClass>;

    /// Every node id in the store
    fn node_ids(&self) -> Vec<NodeId>;

    /// Find the target of a forward `reference_type` edge whose browse name matches
    fn find_child(&self, parent: &NodeId, reference_type: &NodeId, browse_name: &str) -> StoreResult<NodeId>;

    /// Forward hierarchical children of a node
    fn children(&self, parent: &NodeId) -> StoreResult<Vec<NodeId>>;

    fn browse_name(&self, id: &NodeId) -> StoreResult<QualifiedName>;

    /// Stored value of a Variable (ignores any value source)
    fn read_value(&self, id: &NodeId) -> StoreResult<Variant>;

    /// Replace the stored value of a Variable after a type check
    fn write_value(&self, id: &NodeId, value: Variant) -> StoreResult<()>;

    /// Write the property `name` of an object, or a field of a pending event
    fn write_object_property(&self, object: &NodeId, name: &QualifiedName, value: Variant) -> StoreResult<()>;

    fn access_level(&self, id: &NodeId) -> StoreResult<u8>;

    fn write_access_level(&self, id: &NodeId, access_level: u8) -> StoreResult<()>;

    fn value_source(&self, id: &NodeId) -> StoreResult<Option<Arc<dyn ValueSource>>>;

    fn method(&self, id: &NodeId) -> StoreResult<MethodAttributes>;

    /// Create a pending event of `event_type` (must derive from BaseEventType)
    fn create_event(&self, event_type: &NodeId) -> StoreResult<NodeId>;

    fn trigger_event(&self, event_id: &NodeId, origin: &NodeId, delete_event_node: bool) -> StoreResult<()>;

    /// Marked by the dispatcher when it starts accepting requests
    fn set_serving(&self, serving: bool);

    /// True once network-facing dispatch has started
    fn is_serving(&self) -> bool;
}
