//! Rollback-aware node creation
//!
//! Each `add_*_node` call creates one node through the graph store and records
//! its id in the ledger. Ledger space is reserved before the store is touched,
//! so a node never exists without an entry. A store rejection is returned
//! verbatim as `Error::Rejected` and leaves the ledger untouched.

use std::sync::Arc;
use tracing::{debug, warn};

use ua_core::{ids, Error, LocalizedText, NodeId, QualifiedName, Result};

use crate::ledger::RollbackLedger;
use crate::node::{
    access, Argument, DataTypeAttributes, MethodAttributes, MethodHandler, NewNode, NodeAttributes, NodeSpec,
    ObjectAttributes, ObjectTypeAttributes, ValueSource, VariableAttributes,
};
use crate::registry::{CustomDataType, CustomTypeRegistry};
use crate::space::AddressSpace;

fn add_node(space: &dyn AddressSpace, request: NewNode, ledger: &mut RollbackLedger) -> Result<NodeId> {
    if let Err(e) = ledger.reserve() {
        warn!("Not creating {}: {}", request.spec.browse_name, e);
        return Err(e);
    }

    match space.create_node(request) {
        Ok(id) => {
            ledger.record(id.clone());
            Ok(id)
        }
        Err(status) => {
            debug!("Graph store rejected node creation: {}", status);
            Err(Error::Rejected(status))
        }
    }
}

pub fn add_object_node(
    space: &dyn AddressSpace,
    spec: NodeSpec,
    attributes: ObjectAttributes,
    ledger: &mut RollbackLedger,
) -> Result<NodeId> {
    add_node(space, NewNode { spec, attributes: NodeAttributes::Object(attributes) }, ledger)
}

pub fn add_variable_node(
    space: &dyn AddressSpace,
    spec: NodeSpec,
    attributes: VariableAttributes,
    ledger: &mut RollbackLedger,
) -> Result<NodeId> {
    add_node(space, NewNode { spec, attributes: NodeAttributes::Variable(attributes) }, ledger)
}

pub fn add_data_type_node(
    space: &dyn AddressSpace,
    spec: NodeSpec,
    attributes: DataTypeAttributes,
    ledger: &mut RollbackLedger,
) -> Result<NodeId> {
    add_node(space, NewNode { spec, attributes: NodeAttributes::DataType(attributes) }, ledger)
}

pub fn add_object_type_node(
    space: &dyn AddressSpace,
    spec: NodeSpec,
    attributes: ObjectTypeAttributes,
    ledger: &mut RollbackLedger,
) -> Result<NodeId> {
    add_node(space, NewNode { spec, attributes: NodeAttributes::ObjectType(attributes) }, ledger)
}

pub fn add_method_node(
    space: &dyn AddressSpace,
    spec: NodeSpec,
    attributes: MethodAttributes,
    ledger: &mut RollbackLedger,
) -> Result<NodeId> {
    add_node(space, NewNode { spec, attributes: NodeAttributes::Method(attributes) }, ledger)
}

/// Link `types` in front of the active custom-type chain, saving the previous
/// head in the ledger first
pub fn swap_custom_types(
    space: &dyn AddressSpace,
    types: Vec<CustomDataType>,
    ledger: &mut RollbackLedger,
) -> Arc<CustomTypeRegistry> {
    let previous = space.custom_types();
    if ledger.has_registry_snapshot() {
        warn!("Custom types swapped twice in one attempt");
    }
    ledger.save_registry_snapshot(previous.clone());

    let head = Arc::new(CustomTypeRegistry::new(types, previous));
    space.set_custom_types(Some(head.clone()));
    head
}

/// Namespace-bound front end over the facade used by information-model
/// builders
pub struct ModelBuilder<'a> {
    space: &'a dyn AddressSpace,
    ledger: &'a mut RollbackLedger,
    namespace: u16,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(space: &'a dyn AddressSpace, ledger: &'a mut RollbackLedger, namespace: u16) -> Self {
        Self { space, ledger, namespace }
    }

    pub fn namespace(&self) -> u16 {
        self.namespace
    }

    pub fn space(&self) -> &dyn AddressSpace {
        self.space
    }

    pub fn ledger(&self) -> &RollbackLedger {
        &*self.ledger
    }

    /// Numeric id in this builder's namespace; 0 lets the store choose
    pub fn id(&self, id: u32) -> NodeId {
        NodeId::numeric(self.namespace, id)
    }

    pub fn name(&self, name: &str) -> QualifiedName {
        QualifiedName::new(self.namespace, name)
    }

    pub fn object(&mut self, spec: NodeSpec, attributes: ObjectAttributes) -> Result<NodeId> {
        add_object_node(self.space, spec, attributes, self.ledger)
    }

    pub fn variable(&mut self, spec: NodeSpec, attributes: VariableAttributes) -> Result<NodeId> {
        add_variable_node(self.space, spec, attributes, self.ledger)
    }

    pub fn data_type(&mut self, spec: NodeSpec, attributes: DataTypeAttributes) -> Result<NodeId> {
        add_data_type_node(self.space, spec, attributes, self.ledger)
    }

    pub fn object_type(&mut self, spec: NodeSpec, attributes: ObjectTypeAttributes) -> Result<NodeId> {
        add_object_type_node(self.space, spec, attributes, self.ledger)
    }

    pub fn method(&mut self, spec: NodeSpec, attributes: MethodAttributes) -> Result<NodeId> {
        add_method_node(self.space, spec, attributes, self.ledger)
    }

    /// Object organized under `parent` with a plain display name
    pub fn folder_object(&mut self, requested: NodeId, parent: NodeId, name: &str) -> Result<NodeId> {
        let spec = NodeSpec::new(requested, parent, ids::ORGANIZES, self.name(name))
            .with_type_definition(ids::BASE_OBJECT_TYPE);
        self.object(
            spec,
            ObjectAttributes {
                display_name: LocalizedText::new("en-US", name),
                ..Default::default()
            },
        )
    }

    /// Property of `parent` whose value is served by `source`
    pub fn sourced_property(
        &mut self,
        parent: &NodeId,
        name: &str,
        data_type: NodeId,
        access_level: u8,
        source: Arc<dyn ValueSource>,
    ) -> Result<NodeId> {
        let spec = NodeSpec::new(self.id(0), parent.clone(), ids::HAS_PROPERTY, self.name(name))
            .with_type_definition(ids::PROPERTY_TYPE);
        self.variable(
            spec,
            VariableAttributes {
                display_name: LocalizedText::new("en-US", name),
                data_type,
                access_level,
                source: Some(source),
                ..Default::default()
            },
        )
    }

    /// Read-only property holding a stored value
    pub fn static_property(
        &mut self,
        parent: &NodeId,
        name: &str,
        data_type: NodeId,
        value: ua_core::Variant,
    ) -> Result<NodeId> {
        let spec = NodeSpec::new(self.id(0), parent.clone(), ids::HAS_PROPERTY, self.name(name))
            .with_type_definition(ids::PROPERTY_TYPE);
        self.variable(
            spec,
            VariableAttributes {
                display_name: LocalizedText::new("en-US", name),
                data_type,
                value,
                access_level: access::READ,
                ..Default::default()
            },
        )
    }

    /// Method component of `parent`
    pub fn method_component(
        &mut self,
        parent: &NodeId,
        browse_name: &str,
        display_name: &str,
        input_arguments: Vec<Argument>,
        output_arguments: Vec<Argument>,
        handler: Arc<dyn MethodHandler>,
    ) -> Result<NodeId> {
        let spec = NodeSpec::new(self.id(0), parent.clone(), ids::HAS_COMPONENT, self.name(browse_name));
        self.method(
            spec,
            MethodAttributes {
                display_name: LocalizedText::new("en-US", display_name),
                executable: true,
                input_arguments,
                output_arguments,
                handler: Some(handler),
                ..Default::default()
            },
        )
    }

    pub fn add_reference(&mut self, source: &NodeId, reference_type: &NodeId, target: &NodeId, is_forward: bool) -> Result<()> {
        self.space.add_reference(source, reference_type, target, is_forward).map_err(Error::Rejected)
    }

    pub fn swap_custom_types(&mut self, types: Vec<CustomDataType>) -> Arc<CustomTypeRegistry> {
        swap_custom_types(self.space, types, self.ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAddressSpace;
    use crate::registry::EnumField;
    use ua_core::StatusCode;

    #[test]
    fn test_success_is_recorded() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:facade");
        let mut ledger = RollbackLedger::open();

        let id = add_object_node(
            &space,
            NodeSpec::new(NodeId::numeric(ns, 1), ids::OBJECTS_FOLDER, ids::ORGANIZES, QualifiedName::new(ns, "A")),
            ObjectAttributes::default(),
            &mut ledger,
        )
        .unwrap();

        assert_eq!(ledger.ids(), &[id]);
    }

    #[test]
    fn test_rejection_passes_status_through() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:facade");
        let mut ledger = RollbackLedger::open();

        let err = add_object_node(
            &space,
            NodeSpec::new(NodeId::numeric(ns, 1), NodeId::numeric(ns, 404), ids::ORGANIZES, QualifiedName::new(ns, "A")),
            ObjectAttributes::default(),
            &mut ledger,
        )
        .unwrap_err();

        assert_eq!(err.status(), Some(StatusCode::BadParentNodeIdInvalid));
        assert!(ledger.ids().is_empty());
    }

    #[test]
    fn test_swap_saves_previous_head() {
        let space = MemoryAddressSpace::new();
        let mut ledger = RollbackLedger::open();
        let head = swap_custom_types(
            &space,
            vec![CustomDataType::enumeration(NodeId::numeric(1, 3005), "T", vec![EnumField::new(0, "A")])],
            &mut ledger,
        );

        assert!(ledger.has_registry_snapshot());
        assert!(Arc::ptr_eq(&space.custom_types().unwrap(), &head));
    }
}
