//! In-memory graph store
//!
//! Holds the namespace-0 base nodes builders refer to, validates creation
//! requests the way an OPC-UA server does, and publishes triggered events on a
//! broadcast channel.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use ua_core::{ids, Identifier, LocalizedText, NodeClass, NodeId, QualifiedName, StatusCode, Variant, NS0_URI};

use crate::node::{access, MethodAttributes, NewNode, NodeAttributes, NodeContext, ValueSource};
use crate::space::{AddressSpace, EmittedEvent, RegistryHead, StoreResult};

/// First identifier handed out when a caller asks the store to pick one
const FIRST_ASSIGNED_ID: u32 = 50_000;
/// Triggered events kept for inspection
const EVENT_HISTORY: usize = 256;
const EVENT_CHANNEL_CAPACITY: usize = 64;

enum NodeBody {
    Object {
        event_notifier: u8,
    },
    Variable {
        value: Variant,
        data_type: NodeId,
        value_rank: i32,
        access_level: u8,
        source: Option<Arc<dyn ValueSource>>,
    },
    Method(MethodAttributes),
    Type {
        is_abstract: bool,
    },
    Plain,
}

struct NodeEntry {
    class: NodeClass,
    browse_name: QualifiedName,
    display_name: LocalizedText,
    #[allow(dead_code)]
    description: LocalizedText,
    body: NodeBody,
    #[allow(dead_code)]
    context: Option<NodeContext>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Edge {
    source: NodeId,
    reference_type: NodeId,
    target: NodeId,
}

struct PendingEvent {
    event_type: NodeId,
    fields: BTreeMap<String, Variant>,
}

struct Graph {
    namespaces: Vec<String>,
    nodes: HashMap<NodeId, NodeEntry>,
    edges: Vec<Edge>,
    next_id: HashMap<u16, u32>,
    custom_types: RegistryHead,
    pending_events: HashMap<NodeId, PendingEvent>,
    history: Vec<EmittedEvent>,
}

/// A reference to another node as seen from one end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceView {
    pub reference_type: NodeId,
    pub target: NodeId,
    pub is_forward: bool,
}

pub struct MemoryAddressSpace {
    graph: RwLock<Graph>,
    serving: AtomicBool,
    event_counter: AtomicU64,
    events: broadcast::Sender<EmittedEvent>,
}

fn is_hierarchical(reference_type: &NodeId) -> bool {
    *reference_type == ids::ORGANIZES
        || *reference_type == ids::HAS_COMPONENT
        || *reference_type == ids::HAS_PROPERTY
        || *reference_type == ids::HAS_SUBTYPE
        || *reference_type == ids::HIERARCHICAL_REFERENCES
}

impl Graph {
    fn seed() -> Self {
        let mut graph = Self {
            namespaces: vec![NS0_URI.to_string()],
            nodes: HashMap::new(),
            edges: Vec::new(),
            next_id: HashMap::new(),
            custom_types: None,
            pending_events: HashMap::new(),
            history: Vec::new(),
        };

        let reference_types = [
            (ids::REFERENCES, "References", None),
            (ids::HIERARCHICAL_REFERENCES, "HierarchicalReferences", Some(ids::REFERENCES)),
            (ids::NON_HIERARCHICAL_REFERENCES, "NonHierarchicalReferences", Some(ids::REFERENCES)),
            (ids::ORGANIZES, "Organizes", Some(ids::HIERARCHICAL_REFERENCES)),
            (ids::HAS_COMPONENT, "HasComponent", Some(ids::HIERARCHICAL_REFERENCES)),
            (ids::HAS_PROPERTY, "HasProperty", Some(ids::HIERARCHICAL_REFERENCES)),
            (ids::HAS_SUBTYPE, "HasSubtype", Some(ids::HIERARCHICAL_REFERENCES)),
            (ids::HAS_TYPE_DEFINITION, "HasTypeDefinition", Some(ids::NON_HIERARCHICAL_REFERENCES)),
            (ids::HAS_MODELLING_RULE, "HasModellingRule", Some(ids::NON_HIERARCHICAL_REFERENCES)),
            (ids::GENERATES_EVENT, "GeneratesEvent", Some(ids::NON_HIERARCHICAL_REFERENCES)),
        ];
        for (id, name, parent) in reference_types {
            graph.seed_node(id, name, NodeClass::ReferenceType, NodeBody::Type { is_abstract: false }, parent);
        }

        let type_body = || NodeBody::Type { is_abstract: false };
        graph.seed_node(ids::BASE_OBJECT_TYPE, "BaseObjectType", NodeClass::ObjectType, type_body(), None);
        graph.seed_node(ids::FOLDER_TYPE, "FolderType", NodeClass::ObjectType, type_body(), Some(ids::BASE_OBJECT_TYPE));
        graph.seed_node(ids::BASE_EVENT_TYPE, "BaseEventType", NodeClass::ObjectType, NodeBody::Type { is_abstract: true }, Some(ids::BASE_OBJECT_TYPE));
        graph.seed_node(ids::MODELLING_RULE_TYPE, "ModellingRuleType", NodeClass::ObjectType, type_body(), Some(ids::BASE_OBJECT_TYPE));
        graph.seed_node(ids::BASE_VARIABLE_TYPE, "BaseVariableType", NodeClass::VariableType, type_body(), None);
        graph.seed_node(ids::BASE_DATA_VARIABLE_TYPE, "BaseDataVariableType", NodeClass::VariableType, type_body(), Some(ids::BASE_VARIABLE_TYPE));
        graph.seed_node(ids::PROPERTY_TYPE, "PropertyType", NodeClass::VariableType, type_body(), Some(ids::BASE_VARIABLE_TYPE));

        graph.seed_node(ids::BASE_DATA_TYPE, "BaseDataType", NodeClass::DataType, NodeBody::Type { is_abstract: true }, None);
        let data_types = [
            (ids::BOOLEAN, "Boolean"),
            (ids::UINT16, "UInt16"),
            (ids::INT32, "Int32"),
            (ids::UINT32, "UInt32"),
            (ids::DOUBLE, "Double"),
            (ids::STRING, "String"),
            (ids::DATE_TIME, "DateTime"),
            (ids::LOCALIZED_TEXT, "LocalizedText"),
            (ids::ENUMERATION, "Enumeration"),
        ];
        for (id, name) in data_types {
            graph.seed_node(id, name, NodeClass::DataType, type_body(), Some(ids::BASE_DATA_TYPE));
        }

        graph.seed_node(ids::ROOT_FOLDER, "Root", NodeClass::Object, NodeBody::Object { event_notifier: 0 }, None);
        for (id, name) in [(ids::OBJECTS_FOLDER, "Objects"), (ids::TYPES_FOLDER, "Types")] {
            graph.seed_node(id.clone(), name, NodeClass::Object, NodeBody::Object { event_notifier: 0 }, None);
            graph.edges.push(Edge { source: ids::ROOT_FOLDER, reference_type: ids::ORGANIZES, target: id.clone() });
            graph.edges.push(Edge { source: id, reference_type: ids::HAS_TYPE_DEFINITION, target: ids::FOLDER_TYPE });
        }
        graph.seed_node(ids::MODELLING_RULE_MANDATORY, "Mandatory", NodeClass::Object, NodeBody::Object { event_notifier: 0 }, None);
        graph.edges.push(Edge {
            source: ids::MODELLING_RULE_MANDATORY,
            reference_type: ids::HAS_TYPE_DEFINITION,
            target: ids::MODELLING_RULE_TYPE,
        });

        graph
    }

    fn seed_node(&mut self, id: NodeId, name: &str, class: NodeClass, body: NodeBody, supertype: Option<NodeId>) {
        self.nodes.insert(
            id.clone(),
            NodeEntry {
                class,
                browse_name: QualifiedName::new(0, name),
                display_name: LocalizedText::plain(name),
                description: LocalizedText::default(),
                body,
                context: None,
            },
        );
        if let Some(supertype) = supertype {
            self.edges.push(Edge { source: supertype, reference_type: ids::HAS_SUBTYPE, target: id });
        }
    }

    fn class_of(&self, id: &NodeId) -> Option<NodeClass> {
        self.nodes.get(id).map(|n| n.class)
    }

    fn assign_id(&mut self, namespace: u16) -> NodeId {
        loop {
            let next = self.next_id.entry(namespace).or_insert(FIRST_ASSIGNED_ID);
            let candidate = NodeId::numeric(namespace, *next);
            *next += 1;
            if !self.nodes.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// True if `id` is `ancestor` or reaches it through inverse HasSubtype edges
    fn derives_from(&self, id: &NodeId, ancestor: &NodeId) -> bool {
        let mut current = id.clone();
        for _ in 0..64 {
            if &current == ancestor {
                return true;
            }
            match self
                .edges
                .iter()
                .find(|e| e.reference_type == ids::HAS_SUBTYPE && e.target == current)
            {
                Some(edge) => current = edge.source.clone(),
                None => return false,
            }
        }
        false
    }

    fn check_value(&self, data_type: &NodeId, value: &Variant) -> StoreResult<()> {
        if value.is_empty() || *data_type == ids::BASE_DATA_TYPE {
            return Ok(());
        }

        let builtin = match (data_type.namespace, &data_type.identifier) {
            (0, Identifier::Numeric(id)) => Some(*id),
            _ => None,
        };

        let matches = match (builtin, value) {
            (Some(1), Variant::Boolean(_)) => true,
            (Some(5), Variant::UInt16(_)) => true,
            (Some(6), Variant::Int32(_)) => true,
            (Some(7), Variant::UInt32(_)) => true,
            (Some(11), Variant::Double(_)) => true,
            (Some(12), Variant::String(_)) => true,
            (Some(13), Variant::DateTime(_)) => true,
            (Some(21), Variant::LocalizedText(_)) | (Some(21), Variant::LocalizedTextArray(_)) => true,
            (Some(29), Variant::Int32(_)) => true,
            (Some(_), _) => false,
            (None, _) => {
                let head = self.custom_types.as_ref().ok_or(StatusCode::BadDataTypeIdUnknown)?;
                let custom = head.resolve(data_type).ok_or(StatusCode::BadDataTypeIdUnknown)?;
                return custom.accepts(value);
            }
        };

        if matches {
            Ok(())
        } else {
            Err(StatusCode::BadTypeMismatch)
        }
    }

    fn validate(&self, request: &NewNode) -> StoreResult<()> {
        let spec = &request.spec;
        let class = request.attributes.node_class();

        let parent_class = self.class_of(&spec.parent).ok_or(StatusCode::BadParentNodeIdInvalid)?;
        if self.class_of(&spec.reference_type) != Some(NodeClass::ReferenceType) {
            return Err(StatusCode::BadReferenceTypeIdInvalid);
        }

        if spec.reference_type == ids::HAS_SUBTYPE && parent_class != class {
            return Err(StatusCode::BadParentNodeIdInvalid);
        }

        if is_hierarchical(&spec.reference_type) {
            let duplicate = self
                .edges
                .iter()
                .filter(|e| e.source == spec.parent && is_hierarchical(&e.reference_type))
                .filter_map(|e| self.nodes.get(&e.target))
                .any(|n| n.browse_name == spec.browse_name);
            if duplicate {
                return Err(StatusCode::BadBrowseNameDuplicated);
            }
        }

        match &request.attributes {
            NodeAttributes::Object(_) => {
                let type_def = self.effective_type_definition(request);
                if self.class_of(&type_def) != Some(NodeClass::ObjectType) {
                    return Err(StatusCode::BadTypeDefinitionInvalid);
                }
            }
            NodeAttributes::Variable(attrs) => {
                let type_def = self.effective_type_definition(request);
                if self.class_of(&type_def) != Some(NodeClass::VariableType) {
                    return Err(StatusCode::BadTypeDefinitionInvalid);
                }
                if self.class_of(&attrs.data_type) != Some(NodeClass::DataType) {
                    return Err(StatusCode::BadDataTypeIdUnknown);
                }
                self.check_value(&attrs.data_type, &attrs.value)?;
            }
            NodeAttributes::DataType(_) | NodeAttributes::ObjectType(_) | NodeAttributes::Method(_) => {}
        }

        Ok(())
    }

    fn effective_type_definition(&self, request: &NewNode) -> NodeId {
        let spec = &request.spec;
        if !spec.type_definition.is_null() {
            return spec.type_definition.clone();
        }
        match request.attributes {
            NodeAttributes::Variable(_) => ids::BASE_DATA_VARIABLE_TYPE,
            _ => ids::BASE_OBJECT_TYPE,
        }
    }

    fn has_hierarchical_parent(&self, id: &NodeId) -> bool {
        self.edges
            .iter()
            .any(|e| &e.target == id && is_hierarchical(&e.reference_type) && self.nodes.contains_key(&e.source))
    }

    fn remove(&mut self, id: &NodeId, delete_references: bool) {
        let children: Vec<NodeId> = self
            .edges
            .iter()
            .filter(|e| &e.source == id && is_hierarchical(&e.reference_type))
            .map(|e| e.target.clone())
            .collect();

        self.nodes.remove(id);
        if delete_references {
            self.edges.retain(|e| &e.source != id && &e.target != id);
        } else {
            self.edges.retain(|e| &e.source != id);
        }

        for child in children {
            if self.nodes.contains_key(&child) && !self.has_hierarchical_parent(&child) {
                debug!("Deleting orphaned child {} of {}", child, id);
                self.remove(&child, delete_references);
            }
        }
    }

    fn variable_mut(&mut self, id: &NodeId) -> StoreResult<&mut NodeEntry> {
        let node = self.nodes.get_mut(id).ok_or(StatusCode::BadNodeIdUnknown)?;
        if node.class != NodeClass::Variable {
            return Err(StatusCode::BadNodeClassInvalid);
        }
        Ok(node)
    }
}

impl MemoryAddressSpace {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            graph: RwLock::new(Graph::seed()),
            serving: AtomicBool::new(false),
            event_counter: AtomicU64::new(1),
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EmittedEvent> {
        self.events.subscribe()
    }

    /// Most recent triggered events, oldest first
    pub fn emitted_events(&self) -> Vec<EmittedEvent> {
        self.graph.read().history.clone()
    }

    pub fn node_count(&self) -> usize {
        self.graph.read().nodes.len()
    }

    pub fn display_name(&self, id: &NodeId) -> StoreResult<LocalizedText> {
        self.graph
            .read()
            .nodes
            .get(id)
            .map(|n| n.display_name.clone())
            .ok_or(StatusCode::BadNodeIdUnknown)
    }

    pub fn data_type(&self, id: &NodeId) -> StoreResult<NodeId> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Variable { data_type, .. }) => Ok(data_type.clone()),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    pub fn event_notifier(&self, id: &NodeId) -> StoreResult<u8> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Object { event_notifier }) => Ok(*event_notifier),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    pub fn is_abstract(&self, id: &NodeId) -> StoreResult<bool> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Type { is_abstract }) => Ok(*is_abstract),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    /// Both directions of every reference touching `id`
    pub fn references(&self, id: &NodeId) -> Vec<ReferenceView> {
        let graph = self.graph.read();
        graph
            .edges
            .iter()
            .filter_map(|e| {
                if &e.source == id {
                    Some(ReferenceView { reference_type: e.reference_type.clone(), target: e.target.clone(), is_forward: true })
                } else if &e.target == id {
                    Some(ReferenceView { reference_type: e.reference_type.clone(), target: e.source.clone(), is_forward: false })
                } else {
                    None
                }
            })
            .collect()
    }
}

impl Default for MemoryAddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for MemoryAddressSpace {
    fn add_namespace(&self, uri: &str) -> u16 {
        let mut graph = self.graph.write();
        if let Some(idx) = graph.namespaces.iter().position(|ns| ns == uri) {
            return idx as u16;
        }
        graph.namespaces.push(uri.to_string());
        (graph.namespaces.len() - 1) as u16
    }

    fn namespace_index(&self, uri: &str) -> Option<u16> {
        self.graph.read().namespaces.iter().position(|ns| ns == uri).map(|idx| idx as u16)
    }

    fn create_node(&self, request: NewNode) -> StoreResult<NodeId> {
        let mut graph = self.graph.write();

        if request.spec.requested_id.namespace as usize >= graph.namespaces.len() {
            return Err(StatusCode::BadNodeIdUnknown);
        }
        if !request.spec.requested_id.wants_assignment() && graph.nodes.contains_key(&request.spec.requested_id) {
            return Err(StatusCode::BadNodeIdExists);
        }
        graph.validate(&request)?;

        let id = if request.spec.requested_id.wants_assignment() {
            graph.assign_id(request.spec.requested_id.namespace)
        } else {
            request.spec.requested_id.clone()
        };

        let type_definition = match request.attributes {
            NodeAttributes::Object(_) | NodeAttributes::Variable(_) => Some(graph.effective_type_definition(&request)),
            _ => None,
        };

        let NewNode { spec, attributes } = request;
        let class = attributes.node_class();
        let display_name = attributes.display_name().clone();
        let (description, body) = match attributes {
            NodeAttributes::Object(a) => (a.description, NodeBody::Object { event_notifier: a.event_notifier }),
            NodeAttributes::Variable(a) => (
                a.description,
                NodeBody::Variable {
                    value: a.value,
                    data_type: a.data_type,
                    value_rank: a.value_rank,
                    access_level: a.access_level,
                    source: a.source,
                },
            ),
            NodeAttributes::DataType(a) => (a.description, NodeBody::Type { is_abstract: a.is_abstract }),
            NodeAttributes::ObjectType(a) => (a.description, NodeBody::Type { is_abstract: a.is_abstract }),
            NodeAttributes::Method(a) => (a.description.clone(), NodeBody::Method(a)),
        };

        graph.nodes.insert(
            id.clone(),
            NodeEntry {
                class,
                browse_name: spec.browse_name,
                display_name,
                description,
                body,
                context: spec.context,
            },
        );
        graph.edges.push(Edge { source: spec.parent, reference_type: spec.reference_type, target: id.clone() });
        if let Some(type_definition) = type_definition {
            graph.edges.push(Edge { source: id.clone(), reference_type: ids::HAS_TYPE_DEFINITION, target: type_definition });
        }

        debug!("Created {:?} node {}", class, id);
        Ok(id)
    }

    fn delete_node(&self, id: &NodeId, delete_references: bool) -> StoreResult<()> {
        let mut graph = self.graph.write();
        if !graph.nodes.contains_key(id) {
            return Err(StatusCode::BadNodeIdUnknown);
        }
        graph.remove(id, delete_references);
        debug!("Deleted node {}", id);
        Ok(())
    }

    fn add_reference(
        &self,
        source: &NodeId,
        reference_type: &NodeId,
        target: &NodeId,
        is_forward: bool,
    ) -> StoreResult<()> {
        let mut graph = self.graph.write();
        if graph.class_of(reference_type) != Some(NodeClass::ReferenceType) {
            return Err(StatusCode::BadReferenceTypeIdInvalid);
        }
        if !graph.nodes.contains_key(source) || !graph.nodes.contains_key(target) {
            return Err(StatusCode::BadNodeIdUnknown);
        }

        let edge = if is_forward {
            Edge { source: source.clone(), reference_type: reference_type.clone(), target: target.clone() }
        } else {
            Edge { source: target.clone(), reference_type: reference_type.clone(), target: source.clone() }
        };
        if !graph.edges.contains(&edge) {
            graph.edges.push(edge);
        }
        Ok(())
    }

    fn custom_types(&self) -> RegistryHead {
        self.graph.read().custom_types.clone()
    }

    fn set_custom_types(&self, head: RegistryHead) {
        self.graph.write().custom_types = head;
    }

    fn contains(&self, id: &NodeId) -> bool {
        self.graph.read().nodes.contains_key(id)
    }

    fn node_class(&self, id: &NodeId) -> StoreResult<NodeClass> {
        self.graph.read().class_of(id).ok_or(StatusCode::BadNodeIdUnknown)
    }

    fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.graph.read().nodes.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn find_child(&self, parent: &NodeId, reference_type: &NodeId, browse_name: &str) -> StoreResult<NodeId> {
        let graph = self.graph.read();
        if !graph.nodes.contains_key(parent) {
            return Err(StatusCode::BadNodeIdUnknown);
        }
        graph
            .edges
            .iter()
            .filter(|e| &e.source == parent && &e.reference_type == reference_type)
            .find(|e| graph.nodes.get(&e.target).map(|n| n.browse_name.name == browse_name).unwrap_or(false))
            .map(|e| e.target.clone())
            .ok_or(StatusCode::BadNotFound)
    }

    fn children(&self, parent: &NodeId) -> StoreResult<Vec<NodeId>> {
        let graph = self.graph.read();
        if !graph.nodes.contains_key(parent) {
            return Err(StatusCode::BadNodeIdUnknown);
        }
        Ok(graph
            .edges
            .iter()
            .filter(|e| &e.source == parent && is_hierarchical(&e.reference_type))
            .map(|e| e.target.clone())
            .collect())
    }

    fn browse_name(&self, id: &NodeId) -> StoreResult<QualifiedName> {
        self.graph
            .read()
            .nodes
            .get(id)
            .map(|n| n.browse_name.clone())
            .ok_or(StatusCode::BadNodeIdUnknown)
    }

    fn read_value(&self, id: &NodeId) -> StoreResult<Variant> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Variable { value, .. }) => Ok(value.clone()),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    fn write_value(&self, id: &NodeId, new_value: Variant) -> StoreResult<()> {
        let mut graph = self.graph.write();
        let data_type = match &graph.variable_mut(id)?.body {
            NodeBody::Variable { source: Some(_), .. } => return Err(StatusCode::BadWriteNotSupported),
            NodeBody::Variable { data_type, .. } => data_type.clone(),
            _ => return Err(StatusCode::BadNodeClassInvalid),
        };
        graph.check_value(&data_type, &new_value)?;
        if let NodeBody::Variable { value, .. } = &mut graph.variable_mut(id)?.body {
            *value = new_value;
        }
        Ok(())
    }

    fn write_object_property(&self, object: &NodeId, name: &QualifiedName, value: Variant) -> StoreResult<()> {
        {
            let mut graph = self.graph.write();
            if let Some(event) = graph.pending_events.get_mut(object) {
                event.fields.insert(name.name.clone(), value);
                return Ok(());
            }
        }

        let property = {
            let graph = self.graph.read();
            if !graph.nodes.contains_key(object) {
                return Err(StatusCode::BadNodeIdUnknown);
            }
            graph
                .edges
                .iter()
                .filter(|e| &e.source == object && e.reference_type == ids::HAS_PROPERTY)
                .find(|e| graph.nodes.get(&e.target).map(|n| &n.browse_name == name).unwrap_or(false))
                .map(|e| e.target.clone())
                .ok_or(StatusCode::BadNotFound)?
        };
        self.write_value(&property, value)
    }

    fn access_level(&self, id: &NodeId) -> StoreResult<u8> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Variable { access_level, .. }) => Ok(*access_level),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    fn write_access_level(&self, id: &NodeId, new_level: u8) -> StoreResult<()> {
        let mut graph = self.graph.write();
        if let NodeBody::Variable { access_level, .. } = &mut graph.variable_mut(id)?.body {
            *access_level = new_level & access::READ_WRITE;
        }
        Ok(())
    }

    fn value_source(&self, id: &NodeId) -> StoreResult<Option<Arc<dyn ValueSource>>> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Variable { source, .. }) => Ok(source.clone()),
            Some(_) => Err(StatusCode::BadNodeClassInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    fn method(&self, id: &NodeId) -> StoreResult<MethodAttributes> {
        let graph = self.graph.read();
        match graph.nodes.get(id).map(|n| &n.body) {
            Some(NodeBody::Method(attrs)) => Ok(attrs.clone()),
            Some(_) => Err(StatusCode::BadMethodInvalid),
            None => Err(StatusCode::BadNodeIdUnknown),
        }
    }

    fn create_event(&self, event_type: &NodeId) -> StoreResult<NodeId> {
        let mut graph = self.graph.write();
        if graph.class_of(event_type) != Some(NodeClass::ObjectType) {
            return Err(StatusCode::BadTypeDefinitionInvalid);
        }
        if !graph.derives_from(event_type, &ids::BASE_EVENT_TYPE) {
            return Err(StatusCode::BadTypeDefinitionInvalid);
        }

        let serial = self.event_counter.fetch_add(1, Ordering::SeqCst);
        let event_id = NodeId::string(0, format!("event-{}", serial));
        let mut fields = BTreeMap::new();
        fields.insert("EventType".to_string(), Variant::String(event_type.to_string()));
        graph.pending_events.insert(
            event_id.clone(),
            PendingEvent { event_type: event_type.clone(), fields },
        );
        Ok(event_id)
    }

    fn trigger_event(&self, event_id: &NodeId, origin: &NodeId, delete_event_node: bool) -> StoreResult<()> {
        let emitted = {
            let mut graph = self.graph.write();
            if !graph.nodes.contains_key(origin) {
                return Err(StatusCode::BadNodeIdUnknown);
            }
            let pending = graph.pending_events.get(event_id).ok_or(StatusCode::BadNodeIdUnknown)?;
            let emitted = EmittedEvent {
                event_id: event_id.clone(),
                event_type: pending.event_type.clone(),
                origin: origin.clone(),
                fields: pending.fields.clone(),
                emitted_at: Utc::now(),
            };
            if delete_event_node {
                graph.pending_events.remove(event_id);
            }
            if graph.history.len() >= EVENT_HISTORY {
                graph.history.remove(0);
            }
            graph.history.push(emitted.clone());
            emitted
        };

        // nobody listening is fine
        let _ = self.events.send(emitted);
        Ok(())
    }

    fn set_serving(&self, serving: bool) {
        self.serving.store(serving, Ordering::SeqCst);
    }

    fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{NodeSpec, ObjectAttributes, ObjectTypeAttributes, VariableAttributes};

    fn object(ns: u16, id: u32, parent: NodeId, name: &str) -> NewNode {
        NewNode {
            spec: NodeSpec::new(NodeId::numeric(ns, id), parent, ids::ORGANIZES, QualifiedName::new(ns, name)),
            attributes: NodeAttributes::Object(ObjectAttributes {
                display_name: LocalizedText::plain(name),
                ..Default::default()
            }),
        }
    }

    fn variable(ns: u16, id: u32, parent: NodeId, name: &str, value: Variant, data_type: NodeId) -> NewNode {
        NewNode {
            spec: NodeSpec::new(NodeId::numeric(ns, id), parent, ids::HAS_COMPONENT, QualifiedName::new(ns, name)),
            attributes: NodeAttributes::Variable(VariableAttributes {
                display_name: LocalizedText::plain(name),
                value,
                data_type,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_namespaces_are_idempotent() {
        let space = MemoryAddressSpace::new();
        let a = space.add_namespace("urn:a");
        assert_eq!(a, 1);
        assert_eq!(space.add_namespace("urn:a"), 1);
        assert_eq!(space.namespace_index(NS0_URI), Some(0));
        assert_eq!(space.namespace_index("urn:missing"), None);
    }

    #[test]
    fn test_create_rejections() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");

        space.create_node(object(ns, 1, ids::OBJECTS_FOLDER, "A")).unwrap();
        assert_eq!(
            space.create_node(object(ns, 1, ids::OBJECTS_FOLDER, "Other")),
            Err(StatusCode::BadNodeIdExists)
        );
        assert_eq!(
            space.create_node(object(ns, 2, NodeId::numeric(ns, 999), "B")),
            Err(StatusCode::BadParentNodeIdInvalid)
        );
        assert_eq!(
            space.create_node(object(ns, 3, ids::OBJECTS_FOLDER, "A")),
            Err(StatusCode::BadBrowseNameDuplicated)
        );

        let mut bad_ref = object(ns, 4, ids::OBJECTS_FOLDER, "C");
        bad_ref.spec.reference_type = ids::OBJECTS_FOLDER;
        assert_eq!(space.create_node(bad_ref), Err(StatusCode::BadReferenceTypeIdInvalid));

        assert_eq!(
            space.create_node(variable(ns, 5, ids::OBJECTS_FOLDER, "V", Variant::Int32(1), ids::STRING)),
            Err(StatusCode::BadTypeMismatch)
        );
    }

    #[test]
    fn test_assigned_ids() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");
        let first = space.create_node(object(ns, 0, ids::OBJECTS_FOLDER, "A")).unwrap();
        let second = space.create_node(object(ns, 0, ids::OBJECTS_FOLDER, "B")).unwrap();
        assert_eq!(first, NodeId::numeric(ns, FIRST_ASSIGNED_ID));
        assert_ne!(first, second);
    }

    #[test]
    fn test_delete_cascades_to_orphaned_children() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");
        let a = space.create_node(object(ns, 1, ids::OBJECTS_FOLDER, "A")).unwrap();
        let b = space
            .create_node(variable(ns, 2, a.clone(), "B", Variant::from("x"), ids::STRING))
            .unwrap();

        space.delete_node(&a, true).unwrap();
        assert!(!space.contains(&a));
        assert!(!space.contains(&b));
        assert_eq!(space.delete_node(&b, true), Err(StatusCode::BadNodeIdUnknown));
        assert!(space.references(&ids::OBJECTS_FOLDER).iter().all(|r| r.target != a));
    }

    #[test]
    fn test_delete_keeps_child_with_other_parent() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");
        let a = space.create_node(object(ns, 1, ids::OBJECTS_FOLDER, "A")).unwrap();
        let b = space.create_node(object(ns, 2, a.clone(), "B")).unwrap();
        space.add_reference(&ids::OBJECTS_FOLDER, &ids::ORGANIZES, &b, true).unwrap();

        space.delete_node(&a, true).unwrap();
        assert!(space.contains(&b));
    }

    #[test]
    fn test_write_value_type_checked() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");
        let v = space
            .create_node(variable(ns, 1, ids::OBJECTS_FOLDER, "V", Variant::Boolean(false), ids::BOOLEAN))
            .unwrap();

        space.write_value(&v, Variant::Boolean(true)).unwrap();
        assert_eq!(space.read_value(&v).unwrap(), Variant::Boolean(true));
        assert_eq!(space.write_value(&v, Variant::from("no")), Err(StatusCode::BadTypeMismatch));
    }

    #[test]
    fn test_events_require_event_type() {
        let space = MemoryAddressSpace::new();
        let ns = space.add_namespace("urn:test");
        let event_type = space
            .create_node(NewNode {
                spec: NodeSpec::new(NodeId::numeric(ns, 10), ids::BASE_EVENT_TYPE, ids::HAS_SUBTYPE, QualifiedName::new(ns, "MyEvent")),
                attributes: NodeAttributes::ObjectType(ObjectTypeAttributes::default()),
            })
            .unwrap();

        assert_eq!(space.create_event(&ids::FOLDER_TYPE), Err(StatusCode::BadTypeDefinitionInvalid));

        let mut rx = space.subscribe_events();
        let event = space.create_event(&event_type).unwrap();
        space
            .write_object_property(&event, &QualifiedName::new(0, "Severity"), Variant::UInt16(100))
            .unwrap();
        space.trigger_event(&event, &ids::OBJECTS_FOLDER, true).unwrap();

        let emitted = rx.try_recv().unwrap();
        assert_eq!(emitted.event_type, event_type);
        assert_eq!(emitted.field("Severity"), Some(&Variant::UInt16(100)));
        assert_eq!(space.trigger_event(&event, &ids::OBJECTS_FOLDER, true), Err(StatusCode::BadNodeIdUnknown));
    }
}
