//! Node attributes and the callbacks that back Variable and Method nodes

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ua_core::{ids, LocalizedText, NodeClass, NodeId, QualifiedName, StatusCode, Variant};

/// Access level bits of a Variable node
pub mod access {
    pub const READ: u8 = 0x01;
    pub const WRITE: u8 = 0x02;
    pub const READ_WRITE: u8 = READ | WRITE;
}

/// Opaque per-node context handed to the store at creation time
pub type NodeContext = Arc<dyn Any + Send + Sync>;

/// Read/write backend of a Variable node whose value lives outside the store
#[async_trait]
pub trait ValueSource: Send + Sync {
    async fn read(&self, node: &NodeId) -> Result<Variant, StatusCode>;

    async fn write(&self, node: &NodeId, value: &Variant) -> Result<(), StatusCode>;
}

/// Callback invoked when a client calls a Method node
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(&self, object: &NodeId, input: &[Variant]) -> Result<Vec<Variant>, StatusCode>;
}

/// Declared input or output argument of a method
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub data_type: NodeId,
    pub description: LocalizedText,
}

impl Argument {
    pub fn new(name: impl Into<String>, data_type: NodeId, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type,
            description: LocalizedText::new("en-US", description),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectAttributes {
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub event_notifier: u8,
}

#[derive(Clone)]
pub struct VariableAttributes {
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub value: Variant,
    pub data_type: NodeId,
    /// -1 scalar, 1 one-dimensional array
    pub value_rank: i32,
    pub access_level: u8,
    pub source: Option<Arc<dyn ValueSource>>,
}

impl Default for VariableAttributes {
    fn default() -> Self {
        Self {
            display_name: LocalizedText::default(),
            description: LocalizedText::default(),
            value: Variant::Empty,
            data_type: ids::BASE_DATA_TYPE,
            value_rank: -1,
            access_level: access::READ,
            source: None,
        }
    }
}

impl fmt::Debug for VariableAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VariableAttributes")
            .field("display_name", &self.display_name)
            .field("value", &self.value)
            .field("data_type", &self.data_type)
            .field("value_rank", &self.value_rank)
            .field("access_level", &self.access_level)
            .field("source", &self.source.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct DataTypeAttributes {
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub is_abstract: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ObjectTypeAttributes {
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub is_abstract: bool,
}

#[derive(Clone, Default)]
pub struct MethodAttributes {
    pub display_name: LocalizedText,
    pub description: LocalizedText,
    pub executable: bool,
    pub input_arguments: Vec<Argument>,
    pub output_arguments: Vec<Argument>,
    pub handler: Option<Arc<dyn MethodHandler>>,
}

impl fmt::Debug for MethodAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodAttributes")
            .field("display_name", &self.display_name)
            .field("executable", &self.executable)
            .field("input_arguments", &self.input_arguments)
            .field("output_arguments", &self.output_arguments)
            .finish()
    }
}

/// Kind-specific attributes of a node to be created
#[derive(Debug, Clone)]
pub enum NodeAttributes {
    Object(ObjectAttributes),
    Variable(VariableAttributes),
    DataType(DataTypeAttributes),
    ObjectType(ObjectTypeAttributes),
    Method(MethodAttributes),
}

impl NodeAttributes {
    pub fn node_class(&self) -> NodeClass {
        match self {
            NodeAttributes::Object(_) => NodeClass::Object,
            NodeAttributes::Variable(_) => NodeClass::Variable,
            NodeAttributes::DataType(_) => NodeClass::DataType,
            NodeAttributes::ObjectType(_) => NodeClass::ObjectType,
            NodeAttributes::Method(_) => NodeClass::Method,
        }
    }

    pub fn display_name(&self) -> &LocalizedText {
        match self {
            NodeAttributes::Object(a) => &a.display_name,
            NodeAttributes::Variable(a) => &a.display_name,
            NodeAttributes::DataType(a) => &a.display_name,
            NodeAttributes::ObjectType(a) => &a.display_name,
            NodeAttributes::Method(a) => &a.display_name,
        }
    }
}

/// Where a new node goes and what it is called
#[derive(Clone)]
pub struct NodeSpec {
    /// Requested identifier; numeric 0 lets the store assign one
    pub requested_id: NodeId,
    pub parent: NodeId,
    pub reference_type: NodeId,
    pub browse_name: QualifiedName,
    /// Ignored for DataType, ObjectType and Method nodes
    pub type_definition: NodeId,
    pub context: Option<NodeContext>,
}

impl NodeSpec {
    pub fn new(
        requested_id: NodeId,
        parent: NodeId,
        reference_type: NodeId,
        browse_name: QualifiedName,
    ) -> Self {
        Self {
            requested_id,
            parent,
            reference_type,
            browse_name,
            type_definition: NodeId::null(),
            context: None,
        }
    }

    pub fn with_type_definition(mut self, type_definition: NodeId) -> Self {
        self.type_definition = type_definition;
        self
    }

    pub fn with_context(mut self, context: NodeContext) -> Self {
        self.context = Some(context);
        self
    }
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("requested_id", &self.requested_id)
            .field("parent", &self.parent)
            .field("reference_type", &self.reference_type)
            .field("browse_name", &self.browse_name)
            .field("type_definition", &self.type_definition)
            .finish()
    }
}

/// A full creation request as seen by the graph store
#[derive(Debug, Clone)]
pub struct NewNode {
    pub spec: NodeSpec,
    pub attributes: NodeAttributes,
}
