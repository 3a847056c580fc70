//! Well-known identifiers of namespace 0

use crate::types::NodeId;

// Folders and objects
pub const ROOT_FOLDER: NodeId = NodeId::ns0(84);
pub const OBJECTS_FOLDER: NodeId = NodeId::ns0(85);
pub const TYPES_FOLDER: NodeId = NodeId::ns0(86);

// Reference types
pub const REFERENCES: NodeId = NodeId::ns0(31);
pub const HIERARCHICAL_REFERENCES: NodeId = NodeId::ns0(33);
pub const NON_HIERARCHICAL_REFERENCES: NodeId = NodeId::ns0(32);
pub const ORGANIZES: NodeId = NodeId::ns0(35);
pub const HAS_MODELLING_RULE: NodeId = NodeId::ns0(37);
pub const HAS_TYPE_DEFINITION: NodeId = NodeId::ns0(40);
pub const GENERATES_EVENT: NodeId = NodeId::ns0(41);
pub const HAS_SUBTYPE: NodeId = NodeId::ns0(45);
pub const HAS_PROPERTY: NodeId = NodeId::ns0(46);
pub const HAS_COMPONENT: NodeId = NodeId::ns0(47);

// Object and variable types
pub const BASE_OBJECT_TYPE: NodeId = NodeId::ns0(58);
pub const FOLDER_TYPE: NodeId = NodeId::ns0(61);
pub const BASE_VARIABLE_TYPE: NodeId = NodeId::ns0(62);
pub const BASE_DATA_VARIABLE_TYPE: NodeId = NodeId::ns0(63);
pub const PROPERTY_TYPE: NodeId = NodeId::ns0(68);
pub const BASE_EVENT_TYPE: NodeId = NodeId::ns0(2041);
pub const MODELLING_RULE_MANDATORY: NodeId = NodeId::ns0(78);
pub const MODELLING_RULE_TYPE: NodeId = NodeId::ns0(77);

// Data types
pub const BASE_DATA_TYPE: NodeId = NodeId::ns0(24);
pub const BOOLEAN: NodeId = NodeId::ns0(1);
pub const UINT16: NodeId = NodeId::ns0(5);
pub const INT32: NodeId = NodeId::ns0(6);
pub const UINT32: NodeId = NodeId::ns0(7);
pub const DOUBLE: NodeId = NodeId::ns0(11);
pub const STRING: NodeId = NodeId::ns0(12);
pub const DATE_TIME: NodeId = NodeId::ns0(13);
pub const LOCALIZED_TEXT: NodeId = NodeId::ns0(21);
pub const ENUMERATION: NodeId = NodeId::ns0(29);

/// Browse name of the property listing enumeration field names
pub const ENUM_STRINGS: &str = "EnumStrings";

/// Object attribute bit: clients may subscribe to events of this node
pub const EVENT_NOTIFIER_SUBSCRIBE: u8 = 0x01;
