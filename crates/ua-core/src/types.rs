//! Information-model value types shared by the graph store and the plugins

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Namespace URI of the OPC-UA base namespace (index 0)
pub const NS0_URI: &str = "http://opcfoundation.org/UA/";

/// Local part of a [`NodeId`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    Numeric(u32),
    String(String),
}

/// A namespace-qualified node identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    /// The null id `ns=0;i=0`
    pub fn null() -> Self {
        Self::numeric(0, 0)
    }

    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// True when the store should pick the identifier (numeric 0 in any namespace)
    pub fn wants_assignment(&self) -> bool {
        self.identifier == Identifier::Numeric(0)
    }

    /// Numeric id in namespace 0
    pub const fn ns0(id: u32) -> Self {
        Self {
            namespace: 0,
            identifier: Identifier::Numeric(id),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(i) => write!(f, "ns={};i={}", self.namespace, i),
            Identifier::String(s) => write!(f, "ns={};s={}", self.namespace, s),
        }
    }
}

/// Browse name: a name qualified by a namespace index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub locale: String,
    pub text: String,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
            text: text.into(),
        }
    }

    /// Text with the neutral locale
    pub fn plain(text: impl Into<String>) -> Self {
        Self::new("", text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeClass {
    Object,
    Variable,
    Method,
    ObjectType,
    VariableType,
    ReferenceType,
    DataType,
}

/// A scalar (or LocalizedText array) value held by a Variable node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Double(f64),
    String(String),
    DateTime(DateTime<Utc>),
    LocalizedText(LocalizedText),
    LocalizedTextArray(Vec<LocalizedText>),
}

impl Variant {
    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    /// Name of the variant kind, used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Variant::Empty => "Empty",
            Variant::Boolean(_) => "Boolean",
            Variant::UInt16(_) => "UInt16",
            Variant::Int32(_) => "Int32",
            Variant::UInt32(_) => "UInt32",
            Variant::Double(_) => "Double",
            Variant::String(_) => "String",
            Variant::DateTime(_) => "DateTime",
            Variant::LocalizedText(_) => "LocalizedText",
            Variant::LocalizedTextArray(_) => "LocalizedText[]",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Variant::Int32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Variant::UInt32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Self {
        Variant::Boolean(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Self {
        Variant::Int32(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Self {
        Variant::UInt32(v)
    }
}

impl From<u16> for Variant {
    fn from(v: u16) -> Self {
        Variant::UInt16(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Self {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Self {
        Variant::String(v)
    }
}

impl From<LocalizedText> for Variant {
    fn from(v: LocalizedText) -> Self {
        Variant::LocalizedText(v)
    }
}

impl From<DateTime<Utc>> for Variant {
    fn from(v: DateTime<Utc>) -> Self {
        Variant::DateTime(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::numeric(2, 5006).to_string(), "ns=2;i=5006");
        assert_eq!(NodeId::string(3, "Thermal1").to_string(), "ns=3;s=Thermal1");
    }

    #[test]
    fn test_null_and_assignment() {
        assert!(NodeId::null().is_null());
        assert!(NodeId::numeric(4, 0).wants_assignment());
        assert!(!NodeId::numeric(4, 0).is_null());
        assert!(!NodeId::string(1, "x").wants_assignment());
    }
}
