//! Custom data-type registry
//!
//! The store keeps one active head of a singly linked override list. A plugin
//! that needs extra types links a new head in front of the current one; on
//! rollback the previous head is restored verbatim.

use std::sync::Arc;

use ua_core::{NodeId, StatusCode, Variant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumField {
    pub value: i32,
    pub name: String,
}

impl EnumField {
    pub fn new(value: i32, name: impl Into<String>) -> Self {
        Self {
            value,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomTypeKind {
    Enumeration(Vec<EnumField>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDataType {
    pub type_id: NodeId,
    pub name: String,
    pub kind: CustomTypeKind,
}

impl CustomDataType {
    pub fn enumeration(type_id: NodeId, name: impl Into<String>, fields: Vec<EnumField>) -> Self {
        Self {
            type_id,
            name: name.into(),
            kind: CustomTypeKind::Enumeration(fields),
        }
    }

    /// Check that `value` is a legal instance of this type
    pub fn accepts(&self, value: &Variant) -> Result<(), StatusCode> {
        match (&self.kind, value) {
            (_, Variant::Empty) => Ok(()),
            (CustomTypeKind::Enumeration(fields), Variant::Int32(v)) => {
                if fields.iter().any(|f| f.value == *v) {
                    Ok(())
                } else {
                    Err(StatusCode::BadTypeMismatch)
                }
            }
            _ => Err(StatusCode::BadTypeMismatch),
        }
    }
}

/// One link of the override chain
#[derive(Debug)]
pub struct CustomTypeRegistry {
    types: Vec<CustomDataType>,
    next: Option<Arc<CustomTypeRegistry>>,
}

impl CustomTypeRegistry {
    pub fn new(types: Vec<CustomDataType>, next: Option<Arc<CustomTypeRegistry>>) -> Self {
        Self { types, next }
    }

    pub fn types(&self) -> &[CustomDataType] {
        &self.types
    }

    pub fn next(&self) -> Option<&Arc<CustomTypeRegistry>> {
        self.next.as_ref()
    }

    /// Find a type by id, walking the chain from this head
    pub fn resolve(&self, type_id: &NodeId) -> Option<&CustomDataType> {
        let mut link = Some(self);
        while let Some(registry) = link {
            if let Some(found) = registry.types.iter().find(|t| &t.type_id == type_id) {
                return Some(found);
            }
            link = registry.next.as_deref();
        }
        None
    }

    /// Number of links from this head to the end of the chain
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut link = Some(self);
        while let Some(registry) = link {
            depth += 1;
            link = registry.next.as_deref();
        }
        depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_type(ns: u16) -> CustomDataType {
        CustomDataType::enumeration(
            NodeId::numeric(ns, 3005),
            "IOPortStateType",
            vec![EnumField::new(0, "Open"), EnumField::new(1, "Closed")],
        )
    }

    #[test]
    fn test_resolve_walks_chain() {
        let base = Arc::new(CustomTypeRegistry::new(vec![state_type(2)], None));
        let head = CustomTypeRegistry::new(vec![state_type(3)], Some(base));

        assert!(head.resolve(&NodeId::numeric(3, 3005)).is_some());
        assert!(head.resolve(&NodeId::numeric(2, 3005)).is_some());
        assert!(head.resolve(&NodeId::numeric(4, 3005)).is_none());
        assert_eq!(head.depth(), 2);
    }

    #[test]
    fn test_enumeration_accepts_defined_fields_only() {
        let t = state_type(2);
        assert!(t.accepts(&Variant::Int32(1)).is_ok());
        assert_eq!(t.accepts(&Variant::Int32(2)), Err(StatusCode::BadTypeMismatch));
        assert_eq!(t.accepts(&Variant::Boolean(true)), Err(StatusCode::BadTypeMismatch));
    }
}
