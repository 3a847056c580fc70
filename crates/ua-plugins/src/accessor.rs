//! One read/write interface per plugin instead of a callback pair per property
//!
//! A plugin implements `PropertyAccessor` once, keyed by its own property-kind
//! enum. `PropertyBinding` maps each created node to an (instance, key) pair
//! and serves as the `ValueSource` of every bound node.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use ua_core::{NodeId, StatusCode, Variant};
use ua_model::ValueSource;

#[async_trait]
pub trait PropertyAccessor: Send + Sync {
    /// Property kind understood by this accessor
    type Key: Copy + Send + Sync + std::fmt::Debug + 'static;

    async fn get(&self, instance: u32, key: Self::Key) -> Result<Variant, StatusCode>;

    async fn set(&self, instance: u32, key: Self::Key, value: &Variant) -> Result<(), StatusCode>;
}

pub struct PropertyBinding<A: PropertyAccessor> {
    accessor: Arc<A>,
    bindings: RwLock<HashMap<NodeId, (u32, A::Key)>>,
}

impl<A: PropertyAccessor> PropertyBinding<A> {
    pub fn new(accessor: Arc<A>) -> Self {
        Self {
            accessor,
            bindings: RwLock::new(HashMap::new()),
        }
    }

    pub fn accessor(&self) -> &Arc<A> {
        &self.accessor
    }

    /// Route reads and writes of `node` to (`instance`, `key`)
    pub fn bind(&self, node: NodeId, instance: u32, key: A::Key) {
        self.bindings.write().insert(node, (instance, key));
    }

    pub fn lookup(&self, node: &NodeId) -> Option<(u32, A::Key)> {
        self.bindings.read().get(node).copied()
    }

    pub fn len(&self) -> usize {
        self.bindings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.read().is_empty()
    }
}

#[async_trait]
impl<A: PropertyAccessor + 'static> ValueSource for PropertyBinding<A> {
    async fn read(&self, node: &NodeId) -> Result<Variant, StatusCode> {
        let (instance, key) = self.lookup(node).ok_or(StatusCode::BadNodeIdUnknown)?;
        self.accessor.get(instance, key).await
    }

    async fn write(&self, node: &NodeId, value: &Variant) -> Result<(), StatusCode> {
        let (instance, key) = self.lookup(node).ok_or(StatusCode::BadNodeIdUnknown)?;
        debug!("Write {:?} of instance {}", key, instance);
        self.accessor.set(instance, key, value).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Key {
        Name,
        Count,
    }

    #[derive(Default)]
    struct Table {
        rows: Mutex<HashMap<u32, (String, i32)>>,
    }

    #[async_trait]
    impl PropertyAccessor for Table {
        type Key = Key;

        async fn get(&self, instance: u32, key: Key) -> Result<Variant, StatusCode> {
            let rows = self.rows.lock();
            let row = rows.get(&instance).ok_or(StatusCode::BadNotFound)?;
            Ok(match key {
                Key::Name => Variant::from(row.0.as_str()),
                Key::Count => Variant::Int32(row.1),
            })
        }

        async fn set(&self, instance: u32, key: Key, value: &Variant) -> Result<(), StatusCode> {
            let mut rows = self.rows.lock();
            let row = rows.get_mut(&instance).ok_or(StatusCode::BadNotFound)?;
            match key {
                Key::Name => row.0 = value.as_str().ok_or(StatusCode::BadTypeMismatch)?.to_string(),
                Key::Count => return Err(StatusCode::BadNotWritable),
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_binding_routes_by_node() {
        let table = Arc::new(Table::default());
        table.rows.lock().insert(3, ("port".to_string(), 7));

        let binding = PropertyBinding::new(table);
        binding.bind(NodeId::numeric(2, 100), 3, Key::Name);
        binding.bind(NodeId::numeric(2, 101), 3, Key::Count);

        assert_eq!(binding.read(&NodeId::numeric(2, 101)).await, Ok(Variant::Int32(7)));
        binding.write(&NodeId::numeric(2, 100), &Variant::from("renamed")).await.unwrap();
        assert_eq!(binding.read(&NodeId::numeric(2, 100)).await, Ok(Variant::from("renamed")));
        assert_eq!(
            binding.write(&NodeId::numeric(2, 101), &Variant::Int32(1)).await,
            Err(StatusCode::BadNotWritable)
        );
        assert_eq!(binding.read(&NodeId::numeric(2, 999)).await, Err(StatusCode::BadNodeIdUnknown));
    }
}
