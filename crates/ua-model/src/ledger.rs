//! Rollback ledger
//!
//! Records, in creation order, every node a single construction attempt has
//! added to the graph, plus the custom-type registry head that was active
//! before the attempt swapped in its own.

use tracing::warn;

use ua_core::{Error, NodeId, Result};

use crate::space::RegistryHead;

/// Registry head captured before an attempt replaced it
#[derive(Debug, Clone)]
pub struct RegistrySnapshot(pub RegistryHead);

#[derive(Debug, Default)]
pub struct RollbackLedger {
    created: Vec<NodeId>,
    saved_registry: Option<RegistrySnapshot>,
    capacity_limit: Option<usize>,
}

impl RollbackLedger {
    /// Empty ledger for a new construction attempt
    pub fn open() -> Self {
        Self::default()
    }

    /// Ledger that refuses to hold more than `limit` ids
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            capacity_limit: Some(limit),
            ..Self::default()
        }
    }

    /// Make room for one more entry so the following `record` cannot fail
    pub fn reserve(&mut self) -> Result<()> {
        if let Some(limit) = self.capacity_limit {
            if self.created.len() >= limit {
                return Err(Error::ledger_append(format!("ledger is full ({} entries)", limit)));
            }
        }
        self.created
            .try_reserve(1)
            .map_err(|e| Error::ledger_append(e.to_string()))
    }

    pub fn record(&mut self, id: NodeId) {
        self.created.push(id);
    }

    /// Remember the registry head from before this attempt. Only the first
    /// call per ledger counts.
    pub fn save_registry_snapshot(&mut self, previous: RegistryHead) {
        if self.saved_registry.is_some() {
            warn!("Registry snapshot already saved for this attempt, keeping the first one");
            return;
        }
        self.saved_registry = Some(RegistrySnapshot(previous));
    }

    pub fn has_registry_snapshot(&self) -> bool {
        self.saved_registry.is_some()
    }

    /// Forget everything without touching the graph (commit path)
    pub fn clear(&mut self) {
        self.created.clear();
        self.saved_registry = None;
    }

    /// Recorded ids, oldest first
    pub fn ids(&self) -> &[NodeId] {
        &self.created
    }

    pub fn len(&self) -> usize {
        self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.saved_registry.is_none()
    }

    pub(crate) fn take_registry_snapshot(&mut self) -> Option<RegistrySnapshot> {
        self.saved_registry.take()
    }

    pub(crate) fn pop(&mut self) -> Option<NodeId> {
        self.created.pop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_keeps_creation_order() {
        let mut ledger = RollbackLedger::open();
        ledger.reserve().unwrap();
        ledger.record(NodeId::numeric(1, 1));
        ledger.reserve().unwrap();
        ledger.record(NodeId::numeric(1, 2));

        assert_eq!(ledger.ids(), &[NodeId::numeric(1, 1), NodeId::numeric(1, 2)]);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_capacity_limit_refuses_reserve() {
        let mut ledger = RollbackLedger::with_capacity_limit(1);
        ledger.reserve().unwrap();
        ledger.record(NodeId::numeric(1, 1));

        let err = ledger.reserve().unwrap_err();
        assert!(matches!(err, Error::LedgerAppend(_)));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_second_snapshot_is_ignored() {
        let mut ledger = RollbackLedger::open();
        ledger.save_registry_snapshot(None);
        ledger.save_registry_snapshot(Some(std::sync::Arc::new(
            crate::registry::CustomTypeRegistry::new(Vec::new(), None),
        )));

        let snapshot = ledger.take_registry_snapshot().unwrap();
        assert!(snapshot.0.is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut ledger = RollbackLedger::open();
        ledger.record(NodeId::numeric(1, 1));
        ledger.save_registry_snapshot(None);
        ledger.clear();

        assert!(ledger.is_empty());
        assert!(!ledger.has_registry_snapshot());
    }
}
