//! Rollback executor
//!
//! Undoes one failed construction attempt: the saved custom-type registry head
//! is restored first, then the recorded nodes are deleted newest first. A
//! child is always created after its parent, so newest-first order removes
//! children before parents without a dependency graph.

use tracing::{debug, error, info};

use ua_core::{Error, NodeId, Result};

use crate::ledger::RollbackLedger;
use crate::space::AddressSpace;

/// What a completed rollback undid
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollbackReport {
    /// Deleted node ids in deletion order
    pub deleted: Vec<NodeId>,
    pub registry_restored: bool,
}

/// Consume `ledger`, undoing its effects on `space`
///
/// Stops at the first delete the store refuses and reports the node, the
/// status and how many recorded nodes remain in the graph.
pub fn rollback(space: &dyn AddressSpace, mut ledger: RollbackLedger) -> Result<RollbackReport> {
    if space.is_serving() {
        error!("Rollback requested after dispatch started, {} node(s) left in place", ledger.len());
        return Err(Error::RollbackWhileServing);
    }

    let mut report = RollbackReport::default();

    if let Some(snapshot) = ledger.take_registry_snapshot() {
        space.set_custom_types(snapshot.0);
        report.registry_restored = true;
        debug!("Restored custom type registry");
    }

    while let Some(id) = ledger.pop() {
        if let Err(status) = space.delete_node(&id, true) {
            // Remaining entries stay in the graph
            error!("Rollback failed to delete node {}: {}", id, status);
            return Err(Error::Rollback {
                node: id,
                status,
                remaining: ledger.len() + 1,
            });
        }
        report.deleted.push(id);
    }

    info!("Rolled back {} node(s)", report.deleted.len());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAddressSpace;
    use ua_core::{ids, StatusCode};

    #[test]
    fn test_empty_ledger_is_a_no_op() {
        let space = MemoryAddressSpace::new();
        let before = space.node_ids();
        let report = rollback(&space, RollbackLedger::open()).unwrap();

        assert!(report.deleted.is_empty());
        assert!(!report.registry_restored);
        assert_eq!(space.node_ids(), before);
    }

    #[test]
    fn test_refuses_while_serving() {
        let space = MemoryAddressSpace::new();
        space.set_serving(true);

        let mut ledger = RollbackLedger::open();
        ledger.record(ids::OBJECTS_FOLDER);

        let err = rollback(&space, ledger).unwrap_err();
        assert!(matches!(err, Error::RollbackWhileServing));
        assert!(space.contains(&ids::OBJECTS_FOLDER));
    }

    #[test]
    fn test_delete_failure_reports_node() {
        let space = MemoryAddressSpace::new();
        let mut ledger = RollbackLedger::open();
        ledger.record(NodeId::numeric(0, 999_999));

        match rollback(&space, ledger) {
            Err(Error::Rollback { node, status, remaining }) => {
                assert_eq!(node, NodeId::numeric(0, 999_999));
                assert_eq!(status, StatusCode::BadNodeIdUnknown);
                assert_eq!(remaining, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
