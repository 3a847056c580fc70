//! Information-model construction with rollback
//!
//! # Modules
//!
//! - `space`: The graph-store interface
//! - `memory`: In-memory graph store
//! - `node`: Node attributes, value sources and method handlers
//! - `registry`: Custom data-type override chain
//! - `ledger`: Per-attempt record of created nodes
//! - `facade`: Rollback-aware node creation and `ModelBuilder`
//! - `rollback`: Undo of a failed attempt
//! - `server`: Request dispatcher thread

pub mod facade;
pub mod ledger;
pub mod memory;
pub mod node;
pub mod registry;
pub mod rollback;
pub mod server;
pub mod space;

// Re-exports
pub use facade::{
    add_data_type_node, add_method_node, add_object_node, add_object_type_node, add_variable_node,
    swap_custom_types, ModelBuilder,
};
pub use ledger::{RegistrySnapshot, RollbackLedger};
pub use memory::MemoryAddressSpace;
pub use node::{
    access, Argument, DataTypeAttributes, MethodAttributes, MethodHandler, NewNode, NodeAttributes, NodeContext,
    NodeSpec, ObjectAttributes, ObjectTypeAttributes, ValueSource, VariableAttributes,
};
pub use registry::{CustomDataType, CustomTypeKind, CustomTypeRegistry, EnumField};
pub use rollback::{rollback, RollbackReport};
pub use server::{BrowseEntry, Server, ServerHandle};
pub use space::{AddressSpace, EmittedEvent, RegistryHead, StoreResult};
