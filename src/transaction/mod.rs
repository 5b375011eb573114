// ============================================================================
// Transaction Management Module
// ============================================================================
//
// Declarative units of work over the session contract:
// - descriptor: propagation, isolation and rollback rules of a call site
// - context: explicit per-call-chain stack of active units of work
// - manager: the propagation engine driving begin/commit/rollback
//
// ============================================================================

pub mod context;
pub mod descriptor;
pub mod manager;

pub use context::{TransactionContext, TransactionEntry, TransactionId};
pub use descriptor::{Isolation, Propagation, TransactionDescriptor};
pub use manager::{Access, TransactionManager};
