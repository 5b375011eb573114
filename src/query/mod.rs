// ============================================================================
// Query derivation
// ============================================================================
//
// Repository method names are parsed into a typed `QueryDescriptor`, which is
// rendered to SQL text and bound to method arguments at call time. Parsing is
// a pure string grammar; nothing here touches a session.
//
// ============================================================================

pub mod derivation;
pub mod descriptor;
pub mod render;

pub use derivation::{column_name, derive};
pub use descriptor::{
    Clause, Combinator, Direction, Operation, Operator, Order, QueryDescriptor,
};
pub use render::{bind, render};
