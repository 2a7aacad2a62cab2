//! Graph value types.
//!
//! These are plain values: they are copied whole across the wire and never refer to
//! anything living on the other side of the socket.
//!
//! - [`Node`]: empty, resource, blank or literal node.
//! - [`Statement`]: subject, predicate, object and an optional context.
//! - [`BindingSet`]: one row of a tuple query result.
mod binding;
mod node;
mod statement;

pub use binding::BindingSet;
pub use node::{LiteralValue, Node, NodeParseError};
pub use statement::Statement;
