//! The verification pipeline: comparison logic and concrete nodes.

pub mod compare;
pub mod nodes;

pub use compare::{audit_fetch_failure, compare_product};
pub use nodes::build_node_registry;
