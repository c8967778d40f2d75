//! Shared state carried across collection cycles.

mod node_conditions;
pub use self::node_conditions::{ConditionChange, NodeConditionCache};
