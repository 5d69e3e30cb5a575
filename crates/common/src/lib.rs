//! Shared value types for the strata streaming core.
//!
//! # Invariants
//! - `GlobalPosition` and `LocalPosition` never convert into each other directly;
//!   the only bridge is a stratum's assigned offset.

mod types;

pub use types::{Aabb, GlobalPosition, LocalPosition, PartitionId, StrataId};
