//! Strata kernel: the static world definition and the spatial truth derived from it.
//!
//! # Invariants
//! - A stratum's global offset is assigned once, at registry construction, and never changes.
//! - Offsets stack strata strictly upward by id, so global bounds never overlap.
//! - The coordinate transformer is the only place global and local positions are bridged.

pub mod bounds;
pub mod config;
pub mod error;
pub mod registry;
pub mod transform;

pub use bounds::BoundsIndex;
pub use config::StrataConfig;
pub use error::StrataError;
pub use registry::{StrataRegistry, Stratum, StratumDef, WorldDefinition};
pub use transform::CoordinateTransformer;
