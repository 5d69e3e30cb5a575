//! Streaming: loads strata on demand, tracks the occupant across them, and evicts
//! distant ones to stay within a residency budget.
//!
//! # Invariants
//! - Loads and unloads run on background workers; their results only touch shared
//!   state when the tick drains them.
//! - The occupant's current stratum and its keep-alive neighbours are never evicted.
//! - Standing on a seam between strata does not cause load/unload churn.

mod budget;
mod loader;
mod session;
mod streamer;
mod tracker;

pub use budget::{EvictionScheduler, StreamStats};
pub use loader::{PartitionLoadError, PartitionLoader};
pub use session::{LoadedStrataEntry, ObserverId, SeamlessWorld, StrataEvent, StrataObserver};
pub use streamer::{
    LoadHandle, LoadOutcome, SceneStreamer, StrataState, StreamEvent, UnloadOutcome,
};
pub use tracker::{ActiveStrataTracker, OccupantRecord, TrackerAction};

pub fn crate_info() -> &'static str {
    "strata-stream v0.1.0"
}
