use strata_common::{GlobalPosition, PartitionId, StrataId};

/// Errors raised by the strata core.
///
/// None of these are fatal to the host: callers degrade to "stratum stays unloaded"
/// or "occupant stays in its previous stratum" until the condition clears.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    #[error("stratum definition not found: {0}")]
    DefinitionNotFound(StrataId),
    #[error("{stratum} failed to load partition {partition}: {reason}")]
    LoadFailure {
        stratum: StrataId,
        partition: PartitionId,
        reason: String,
    },
    #[error("global position {position} is not owned by any loaded stratum")]
    TransformOutOfBounds { position: GlobalPosition },
    #[error("eviction of {stratum} rejected: within keep-alive range of current {current}")]
    EvictionConflict { stratum: StrataId, current: StrataId },
    #[error("invalid world definition: {0}")]
    InvalidDefinition(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StrataError {
    /// Whether retrying the same operation on a later tick may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StrataError::LoadFailure { .. } | StrataError::TransformOutOfBounds { .. }
        )
    }
}
