use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StrataError;

/// Vertical gap between consecutive strata when none is configured.
pub const DEFAULT_VERTICAL_SPACING: f32 = 350.0;

/// Seamless-strata configuration: residency budget, keep-alive radius, seam hysteresis
/// and the background loader pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrataConfig {
    /// When false the coordinator ignores ticks entirely.
    pub enabled: bool,
    /// Eviction budget: number of strata kept resident after an eviction pass.
    pub max_loaded_strata: usize,
    /// Neighbours of the current stratum (in id distance) that are never evicted.
    pub keep_alive_radius: u8,
    /// Band (world units) around the current stratum's vertical extent inside which
    /// the occupant is still treated as standing in that stratum.
    pub hysteresis: f32,
    /// Empty vertical gap between consecutive strata in global space.
    pub vertical_spacing: f32,
    /// Eviction cadence in milliseconds.
    pub eviction_interval_ms: u64,
    /// Background loader threads. Zero runs jobs inline on the submitting thread;
    /// completions are still delivered on the next tick.
    pub worker_threads: usize,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_loaded_strata: 4,
            keep_alive_radius: 1,
            hysteresis: 2.0,
            vertical_spacing: DEFAULT_VERTICAL_SPACING,
            eviction_interval_ms: 1000,
            worker_threads: 2,
        }
    }
}

impl StrataConfig {
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn validate(&self) -> Result<(), StrataError> {
        if self.max_loaded_strata == 0 {
            return Err(StrataError::InvalidConfig(
                "max_loaded_strata must be at least 1".into(),
            ));
        }
        if !(self.hysteresis >= 0.0 && self.hysteresis.is_finite()) {
            return Err(StrataError::InvalidConfig(format!(
                "hysteresis must be a non-negative number, got {}",
                self.hysteresis
            )));
        }
        if !(self.vertical_spacing >= 0.0 && self.vertical_spacing.is_finite()) {
            return Err(StrataError::InvalidConfig(format!(
                "vertical_spacing must be a non-negative number, got {}",
                self.vertical_spacing
            )));
        }
        Ok(())
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, StrataError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, StrataError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StrataError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }
}
