use std::time::Duration;

use strata_common::StrataId;
use strata_kernel::{StrataConfig, StrataError};

/// Per-tick streaming statistics for instrumentation.
#[derive(Debug, Clone, Default)]
pub struct StreamStats {
    pub loads_requested_this_tick: usize,
    pub unloads_requested_this_tick: usize,
    pub loads_completed_this_tick: usize,
    pub load_failures_this_tick: usize,
    pub total_load_requests: u64,
    pub total_unload_requests: u64,
    pub total_loaded_strata: usize,
    pub tick_time: Duration,
}

impl StreamStats {
    pub(crate) fn begin_tick(&mut self) {
        self.loads_requested_this_tick = 0;
        self.unloads_requested_this_tick = 0;
        self.loads_completed_this_tick = 0;
        self.load_failures_this_tick = 0;
    }

    pub(crate) fn record_load_request(&mut self) {
        self.loads_requested_this_tick += 1;
        self.total_load_requests += 1;
    }

    pub(crate) fn record_unload_request(&mut self) {
        self.unloads_requested_this_tick += 1;
        self.total_unload_requests += 1;
    }
}

/// Keeps the number of resident strata within budget.
///
/// Runs on a fixed cadence. A pass picks the loaded strata farthest (by id) from the
/// occupant's current stratum, never touching the current stratum or its keep-alive
/// neighbours.
#[derive(Debug, Clone)]
pub struct EvictionScheduler {
    budget: usize,
    keep_alive_radius: u8,
    interval: Duration,
    since_last_pass: Duration,
}

impl EvictionScheduler {
    pub fn new(config: &StrataConfig) -> Self {
        Self {
            budget: config.max_loaded_strata,
            keep_alive_radius: config.keep_alive_radius,
            interval: config.eviction_interval(),
            since_last_pass: Duration::ZERO,
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Advance the cadence clock. Returns true when a pass is due.
    pub fn advance(&mut self, dt: Duration) -> bool {
        self.since_last_pass += dt;
        if self.since_last_pass >= self.interval {
            self.since_last_pass = Duration::ZERO;
            true
        } else {
            false
        }
    }

    pub fn is_protected(&self, current: StrataId, id: StrataId) -> bool {
        current.distance(id) <= self.keep_alive_radius
    }

    /// Reject evicting the current stratum or one of its keep-alive neighbours.
    pub fn check(&self, current: StrataId, id: StrataId) -> Result<(), StrataError> {
        if self.is_protected(current, id) {
            return Err(StrataError::EvictionConflict {
                stratum: id,
                current,
            });
        }
        Ok(())
    }

    /// Choose strata to evict so that at most `budget` remain. `loaded` pairs each
    /// loaded stratum with its last-active time. Farther strata go first; among equally
    /// distant ones the least recently active goes first.
    pub fn select(&self, current: StrataId, loaded: &[(StrataId, Duration)]) -> Vec<StrataId> {
        if loaded.len() <= self.budget {
            return Vec::new();
        }
        let excess = loaded.len() - self.budget;

        let mut candidates: Vec<(StrataId, Duration)> = loaded
            .iter()
            .copied()
            .filter(|(id, _)| !self.is_protected(current, *id))
            .collect();
        candidates.sort_by(|(a, a_active), (b, b_active)| {
            current
                .distance(*b)
                .cmp(&current.distance(*a))
                .then(a_active.cmp(b_active))
                .then(b.cmp(a))
        });

        if candidates.len() < excess {
            tracing::debug!(
                loaded = loaded.len(),
                budget = self.budget,
                evictable = candidates.len(),
                "keep-alive range exceeds budget"
            );
        }
        candidates.into_iter().take(excess).map(|(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler(budget: usize, radius: u8) -> EvictionScheduler {
        EvictionScheduler::new(&StrataConfig {
            max_loaded_strata: budget,
            keep_alive_radius: radius,
            eviction_interval_ms: 1000,
            ..StrataConfig::default()
        })
    }

    fn loaded(ids: &[u8]) -> Vec<(StrataId, Duration)> {
        ids.iter().map(|i| (StrataId(*i), Duration::ZERO)).collect()
    }

    #[test]
    fn cadence_fires_once_per_interval() {
        let mut s = scheduler(3, 1);
        assert!(!s.advance(Duration::from_millis(400)));
        assert!(!s.advance(Duration::from_millis(400)));
        assert!(s.advance(Duration::from_millis(400)));
        assert!(!s.advance(Duration::from_millis(400)));
    }

    #[test]
    fn within_budget_selects_nothing() {
        let s = scheduler(3, 1);
        assert!(s.select(StrataId(0), &loaded(&[0, 1, 2])).is_empty());
    }

    #[test]
    fn farthest_strata_go_first() {
        let s = scheduler(3, 1);
        let picked = s.select(StrataId(3), &loaded(&[0, 1, 2, 3, 4]));
        assert_eq!(picked, vec![StrataId(0), StrataId(1)]);
    }

    #[test]
    fn keep_alive_neighbours_are_never_selected() {
        let s = scheduler(1, 2);
        let picked = s.select(StrataId(2), &loaded(&[0, 1, 2, 3, 4, 5]));
        assert_eq!(picked, vec![StrataId(5)]);
    }

    #[test]
    fn ties_prefer_least_recently_active() {
        let s = scheduler(2, 0);
        let picked = s.select(
            StrataId(2),
            &[
                (StrataId(1), Duration::from_secs(9)),
                (StrataId(2), Duration::from_secs(10)),
                (StrataId(3), Duration::from_secs(4)),
            ],
        );
        assert_eq!(picked, vec![StrataId(3)]);
    }

    #[test]
    fn protected_eviction_is_a_conflict() {
        let s = scheduler(3, 1);
        assert!(matches!(
            s.check(StrataId(2), StrataId(3)),
            Err(StrataError::EvictionConflict { .. })
        ));
        assert!(s.check(StrataId(2), StrataId(4)).is_ok());
    }
}
