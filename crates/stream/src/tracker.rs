use strata_common::{GlobalPosition, StrataId};
use strata_kernel::{BoundsIndex, CoordinateTransformer, StrataError, StrataRegistry};

use crate::streamer::StrataState;

/// What the tracker knows about the tracked occupant.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OccupantRecord {
    /// Authoritative current stratum. Only ever set to a resident stratum.
    pub current: Option<StrataId>,
    /// Stratum the occupant moved into that is still loading.
    pub pending: Option<StrataId>,
    pub last_position: Option<GlobalPosition>,
}

/// Decision of one [`ActiveStrataTracker::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerAction {
    /// Still in the current stratum (or inside its hysteresis band).
    Stay,
    /// The target must be loaded before the transition can happen.
    RequestLoad(StrataId),
    /// The target is loading; the transition stays deferred.
    Waiting(StrataId),
    /// The target's last load failed this tick; retry next tick.
    RetryNextTick(StrataId),
    /// The current stratum changed.
    Changed {
        from: Option<StrataId>,
        to: StrataId,
    },
}

/// Derives the occupant's stratum every tick.
///
/// Transitions only commit once the target is resident. A band of `hysteresis` world
/// units around the current stratum's vertical extent keeps an occupant standing on
/// a seam from flip-flopping between strata.
#[derive(Debug, Clone)]
pub struct ActiveStrataTracker {
    record: OccupantRecord,
    hysteresis: f32,
    retry_hold: Option<StrataId>,
}

impl ActiveStrataTracker {
    pub fn new(hysteresis: f32) -> Self {
        Self {
            record: OccupantRecord::default(),
            hysteresis,
            retry_hold: None,
        }
    }

    pub fn current(&self) -> Option<StrataId> {
        self.record.current
    }

    pub fn record(&self) -> &OccupantRecord {
        &self.record
    }

    /// Record a failed load. If it was the pending target, the next update skips the
    /// request once so the retry happens on the following tick.
    pub fn on_load_failed(&mut self, id: StrataId) {
        if self.record.pending == Some(id) {
            self.record.pending = None;
            self.retry_hold = Some(id);
        }
    }

    /// Forget the current stratum, e.g. on session teardown.
    pub fn reset(&mut self) {
        self.record.current = None;
        self.record.pending = None;
        self.retry_hold = None;
    }

    pub fn update(
        &mut self,
        position: GlobalPosition,
        registry: &StrataRegistry,
        bounds: &BoundsIndex,
        residency: impl Fn(StrataId) -> StrataState,
    ) -> TrackerAction {
        self.record.last_position = Some(position);
        let hold = self.retry_hold.take();

        let Some(target) = self.resolve_target(position, registry, bounds) else {
            return TrackerAction::Stay;
        };
        if Some(target) == self.record.current {
            if let Some(pending) = self.record.pending.take() {
                tracing::debug!(%pending, "occupant returned before pending stratum loaded");
            }
            return TrackerAction::Stay;
        }

        if bounds.is_registered(target) {
            let from = self.record.current.replace(target);
            self.record.pending = None;
            tracing::debug!(?from, to = %target, "occupant changed stratum");
            return TrackerAction::Changed { from, to: target };
        }

        match residency(target) {
            StrataState::Loading => {
                self.record.pending = Some(target);
                TrackerAction::Waiting(target)
            }
            _ if hold == Some(target) => {
                tracing::debug!(%target, "holding retry of failed stratum load");
                TrackerAction::RetryNextTick(target)
            }
            _ => {
                self.record.pending = Some(target);
                TrackerAction::RequestLoad(target)
            }
        }
    }

    fn resolve_target(
        &self,
        position: GlobalPosition,
        registry: &StrataRegistry,
        bounds: &BoundsIndex,
    ) -> Option<StrataId> {
        let y = position.vertical();
        if let Some(current) = self.record.current {
            if let Ok(band) = registry.global_bounds(current) {
                if band.vertical_distance(y) <= self.hysteresis {
                    return Some(current);
                }
            }
        }

        match CoordinateTransformer::new(registry, bounds).to_local(position) {
            Ok((_, owner)) => Some(owner),
            Err(StrataError::TransformOutOfBounds { .. }) => {
                // Not owned by anything loaded: load whichever stratum should own it.
                let nearest = registry.nearest_stratum(y);
                tracing::trace!(%position, ?nearest, "position outside loaded strata");
                nearest
            }
            Err(err) => {
                tracing::warn!(%err, "cannot resolve occupant stratum");
                None
            }
        }
    }
}
