//! The session coordinator: owns every piece of mutable strata state and drives it
//! from the tick.
//!
//! # Invariants
//! - The loaded set and the bounds index are only mutated inside [`SeamlessWorld`]
//!   methods, on the thread that calls [`SeamlessWorld::tick`].
//! - A stratum's bounds are registered in the same step that looks up its offset.
//! - The occupant's current stratum is always in the loaded set.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use glam::Vec3;
use strata_common::{Aabb, GlobalPosition, LocalPosition, PartitionId, StrataId};
use strata_kernel::{
    BoundsIndex, CoordinateTransformer, StrataConfig, StrataError, StrataRegistry,
    WorldDefinition,
};

use crate::budget::{EvictionScheduler, StreamStats};
use crate::loader::PartitionLoader;
use crate::streamer::{LoadHandle, SceneStreamer, StrataState, StreamEvent, UnloadOutcome};
use crate::tracker::{ActiveStrataTracker, OccupantRecord, TrackerAction};

/// Runtime record of a resident stratum.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedStrataEntry {
    pub id: StrataId,
    pub offset: Vec3,
    pub partitions: Vec<PartitionId>,
    pub bounds: Aabb,
    pub loaded_at: Duration,
    pub last_active: Duration,
}

/// Notification delivered to observers, synchronously and in registration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrataEvent {
    Changed {
        from: Option<StrataId>,
        to: StrataId,
    },
    Loaded(StrataId),
    Unloaded(StrataId),
    LoadFailed {
        stratum: StrataId,
        partition: PartitionId,
        reason: String,
    },
}

/// Collaborator hook for strata notifications (simulation, power networks, UI).
pub trait StrataObserver {
    fn on_strata_event(&mut self, event: &StrataEvent);
}

impl<F: FnMut(&StrataEvent)> StrataObserver for F {
    fn on_strata_event(&mut self, event: &StrataEvent) {
        self(event)
    }
}

/// Handle returned by [`SeamlessWorld::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(usize);

/// One seamless-strata session.
///
/// Create it when the world definition is available, call [`tick`](Self::tick) once
/// per frame with the occupant's global position, and [`shutdown`](Self::shutdown)
/// when the session ends.
pub struct SeamlessWorld {
    config: StrataConfig,
    registry: Arc<StrataRegistry>,
    streamer: SceneStreamer,
    bounds: BoundsIndex,
    loaded: BTreeMap<StrataId, LoadedStrataEntry>,
    tracker: ActiveStrataTracker,
    scheduler: EvictionScheduler,
    observers: Vec<Option<Box<dyn StrataObserver>>>,
    clock: Duration,
    tick: u64,
    stats: StreamStats,
}

impl SeamlessWorld {
    pub fn new(
        definition: &WorldDefinition,
        config: StrataConfig,
        loader: Arc<dyn PartitionLoader>,
    ) -> Result<Self, StrataError> {
        config.validate()?;
        let registry = Arc::new(StrataRegistry::new(definition, config.vertical_spacing)?);
        let streamer = SceneStreamer::new(Arc::clone(&registry), loader, config.worker_threads)?;
        tracing::info!(
            strata = registry.len(),
            budget = config.max_loaded_strata,
            keep_alive = config.keep_alive_radius,
            enabled = config.enabled,
            "seamless world session started"
        );
        Ok(Self {
            tracker: ActiveStrataTracker::new(config.hysteresis),
            scheduler: EvictionScheduler::new(&config),
            config,
            registry,
            streamer,
            bounds: BoundsIndex::new(),
            loaded: BTreeMap::new(),
            observers: Vec::new(),
            clock: Duration::ZERO,
            tick: 0,
            stats: StreamStats::default(),
        })
    }

    pub fn add_observer(&mut self, observer: impl StrataObserver + 'static) -> ObserverId {
        self.observers.push(Some(Box::new(observer)));
        ObserverId(self.observers.len() - 1)
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        self.observers
            .get_mut(id.0)
            .and_then(Option::take)
            .is_some()
    }

    /// Advance one tick: apply finished loads, track the occupant, and run an eviction
    /// pass if one is due. Never fails; problems degrade to "stratum stays unloaded".
    pub fn tick(&mut self, occupant: GlobalPosition, dt: Duration) {
        if !self.config.enabled {
            return;
        }
        let _span = tracing::info_span!("strata_tick", tick = self.tick + 1).entered();
        let started = Instant::now();
        self.tick += 1;
        self.clock += dt;
        self.stats.begin_tick();

        self.apply_stream_events();
        self.track(occupant);
        if self.scheduler.advance(dt) {
            self.run_eviction_pass();
        }

        self.stats.total_loaded_strata = self.loaded.len();
        self.stats.tick_time = started.elapsed();
        tracing::trace!(
            loaded = self.loaded.len(),
            current = ?self.tracker.current(),
            "strata tick complete"
        );
    }

    /// Request a stratum outside of occupant tracking, e.g. ahead of a teleport.
    pub fn request_load(&mut self, id: StrataId) -> Result<LoadHandle, StrataError> {
        let handle = self.streamer.load_strata(id)?;
        self.stats.record_load_request();
        Ok(handle)
    }

    /// Ask for a stratum to be evicted. The current stratum and its keep-alive
    /// neighbours are protected: such requests are logged and rejected.
    pub fn request_eviction(&mut self, id: StrataId) -> Result<UnloadOutcome, StrataError> {
        self.registry.get_definition(id)?;
        if let Some(current) = self.tracker.current() {
            if let Err(err) = self.scheduler.check(current, id) {
                tracing::debug!(%err, "eviction request ignored");
                return Err(err);
            }
        }
        self.evict(id)
    }

    /// Global position for a (local position, stratum) pair, for teleport-style moves.
    pub fn resolve_global(
        &self,
        local: LocalPosition,
        id: StrataId,
    ) -> Result<GlobalPosition, StrataError> {
        self.transformer().to_global(local, id)
    }

    pub fn to_local(
        &self,
        global: GlobalPosition,
    ) -> Result<(LocalPosition, StrataId), StrataError> {
        self.transformer().to_local(global)
    }

    pub fn transformer(&self) -> CoordinateTransformer<'_> {
        CoordinateTransformer::new(&self.registry, &self.bounds)
    }

    pub fn current_stratum(&self) -> Option<StrataId> {
        self.tracker.current()
    }

    pub fn occupant(&self) -> &OccupantRecord {
        self.tracker.record()
    }

    pub fn state(&self, id: StrataId) -> StrataState {
        self.streamer.state(id)
    }

    pub fn last_failure(&self, id: StrataId) -> Option<&str> {
        self.streamer.last_failure(id)
    }

    pub fn is_loaded(&self, id: StrataId) -> bool {
        self.loaded.contains_key(&id)
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn loaded_ids(&self) -> Vec<StrataId> {
        self.loaded.keys().copied().collect()
    }

    pub fn loaded_strata(&self) -> impl Iterator<Item = &LoadedStrataEntry> {
        self.loaded.values()
    }

    pub fn entry(&self, id: StrataId) -> Option<&LoadedStrataEntry> {
        self.loaded.get(&id)
    }

    pub fn bounds(&self) -> &BoundsIndex {
        &self.bounds
    }

    pub fn registry(&self) -> &StrataRegistry {
        &self.registry
    }

    pub fn streamer(&self) -> &SceneStreamer {
        &self.streamer
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Block up to `timeout` for a background job to finish. The result is applied on
    /// the next tick.
    pub fn wait_for_stream(&mut self, timeout: Duration) -> bool {
        self.streamer.wait_for_completion(timeout)
    }

    /// End the session: unload every stratum (queued ones included), wait up to
    /// `timeout` for the loader to finish, and stop the loader threads.
    pub fn shutdown(mut self, timeout: Duration) {
        let _span = tracing::info_span!("strata_shutdown").entered();
        self.tracker.reset();

        let mut ids = self.loaded_ids();
        ids.extend(self.streamer.strata_in(StrataState::Loading));
        for id in ids {
            if let Err(err) = self.evict(id) {
                tracing::warn!(%id, %err, "failed to unload stratum during shutdown");
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            self.apply_stream_events();
            // Loads that were queued for eviction finish as Loaded first.
            for id in self.loaded_ids() {
                if let Err(err) = self.evict(id) {
                    tracing::warn!(%id, %err, "failed to unload stratum during shutdown");
                }
            }
            if self.streamer.is_idle() {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!("shutdown timed out with loader jobs still running");
                break;
            }
            self.streamer.wait_for_completion(deadline - now);
        }
        tracing::info!(ticks = self.tick, "seamless world session ended");
    }

    fn notify(&mut self, event: StrataEvent) {
        for observer in self.observers.iter_mut().flatten() {
            observer.on_strata_event(&event);
        }
    }

    fn apply_stream_events(&mut self) {
        for event in self.streamer.drain() {
            match event {
                StreamEvent::Loaded {
                    stratum,
                    partitions,
                } => self.register_loaded(stratum, partitions),
                StreamEvent::LoadFailed {
                    stratum,
                    partition,
                    reason,
                } => {
                    self.stats.load_failures_this_tick += 1;
                    self.tracker.on_load_failed(stratum);
                    self.notify(StrataEvent::LoadFailed {
                        stratum,
                        partition,
                        reason,
                    });
                }
                StreamEvent::Unloading { stratum } => self.purge(stratum),
                StreamEvent::Unloaded { stratum } => self.notify(StrataEvent::Unloaded(stratum)),
            }
        }
    }

    /// Load-completion step: offset lookup, then bounds registration, then the entry.
    fn register_loaded(&mut self, id: StrataId, partitions: Vec<PartitionId>) {
        let placement = self
            .registry
            .get_offset(id)
            .and_then(|offset| Ok((offset, self.registry.global_bounds(id)?)));
        let (offset, bounds) = match placement {
            Ok(placement) => placement,
            Err(err) => {
                tracing::error!(%id, %err, "loaded stratum has no placement");
                return;
            }
        };

        self.bounds.register(id, bounds);
        self.loaded.insert(
            id,
            LoadedStrataEntry {
                id,
                offset,
                partitions,
                bounds,
                loaded_at: self.clock,
                last_active: self.clock,
            },
        );
        self.stats.loads_completed_this_tick += 1;
        tracing::info!(%id, loaded = self.loaded.len(), "stratum registered");
        self.notify(StrataEvent::Loaded(id));
    }

    fn purge(&mut self, id: StrataId) {
        self.bounds.remove(id);
        self.loaded.remove(&id);
    }

    fn track(&mut self, occupant: GlobalPosition) {
        let streamer = &self.streamer;
        let action = self
            .tracker
            .update(occupant, &self.registry, &self.bounds, |id| streamer.state(id));

        match action {
            TrackerAction::RequestLoad(id) => {
                tracing::debug!(%id, "occupant entered unloaded stratum, requesting load");
                // The tracker re-evaluates every tick, so the handle is not needed.
                if let Err(err) = self.request_load(id) {
                    tracing::warn!(%id, %err, "load request rejected");
                }
            }
            TrackerAction::Changed { from, to } => {
                tracing::info!(?from, %to, "current stratum changed");
                self.notify(StrataEvent::Changed { from, to });
            }
            TrackerAction::Stay | TrackerAction::Waiting(_) | TrackerAction::RetryNextTick(_) => {}
        }

        if let Some(current) = self.tracker.current() {
            if let Some(entry) = self.loaded.get_mut(&current) {
                entry.last_active = self.clock;
            }
        }
    }

    fn run_eviction_pass(&mut self) {
        let Some(current) = self.tracker.current() else {
            return;
        };
        let loaded: Vec<(StrataId, Duration)> = self
            .loaded
            .values()
            .map(|e| (e.id, e.last_active))
            .collect();
        let victims = self.scheduler.select(current, &loaded);
        if victims.is_empty() {
            return;
        }
        tracing::debug!(%current, ?victims, budget = self.scheduler.budget(), "eviction pass");
        for id in victims {
            if let Err(err) = self.evict(id) {
                tracing::warn!(%id, %err, "eviction failed");
            }
        }
    }

    fn evict(&mut self, id: StrataId) -> Result<UnloadOutcome, StrataError> {
        let outcome = self.streamer.unload_strata(id)?;
        match outcome {
            UnloadOutcome::Started => {
                self.stats.record_unload_request();
                self.purge(id);
            }
            UnloadOutcome::Queued => self.stats.record_unload_request(),
            UnloadOutcome::AlreadyUnloading | UnloadOutcome::NotLoaded => {}
        }
        Ok(outcome)
    }
}
