//! Reference-counted, asynchronous loading of strata content partitions.
//!
//! # Invariants
//! - A partition's reference count equals the number of strata currently holding it
//!   (Loading or Loaded). It is unloaded only when that count reaches zero.
//! - Each stratum moves through `Unloaded → Loading → Loaded → Unloading → Unloaded`;
//!   requests that arrive mid-transition are queued, never cancelled.
//! - Completions are applied only in [`SceneStreamer::drain`], which the tick thread calls.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use strata_common::{PartitionId, StrataId};
use strata_kernel::{StrataError, StrataRegistry};

use crate::loader::{Completion, Job, PartitionLoader, WorkerPool};

/// Residency state of one stratum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrataState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// How a [`LoadHandle`] resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    Failed { partition: PartitionId, reason: String },
    /// A reload queued behind an unload was cancelled by a later unload request.
    Cancelled,
    /// The streamer shut down before the load finished.
    Abandoned,
}

/// Pending result of [`SceneStreamer::load_strata`]. Resolves once every partition of
/// the stratum is resident, or once one of them failed.
#[derive(Debug)]
pub struct LoadHandle {
    stratum: StrataId,
    rx: Receiver<LoadOutcome>,
    outcome: Option<LoadOutcome>,
}

impl LoadHandle {
    fn pair(stratum: StrataId) -> (Sender<LoadOutcome>, Self) {
        let (tx, rx) = crossbeam_channel::bounded(1);
        (
            tx,
            Self {
                stratum,
                rx,
                outcome: None,
            },
        )
    }

    pub fn stratum(&self) -> StrataId {
        self.stratum
    }

    /// Non-blocking check. Returns the outcome once resolved.
    pub fn poll(&mut self) -> Option<&LoadOutcome> {
        if self.outcome.is_none() {
            match self.rx.try_recv() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(TryRecvError::Disconnected) => self.outcome = Some(LoadOutcome::Abandoned),
                Err(TryRecvError::Empty) => {}
            }
        }
        self.outcome.as_ref()
    }

    /// Block up to `timeout` for the outcome. Only useful off the tick thread, since
    /// handles resolve when the tick drains the streamer.
    pub fn wait_timeout(&mut self, timeout: Duration) -> Option<&LoadOutcome> {
        if self.outcome.is_none() {
            match self.rx.recv_timeout(timeout) {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                    self.outcome = Some(LoadOutcome::Abandoned)
                }
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            }
        }
        self.outcome.as_ref()
    }
}

/// What [`SceneStreamer::unload_strata`] did with the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadOutcome {
    /// The stratum left `Loaded`; its bounds must be purged now.
    Started,
    /// The stratum is still loading; the unload runs right after the load completes.
    Queued,
    AlreadyUnloading,
    NotLoaded,
}

/// Streaming notification produced by [`SceneStreamer::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Loaded {
        stratum: StrataId,
        partitions: Vec<PartitionId>,
    },
    LoadFailed {
        stratum: StrataId,
        partition: PartitionId,
        reason: String,
    },
    /// The stratum left `Loaded` and is releasing its partitions.
    Unloading { stratum: StrataId },
    Unloaded { stratum: StrataId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionState {
    Loading,
    Resident,
    Unloading,
}

#[derive(Debug)]
struct PartitionSlot {
    refs: u32,
    state: PartitionState,
}

#[derive(Debug, Default)]
struct StrataSlot {
    state: StrataState,
    /// Partitions this stratum holds a reference on.
    held: Vec<PartitionId>,
    /// Partitions still loading (while Loading) or still unloading (while Unloading).
    outstanding: BTreeSet<PartitionId>,
    waiters: Vec<Sender<LoadOutcome>>,
    evict_after_load: bool,
    reload_after_unload: bool,
    last_failure: Option<String>,
}

impl StrataSlot {
    fn resolve(&mut self, outcome: LoadOutcome) {
        for waiter in self.waiters.drain(..) {
            // A dropped handle is fine; nobody is listening.
            let _ = waiter.send(outcome.clone());
        }
    }
}

/// Loads and unloads strata by reference-counting their content partitions.
///
/// Partitions shared by several strata are loaded once and released only when the
/// last holder unloads. Work on different strata proceeds concurrently on the loader
/// pool; work on the same stratum is serialized by its state machine.
pub struct SceneStreamer {
    registry: Arc<StrataRegistry>,
    pool: WorkerPool,
    partitions: BTreeMap<PartitionId, PartitionSlot>,
    strata: BTreeMap<StrataId, StrataSlot>,
    events: VecDeque<StreamEvent>,
    jobs_in_flight: usize,
}

impl SceneStreamer {
    pub fn new(
        registry: Arc<StrataRegistry>,
        loader: Arc<dyn PartitionLoader>,
        worker_threads: usize,
    ) -> Result<Self, StrataError> {
        Ok(Self {
            registry,
            pool: WorkerPool::new(loader, worker_threads)?,
            partitions: BTreeMap::new(),
            strata: BTreeMap::new(),
            events: VecDeque::new(),
            jobs_in_flight: 0,
        })
    }

    /// Request that every partition of `id` become resident.
    ///
    /// Idempotent: a stratum already loading gains another waiter, a loaded stratum
    /// resolves immediately, and partitions held by other strata are shared.
    pub fn load_strata(&mut self, id: StrataId) -> Result<LoadHandle, StrataError> {
        let partitions = self.registry.get_definition(id)?.partitions.clone();
        let (tx, handle) = LoadHandle::pair(id);
        let slot = self.strata.entry(id).or_default();
        let state = slot.state;

        match state {
            StrataState::Loaded => {
                let _ = tx.send(LoadOutcome::Loaded);
            }
            StrataState::Loading => {
                if slot.evict_after_load {
                    tracing::debug!(%id, "load request cancels queued eviction");
                    slot.evict_after_load = false;
                }
                slot.waiters.push(tx);
            }
            StrataState::Unloading => {
                tracing::debug!(%id, "stratum is unloading, reload queued");
                slot.reload_after_unload = true;
                slot.waiters.push(tx);
            }
            StrataState::Unloaded => {
                slot.waiters.push(tx);
                self.begin_load(id, partitions);
            }
        }
        Ok(handle)
    }

    /// Release the stratum's partitions. A partition is unloaded only when no other
    /// stratum still holds it.
    pub fn unload_strata(&mut self, id: StrataId) -> Result<UnloadOutcome, StrataError> {
        self.registry.get_definition(id)?;
        let Some(slot) = self.strata.get_mut(&id) else {
            return Ok(UnloadOutcome::NotLoaded);
        };
        let state = slot.state;
        let outcome = match state {
            StrataState::Unloaded => UnloadOutcome::NotLoaded,
            StrataState::Loading => {
                tracing::debug!(%id, "stratum still loading, eviction queued");
                slot.evict_after_load = true;
                UnloadOutcome::Queued
            }
            StrataState::Unloading => {
                if std::mem::take(&mut slot.reload_after_unload) {
                    tracing::debug!(%id, "unload request cancels queued reload");
                    slot.resolve(LoadOutcome::Cancelled);
                }
                UnloadOutcome::AlreadyUnloading
            }
            StrataState::Loaded => {
                self.begin_unload(id);
                UnloadOutcome::Started
            }
        };
        Ok(outcome)
    }

    /// Apply every finished job and return the resulting notifications, in order.
    pub fn drain(&mut self) -> Vec<StreamEvent> {
        for completion in self.pool.try_completions() {
            self.apply(completion);
        }
        self.events.drain(..).collect()
    }

    /// Block up to `timeout` for one job to finish and apply it. Events stay queued
    /// for the next [`drain`](Self::drain). Returns false if nothing finished.
    pub fn wait_for_completion(&mut self, timeout: Duration) -> bool {
        if self.jobs_in_flight == 0 {
            return false;
        }
        match self.pool.wait_completion(timeout) {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }

    pub fn state(&self, id: StrataId) -> StrataState {
        self.strata.get(&id).map(|s| s.state).unwrap_or_default()
    }

    /// Reason of the most recent failed load of `id`, cleared when a new load starts.
    pub fn last_failure(&self, id: StrataId) -> Option<&str> {
        self.strata.get(&id)?.last_failure.as_deref()
    }

    /// Number of strata holding `partition`, if it is tracked at all.
    pub fn partition_refs(&self, partition: &PartitionId) -> Option<u32> {
        self.partitions.get(partition).map(|p| p.refs)
    }

    pub fn is_partition_resident(&self, partition: &PartitionId) -> bool {
        self.partitions
            .get(partition)
            .is_some_and(|p| p.state == PartitionState::Resident)
    }

    pub fn resident_partition_count(&self) -> usize {
        self.partitions
            .values()
            .filter(|p| p.state == PartitionState::Resident)
            .count()
    }

    /// Strata in the given state, in id order.
    pub fn strata_in(&self, state: StrataState) -> Vec<StrataId> {
        self.strata
            .iter()
            .filter(|(_, s)| s.state == state)
            .map(|(id, _)| *id)
            .collect()
    }

    /// No jobs running and no undrained events.
    pub fn is_idle(&self) -> bool {
        self.jobs_in_flight == 0 && self.events.is_empty()
    }

    fn submit(&mut self, job: Job) {
        self.jobs_in_flight += 1;
        self.pool.submit(job);
    }

    fn begin_load(&mut self, id: StrataId, partitions: Vec<PartitionId>) {
        let mut held: Vec<PartitionId> = Vec::with_capacity(partitions.len());
        let mut outstanding = BTreeSet::new();
        let mut to_submit = Vec::new();

        for partition in partitions {
            if held.contains(&partition) {
                continue;
            }
            match self.partitions.get_mut(&partition) {
                Some(slot) => {
                    slot.refs += 1;
                    tracing::debug!(%id, %partition, refs = slot.refs, "sharing partition");
                    if slot.state != PartitionState::Resident {
                        outstanding.insert(partition.clone());
                    }
                }
                None => {
                    self.partitions.insert(
                        partition.clone(),
                        PartitionSlot {
                            refs: 1,
                            state: PartitionState::Loading,
                        },
                    );
                    outstanding.insert(partition.clone());
                    to_submit.push(partition.clone());
                }
            }
            held.push(partition);
        }

        tracing::info!(%id, partitions = held.len(), new = to_submit.len(), "loading stratum");
        let slot = self.strata.entry(id).or_default();
        slot.state = StrataState::Loading;
        slot.last_failure = None;
        slot.held = held;
        slot.outstanding = outstanding;
        let ready = slot.outstanding.is_empty();

        for partition in to_submit {
            self.submit(Job::Load(partition));
        }
        if ready {
            self.complete_load(id);
        }
    }

    fn complete_load(&mut self, id: StrataId) {
        let Some(slot) = self.strata.get_mut(&id) else {
            return;
        };
        slot.state = StrataState::Loaded;
        slot.resolve(LoadOutcome::Loaded);
        self.events.push_back(StreamEvent::Loaded {
            stratum: id,
            partitions: slot.held.clone(),
        });
        tracing::info!(%id, "stratum resident");

        if std::mem::take(&mut slot.evict_after_load) {
            tracing::debug!(%id, "applying queued eviction");
            self.begin_unload(id);
        }
    }

    fn fail_load(&mut self, id: StrataId, partition: &PartitionId, reason: &str) {
        let Some(slot) = self.strata.get_mut(&id) else {
            return;
        };
        tracing::warn!(%id, %partition, reason, "stratum load failed");
        slot.state = StrataState::Unloaded;
        slot.last_failure = Some(format!("{partition}: {reason}"));
        slot.outstanding.clear();
        slot.evict_after_load = false;
        slot.resolve(LoadOutcome::Failed {
            partition: partition.clone(),
            reason: reason.to_string(),
        });
        let held = std::mem::take(&mut slot.held);
        self.events.push_back(StreamEvent::LoadFailed {
            stratum: id,
            partition: partition.clone(),
            reason: reason.to_string(),
        });
        self.release(&held);
    }

    fn begin_unload(&mut self, id: StrataId) {
        let Some(slot) = self.strata.get_mut(&id) else {
            return;
        };
        slot.state = StrataState::Unloading;
        let held = std::mem::take(&mut slot.held);
        self.events.push_back(StreamEvent::Unloading { stratum: id });
        tracing::info!(%id, "unloading stratum");

        let released = self.release(&held);
        let slot = self.strata.entry(id).or_default();
        slot.outstanding = released.into_iter().collect();
        if slot.outstanding.is_empty() {
            self.finish_unload(id);
        }
    }

    fn finish_unload(&mut self, id: StrataId) {
        let Some(slot) = self.strata.get_mut(&id) else {
            return;
        };
        slot.state = StrataState::Unloaded;
        self.events.push_back(StreamEvent::Unloaded { stratum: id });
        tracing::info!(%id, "stratum unloaded");

        if std::mem::take(&mut slot.reload_after_unload) {
            let partitions = self
                .registry
                .get_definition(id)
                .map(|stratum| stratum.partitions.clone());
            match partitions {
                Ok(partitions) => self.begin_load(id, partitions),
                Err(err) => tracing::error!(%id, %err, "cannot reload stratum"),
            }
        }
    }

    /// Drop one reference on each partition. Returns the partitions whose unload
    /// was started because their count reached zero.
    fn release(&mut self, held: &[PartitionId]) -> Vec<PartitionId> {
        let mut unloading = Vec::new();
        for partition in held {
            let Some(slot) = self.partitions.get_mut(partition) else {
                continue;
            };
            slot.refs = slot.refs.saturating_sub(1);
            tracing::debug!(%partition, refs = slot.refs, "released partition");
            if slot.refs == 0 && slot.state == PartitionState::Resident {
                slot.state = PartitionState::Unloading;
                unloading.push(partition.clone());
            }
        }
        for partition in &unloading {
            self.submit(Job::Unload(partition.clone()));
        }
        unloading
    }

    fn apply(&mut self, completion: Completion) {
        self.jobs_in_flight = self.jobs_in_flight.saturating_sub(1);
        match completion {
            Completion::Loaded {
                partition,
                result: Ok(()),
            } => self.partition_loaded(partition),
            Completion::Loaded {
                partition,
                result: Err(err),
            } => self.partition_failed(partition, &err.reason),
            Completion::Unloaded { partition } => self.partition_unloaded(partition),
        }
    }

    fn partition_loaded(&mut self, partition: PartitionId) {
        let Some(slot) = self.partitions.get_mut(&partition) else {
            return;
        };
        if slot.refs == 0 {
            // Every holder failed or left while it was loading.
            slot.state = PartitionState::Unloading;
            self.submit(Job::Unload(partition));
            return;
        }
        slot.state = PartitionState::Resident;

        let ready = self.take_outstanding(&partition, StrataState::Loading);
        for id in ready {
            self.complete_load(id);
        }
    }

    fn partition_failed(&mut self, partition: PartitionId, reason: &str) {
        self.partitions.remove(&partition);
        let waiting: Vec<StrataId> = self
            .strata
            .iter()
            .filter(|(_, s)| s.state == StrataState::Loading && s.outstanding.contains(&partition))
            .map(|(id, _)| *id)
            .collect();
        for id in waiting {
            self.fail_load(id, &partition, reason);
        }
    }

    fn partition_unloaded(&mut self, partition: PartitionId) {
        let Some(slot) = self.partitions.get_mut(&partition) else {
            return;
        };
        if slot.refs > 0 {
            // Re-acquired while unloading.
            slot.state = PartitionState::Loading;
            self.submit(Job::Load(partition.clone()));
        } else {
            self.partitions.remove(&partition);
        }

        let done = self.take_outstanding(&partition, StrataState::Unloading);
        for id in done {
            self.finish_unload(id);
        }
    }

    /// Remove `partition` from the outstanding set of every stratum in `state`.
    /// Returns the strata left with nothing outstanding.
    fn take_outstanding(&mut self, partition: &PartitionId, state: StrataState) -> Vec<StrataId> {
        self.strata
            .iter_mut()
            .filter(|(_, s)| s.state == state)
            .filter_map(|(id, s)| {
                (s.outstanding.remove(partition) && s.outstanding.is_empty()).then_some(*id)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::PartitionLoadError;
    use glam::IVec3;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use strata_kernel::{StratumDef, WorldDefinition};

    #[derive(Default)]
    struct Counting {
        loads: Mutex<HashMap<String, u32>>,
        unloads: Mutex<HashMap<String, u32>>,
        failing: Mutex<Vec<String>>,
    }

    impl Counting {
        fn loads_of(&self, p: &str) -> u32 {
            self.loads.lock().unwrap().get(p).copied().unwrap_or(0)
        }

        fn unloads_of(&self, p: &str) -> u32 {
            self.unloads.lock().unwrap().get(p).copied().unwrap_or(0)
        }
    }

    impl PartitionLoader for Counting {
        fn load(&self, partition: &PartitionId) -> Result<(), PartitionLoadError> {
            *self.loads.lock().unwrap().entry(partition.0.clone()).or_default() += 1;
            if self.failing.lock().unwrap().contains(&partition.0) {
                return Err(PartitionLoadError::new("scene missing"));
            }
            Ok(())
        }

        fn unload(&self, partition: &PartitionId) {
            *self.unloads.lock().unwrap().entry(partition.0.clone()).or_default() += 1;
        }
    }

    /// Three strata; 0 and 1 share "seam_01", 1 and 2 share "seam_12".
    fn registry() -> Arc<StrataRegistry> {
        let parts = [
            vec!["s0", "seam_01"],
            vec!["s1", "seam_01", "seam_12"],
            vec!["s2", "seam_12"],
        ];
        let world = WorldDefinition {
            strata: parts
                .iter()
                .enumerate()
                .map(|(i, p)| StratumDef {
                    name: format!("floor{i}"),
                    partitions: p.iter().map(|s| PartitionId::from(*s)).collect(),
                    extents: IVec3::new(32, 64, 32),
                    origin: IVec3::ZERO,
                })
                .collect(),
        };
        Arc::new(StrataRegistry::new(&world, 16.0).unwrap())
    }

    fn inline_streamer() -> (SceneStreamer, Arc<Counting>) {
        let loader = Arc::new(Counting::default());
        let streamer = SceneStreamer::new(registry(), loader.clone(), 0).unwrap();
        (streamer, loader)
    }

    #[test]
    fn load_resolves_on_drain() {
        let (mut streamer, loader) = inline_streamer();
        let mut handle = streamer.load_strata(StrataId(0)).unwrap();
        assert_eq!(streamer.state(StrataId(0)), StrataState::Loading);
        assert!(handle.poll().is_none());

        let events = streamer.drain();
        assert_eq!(handle.poll(), Some(&LoadOutcome::Loaded));
        assert_eq!(streamer.state(StrataId(0)), StrataState::Loaded);
        assert!(matches!(events.as_slice(), [StreamEvent::Loaded { stratum: StrataId(0), .. }]));
        assert_eq!(loader.loads_of("s0"), 1);
        assert!(streamer.is_idle());
    }

    #[test]
    fn duplicate_load_is_idempotent() {
        let (mut streamer, loader) = inline_streamer();
        let mut a = streamer.load_strata(StrataId(1)).unwrap();
        let mut b = streamer.load_strata(StrataId(1)).unwrap();
        streamer.drain();

        assert_eq!(a.poll(), Some(&LoadOutcome::Loaded));
        assert_eq!(b.poll(), Some(&LoadOutcome::Loaded));
        for p in ["s1", "seam_01", "seam_12"] {
            assert_eq!(loader.loads_of(p), 1, "{p} loaded more than once");
        }
        let mut c = streamer.load_strata(StrataId(1)).unwrap();
        assert_eq!(c.poll(), Some(&LoadOutcome::Loaded));
    }

    #[test]
    fn shared_partitions_are_reference_counted() {
        let (mut streamer, loader) = inline_streamer();
        streamer.load_strata(StrataId(0)).unwrap();
        streamer.load_strata(StrataId(1)).unwrap();
        streamer.drain();
        let seam = PartitionId::from("seam_01");
        assert_eq!(streamer.partition_refs(&seam), Some(2));
        assert_eq!(loader.loads_of("seam_01"), 1);

        assert_eq!(streamer.unload_strata(StrataId(0)).unwrap(), UnloadOutcome::Started);
        streamer.drain();
        assert_eq!(streamer.state(StrataId(0)), StrataState::Unloaded);
        assert_eq!(loader.unloads_of("s0"), 1);
        assert_eq!(loader.unloads_of("seam_01"), 0);
        assert!(streamer.is_partition_resident(&seam));
        assert_eq!(streamer.partition_refs(&seam), Some(1));

        streamer.unload_strata(StrataId(1)).unwrap();
        streamer.drain();
        assert_eq!(loader.unloads_of("seam_01"), 1);
        assert_eq!(streamer.partition_refs(&seam), None);
        assert_eq!(streamer.resident_partition_count(), 0);
    }

    #[test]
    fn stratum_with_only_shared_partitions_loads_without_jobs() {
        let registry = {
            let world = WorldDefinition {
                strata: vec![
                    StratumDef {
                        name: "a".into(),
                        partitions: vec!["shared".into()],
                        extents: IVec3::splat(8),
                        origin: IVec3::ZERO,
                    },
                    StratumDef {
                        name: "b".into(),
                        partitions: vec!["shared".into(), "shared".into()],
                        extents: IVec3::splat(8),
                        origin: IVec3::ZERO,
                    },
                ],
            };
            Arc::new(StrataRegistry::new(&world, 0.0).unwrap())
        };
        let loader = Arc::new(Counting::default());
        let mut streamer = SceneStreamer::new(registry, loader.clone(), 0).unwrap();
        streamer.load_strata(StrataId(0)).unwrap();
        streamer.drain();

        let mut handle = streamer.load_strata(StrataId(1)).unwrap();
        assert_eq!(handle.poll(), Some(&LoadOutcome::Loaded));
        assert_eq!(streamer.partition_refs(&"shared".into()), Some(2));
        assert_eq!(loader.loads_of("shared"), 1);
    }

    #[test]
    fn unload_while_loading_is_queued() {
        let (mut streamer, loader) = inline_streamer();
        streamer.load_strata(StrataId(2)).unwrap();
        assert_eq!(streamer.unload_strata(StrataId(2)).unwrap(), UnloadOutcome::Queued);
        assert_eq!(streamer.state(StrataId(2)), StrataState::Loading);

        let events = streamer.drain();
        assert!(matches!(events[0], StreamEvent::Loaded { stratum: StrataId(2), .. }));
        assert_eq!(events[1], StreamEvent::Unloading { stratum: StrataId(2) });
        assert_eq!(streamer.state(StrataId(2)), StrataState::Unloading);

        let events = streamer.drain();
        assert_eq!(events, vec![StreamEvent::Unloaded { stratum: StrataId(2) }]);
        assert_eq!(loader.unloads_of("s2"), 1);
        assert_eq!(loader.unloads_of("seam_12"), 1);
    }

    #[test]
    fn load_while_unloading_reloads_afterwards() {
        let (mut streamer, loader) = inline_streamer();
        streamer.load_strata(StrataId(0)).unwrap();
        streamer.drain();
        streamer.unload_strata(StrataId(0)).unwrap();
        let mut handle = streamer.load_strata(StrataId(0)).unwrap();
        assert_eq!(streamer.state(StrataId(0)), StrataState::Unloading);

        // unload completions land, reload starts
        streamer.drain();
        assert_eq!(streamer.state(StrataId(0)), StrataState::Loading);
        streamer.drain();
        assert_eq!(streamer.state(StrataId(0)), StrataState::Loaded);
        assert_eq!(handle.poll(), Some(&LoadOutcome::Loaded));
        assert_eq!(loader.loads_of("s0"), 2);
    }

    #[test]
    fn unload_cancels_reload_queued_during_unloading() {
        let (mut streamer, loader) = inline_streamer();
        streamer.load_strata(StrataId(0)).unwrap();
        streamer.drain();
        streamer.unload_strata(StrataId(0)).unwrap();
        let mut handle = streamer.load_strata(StrataId(0)).unwrap();
        assert_eq!(
            streamer.unload_strata(StrataId(0)).unwrap(),
            UnloadOutcome::AlreadyUnloading
        );
        assert_eq!(handle.poll(), Some(&LoadOutcome::Cancelled));

        for _ in 0..3 {
            streamer.drain();
        }
        assert_eq!(streamer.state(StrataId(0)), StrataState::Unloaded);
        assert!(streamer.is_idle());
        assert_eq!(loader.loads_of("s0"), 1);
    }

    #[test]
    fn partition_failure_fails_stratum_and_releases_others() {
        let (mut streamer, loader) = inline_streamer();
        loader.failing.lock().unwrap().push("seam_12".into());
        let mut handle = streamer.load_strata(StrataId(2)).unwrap();

        let events = streamer.drain();
        assert!(events.iter().any(|e| matches!(
            e,
            StreamEvent::LoadFailed {
                stratum: StrataId(2),
                partition,
                ..
            } if partition.as_str() == "seam_12"
        )));
        assert!(matches!(handle.poll(), Some(LoadOutcome::Failed { .. })));
        assert_eq!(streamer.state(StrataId(2)), StrataState::Unloaded);
        assert!(streamer.last_failure(StrataId(2)).unwrap().contains("scene missing"));

        // s2 loaded fine but lost its only holder; it gets released
        streamer.drain();
        assert_eq!(loader.unloads_of("s2"), 1);
        assert_eq!(streamer.resident_partition_count(), 0);

        loader.failing.lock().unwrap().clear();
        let mut retry = streamer.load_strata(StrataId(2)).unwrap();
        streamer.drain();
        assert_eq!(retry.poll(), Some(&LoadOutcome::Loaded));
        assert!(streamer.last_failure(StrataId(2)).is_none());
    }

    #[test]
    fn unknown_stratum_is_rejected() {
        let (mut streamer, _) = inline_streamer();
        assert!(matches!(
            streamer.load_strata(StrataId(3)),
            Err(StrataError::DefinitionNotFound(StrataId(3)))
        ));
        assert!(streamer.unload_strata(StrataId(9)).is_err());
        assert_eq!(streamer.unload_strata(StrataId(1)).unwrap(), UnloadOutcome::NotLoaded);
    }

    #[test]
    fn dropped_streamer_abandons_handles() {
        let (mut streamer, _) = inline_streamer();
        let mut handle = streamer.load_strata(StrataId(0)).unwrap();
        drop(streamer);
        assert_eq!(handle.poll(), Some(&LoadOutcome::Abandoned));
    }
}
