//! The single-owner synchronizer engine.
//!
//! `FrameSynchronizer` owns every per-source buffer, the statistics and the
//! focus. It never reads a clock: every time-dependent operation takes the
//! caller's `now`, which lets tests drive ticks deterministically and lets
//! [`crate::runtime::SyncRuntime`] drive it from a tokio interval.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use camsync_models::composite::sync_accuracy;
use camsync_models::{
    CompositeFrame, Entity, FocusState, RawFrame, SourceId, SyncConfig, SyncConfigPatch,
};
use chrono::Utc;
use tracing::{debug, info};

use crate::aligner::{Aligner, Reference, SourceView};
use crate::buffer::SourceBuffer;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventBus, HandlerResult};
use crate::identity::{FocusOutcome, IdentityResolver, ResolverConfig};
use crate::metrics;
use crate::policy::{DropPolicy, DropReason, Evictions};
use crate::stats::{SourceStats, StatisticsSnapshot, SyncStatistics};

/// Buffer and counters for one source.
#[derive(Debug, Default)]
struct SourceState {
    buffer: SourceBuffer,
    stats: SourceStats,
}

/// Entities a source contributed to one composite.
#[derive(Debug)]
struct Contribution {
    entities: Vec<Entity>,
    at: Instant,
    /// Sequence number of that composite
    composite: u64,
}

/// Aligns per-source frames into composites and tracks the focused subject.
#[derive(Debug)]
pub struct FrameSynchronizer {
    config: SyncConfig,
    /// Replacement config, swapped in at the start of the next tick
    pending_config: Option<SyncConfig>,
    policy: DropPolicy,
    aligner: Aligner,
    resolver: IdentityResolver,
    sources: BTreeMap<SourceId, SourceState>,
    /// What each source last contributed to a composite
    latest: BTreeMap<SourceId, Contribution>,
    statistics: SyncStatistics,
    focus: Option<Arc<FocusState>>,
    last_reference: Option<Reference>,
    events: EventBus,
}

impl FrameSynchronizer {
    /// Create a synchronizer with the default resolver settings.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        Self::with_resolver(config, ResolverConfig::default())
    }

    pub fn with_resolver(config: SyncConfig, resolver: ResolverConfig) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            policy: DropPolicy::from_config(&config),
            aligner: Aligner::from_config(&config),
            resolver: IdentityResolver::new(resolver),
            config,
            pending_config: None,
            sources: BTreeMap::new(),
            latest: BTreeMap::new(),
            statistics: SyncStatistics::default(),
            focus: None,
            last_reference: None,
            events: EventBus::new(),
        })
    }

    /// Create a synchronizer configured from environment variables.
    pub fn from_env() -> SyncResult<Self> {
        Self::with_resolver(SyncConfig::from_env(), ResolverConfig::from_env())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Config staged by [`update_config`](Self::update_config), if any.
    pub fn pending_config(&self) -> Option<&SyncConfig> {
        self.pending_config.as_ref()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn on_composite_frame<F>(&mut self, handler: F)
    where
        F: Fn(&CompositeFrame) -> HandlerResult + Send + Sync + 'static,
    {
        self.events.on_composite_frame(handler);
    }

    pub fn on_focus_changed<F>(&mut self, handler: F)
    where
        F: Fn(Option<&FocusState>) -> HandlerResult + Send + Sync + 'static,
    {
        self.events.on_focus_changed(handler);
    }

    pub fn on_sync_error<F>(&mut self, handler: F)
    where
        F: Fn(&SyncError) + Send + Sync + 'static,
    {
        self.events.on_sync_error(handler);
    }

    /// Ingest one frame from a source.
    ///
    /// The first frame of a source registers it. Malformed frames are counted
    /// as received and dropped, reported through `on_sync_error`, and returned
    /// as an error; they are never buffered.
    pub fn on_raw_frame(&mut self, frame: RawFrame, now: Instant) -> SyncResult<()> {
        let source_id = frame.source_id.clone();
        let state = match self.sources.entry(source_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                info!(source = %source_id, "New source registered");
                entry.insert(SourceState::default())
            }
        };

        state.stats.frames_received += 1;
        state.stats.last_frame_at = Some(now);
        self.statistics.record_received();
        metrics::record_frame_received(source_id.as_str());

        if let Err(reason) = frame.validate() {
            record_drops(
                &mut state.stats,
                &mut self.statistics,
                &source_id,
                DropReason::Malformed,
                1,
            );
            let err = SyncError::malformed_frame(source_id, frame.frame_index, reason);
            self.events.emit_error(&err);
            return Err(err);
        }

        debug!(
            source = %source_id,
            frame_index = frame.frame_index,
            entities = frame.entities.len(),
            "Frame buffered"
        );
        state.buffer.push(frame, now);
        enforce_policy(&self.policy, &source_id, state, &mut self.statistics, now);
        metrics::record_buffer_depth(source_id.as_str(), state.buffer.len());
        Ok(())
    }

    /// Apply the age and capacity limits to one source's buffer.
    pub fn prune(&mut self, source_id: &SourceId, now: Instant) -> SyncResult<Evictions> {
        let state = self
            .sources
            .get_mut(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.clone()))?;
        Ok(enforce_policy(
            &self.policy,
            source_id,
            state,
            &mut self.statistics,
            now,
        ))
    }

    /// Run one alignment step.
    ///
    /// Returns the emitted composite, or `None` when no buffer holds an
    /// eligible frame. Staged config is applied before anything else.
    pub fn tick(&mut self, now: Instant) -> Option<CompositeFrame> {
        self.apply_pending_config();
        self.prune_all(now);

        let threshold = self.config.inactivity_threshold();
        let floor = self.last_reference.map(|r| r.frame_index);
        let choice = {
            let views: Vec<SourceView<'_>> = self
                .sources
                .iter()
                .map(|(id, state)| SourceView {
                    id,
                    buffer: &state.buffer,
                    active: state.stats.is_active(now, threshold),
                })
                .collect();
            self.aligner.select_reference(&views, floor)
        };
        let Some(choice) = choice else {
            debug!(sources = self.sources.len(), "No reference candidate this tick");
            return None;
        };
        let reference = choice.reference;

        let alignment = self.aligner.assemble(
            &reference,
            self.sources
                .iter_mut()
                .map(|(id, state)| (id, &mut state.buffer)),
        );

        if self.config.allow_frame_skipping {
            for (id, state) in self.sources.iter_mut() {
                let skipped = state.buffer.evict_before(reference.frame_index);
                record_drops(
                    &mut state.stats,
                    &mut self.statistics,
                    id,
                    DropReason::Skipped,
                    skipped,
                );
            }
        }

        let accuracy = sync_accuracy(self.sources.len(), alignment.missed_sources.len());

        let composite = CompositeFrame {
            reference_frame_index: reference.frame_index,
            produced_at: Utc::now(),
            per_source: alignment.per_source,
            sync_accuracy: accuracy,
            missed_sources: alignment.missed_sources,
        };

        self.statistics.record_composite(accuracy);
        metrics::record_composite(accuracy, self.statistics.average_accuracy());
        self.last_reference = Some(reference);

        let sequence = self.statistics.composites_emitted();
        for (id, entities) in &composite.per_source {
            self.latest.insert(
                id.clone(),
                Contribution {
                    entities: entities.clone(),
                    at: now,
                    composite: sequence,
                },
            );
        }

        debug!(
            reference_index = reference.frame_index,
            coverage = choice.coverage,
            sync_accuracy = accuracy,
            missed = composite.missed_sources.len(),
            "Composite frame emitted"
        );
        self.events.emit_composite(&composite);

        if let Some(focus) = self.focus.as_deref() {
            let outcome = self.resolver.resolve(focus, &self.resolution_view(now));
            self.apply_outcome(outcome);
        }

        for (id, state) in &self.sources {
            metrics::record_buffer_depth(id.as_str(), state.buffer.len());
        }
        Some(composite)
    }

    /// Focus a subject picked externally from a source's latest data.
    ///
    /// Detection-only picks are attached to the best-matching tracker entity
    /// of the same source.
    pub fn select_focus(
        &mut self,
        source_id: &SourceId,
        entity: &Entity,
    ) -> SyncResult<Arc<FocusState>> {
        if !self.sources.contains_key(source_id) {
            let err = SyncError::UnknownSource(source_id.clone());
            self.events.emit_error(&err);
            return Err(err);
        }

        let focus = self
            .resolver
            .associate(source_id, entity, self.latest_entities(source_id));
        info!(
            source = %source_id,
            track_key = ?focus.track_key,
            persistent_id = ?focus.persistent_id,
            "Focus selected"
        );

        let focus = Arc::new(focus);
        self.focus = Some(Arc::clone(&focus));
        self.events.emit_focus(Some(focus.as_ref()));
        Ok(focus)
    }

    /// Drop the focus. Returns whether one was set.
    pub fn clear_focus(&mut self) -> bool {
        match self.focus.take() {
            Some(previous) => {
                info!(source = %previous.source_id, "Focus cleared");
                self.events.emit_focus(None);
                true
            }
            None => false,
        }
    }

    /// Resolve the focus against the newest data without waiting for a tick.
    ///
    /// Buffered frames count as the newest data of their source.
    pub fn resolve_now(&mut self, now: Instant) -> Option<Arc<FocusState>> {
        let outcome = {
            let focus = self.focus.as_deref()?;
            let mut newest = self.resolution_view(now);
            for (id, state) in &self.sources {
                if let Some(buffered) = state.buffer.newest() {
                    newest.insert(id.clone(), buffered.frame().entities.clone());
                }
            }
            self.resolver.resolve(focus, &newest)
        };
        self.apply_outcome(outcome);
        self.focus()
    }

    /// Stage a partial config update for the next tick.
    ///
    /// Patches stack: a second update before the tick applies on top of the
    /// first. Invalid patches leave the staged config untouched.
    pub fn update_config(&mut self, patch: &SyncConfigPatch) -> SyncResult<SyncConfig> {
        let base = self.pending_config.as_ref().unwrap_or(&self.config);
        match base.apply(patch) {
            Ok(next) => {
                debug!(?patch, "Config update staged");
                self.pending_config = Some(next.clone());
                Ok(next)
            }
            Err(e) => {
                let err = SyncError::from(e);
                self.events.emit_error(&err);
                Err(err)
            }
        }
    }

    /// Forget a source together with its buffer and statistics.
    pub fn remove_source(&mut self, source_id: &SourceId) -> SyncResult<()> {
        let state = self
            .sources
            .remove(source_id)
            .ok_or_else(|| SyncError::UnknownSource(source_id.clone()))?;
        self.latest.remove(source_id);
        metrics::record_buffer_depth(source_id.as_str(), 0);
        info!(
            source = %source_id,
            discarded = state.buffer.len(),
            "Source removed"
        );

        let orphaned = self
            .focus
            .as_deref()
            .is_some_and(|f| f.source_id == *source_id && f.persistent_id.is_none());
        if orphaned {
            metrics::record_focus_cleared();
            self.clear_focus();
        }
        Ok(())
    }

    /// Read-only statistics as of `now`.
    pub fn statistics(&self, now: Instant) -> StatisticsSnapshot {
        self.statistics.snapshot(
            self.sources
                .iter()
                .map(|(id, state)| (id, &state.stats, state.buffer.len())),
            now,
            self.config.inactivity_threshold(),
        )
    }

    /// Frames currently buffered for `source_id`; zero when unknown.
    pub fn buffer_depth(&self, source_id: &SourceId) -> usize {
        self.sources
            .get(source_id)
            .map(|state| state.buffer.len())
            .unwrap_or(0)
    }

    /// Current focus snapshot.
    pub fn focus(&self) -> Option<Arc<FocusState>> {
        self.focus.clone()
    }

    /// Reference index of the last emitted composite.
    pub fn last_reference_index(&self) -> Option<u64> {
        self.last_reference.map(|r| r.frame_index)
    }

    pub fn source_ids(&self) -> impl Iterator<Item = &SourceId> {
        self.sources.keys()
    }

    /// Log an aggregate summary.
    pub fn log_summary(&self) {
        info!(
            sources = self.sources.len(),
            composites = self.statistics.composites_emitted(),
            frames_received = self.statistics.frames_received(),
            frames_dropped = self.statistics.frames_dropped(),
            avg_sync_accuracy = format!("{:.1}%", self.statistics.average_accuracy() * 100.0),
            focused = self.focus.is_some(),
            "Frame synchronizer summary"
        );
    }

    fn apply_pending_config(&mut self) {
        let Some(config) = self.pending_config.take() else {
            return;
        };
        info!(
            target_rate_hz = config.target_rate_hz,
            sync_window_ms = config.sync_window_ms,
            max_frame_age_ms = config.max_frame_age_ms,
            max_buffer_size = config.max_buffer_size,
            allow_frame_skipping = config.allow_frame_skipping,
            "Sync config applied"
        );
        self.policy = DropPolicy::from_config(&config);
        self.aligner = Aligner::from_config(&config);
        self.config = config;
    }

    /// Enforce limits on every buffer and evict frames that can no longer
    /// be matched to a reference at or after the last emitted one.
    fn prune_all(&mut self, now: Instant) {
        let last = self.last_reference;
        let aligner = self.aligner;
        for (id, state) in self.sources.iter_mut() {
            enforce_policy(&self.policy, id, state, &mut self.statistics, now);

            if let Some(last) = last {
                let late = state.buffer.evict_where(|f| {
                    f.frame_index() < last.frame_index && !aligner.within_window(&last, f.frame())
                });
                record_drops(&mut state.stats, &mut self.statistics, id, DropReason::Late, late);
            }
        }
    }

    /// Entities identity resolution may match against.
    ///
    /// Every source offers what it contributed to the newest composite. A
    /// source that missed it offers its previous contribution only to a focus
    /// it owns that has no persistent id, and only while the source is active
    /// and that contribution is younger than `max_frame_age`.
    fn resolution_view(&self, now: Instant) -> BTreeMap<SourceId, Vec<Entity>> {
        let current = self.statistics.composites_emitted();
        let carried = self
            .focus
            .as_deref()
            .filter(|f| f.persistent_id.is_none())
            .map(|f| &f.source_id);

        self.latest
            .iter()
            .filter(|(id, contribution)| {
                contribution.composite == current
                    || (carried == Some(*id) && self.is_recent(id, contribution, now))
            })
            .map(|(id, contribution)| (id.clone(), contribution.entities.clone()))
            .collect()
    }

    fn is_recent(&self, source_id: &SourceId, contribution: &Contribution, now: Instant) -> bool {
        let active = self.sources.get(source_id).is_some_and(|state| {
            state
                .stats
                .is_active(now, self.config.inactivity_threshold())
        });
        active && now.saturating_duration_since(contribution.at) < self.policy.max_frame_age()
    }

    fn apply_outcome(&mut self, outcome: FocusOutcome) {
        match outcome {
            FocusOutcome::Updated { focus, matched_by } => {
                if self.focus.as_deref() != Some(&focus) {
                    debug!(source = %focus.source_id, %matched_by, "Focus updated");
                    self.publish_focus(Some(focus));
                }
            }
            FocusOutcome::HandedOff { focus, from } => {
                metrics::record_focus_handoff(from.as_str(), focus.source_id.as_str());
                self.publish_focus(Some(focus));
            }
            FocusOutcome::Retained => {}
            FocusOutcome::Lost => {
                if let Some(previous) = self.focus.as_deref() {
                    info!(source = %previous.source_id, "Focused subject lost");
                }
                metrics::record_focus_cleared();
                self.publish_focus(None);
            }
        }
    }

    fn publish_focus(&mut self, focus: Option<FocusState>) {
        self.focus = focus.map(Arc::new);
        self.events.emit_focus(self.focus.as_deref());
    }

    /// Newest buffered entities of a source, else its last contribution.
    fn latest_entities(&self, source_id: &SourceId) -> &[Entity] {
        self.sources
            .get(source_id)
            .and_then(|state| state.buffer.newest())
            .map(|buffered| buffered.frame().entities.as_slice())
            .or_else(|| {
                self.latest
                    .get(source_id)
                    .map(|contribution| contribution.entities.as_slice())
            })
            .unwrap_or(&[])
    }
}

fn enforce_policy(
    policy: &DropPolicy,
    source_id: &SourceId,
    state: &mut SourceState,
    totals: &mut SyncStatistics,
    now: Instant,
) -> Evictions {
    let evictions = policy.enforce(&mut state.buffer, now);
    record_drops(&mut state.stats, totals, source_id, DropReason::Stale, evictions.stale);
    record_drops(
        &mut state.stats,
        totals,
        source_id,
        DropReason::Overflow,
        evictions.overflow,
    );
    evictions
}

fn record_drops(
    stats: &mut SourceStats,
    totals: &mut SyncStatistics,
    source_id: &SourceId,
    reason: DropReason,
    count: usize,
) {
    if count == 0 {
        return;
    }
    let count = count as u64;
    stats.frames_dropped += count;
    totals.record_dropped(count);
    metrics::record_frames_dropped(source_id.as_str(), reason.as_str(), count);
    debug!(source = %source_id, reason = reason.as_str(), count, "Frames dropped");
}
