/// AutoDJ rotation engine
///
/// Orchestrates one output queue. A selection picks the due slot, builds the
/// slot's candidate set, filters it through the separation rules and the
/// ghost queue, and falls back one tier at a time (ghost queue first, then
/// separation rules) when nothing qualifies. Listener requests go through
/// the same engine so both paths share the queue, the weights and the
/// per-track write locks.
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Duration, Local};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use super::clockwheel::{RotationCursor, SlotScheduler};
use super::ghost_queue::GhostQueue;
use super::request_policy::{
    AdmissionController, AdmissionDecision, RejectionReason, RequestLogEntry, RequestPolicy,
    RequestQueuePosition, RequestStatus, RequestSubmission,
};
use super::rotation::{ClockwheelConfig, ClockwheelSelectionMethod, ClockwheelSlot, SlotSource};
use super::selector::CandidateSelector;
use super::separation::{PlayHistory, SeparationRule, SeparationRuleEngine};
use super::weight::{
    apply_weight_event, record_last_played, TrackLocks, WeightAdjuster, WeightEvent,
};
use super::StationTime;
use crate::db::models::{PlayRecord, RotationBand, TrackId, TrackRecord};
use crate::db::ports::{ConfigStore, MetadataPort, QueueSink, RequestLog};
use crate::error::{EngineError, StoreError};

const EVENT_CAPACITY: usize = 256;
const DAY_SECS: i64 = 86_400;

// ── Clock ─────────────────────────────────────────────────────────────────────

/// Source of station wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> StationTime;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> StationTime {
        Local::now().fixed_offset()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<StationTime>,
}

impl ManualClock {
    pub fn new(now: StationTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: StationTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> StationTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Settings ──────────────────────────────────────────────────────────────────

/// Highest relaxation tier the engine may fall back to. Tiers are cumulative
/// and always tried in this order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RelaxationLimit {
    None,
    GhostQueue,
    SeparationRules,
}

impl RelaxationLimit {
    pub const ALL: [RelaxationLimit; 3] = [
        RelaxationLimit::None,
        RelaxationLimit::GhostQueue,
        RelaxationLimit::SeparationRules,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RelaxationLimit::None => "none",
            RelaxationLimit::GhostQueue => "ghost_queue",
            RelaxationLimit::SeparationRules => "separation_rules",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Plays loaded for separation checks.
    pub history_limit: usize,
    /// Upper bound on tracks fetched per slot; `None` fetches the whole slot.
    pub candidate_limit: Option<usize>,
    /// Window over which the lemming recency penalty decays to zero.
    pub lemming_lookback_minutes: u32,
    pub max_relaxation: RelaxationLimit,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            seed: None,
            history_limit: 600,
            candidate_limit: None,
            lemming_lookback_minutes: 240,
            max_relaxation: RelaxationLimit::SeparationRules,
        }
    }
}

// ── Outcomes / state / events ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum Relaxation {
    None,
    GhostQueue,
    /// Separation rules were switched off; `dropped` lists the ones the
    /// chosen track breaks.
    SeparationRules { dropped: Vec<SeparationRule> },
}

impl Relaxation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relaxation::None => "none",
            Relaxation::GhostQueue => "ghost_queue",
            Relaxation::SeparationRules { .. } => "separation_rules",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SelectionOutcome {
    pub track_id: TrackId,
    pub slot_id: String,
    pub configured_method: ClockwheelSelectionMethod,
    pub method_used: ClockwheelSelectionMethod,
    pub relaxation: Relaxation,
    /// True when separation rules were dropped for this pick.
    pub relaxed: bool,
    pub queue_position: usize,
    /// Set when a request slot fulfilled a pending listener request.
    pub request_id: Option<i64>,
    pub selected_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Selecting,
    Relaxing,
    Selected,
    Exhausted,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Idle => "idle",
            EngineState::Selecting => "selecting",
            EngineState::Relaxing => "relaxing",
            EngineState::Selected => "selected",
            EngineState::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged {
        state: EngineState,
    },
    TrackSelected {
        outcome: SelectionOutcome,
    },
    SelectionFailed {
        reason: String,
        slot_id: Option<String>,
    },
    RequestDecided {
        decision: AdmissionDecision,
    },
    ActiveSlotsChanged {
        slot_ids: Vec<String>,
    },
    /// A weight, last-played or request-status write failed. Not retried.
    WriteFailed {
        operation: String,
        track_id: Option<TrackId>,
        request_id: Option<i64>,
        error: String,
    },
}

// ── Engine ────────────────────────────────────────────────────────────────────

struct SelectionState {
    ghost: GhostQueue,
    /// Tracks this engine queued, newest last. Merged into the library's
    /// play history so picks that have not aired yet still count.
    recent: VecDeque<PlayRecord>,
    rng: StdRng,
    /// Loaded lazily from the config store, then kept authoritative here.
    cursor: Option<RotationCursor>,
}

impl SelectionState {
    fn remember(&mut self, play: PlayRecord, limit: usize) {
        self.recent.push_back(play);
        while self.recent.len() > limit.max(1) {
            self.recent.pop_front();
        }
    }
}

struct Found {
    index: usize,
    method_used: ClockwheelSelectionMethod,
    relaxation: Relaxation,
    next_position: Option<usize>,
}

/// Slot universe plus the pending request id behind each entry.
type Universe = (Vec<TrackRecord>, Vec<Option<i64>>);

pub struct RotationEngine {
    library: Arc<dyn MetadataPort>,
    queue: Arc<dyn QueueSink>,
    config: Arc<dyn ConfigStore>,
    requests: Arc<dyn RequestLog>,
    settings: EngineSettings,
    clock: Arc<dyn Clock>,
    /// Held for the whole of a selection: one in flight per output queue.
    selection: AsyncMutex<SelectionState>,
    track_locks: TrackLocks,
    state: Mutex<EngineState>,
    events: broadcast::Sender<EngineEvent>,
}

impl RotationEngine {
    pub fn new(
        library: Arc<dyn MetadataPort>,
        queue: Arc<dyn QueueSink>,
        config: Arc<dyn ConfigStore>,
        requests: Arc<dyn RequestLog>,
        settings: EngineSettings,
    ) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            library,
            queue,
            config,
            requests,
            settings,
            clock: Arc::new(SystemClock),
            selection: AsyncMutex::new(SelectionState {
                ghost: GhostQueue::new(0),
                recent: VecDeque::new(),
                rng,
                cursor: None,
            }),
            track_locks: TrackLocks::new(),
            state: Mutex::new(EngineState::Idle),
            events,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        *self.state_cell()
    }

    /// Ghost queue contents, oldest first.
    pub async fn ghost_queue(&self) -> Vec<TrackId> {
        self.selection.lock().await.ghost.iter().copied().collect()
    }

    fn state_cell(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: EngineState) {
        {
            let mut current = self.state_cell();
            if *current == state {
                return;
            }
            *current = state;
        }
        log::debug!("[autodj] state -> {}", state.as_str());
        self.emit(EngineEvent::StateChanged { state });
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn write_failed(
        &self,
        operation: &str,
        track_id: Option<TrackId>,
        request_id: Option<i64>,
        err: &StoreError,
    ) {
        log::warn!(
            "[autodj] {} write failed (track {:?}, request {:?}): {}",
            operation,
            track_id,
            request_id,
            err
        );
        self.emit(EngineEvent::WriteFailed {
            operation: operation.to_string(),
            track_id,
            request_id,
            error: err.to_string(),
        });
    }

    async fn load_config(&self) -> Result<ClockwheelConfig, EngineError> {
        self.config
            .load_clockwheel_config()
            .await
            .map(ClockwheelConfig::normalized)
            .map_err(EngineError::MetadataUnavailable)
    }

    async fn load_policy(&self) -> Result<RequestPolicy, EngineError> {
        self.config
            .load_request_policy()
            .await
            .map_err(EngineError::MetadataUnavailable)
    }

    async fn load_history(&self, recent: &VecDeque<PlayRecord>) -> Result<PlayHistory, EngineError> {
        let plays = self
            .library
            .play_history(self.settings.history_limit)
            .await
            .map_err(EngineError::MetadataUnavailable)?;
        let mut history = PlayHistory::from_records(&plays);
        for play in recent {
            history.record(play);
        }
        Ok(history)
    }

    fn candidate_limit(&self) -> usize {
        self.settings.candidate_limit.unwrap_or(usize::MAX)
    }

    // ── Selection path ────────────────────────────────────────────────────────

    /// Fill the queue from whichever slot is due.
    pub async fn on_queue_empty(&self) -> Result<SelectionOutcome, EngineError> {
        self.select_next(None).await
    }

    /// Operator-forced selection. With a slot id the slot's time window is
    /// ignored, its rules are not.
    pub async fn on_manual_enqueue(
        &self,
        slot_id: Option<&str>,
    ) -> Result<SelectionOutcome, EngineError> {
        self.select_next(slot_id).await
    }

    async fn select_next(&self, slot_id: Option<&str>) -> Result<SelectionOutcome, EngineError> {
        let mut sel = self.selection.lock().await;
        self.set_state(EngineState::Selecting);

        let result = self.run_selection(&mut sel, slot_id).await;
        match &result {
            Ok(outcome) => {
                self.set_state(EngineState::Selected);
                self.emit(EngineEvent::TrackSelected {
                    outcome: outcome.clone(),
                });
            }
            Err(err) => {
                let slot_id = match err {
                    EngineError::NoEligibleTrack { slot_id } => {
                        self.set_state(EngineState::Exhausted);
                        slot_id.clone()
                    }
                    _ => None,
                };
                log::warn!("[autodj] selection failed: {}", err);
                self.emit(EngineEvent::SelectionFailed {
                    reason: err.as_label().to_string(),
                    slot_id,
                });
            }
        }
        self.set_state(EngineState::Idle);
        result
    }

    async fn run_selection(
        &self,
        sel: &mut SelectionState,
        slot_id: Option<&str>,
    ) -> Result<SelectionOutcome, EngineError> {
        let now = self.clock.now();
        let now_unix = now.timestamp();
        let config = self.load_config().await?;
        sel.ghost.set_capacity(config.rules.ghost_capacity());

        if sel.cursor.is_none() {
            let loaded = self.config.load_rotation_state().await.unwrap_or_else(|e| {
                log::warn!("[autodj] could not load rotation state, starting fresh: {}", e);
                RotationCursor::default()
            });
            sel.cursor = Some(loaded);
        }
        let mut cursor = sel.cursor.clone().unwrap_or_default();

        let plan = plan_slots(&config, slot_id, cursor.next_slot, &now)?;
        let outcome = self
            .walk_slots(sel, &config, &plan, &mut cursor, now_unix)
            .await?;
        sel.cursor = Some(cursor);
        Ok(outcome)
    }

    async fn walk_slots(
        &self,
        sel: &mut SelectionState,
        config: &ClockwheelConfig,
        plan: &[(Option<usize>, &ClockwheelSlot)],
        cursor: &mut RotationCursor,
        now_unix: i64,
    ) -> Result<SelectionOutcome, EngineError> {
        let excluded: HashSet<TrackId> = self
            .queue
            .queued_track_ids()
            .await
            .map_err(EngineError::QueueUnavailable)?
            .into_iter()
            .collect();
        let mut history = self.load_history(&sel.recent).await?;
        let adjuster = WeightAdjuster::from_config(config);
        let verbose = if config.verbose_logging {
            log::Level::Info
        } else {
            log::Level::Debug
        };

        let mut last_slot = None;
        for (n, (index, slot)) in plan.iter().enumerate() {
            if n > 0 && !config.rules.cache_queue_count {
                history = self.load_history(&sel.recent).await?;
            }
            last_slot = Some(slot.id.clone());

            let (universe, request_ids) = self.slot_universe(slot).await?;
            log::log!(
                verbose,
                "[autodj] slot '{}' ({}) offers {} candidates",
                slot.id,
                slot.selection_method.as_str(),
                universe.len()
            );

            let position = cursor
                .playlist_positions
                .get(&slot.id)
                .copied()
                .unwrap_or(0);
            let Some(found) = self.pick_from_slot(
                sel, config, slot, &universe, &excluded, &history, now_unix, position, verbose,
            ) else {
                log::warn!("[autodj] slot '{}' exhausted after relaxation", slot.id);
                continue;
            };

            let track = &universe[found.index];
            let request_id = request_ids[found.index];
            let queue_position = self
                .queue
                .enqueue(track.id, RequestQueuePosition::End)
                .await
                .map_err(EngineError::QueueUnavailable)?;

            sel.ghost.push(track.id);
            sel.remember(PlayRecord::of(track, now_unix), self.settings.history_limit);
            self.record_play(&adjuster, track.id, now_unix).await;
            if let Some(request_id) = request_id {
                self.mark_accepted(&adjuster, request_id, track.id).await;
            }

            if let Some(index) = index {
                cursor.next_slot = index + 1;
            }
            if let Some(next) = found.next_position {
                cursor.playlist_positions.insert(slot.id.clone(), next);
            }
            if let Err(e) = self.config.save_rotation_state(cursor).await {
                log::warn!("[autodj] failed to persist rotation state: {}", e);
            }

            let relaxed = matches!(found.relaxation, Relaxation::SeparationRules { .. });
            log::info!(
                "[autodj] slot '{}' -> track {} '{} - {}' via {} (relaxation: {:?})",
                slot.id,
                track.id,
                track.artist,
                track.title,
                found.method_used.as_str(),
                found.relaxation
            );
            return Ok(SelectionOutcome {
                track_id: track.id,
                slot_id: slot.id.clone(),
                configured_method: slot.selection_method,
                method_used: found.method_used,
                relaxation: found.relaxation,
                relaxed,
                queue_position,
                request_id,
                selected_at: now_unix,
            });
        }

        Err(EngineError::NoEligibleTrack { slot_id: last_slot })
    }

    async fn slot_universe(&self, slot: &ClockwheelSlot) -> Result<Universe, EngineError> {
        let limit = self.candidate_limit();
        let tracks = match slot.source() {
            SlotSource::Category(name) => self.library.tracks_in_category(name, limit).await,
            SlotSource::Directory(path) => self.library.tracks_in_directory(path, limit).await,
            SlotSource::Request => return self.pending_request_tracks().await,
        }
        .map_err(EngineError::MetadataUnavailable)?;
        if tracks.len() >= limit {
            log::warn!(
                "[autodj] slot '{}' truncated to {} candidates; later tracks are never eligible",
                slot.id,
                limit
            );
        }
        let ids = vec![None; tracks.len()];
        Ok((tracks, ids))
    }

    /// Pending requests, oldest first, resolved to their tracks.
    async fn pending_request_tracks(&self) -> Result<Universe, EngineError> {
        let pending = self
            .requests
            .by_status(RequestStatus::Pending, self.candidate_limit())
            .await
            .map_err(EngineError::MetadataUnavailable)?;

        let mut tracks = Vec::with_capacity(pending.len());
        let mut ids = Vec::with_capacity(pending.len());
        for entry in pending {
            let Some(request_id) = entry.id else { continue };
            match self
                .library
                .get_track(entry.song_id)
                .await
                .map_err(EngineError::MetadataUnavailable)?
            {
                Some(track) => {
                    tracks.push(track);
                    ids.push(Some(request_id));
                }
                None => log::warn!(
                    "[autodj] pending request {} references unknown track {}",
                    request_id,
                    entry.song_id
                ),
            }
        }
        Ok((tracks, ids))
    }

    #[allow(clippy::too_many_arguments)]
    fn pick_from_slot(
        &self,
        sel: &mut SelectionState,
        config: &ClockwheelConfig,
        slot: &ClockwheelSlot,
        universe: &[TrackRecord],
        excluded: &HashSet<TrackId>,
        history: &PlayHistory,
        now_unix: i64,
        position: usize,
        verbose: log::Level,
    ) -> Option<Found> {
        let rules = SeparationRuleEngine::new(&config.rules, slot.enforce_rules);
        let available: Vec<usize> = (0..universe.len())
            .filter(|&i| !excluded.contains(&universe[i].id))
            .collect();
        if available.is_empty() {
            return None;
        }

        for tier in RelaxationLimit::ALL {
            if tier > self.settings.max_relaxation {
                break;
            }
            // Skip tiers that would not change the filter.
            match tier {
                RelaxationLimit::None => {}
                RelaxationLimit::GhostQueue if sel.ghost.is_empty() => continue,
                RelaxationLimit::SeparationRules if !rules.is_active() => continue,
                _ => {
                    self.set_state(EngineState::Relaxing);
                    log::warn!("[autodj] slot '{}': relaxing {}", slot.id, tier.as_str());
                }
            }

            let indices: Vec<usize> = available
                .iter()
                .copied()
                .filter(|&i| {
                    let track = &universe[i];
                    if tier < RelaxationLimit::GhostQueue && sel.ghost.contains(track.id) {
                        log::log!(verbose, "[autodj] track {} skipped: ghost queue", track.id);
                        return false;
                    }
                    if tier < RelaxationLimit::SeparationRules
                        && !rules.passes(track, history, now_unix)
                    {
                        log::log!(
                            verbose,
                            "[autodj] track {} skipped: {:?}",
                            track.id,
                            rules.violations(track, history, now_unix)
                        );
                        return false;
                    }
                    true
                })
                .collect();
            if indices.is_empty() {
                continue;
            }

            let eligible: Vec<TrackRecord> = indices.iter().map(|&i| universe[i].clone()).collect();
            let mut selector = CandidateSelector::new(
                history,
                now_unix,
                self.settings.lemming_lookback_minutes,
                &mut sel.rng,
            );
            let Some(pick) = selector.select(slot.selection_method, &eligible, universe, position)
            else {
                continue;
            };

            let relaxation = match tier {
                RelaxationLimit::None => Relaxation::None,
                RelaxationLimit::GhostQueue => Relaxation::GhostQueue,
                RelaxationLimit::SeparationRules => Relaxation::SeparationRules {
                    dropped: rules.violations(&eligible[pick.index], history, now_unix),
                },
            };
            return Some(Found {
                index: indices[pick.index],
                method_used: pick.method_used,
                relaxation,
                next_position: pick.next_position,
            });
        }
        None
    }

    async fn record_play(&self, adjuster: &WeightAdjuster, track_id: TrackId, at: i64) {
        if let Err(e) =
            record_last_played(self.library.as_ref(), &self.track_locks, track_id, at).await
        {
            self.write_failed("last_played", Some(track_id), None, &e);
        }
        if let Err(e) = apply_weight_event(
            self.library.as_ref(),
            &self.track_locks,
            adjuster,
            track_id,
            WeightEvent::Played,
        )
        .await
        {
            self.write_failed("weight_on_play", Some(track_id), None, &e);
        }
    }

    /// Flag a request accepted and raise its track's weight. Failures are
    /// reported, never retried.
    async fn mark_accepted(&self, adjuster: &WeightAdjuster, request_id: i64, track_id: TrackId) {
        if let Err(e) = self
            .requests
            .update_status(request_id, RequestStatus::Accepted, None)
            .await
        {
            self.write_failed("request_status", Some(track_id), Some(request_id), &e);
        }
        if let Err(e) = apply_weight_event(
            self.library.as_ref(),
            &self.track_locks,
            adjuster,
            track_id,
            WeightEvent::Requested,
        )
        .await
        {
            self.write_failed("weight_on_request", Some(track_id), Some(request_id), &e);
        }
    }

    // ── Request path ──────────────────────────────────────────────────────────

    /// Run a listener submission through the request policy and log it.
    pub async fn on_request_received(
        &self,
        submission: RequestSubmission,
    ) -> Result<AdmissionDecision, EngineError> {
        let now = self.clock.now();
        let now_unix = now.timestamp();
        let policy = self.load_policy().await?;
        let track = self
            .library
            .get_track(submission.song_id)
            .await
            .map_err(EngineError::MetadataUnavailable)?;

        let verdict = match &track {
            None => Err(RejectionReason::UnknownTrack),
            Some(track) => {
                let recent = self
                    .requests
                    .requested_since(now_unix - DAY_SECS)
                    .await
                    .map_err(EngineError::MetadataUnavailable)?;
                AdmissionController::new(&policy).evaluate(
                    track,
                    &submission.requester_name,
                    &recent,
                    &now,
                )
            }
        };

        let mut entry = RequestLogEntry::from_submission(&submission, track.as_ref(), now_unix);
        let decision = match verdict {
            Err(reason) => {
                entry.status = RequestStatus::Rejected;
                entry.rejection_reason = Some(reason.log_text());
                let request_id = self
                    .requests
                    .insert(&entry)
                    .await
                    .map_err(EngineError::MetadataUnavailable)?;
                log::info!(
                    "[requests] rejected song {} from '{}': {}",
                    submission.song_id,
                    submission.requester_name,
                    reason.rule()
                );
                AdmissionDecision::Rejected { request_id, reason }
            }
            Ok(()) => {
                let request_id = self
                    .requests
                    .insert(&entry)
                    .await
                    .map_err(EngineError::MetadataUnavailable)?;
                if policy.auto_accept {
                    self.accept_into_queue(request_id, &entry, &policy).await?
                } else {
                    log::info!(
                        "[requests] song {} from '{}' awaiting operator",
                        submission.song_id,
                        submission.requester_name
                    );
                    AdmissionDecision::Pending { request_id }
                }
            }
        };

        self.emit(EngineEvent::RequestDecided {
            decision: decision.clone(),
        });
        Ok(decision)
    }

    /// Queue an admitted request. Runs under the selection lock so a
    /// selection in flight never works from a stale exclusion set. If the
    /// queue refuses, the entry stays `Pending` and can be accepted again.
    async fn accept_into_queue(
        &self,
        request_id: i64,
        entry: &RequestLogEntry,
        policy: &RequestPolicy,
    ) -> Result<AdmissionDecision, EngineError> {
        let track_id = entry.song_id;
        let config = self.load_config().await?;
        let position = {
            let mut sel = self.selection.lock().await;
            let position = match self.queue.enqueue(track_id, policy.queue_position).await {
                Ok(position) => position,
                Err(e) => {
                    self.write_failed("request_enqueue", Some(track_id), Some(request_id), &e);
                    return Err(EngineError::QueueUnavailable(e));
                }
            };
            let now_unix = self.clock.now().timestamp();
            sel.remember(entry.play_record(now_unix), self.settings.history_limit);
            position
        };
        self.mark_accepted(&WeightAdjuster::from_config(&config), request_id, track_id)
            .await;
        log::info!(
            "[requests] request {} accepted: track {} at queue position {}",
            request_id,
            track_id,
            position
        );
        Ok(AdmissionDecision::Accepted {
            request_id,
            position,
        })
    }

    async fn entry_in_state(
        &self,
        request_id: i64,
        expected: RequestStatus,
        action: &'static str,
    ) -> Result<RequestLogEntry, EngineError> {
        let entry = self
            .requests
            .get(request_id)
            .await
            .map_err(EngineError::MetadataUnavailable)?
            .ok_or(EngineError::RequestNotFound(request_id))?;
        if entry.status != expected {
            return Err(EngineError::InvalidRequestState {
                id: request_id,
                status: entry.status.as_str(),
                action,
            });
        }
        Ok(entry)
    }

    /// Operator accept of a pending request.
    pub async fn accept_request(&self, request_id: i64) -> Result<AdmissionDecision, EngineError> {
        let entry = self
            .entry_in_state(request_id, RequestStatus::Pending, "accepted")
            .await?;
        let policy = self.load_policy().await?;
        let decision = self.accept_into_queue(request_id, &entry, &policy).await?;
        self.emit(EngineEvent::RequestDecided {
            decision: decision.clone(),
        });
        Ok(decision)
    }

    /// Operator reject of a pending request.
    pub async fn reject_request(
        &self,
        request_id: i64,
        note: &str,
    ) -> Result<AdmissionDecision, EngineError> {
        self.entry_in_state(request_id, RequestStatus::Pending, "rejected")
            .await?;
        let reason = RejectionReason::Operator {
            note: note.trim().to_string(),
        };
        self.requests
            .update_status(request_id, RequestStatus::Rejected, Some(&reason.log_text()))
            .await
            .map_err(EngineError::MetadataUnavailable)?;
        let decision = AdmissionDecision::Rejected { request_id, reason };
        self.emit(EngineEvent::RequestDecided {
            decision: decision.clone(),
        });
        Ok(decision)
    }

    pub async fn mark_request_played(&self, request_id: i64) -> Result<(), EngineError> {
        self.entry_in_state(request_id, RequestStatus::Accepted, "marked played")
            .await?;
        self.requests
            .mark_played(request_id, self.clock.now().timestamp())
            .await
            .map_err(EngineError::MetadataUnavailable)
    }

    pub async fn pending_requests(&self) -> Result<Vec<RequestLogEntry>, EngineError> {
        self.requests
            .by_status(RequestStatus::Pending, self.candidate_limit())
            .await
            .map_err(EngineError::MetadataUnavailable)
    }

    pub async fn request_history(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<RequestLogEntry>, EngineError> {
        self.requests
            .history(limit, offset)
            .await
            .map_err(EngineError::MetadataUnavailable)
    }

    // ── Browsing / housekeeping ───────────────────────────────────────────────

    pub async fn tracks_in_band(
        &self,
        band: RotationBand,
        limit: usize,
    ) -> Result<Vec<TrackRecord>, EngineError> {
        let (min, max) = band.weight_range();
        self.library
            .tracks_by_weight_range(min, max, limit)
            .await
            .map_err(EngineError::MetadataUnavailable)
    }

    /// Re-read config, resize the ghost queue and publish this hour's slots.
    pub async fn on_hour_tick(&self) -> Result<Vec<String>, EngineError> {
        let now = self.clock.now();
        let config = self.load_config().await?;
        self.selection
            .lock()
            .await
            .ghost
            .set_capacity(config.rules.ghost_capacity());

        let slot_ids = SlotScheduler::new(&config).active_slot_ids(&now);
        log::info!("[autodj] hour tick: active slots {:?}", slot_ids);
        self.emit(EngineEvent::ActiveSlotsChanged {
            slot_ids: slot_ids.clone(),
        });
        Ok(slot_ids)
    }
}

/// Slots to try, in order, paired with their index in `config.slots`.
fn plan_slots<'a>(
    config: &'a ClockwheelConfig,
    slot_id: Option<&str>,
    cursor: usize,
    now: &StationTime,
) -> Result<Vec<(Option<usize>, &'a ClockwheelSlot)>, EngineError> {
    if let Some(id) = slot_id {
        let slot = config
            .slot(id)
            .ok_or_else(|| EngineError::UnknownSlot(id.to_string()))?;
        return Ok(vec![(config.slots.iter().position(|s| s.id == id), slot)]);
    }

    let due = SlotScheduler::new(config).due_slots(cursor, now);
    if !due.is_empty() {
        return Ok(due.into_iter().map(|d| (Some(d.index), d.slot)).collect());
    }
    match config.default_slot.as_ref() {
        Some(fallback) => {
            log::info!("[autodj] no slot due, using default slot '{}'", fallback.id);
            Ok(vec![(None, fallback)])
        }
        None => Err(EngineError::NoSlotAvailable),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{
        InMemoryConfigStore, InMemoryLibrary, InMemoryQueue, InMemoryRequestLog,
    };
    use crate::db::models::PlayRecord;
    use crate::scheduler::rotation::ClockwheelRules;
    use chrono::{FixedOffset, TimeZone};
    use ClockwheelSelectionMethod as M;

    // 2024-01-01 is a Monday.
    fn monday_noon() -> StationTime {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
            .unwrap()
    }

    fn track(id: TrackId, artist: &str, category: &str) -> TrackRecord {
        TrackRecord::new(id, artist, &format!("{artist} LP {id}"), &format!("Song {id}"))
            .with_category(category)
    }

    fn no_rules() -> ClockwheelRules {
        ClockwheelRules {
            enforce_playlist_rotation_rules: false,
            ..ClockwheelRules::default()
        }
    }

    fn open_policy() -> RequestPolicy {
        RequestPolicy {
            max_requests_per_song_per_day: 0,
            min_minutes_between_same_song: 0,
            max_requests_per_artist_per_hour: 0,
            min_minutes_between_same_artist: 0,
            max_requests_per_album_per_day: 0,
            max_requests_per_requester_per_day: 0,
            max_requests_per_requester_per_hour: 0,
            ..RequestPolicy::default()
        }
    }

    struct Rig {
        engine: Arc<RotationEngine>,
        library: Arc<InMemoryLibrary>,
        queue: Arc<InMemoryQueue>,
        store: Arc<InMemoryConfigStore>,
        log: Arc<InMemoryRequestLog>,
        clock: Arc<ManualClock>,
    }

    fn rig_with(
        library: InMemoryLibrary,
        queue: InMemoryQueue,
        config: ClockwheelConfig,
        policy: RequestPolicy,
        settings: EngineSettings,
    ) -> Rig {
        let _ = env_logger::builder().is_test(true).try_init();
        let library = Arc::new(library);
        let queue = Arc::new(queue);
        let store = Arc::new(InMemoryConfigStore::new(config, policy));
        let log = Arc::new(InMemoryRequestLog::new());
        let clock = Arc::new(ManualClock::new(monday_noon()));
        let engine = RotationEngine::new(
            library.clone(),
            queue.clone(),
            store.clone(),
            log.clone(),
            settings,
        )
        .with_clock(clock.clone());
        Rig {
            engine: Arc::new(engine),
            library,
            queue,
            store,
            log,
            clock,
        }
    }

    fn rig(tracks: Vec<TrackRecord>, config: ClockwheelConfig) -> Rig {
        rig_with(
            InMemoryLibrary::new(tracks),
            InMemoryQueue::new(),
            config,
            open_policy(),
            EngineSettings {
                seed: Some(7),
                ..EngineSettings::default()
            },
        )
    }

    fn one_slot(slot: ClockwheelSlot, rules: ClockwheelRules) -> ClockwheelConfig {
        ClockwheelConfig {
            rules,
            slots: vec![slot],
            ..ClockwheelConfig::default()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn artist_only_rules() -> ClockwheelRules {
        ClockwheelRules {
            no_same_album_minutes: 0,
            no_same_title_minutes: 0,
            no_same_track_minutes: 0,
            no_same_artist_minutes: 8,
            ..ClockwheelRules::default()
        }
    }

    fn artist_x_played_three_minutes_ago() -> InMemoryLibrary {
        let t = monday_noon().timestamp();
        InMemoryLibrary::new(vec![
            track(1, "X", "x-only"),
            track(2, "X", "x-only"),
            track(3, "X", "elsewhere"),
        ])
        .with_history(vec![PlayRecord::of(&track(3, "X", "elsewhere"), t - 180)])
    }

    #[tokio::test]
    async fn artist_repeat_relaxes_separation_rules() {
        let config = one_slot(
            ClockwheelSlot::category("x", "x-only", M::Priority),
            artist_only_rules(),
        );
        let r = rig_with(
            artist_x_played_three_minutes_ago(),
            InMemoryQueue::new(),
            config,
            open_policy(),
            EngineSettings::default(),
        );
        let mut rx = r.engine.subscribe();

        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert!(outcome.relaxed, "artist X is inside its 8 minute window");
        assert_eq!(
            outcome.relaxation,
            Relaxation::SeparationRules {
                dropped: vec![SeparationRule::Artist]
            }
        );
        let states: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::StateChanged { state } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                EngineState::Selecting,
                EngineState::Relaxing,
                EngineState::Selected,
                EngineState::Idle
            ]
        );
    }

    #[tokio::test]
    async fn artist_repeat_exhausts_when_rule_relaxation_is_capped() {
        let config = one_slot(
            ClockwheelSlot::category("x", "x-only", M::Priority),
            artist_only_rules(),
        );
        let r = rig_with(
            artist_x_played_three_minutes_ago(),
            InMemoryQueue::new(),
            config,
            open_policy(),
            EngineSettings {
                max_relaxation: RelaxationLimit::GhostQueue,
                ..EngineSettings::default()
            },
        );
        let err = r.engine.on_queue_empty().await.unwrap_err();
        assert!(
            matches!(err, EngineError::NoEligibleTrack { slot_id: Some(ref id) } if id == "x"),
            "got {err:?}"
        );
        assert!(r.queue.is_empty());
        assert_eq!(r.engine.state(), EngineState::Idle);
    }

    #[tokio::test]
    async fn strict_pick_satisfies_every_rule() {
        let t = monday_noon().timestamp();
        let library = InMemoryLibrary::new(vec![track(1, "X", "mix"), track(2, "Y", "mix")])
            .with_history(vec![PlayRecord::of(&track(9, "X", "other"), t - 60)]);
        let config = one_slot(
            ClockwheelSlot::category("mix", "mix", M::Random),
            ClockwheelRules::default(),
        );
        let r = rig_with(
            library,
            InMemoryQueue::new(),
            config,
            open_policy(),
            EngineSettings {
                seed: Some(3),
                ..EngineSettings::default()
            },
        );
        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.track_id, 2);
        assert_eq!(outcome.relaxation, Relaxation::None);
        assert!(!outcome.relaxed);
        assert_eq!(r.queue.snapshot(), vec![2]);
    }

    #[tokio::test]
    async fn ghost_queue_is_relaxed_before_rules() {
        let rules = ClockwheelRules {
            use_ghost_queue: true,
            keep_songs_in_queue: 2,
            ..no_rules()
        };
        let config = one_slot(ClockwheelSlot::category("pop", "pop", M::Random), rules);
        let r = rig(vec![track(1, "a", "pop"), track(2, "b", "pop")], config);

        let mut picked = HashSet::new();
        for _ in 0..2 {
            let outcome = r.engine.on_queue_empty().await.unwrap();
            assert_eq!(outcome.relaxation, Relaxation::None);
            picked.insert(outcome.track_id);
            r.queue.pop_front();
        }
        assert_eq!(picked.len(), 2, "ghost queue forces variety");

        let third = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(third.relaxation, Relaxation::GhostQueue);
        assert!(!third.relaxed);
        assert_eq!(r.engine.ghost_queue().await.len(), 2);
    }

    #[tokio::test]
    async fn queued_tracks_are_never_selected_even_when_relaxing() {
        let config = one_slot(ClockwheelSlot::category("pop", "pop", M::Random), no_rules());
        let r = rig_with(
            InMemoryLibrary::new(vec![track(1, "a", "pop")]),
            InMemoryQueue::with_tracks(vec![1]),
            config,
            open_policy(),
            EngineSettings::default(),
        );
        assert!(matches!(
            r.engine.on_queue_empty().await,
            Err(EngineError::NoEligibleTrack { .. })
        ));
    }

    #[tokio::test]
    async fn cursor_rotates_through_slots_and_persists() {
        let config = ClockwheelConfig {
            rules: no_rules(),
            slots: vec![
                ClockwheelSlot::category("a", "A", M::Random),
                ClockwheelSlot::category("b", "B", M::Random),
            ],
            ..ClockwheelConfig::default()
        };
        let r = rig(vec![track(1, "a", "A"), track(2, "b", "B")], config);

        let mut slots = Vec::new();
        for _ in 0..3 {
            slots.push(r.engine.on_queue_empty().await.unwrap().slot_id);
            r.queue.pop_front();
        }
        assert_eq!(slots, vec!["a", "b", "a"]);
        assert_eq!(r.store.cursor().next_slot, 1);
    }

    #[tokio::test]
    async fn empty_slot_falls_through_to_next_due_slot() {
        let config = ClockwheelConfig {
            rules: no_rules(),
            slots: vec![
                ClockwheelSlot::category("empty", "Nothing Here", M::Random),
                ClockwheelSlot::category("b", "B", M::Random),
            ],
            ..ClockwheelConfig::default()
        };
        let r = rig(vec![track(2, "b", "B")], config);
        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.slot_id, "b");
        assert_eq!(r.store.cursor().next_slot, 2);
    }

    #[tokio::test]
    async fn no_due_slot_uses_default_or_reports_no_slot() {
        let night = ClockwheelSlot {
            start_hour: Some(0),
            end_hour: Some(5),
            ..ClockwheelSlot::category("night", "A", M::Random)
        };
        let config = one_slot(night.clone(), no_rules());
        let r = rig(vec![track(1, "a", "A"), track(2, "b", "B")], config);
        assert!(matches!(
            r.engine.on_queue_empty().await,
            Err(EngineError::NoSlotAvailable)
        ));

        r.store.set_clockwheel(ClockwheelConfig {
            default_slot: Some(ClockwheelSlot::category("fallback", "B", M::Random)),
            ..one_slot(night, no_rules())
        });
        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.slot_id, "fallback");
        assert_eq!(outcome.track_id, 2);
        assert_eq!(r.store.cursor().next_slot, 0, "default slot leaves the cursor alone");
    }

    #[tokio::test]
    async fn manual_enqueue_ignores_window_but_rejects_unknown_slot() {
        let night = ClockwheelSlot {
            start_hour: Some(0),
            end_hour: Some(5),
            ..ClockwheelSlot::category("night", "A", M::Random)
        };
        let r = rig(vec![track(1, "a", "A")], one_slot(night, no_rules()));
        let outcome = r.engine.on_manual_enqueue(Some("night")).await.unwrap();
        assert_eq!(outcome.track_id, 1);

        let err = r.engine.on_manual_enqueue(Some("nope")).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownSlot(ref id) if id == "nope"));
    }

    #[tokio::test]
    async fn selection_updates_weight_and_last_played() {
        let config = ClockwheelConfig {
            on_play_reduce_weight_by: 5.0,
            ..one_slot(ClockwheelSlot::category("pop", "pop", M::Random), no_rules())
        };
        let r = rig(vec![track(1, "a", "pop")], config);
        let outcome = r.engine.on_queue_empty().await.unwrap();

        let after = r.library.track(1).unwrap();
        assert_eq!(after.weight, 45.0);
        assert_eq!(after.last_played, Some(outcome.selected_at));
        assert_eq!(outcome.selected_at, monday_noon().timestamp());
    }

    #[tokio::test]
    async fn playlist_order_walks_directory_and_wraps() {
        let tracks: Vec<_> = (1..=3)
            .map(|i| TrackRecord::new(i, &format!("a{i}"), "", "").with_path(&format!("D:/Jingles/{i}.mp3")))
            .collect();
        let config = one_slot(
            ClockwheelSlot::directory("jingles", "D:\\Jingles", M::PlaylistOrder),
            no_rules(),
        );
        let r = rig(tracks, config);

        let mut order = Vec::new();
        for _ in 0..4 {
            order.push(r.engine.on_queue_empty().await.unwrap().track_id);
            r.queue.pop_front();
        }
        assert_eq!(order, vec![1, 2, 3, 1]);
        assert_eq!(r.store.cursor().playlist_positions.get("jingles"), Some(&1));
    }

    #[tokio::test]
    async fn metadata_failure_fails_cleanly() {
        let config = one_slot(ClockwheelSlot::category("pop", "pop", M::Random), no_rules());
        let r = rig(vec![track(1, "a", "pop")], config);
        r.library.set_fail_reads(true);

        let err = r.engine.on_queue_empty().await.unwrap_err();
        assert_eq!(err.as_label(), "metadata_unavailable");
        assert!(r.queue.is_empty());
        assert_eq!(r.engine.state(), EngineState::Idle);

        r.library.set_fail_reads(false);
        assert!(r.engine.on_queue_empty().await.is_ok(), "recovers on next call");
    }

    #[tokio::test]
    async fn failed_weight_write_is_reported_not_fatal() {
        let config = ClockwheelConfig {
            on_play_reduce_weight_by: 5.0,
            ..one_slot(ClockwheelSlot::category("pop", "pop", M::Random), no_rules())
        };
        let r = rig(vec![track(1, "a", "pop")], config);
        r.library.set_fail_writes(true);
        let mut rx = r.engine.subscribe();

        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.track_id, 1);
        assert_eq!(r.library.track(1).unwrap().weight, 50.0);
        let failures = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::WriteFailed { .. }))
            .count();
        assert_eq!(failures, 2, "last-played and weight writes both reported");
    }

    #[tokio::test]
    async fn concurrent_triggers_never_pick_the_same_track() {
        let tracks: Vec<_> = (1..=8).map(|i| track(i, &format!("artist{i}"), "pop")).collect();
        let config = one_slot(
            ClockwheelSlot::category("pop", "pop", M::Weighted),
            ClockwheelRules::default(),
        );
        let r = rig(tracks, config);

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let engine = r.engine.clone();
            tasks.push(tokio::spawn(async move { engine.on_queue_empty().await }));
        }
        let mut ids = HashSet::new();
        for t in tasks {
            let outcome = t.await.unwrap().unwrap();
            assert!(ids.insert(outcome.track_id), "track {} picked twice", outcome.track_id);
        }
        assert_eq!(r.queue.len(), 8);
        assert!(matches!(
            r.engine.on_queue_empty().await,
            Err(EngineError::NoEligibleTrack { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn requests_and_selections_never_race_for_a_queued_track() {
        let tracks: Vec<_> = (1..=8).map(|i| track(i, &format!("artist{i}"), "pop")).collect();
        let config = one_slot(ClockwheelSlot::category("pop", "pop", M::Random), no_rules());
        let policy = RequestPolicy {
            auto_accept: true,
            ..open_policy()
        };
        let r = rig_with(
            InMemoryLibrary::new(tracks),
            InMemoryQueue::new(),
            config,
            policy,
            EngineSettings {
                seed: Some(11),
                ..EngineSettings::default()
            },
        );

        let mut picks = Vec::new();
        let mut requests = Vec::new();
        for i in 1..=4 {
            let engine = r.engine.clone();
            picks.push(tokio::spawn(async move { engine.on_queue_empty().await }));
            let engine = r.engine.clone();
            requests.push(tokio::spawn(async move {
                engine
                    .on_request_received(RequestSubmission::new(i, &format!("listener{i}")))
                    .await
            }));
        }
        let mut outcomes = Vec::new();
        for t in picks {
            outcomes.push(t.await.unwrap().unwrap());
        }
        for t in requests {
            let decision = t.await.unwrap().unwrap();
            assert!(matches!(decision, AdmissionDecision::Accepted { .. }));
        }

        let queue = r.queue.snapshot();
        assert_eq!(queue.len(), 8);
        for outcome in outcomes {
            assert_eq!(queue[outcome.queue_position], outcome.track_id);
            assert!(
                !queue[..outcome.queue_position].contains(&outcome.track_id),
                "track {} was already queued when it was selected",
                outcome.track_id
            );
        }
    }

    #[tokio::test]
    async fn failed_request_enqueue_keeps_entry_pending() {
        let policy = RequestPolicy {
            auto_accept: true,
            ..open_policy()
        };
        let r = rig_with(
            InMemoryLibrary::new(vec![track(5, "a", "pop")]),
            InMemoryQueue::new(),
            ClockwheelConfig::default(),
            policy,
            EngineSettings::default(),
        );
        let mut rx = r.engine.subscribe();
        r.queue.set_fail(true);

        let err = r
            .engine
            .on_request_received(RequestSubmission::new(5, "ann"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::QueueUnavailable(_)));
        let entries = r.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, RequestStatus::Pending);
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            EngineEvent::WriteFailed { operation, request_id: Some(_), .. }
                if operation == "request_enqueue"
        )));

        r.queue.set_fail(false);
        let request_id = entries[0].id.unwrap();
        let decision = r.engine.accept_request(request_id).await.unwrap();
        assert!(matches!(decision, AdmissionDecision::Accepted { position: 0, .. }));
        assert_eq!(r.queue.snapshot(), vec![5]);
        assert_eq!(r.log.entries()[0].status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn queued_but_unaired_artist_still_counts_for_separation() {
        // The playout system logs plays when they air, not when they are queued.
        let library = InMemoryLibrary::new(vec![
            track(1, "X", "pop").with_weight(90.0),
            track(2, "X", "pop").with_weight(80.0),
            track(3, "Y", "pop").with_weight(10.0),
        ]);
        library.set_skip_play_log(true);
        let config = one_slot(
            ClockwheelSlot::category("pop", "pop", M::Priority),
            artist_only_rules(),
        );
        let r = rig_with(
            library,
            InMemoryQueue::new(),
            config,
            open_policy(),
            EngineSettings::default(),
        );

        let first = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(first.track_id, 1);
        assert!(r.library.play_history(10).await.unwrap().is_empty());

        r.clock.advance(Duration::seconds(5));
        let second = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(second.track_id, 3, "artist X was queued five seconds ago");
        assert!(!second.relaxed);
        assert_eq!(r.queue.snapshot(), vec![1, 3]);
    }

    #[tokio::test]
    async fn whole_slot_is_eligible_by_default() {
        let stale = monday_noon().timestamp() - DAY_SECS;
        let mut tracks: Vec<_> = (1..=300)
            .map(|i| track(i, &format!("artist{i}"), "big").with_last_played(stale))
            .collect();
        tracks.push(track(301, "artist301", "big"));
        let config = one_slot(
            ClockwheelSlot::category("big", "big", M::LeastRecentlyPlayedSong),
            no_rules(),
        );
        let r = rig(tracks, config);

        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.track_id, 301, "never-played track sorts past the first 300");
    }

    #[tokio::test]
    async fn fourth_request_for_same_song_is_rejected() {
        let policy = RequestPolicy {
            max_requests_per_song_per_day: 3,
            auto_accept: true,
            ..open_policy()
        };
        let r = rig_with(
            InMemoryLibrary::new(vec![track(42, "a", "pop")]),
            InMemoryQueue::new(),
            ClockwheelConfig::default(),
            policy,
            EngineSettings::default(),
        );
        for who in ["ann", "bo", "cy"] {
            let decision = r
                .engine
                .on_request_received(RequestSubmission::new(42, who))
                .await
                .unwrap();
            assert!(matches!(decision, AdmissionDecision::Accepted { .. }));
        }
        let decision = r
            .engine
            .on_request_received(RequestSubmission::new(42, "di"))
            .await
            .unwrap();
        match decision {
            AdmissionDecision::Rejected { reason, .. } => assert_eq!(reason.rule(), "song_day_limit"),
            other => panic!("expected rejection, got {other:?}"),
        }
        let entries = r.log.entries();
        assert_eq!(entries.len(), 4, "every submission is logged");
        assert_eq!(entries[3].status, RequestStatus::Rejected);
        assert!(entries[3]
            .rejection_reason
            .as_deref()
            .is_some_and(|r| r.starts_with("song_day_limit")));
    }

    #[tokio::test]
    async fn accepted_request_after_two_lands_at_index_two() {
        let policy = RequestPolicy {
            queue_position: RequestQueuePosition::After { n: 2 },
            auto_accept: true,
            ..open_policy()
        };
        let config = ClockwheelConfig {
            on_request_increase_weight_by: 10.0,
            ..ClockwheelConfig::default()
        };
        let r = rig_with(
            InMemoryLibrary::new(vec![track(99, "a", "pop")]),
            InMemoryQueue::with_tracks(vec![10, 11, 12, 13]),
            config,
            policy,
            EngineSettings::default(),
        );
        let decision = r
            .engine
            .on_request_received(RequestSubmission::new(99, "ann"))
            .await
            .unwrap();
        assert!(matches!(decision, AdmissionDecision::Accepted { position: 2, .. }));
        assert_eq!(r.queue.snapshot(), vec![10, 11, 99, 12, 13]);
        assert_eq!(r.library.track(99).unwrap().weight, 60.0);
        assert_eq!(r.log.entries()[0].status, RequestStatus::Accepted);
    }

    #[tokio::test]
    async fn unknown_track_request_is_rejected_and_logged() {
        let r = rig(vec![], ClockwheelConfig::default());
        let decision = r
            .engine
            .on_request_received(RequestSubmission::new(5, "ann"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            AdmissionDecision::Rejected {
                reason: RejectionReason::UnknownTrack,
                ..
            }
        ));
        assert_eq!(r.log.entries().len(), 1);
    }

    #[tokio::test]
    async fn operator_actions_follow_request_lifecycle() {
        let r = rig(
            vec![track(1, "a", "pop"), track(2, "b", "pop")],
            ClockwheelConfig::default(),
        );
        let first = r
            .engine
            .on_request_received(RequestSubmission::new(1, "ann"))
            .await
            .unwrap();
        let second = r
            .engine
            .on_request_received(RequestSubmission::new(2, "bo"))
            .await
            .unwrap();
        assert!(matches!(first, AdmissionDecision::Pending { .. }));
        assert_eq!(r.engine.pending_requests().await.unwrap().len(), 2);

        let accepted = r.engine.accept_request(first.request_id()).await.unwrap();
        assert!(matches!(accepted, AdmissionDecision::Accepted { position: 0, .. }));
        let err = r.engine.accept_request(first.request_id()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidRequestState { status: "accepted", .. }
        ));

        let rejected = r
            .engine
            .reject_request(second.request_id(), "not tonight")
            .await
            .unwrap();
        match rejected {
            AdmissionDecision::Rejected { reason, .. } => {
                assert_eq!(reason.rule(), "operator");
                assert_eq!(reason.message(), "not tonight");
            }
            other => panic!("unexpected {other:?}"),
        }

        r.engine.mark_request_played(first.request_id()).await.unwrap();
        assert!(matches!(
            r.engine.mark_request_played(second.request_id()).await,
            Err(EngineError::InvalidRequestState { .. })
        ));
        assert!(matches!(
            r.engine.accept_request(404).await,
            Err(EngineError::RequestNotFound(404))
        ));
        let history = r.engine.request_history(10, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(r.engine.pending_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn request_slot_plays_oldest_pending_request() {
        let config = ClockwheelConfig {
            on_request_increase_weight_by: 5.0,
            ..one_slot(ClockwheelSlot::request("req", M::Priority), no_rules())
        };
        let r = rig(vec![track(1, "a", "pop"), track(2, "b", "pop")], config);

        let older = r
            .engine
            .on_request_received(RequestSubmission::new(2, "ann"))
            .await
            .unwrap();
        r.clock.advance(Duration::minutes(1));
        r.engine
            .on_request_received(RequestSubmission::new(1, "bo"))
            .await
            .unwrap();

        let outcome = r.engine.on_queue_empty().await.unwrap();
        assert_eq!(outcome.track_id, 2);
        assert_eq!(outcome.request_id, Some(older.request_id()));
        assert_eq!(r.engine.pending_requests().await.unwrap().len(), 1);
        assert_eq!(r.library.track(2).unwrap().weight, 55.0);
    }

    #[tokio::test]
    async fn hour_tick_reports_active_slots_and_shrinks_ghost_queue() {
        let morning = ClockwheelSlot {
            start_hour: Some(6),
            end_hour: Some(10),
            ..ClockwheelSlot::category("morning", "pop", M::Random)
        };
        let rules = ClockwheelRules {
            use_ghost_queue: true,
            keep_songs_in_queue: 3,
            ..no_rules()
        };
        let config = ClockwheelConfig {
            rules: rules.clone(),
            slots: vec![morning, ClockwheelSlot::category("always", "pop", M::Random)],
            ..ClockwheelConfig::default()
        };
        let r = rig(
            (1..=3).map(|i| track(i, &format!("a{i}"), "pop")).collect(),
            config.clone(),
        );
        for _ in 0..3 {
            r.engine.on_queue_empty().await.unwrap();
        }
        assert_eq!(r.engine.ghost_queue().await.len(), 3);

        r.store.set_clockwheel(ClockwheelConfig {
            rules: ClockwheelRules {
                keep_songs_in_queue: 1,
                ..rules
            },
            ..config
        });
        let active = r.engine.on_hour_tick().await.unwrap();
        assert_eq!(active, vec!["always"]);
        assert_eq!(r.engine.ghost_queue().await.len(), 1);
    }

    #[tokio::test]
    async fn rotation_bands_browse_by_weight() {
        let r = rig(
            vec![
                track(1, "a", "pop").with_weight(95.0),
                track(2, "b", "pop").with_weight(100.0),
                track(3, "c", "pop").with_weight(50.0),
            ],
            ClockwheelConfig::default(),
        );
        let hits: Vec<_> = r
            .engine
            .tracks_in_band(RotationBand::PowerHit, 10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(hits, vec![2, 1]);
    }
}
