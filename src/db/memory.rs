//! In-process implementations of the collaborator ports.
//!
//! Used by the engine tests and by hosts that embed the engine without a
//! database. Each store can be switched into a failing mode to exercise the
//! `MetadataUnavailable` / `QueueUnavailable` paths.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::models::{PlayRecord, TrackId, TrackRecord};
use super::ports::{ConfigStore, MetadataPort, QueueSink, RequestLog};
use crate::error::{StoreError, StoreResult};
use crate::scheduler::clockwheel::RotationCursor;
use crate::scheduler::request_policy::{
    RequestLogEntry, RequestPolicy, RequestQueuePosition, RequestStatus,
};
use crate::scheduler::rotation::ClockwheelConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
    if flag.load(Ordering::Relaxed) {
        Err(StoreError::Unavailable(format!("{what} unavailable")))
    } else {
        Ok(())
    }
}

fn same_dir(dir: &str, root: &str) -> bool {
    let dir = dir.to_ascii_lowercase();
    let root = root.trim_end_matches('/').to_ascii_lowercase();
    dir == root || dir.starts_with(&format!("{root}/"))
}

// ── Library ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct LibraryState {
    tracks: Vec<TrackRecord>,
    /// Oldest first.
    history: Vec<PlayRecord>,
}

#[derive(Default)]
pub struct InMemoryLibrary {
    state: Mutex<LibraryState>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    skip_play_log: AtomicBool,
}

impl InMemoryLibrary {
    pub fn new(tracks: Vec<TrackRecord>) -> Self {
        Self {
            state: Mutex::new(LibraryState {
                tracks,
                history: Vec::new(),
            }),
            ..Self::default()
        }
    }

    /// Seed play history (any order).
    pub fn with_history(self, mut plays: Vec<PlayRecord>) -> Self {
        plays.sort_by_key(|p| p.played_at);
        lock(&self.state).history = plays;
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Stamp last-played without appending to play history, the way a SAM
    /// library behaves until the playout system airs the track.
    pub fn set_skip_play_log(&self, skip: bool) {
        self.skip_play_log.store(skip, Ordering::Relaxed);
    }

    pub fn track(&self, id: TrackId) -> Option<TrackRecord> {
        lock(&self.state).tracks.iter().find(|t| t.id == id).cloned()
    }

    fn filtered(&self, limit: usize, pred: impl Fn(&TrackRecord) -> bool) -> StoreResult<Vec<TrackRecord>> {
        check(&self.fail_reads, "library")?;
        Ok(lock(&self.state)
            .tracks
            .iter()
            .filter(|t| pred(t))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MetadataPort for InMemoryLibrary {
    async fn get_track(&self, id: TrackId) -> StoreResult<Option<TrackRecord>> {
        check(&self.fail_reads, "library")?;
        Ok(self.track(id))
    }

    async fn tracks_in_category(
        &self,
        category: &str,
        limit: usize,
    ) -> StoreResult<Vec<TrackRecord>> {
        let category = category.trim();
        self.filtered(limit, |t| {
            t.categories
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(category))
        })
    }

    async fn tracks_in_directory(&self, path: &str, limit: usize) -> StoreResult<Vec<TrackRecord>> {
        let root = path.trim().replace('\\', "/");
        self.filtered(limit, |t| t.directory().is_some_and(|d| same_dir(d, &root)))
    }

    async fn tracks_by_weight_range(
        &self,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<TrackRecord>> {
        let mut out = self.filtered(usize::MAX, |t| t.weight >= min && t.weight < max)?;
        out.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        out.truncate(limit);
        Ok(out)
    }

    async fn play_history(&self, limit: usize) -> StoreResult<Vec<PlayRecord>> {
        check(&self.fail_reads, "library")?;
        Ok(lock(&self.state)
            .history
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_directories(&self, limit: usize) -> StoreResult<Vec<String>> {
        check(&self.fail_reads, "library")?;
        let mut dirs: Vec<String> = lock(&self.state)
            .tracks
            .iter()
            .filter_map(|t| t.directory().map(str::to_string))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs.truncate(limit);
        Ok(dirs)
    }

    async fn update_weight(&self, id: TrackId, weight: f64) -> StoreResult<()> {
        check(&self.fail_writes, "library")?;
        let mut state = lock(&self.state);
        if let Some(t) = state.tracks.iter_mut().find(|t| t.id == id) {
            t.weight = weight;
        }
        Ok(())
    }

    async fn update_last_played(&self, id: TrackId, played_at: i64) -> StoreResult<()> {
        check(&self.fail_writes, "library")?;
        let mut state = lock(&self.state);
        let Some(t) = state.tracks.iter_mut().find(|t| t.id == id) else {
            return Ok(());
        };
        t.last_played = Some(played_at);
        t.play_count += 1;
        let record = PlayRecord::of(t, played_at);
        if !self.skip_play_log.load(Ordering::Relaxed) {
            state.history.push(record);
        }
        Ok(())
    }
}

// ── Queue ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryQueue {
    items: Mutex<Vec<TrackId>>,
    fail: AtomicBool,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracks(ids: Vec<TrackId>) -> Self {
        Self {
            items: Mutex::new(ids),
            ..Self::default()
        }
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Vec<TrackId> {
        lock(&self.items).clone()
    }

    /// Remove the head, as the player does when a track starts.
    pub fn pop_front(&self) -> Option<TrackId> {
        let mut items = lock(&self.items);
        if items.is_empty() {
            None
        } else {
            Some(items.remove(0))
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.items).is_empty()
    }
}

#[async_trait]
impl QueueSink for InMemoryQueue {
    async fn enqueue(&self, track_id: TrackId, position: RequestQueuePosition) -> StoreResult<usize> {
        check(&self.fail, "queue")?;
        let mut items = lock(&self.items);
        let idx = position.resolve(items.len());
        items.insert(idx, track_id);
        Ok(idx)
    }

    async fn queued_track_ids(&self) -> StoreResult<Vec<TrackId>> {
        check(&self.fail, "queue")?;
        Ok(lock(&self.items).clone())
    }
}

// ── Config store ──────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryConfigStore {
    clockwheel: Mutex<ClockwheelConfig>,
    policy: Mutex<RequestPolicy>,
    cursor: Mutex<RotationCursor>,
    fail: AtomicBool,
}

impl InMemoryConfigStore {
    pub fn new(clockwheel: ClockwheelConfig, policy: RequestPolicy) -> Self {
        Self {
            clockwheel: Mutex::new(clockwheel),
            policy: Mutex::new(policy),
            ..Self::default()
        }
    }

    pub fn set_clockwheel(&self, config: ClockwheelConfig) {
        *lock(&self.clockwheel) = config;
    }

    pub fn set_policy(&self, policy: RequestPolicy) {
        *lock(&self.policy) = policy;
    }

    pub fn cursor(&self) -> RotationCursor {
        lock(&self.cursor).clone()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load_clockwheel_config(&self) -> StoreResult<ClockwheelConfig> {
        check(&self.fail, "config store")?;
        Ok(lock(&self.clockwheel).clone().normalized())
    }

    async fn load_request_policy(&self) -> StoreResult<RequestPolicy> {
        check(&self.fail, "config store")?;
        Ok(lock(&self.policy).clone())
    }

    async fn load_rotation_state(&self) -> StoreResult<RotationCursor> {
        check(&self.fail, "config store")?;
        Ok(lock(&self.cursor).clone())
    }

    async fn save_rotation_state(&self, cursor: &RotationCursor) -> StoreResult<()> {
        check(&self.fail, "config store")?;
        *lock(&self.cursor) = cursor.clone();
        Ok(())
    }
}

// ── Request log ───────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryRequestLog {
    entries: Mutex<Vec<RequestLogEntry>>,
}

impl InMemoryRequestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<RequestLogEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl RequestLog for InMemoryRequestLog {
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<i64> {
        let mut entries = lock(&self.entries);
        let id = entries.len() as i64 + 1;
        let mut stored = entry.clone();
        stored.id = Some(id);
        entries.push(stored);
        Ok(id)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<RequestLogEntry>> {
        Ok(lock(&self.entries).iter().find(|e| e.id == Some(id)).cloned())
    }

    async fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        if let Some(e) = lock(&self.entries).iter_mut().find(|e| e.id == Some(id)) {
            e.status = status;
            e.rejection_reason = reason.map(str::to_string);
        }
        Ok(())
    }

    async fn mark_played(&self, id: i64, played_at: i64) -> StoreResult<()> {
        if let Some(e) = lock(&self.entries).iter_mut().find(|e| e.id == Some(id)) {
            e.status = RequestStatus::Played;
            e.played_at = Some(played_at);
        }
        Ok(())
    }

    async fn requested_since(&self, since: i64) -> StoreResult<Vec<RequestLogEntry>> {
        Ok(lock(&self.entries)
            .iter()
            .filter(|e| e.requested_at > since)
            .cloned()
            .collect())
    }

    async fn by_status(
        &self,
        status: RequestStatus,
        limit: usize,
    ) -> StoreResult<Vec<RequestLogEntry>> {
        let mut out: Vec<_> = lock(&self.entries)
            .iter()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.requested_at, e.id));
        out.truncate(limit);
        Ok(out)
    }

    async fn history(&self, limit: i64, offset: i64) -> StoreResult<Vec<RequestLogEntry>> {
        let mut out = lock(&self.entries).clone();
        out.sort_by(|a, b| (b.requested_at, b.id).cmp(&(a.requested_at, a.id)));
        Ok(out
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_after_n_inserts_at_index_and_shifts_tail() {
        let q = InMemoryQueue::with_tracks(vec![10, 11, 12, 13]);
        let idx = q
            .enqueue(99, RequestQueuePosition::After { n: 2 })
            .await
            .unwrap();
        assert_eq!(idx, 2);
        assert_eq!(q.snapshot(), vec![10, 11, 99, 12, 13]);
    }

    #[tokio::test]
    async fn directory_lookup_is_recursive_and_separator_agnostic() {
        let lib = InMemoryLibrary::new(vec![
            TrackRecord::new(1, "a", "", "").with_path("D:\\Music\\Pop\\a.mp3"),
            TrackRecord::new(2, "b", "", "").with_path("D:/Music/Pop/90s/b.mp3"),
            TrackRecord::new(3, "c", "", "").with_path("D:/Music/Popcorn/c.mp3"),
        ]);
        let ids: Vec<_> = lib
            .tracks_in_directory("D:\\Music\\Pop\\", 10)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn last_played_write_feeds_history_newest_first() {
        let lib = InMemoryLibrary::new(vec![
            TrackRecord::new(1, "a", "", ""),
            TrackRecord::new(2, "b", "", ""),
        ]);
        lib.update_last_played(1, 100).await.unwrap();
        lib.update_last_played(2, 200).await.unwrap();
        let history = lib.play_history(10).await.unwrap();
        assert_eq!(history[0].track_id, 2);
        assert_eq!(lib.track(1).unwrap().play_count, 1);
    }

    #[tokio::test]
    async fn failing_reads_surface_unavailable() {
        let lib = InMemoryLibrary::new(vec![]);
        lib.set_fail_reads(true);
        assert!(matches!(
            lib.play_history(1).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
