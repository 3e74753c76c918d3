//! Collaborator seams consumed by the rotation engine.
//!
//! The engine never talks to a database directly. Hosts wire in the SQLite
//! store ([`super::local`]), the SAM library ([`super::sam`]) or the
//! in-process implementations ([`super::memory`]).

use async_trait::async_trait;

use super::models::{PlayRecord, TrackId, TrackRecord};
use crate::error::StoreResult;
use crate::scheduler::clockwheel::RotationCursor;
use crate::scheduler::request_policy::{
    RequestLogEntry, RequestPolicy, RequestQueuePosition, RequestStatus,
};
use crate::scheduler::rotation::ClockwheelConfig;

/// Read access to track attributes plus the two write-backs the engine makes.
#[async_trait]
pub trait MetadataPort: Send + Sync {
    async fn get_track(&self, id: TrackId) -> StoreResult<Option<TrackRecord>>;

    /// Members of a category, in the library's enumeration order.
    async fn tracks_in_category(&self, category: &str, limit: usize)
        -> StoreResult<Vec<TrackRecord>>;

    /// Tracks stored under `path` (recursively), in enumeration order.
    async fn tracks_in_directory(&self, path: &str, limit: usize) -> StoreResult<Vec<TrackRecord>>;

    /// Tracks with `min <= weight < max`, heaviest first.
    async fn tracks_by_weight_range(
        &self,
        min: f64,
        max: f64,
        limit: usize,
    ) -> StoreResult<Vec<TrackRecord>>;

    /// Most recent plays across the whole library, newest first.
    async fn play_history(&self, limit: usize) -> StoreResult<Vec<PlayRecord>>;

    async fn list_directories(&self, limit: usize) -> StoreResult<Vec<String>>;

    async fn update_weight(&self, id: TrackId, weight: f64) -> StoreResult<()>;

    async fn update_last_played(&self, id: TrackId, played_at: i64) -> StoreResult<()>;
}

/// The playback queue the engine feeds.
#[async_trait]
pub trait QueueSink: Send + Sync {
    /// Insert and return the zero-based index the track landed at.
    async fn enqueue(&self, track_id: TrackId, position: RequestQueuePosition)
        -> StoreResult<usize>;

    /// Track ids currently waiting in the queue, head first.
    async fn queued_track_ids(&self) -> StoreResult<Vec<TrackId>>;
}

/// Station policy storage. Read at the start of every operation so live
/// edits take effect on the next selection.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_clockwheel_config(&self) -> StoreResult<ClockwheelConfig>;

    async fn load_request_policy(&self) -> StoreResult<RequestPolicy>;

    async fn load_rotation_state(&self) -> StoreResult<RotationCursor>;

    async fn save_rotation_state(&self, cursor: &RotationCursor) -> StoreResult<()>;
}

/// Listener request log.
#[async_trait]
pub trait RequestLog: Send + Sync {
    /// Store a new entry and return its id. `entry.id` is ignored.
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<i64>;

    async fn get(&self, id: i64) -> StoreResult<Option<RequestLogEntry>>;

    async fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        reason: Option<&str>,
    ) -> StoreResult<()>;

    async fn mark_played(&self, id: i64, played_at: i64) -> StoreResult<()>;

    /// Entries with `requested_at > since`, any status.
    async fn requested_since(&self, since: i64) -> StoreResult<Vec<RequestLogEntry>>;

    /// Entries with the given status, oldest first.
    async fn by_status(&self, status: RequestStatus, limit: usize)
        -> StoreResult<Vec<RequestLogEntry>>;

    /// Full log, newest first.
    async fn history(&self, limit: i64, offset: i64) -> StoreResult<Vec<RequestLogEntry>>;
}
