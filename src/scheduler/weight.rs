/// Weight adjustment
///
/// Weights decay when a track is selected and rise when a listener request
/// for it is accepted. Results are clamped to [0, 100]. A zero delta is a
/// no-op: nothing is written.
///
/// Writes for one track are serialised through [`TrackLocks`] so a play and
/// a request landing together cannot lose an update.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::rotation::ClockwheelConfig;
use crate::db::models::{TrackId, DEFAULT_WEIGHT, MAX_WEIGHT, MIN_WEIGHT};
use crate::db::ports::MetadataPort;
use crate::error::StoreResult;

pub fn clamp_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return DEFAULT_WEIGHT;
    }
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightAdjuster {
    pub reduce_on_play: f64,
    pub increase_on_request: f64,
}

impl WeightAdjuster {
    pub fn from_config(config: &ClockwheelConfig) -> Self {
        Self {
            reduce_on_play: config.on_play_reduce_weight_by.abs(),
            increase_on_request: config.on_request_increase_weight_by.max(0.0),
        }
    }

    /// New weight after a play, or `None` when the delta is zero.
    pub fn on_played(&self, current: f64) -> Option<f64> {
        if self.reduce_on_play.abs() < f64::EPSILON {
            return None;
        }
        Some(clamp_weight(current - self.reduce_on_play))
    }

    /// New weight after an accepted request, or `None` when the delta is zero.
    pub fn on_requested(&self, current: f64) -> Option<f64> {
        if self.increase_on_request.abs() < f64::EPSILON {
            return None;
        }
        Some(clamp_weight(current + self.increase_on_request))
    }
}

/// Per-track async locks for metadata writes.
#[derive(Debug, Default)]
pub struct TrackLocks {
    inner: Mutex<HashMap<TrackId, Arc<AsyncMutex<()>>>>,
}

const PRUNE_THRESHOLD: usize = 1024;

impl TrackLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, track_id: TrackId) -> OwnedMutexGuard<()> {
        let cell = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if map.len() > PRUNE_THRESHOLD {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(track_id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        cell.lock_owned().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightEvent {
    Played,
    Requested,
}

/// Read-modify-write of one track's weight under its lock.
///
/// Returns the written weight, `None` when the delta is zero or the track is
/// unknown. Failures are returned to the caller, never retried here.
pub async fn apply_weight_event(
    library: &dyn MetadataPort,
    locks: &TrackLocks,
    adjuster: &WeightAdjuster,
    track_id: TrackId,
    event: WeightEvent,
) -> StoreResult<Option<f64>> {
    let noop = match event {
        WeightEvent::Played => adjuster.on_played(DEFAULT_WEIGHT).is_none(),
        WeightEvent::Requested => adjuster.on_requested(DEFAULT_WEIGHT).is_none(),
    };
    if noop {
        return Ok(None);
    }

    let _guard = locks.lock(track_id).await;
    let Some(track) = library.get_track(track_id).await? else {
        return Ok(None);
    };
    let next = match event {
        WeightEvent::Played => adjuster.on_played(track.weight),
        WeightEvent::Requested => adjuster.on_requested(track.weight),
    };
    if let Some(weight) = next {
        library.update_weight(track_id, weight).await?;
    }
    Ok(next)
}

/// Stamp last-played under the track's lock.
pub async fn record_last_played(
    library: &dyn MetadataPort,
    locks: &TrackLocks,
    track_id: TrackId,
    played_at: i64,
) -> StoreResult<()> {
    let _guard = locks.lock(track_id).await;
    library.update_last_played(track_id, played_at).await
}

// ── Tests ─────────────────────────────────────────────────────────────────────
