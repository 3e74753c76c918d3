/// Request Policy Engine
///
/// Evaluates song requests against a configurable policy to auto-accept or
/// reject them with a typed reason. Checks run in a fixed order and the
/// first failure decides the outcome.
use chrono::Timelike;
use serde::{Deserialize, Serialize};

use super::clockwheel::hour_in_window;
use super::StationTime;
use crate::db::models::{PlayRecord, TrackId, TrackRecord};

const DAY_SECS: i64 = 86_400;
const HOUR_SECS: i64 = 3_600;

// ── Policy ────────────────────────────────────────────────────────────────────

/// Limits of 0 mean "no limit"; gaps of 0 disable the gap check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RequestPolicy {
    // Song limits
    pub max_requests_per_song_per_day: u32,
    pub min_minutes_between_same_song: u32,

    // Artist limits
    pub max_requests_per_artist_per_hour: u32,
    pub min_minutes_between_same_artist: u32,

    // Album limits
    pub max_requests_per_album_per_day: u32,

    // Requester limits
    pub max_requests_per_requester_per_day: u32,
    pub max_requests_per_requester_per_hour: u32,

    // Queue position for accepted request
    pub queue_position: RequestQueuePosition,

    // Blacklists
    pub blacklisted_song_ids: Vec<TrackId>,
    pub blacklisted_categories: Vec<String>,

    // Hours when requests are accepted (start_hour, end_hour in 24h)
    pub active_hours: Option<(u8, u8)>,

    // Auto-accept if all checks pass
    pub auto_accept: bool,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            max_requests_per_song_per_day: 3,
            min_minutes_between_same_song: 60,
            max_requests_per_artist_per_hour: 2,
            min_minutes_between_same_artist: 30,
            max_requests_per_album_per_day: 5,
            max_requests_per_requester_per_day: 5,
            max_requests_per_requester_per_hour: 2,
            queue_position: RequestQueuePosition::End,
            blacklisted_song_ids: Vec::new(),
            blacklisted_categories: Vec::new(),
            active_hours: None,
            auto_accept: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestQueuePosition {
    Next,
    After { n: u32 },
    #[default]
    End,
}

impl RequestQueuePosition {
    /// Insertion index in a queue currently holding `len` items.
    pub fn resolve(self, len: usize) -> usize {
        match self {
            RequestQueuePosition::Next => 0,
            RequestQueuePosition::After { n } => (n as usize).min(len),
            RequestQueuePosition::End => len,
        }
    }
}

// ── Request log entry ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLogEntry {
    pub id: Option<i64>,
    pub song_id: TrackId,
    pub song_title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub requester_name: Option<String>,
    pub requester_platform: Option<String>,
    pub requester_ip: Option<String>,
    pub requested_at: i64, // Unix timestamp
    pub status: RequestStatus,
    pub rejection_reason: Option<String>,
    pub played_at: Option<i64>,
}

impl RequestLogEntry {
    pub fn from_submission(
        submission: &RequestSubmission,
        track: Option<&TrackRecord>,
        requested_at: i64,
    ) -> Self {
        Self {
            id: None,
            song_id: submission.song_id,
            song_title: track.map(|t| t.title.clone()),
            artist: track.map(|t| t.artist.clone()),
            album: track.map(|t| t.album.clone()),
            requester_name: Some(submission.requester_name.clone()),
            requester_platform: submission.requester_platform.clone(),
            requester_ip: submission.requester_ip.clone(),
            requested_at,
            status: RequestStatus::Pending,
            rejection_reason: None,
            played_at: None,
        }
    }

    /// The requested track as a play at `at`, for separation checks.
    pub fn play_record(&self, at: i64) -> PlayRecord {
        PlayRecord {
            track_id: self.song_id,
            artist: self.artist.clone().unwrap_or_default(),
            album: self.album.clone().unwrap_or_default(),
            title: self.song_title.clone().unwrap_or_default(),
            played_at: at,
        }
    }

    fn counts(&self) -> bool {
        self.status != RequestStatus::Rejected
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Played,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Played => "played",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            "played" => Self::Played,
            _ => Self::Pending,
        }
    }
}

/// A listener submission as it arrives from the request transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestSubmission {
    pub song_id: TrackId,
    pub requester_name: String,
    pub requester_platform: Option<String>,
    pub requester_ip: Option<String>,
}

impl RequestSubmission {
    pub fn new(song_id: TrackId, requester_name: &str) -> Self {
        Self {
            song_id,
            requester_name: requester_name.to_string(),
            requester_platform: None,
            requester_ip: None,
        }
    }
}

// ── Decisions ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum RejectionReason {
    UnknownTrack,
    BlacklistSong,
    BlacklistCategory { category: String },
    ActiveHours { start: u8, end: u8 },
    SongDayLimit { count: u32, max: u32 },
    SongMinGap { wait_minutes: i64 },
    ArtistHourLimit { max: u32 },
    ArtistMinGap { wait_minutes: i64 },
    AlbumDayLimit { max: u32 },
    RequesterDayLimit { max: u32 },
    RequesterHourLimit { max: u32 },
    /// Rejected by hand from the pending list.
    Operator { note: String },
}

impl RejectionReason {
    /// Stable rule label, stored in the request log.
    pub fn rule(&self) -> &'static str {
        match self {
            Self::UnknownTrack => "unknown_track",
            Self::BlacklistSong => "blacklist_song",
            Self::BlacklistCategory { .. } => "blacklist_category",
            Self::ActiveHours { .. } => "active_hours",
            Self::SongDayLimit { .. } => "song_day_limit",
            Self::SongMinGap { .. } => "song_min_gap",
            Self::ArtistHourLimit { .. } => "artist_hour_limit",
            Self::ArtistMinGap { .. } => "artist_min_gap",
            Self::AlbumDayLimit { .. } => "album_day_limit",
            Self::RequesterDayLimit { .. } => "requester_day_limit",
            Self::RequesterHourLimit { .. } => "requester_hour_limit",
            Self::Operator { .. } => "operator",
        }
    }

    /// Listener-facing text.
    pub fn message(&self) -> String {
        match self {
            Self::UnknownTrack => "This song is not in the library.".to_string(),
            Self::BlacklistSong => "This song is not requestable.".to_string(),
            Self::BlacklistCategory { category } => {
                format!("Category '{}' is not requestable.", category)
            }
            Self::ActiveHours { start, end } => format!(
                "Requests only accepted between {:02}:00 and {:02}:00",
                start, end
            ),
            Self::SongDayLimit { count, .. } => {
                format!("This song has already been requested {} times today.", count)
            }
            Self::SongMinGap { wait_minutes } => format!(
                "Please wait {} more minutes before requesting this song again.",
                wait_minutes
            ),
            Self::ArtistHourLimit { max } => {
                format!("Too many requests for this artist this hour (max {}).", max)
            }
            Self::ArtistMinGap { wait_minutes } => format!(
                "Please wait {} more minutes before requesting this artist again.",
                wait_minutes
            ),
            Self::AlbumDayLimit { max } => {
                format!("Too many requests for this album today (max {}).", max)
            }
            Self::RequesterDayLimit { max } => format!("You can only request {} songs per day.", max),
            Self::RequesterHourLimit { max } => {
                format!("You can only request {} songs per hour.", max)
            }
            Self::Operator { note } if note.trim().is_empty() => {
                "Request declined by the DJ.".to_string()
            }
            Self::Operator { note } => note.clone(),
        }
    }

    /// `rule: message`, the form written to `rejection_reason`.
    pub fn log_text(&self) -> String {
        format!("{}: {}", self.rule(), self.message())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum AdmissionDecision {
    /// Passed the policy and was inserted into the queue at `position`.
    Accepted { request_id: i64, position: usize },
    /// Passed the policy; waiting for an operator.
    Pending { request_id: i64 },
    Rejected {
        request_id: i64,
        reason: RejectionReason,
    },
}

impl AdmissionDecision {
    pub fn request_id(&self) -> i64 {
        match self {
            Self::Accepted { request_id, .. }
            | Self::Pending { request_id }
            | Self::Rejected { request_id, .. } => *request_id,
        }
    }
}

// ── Policy validation ─────────────────────────────────────────────────────────

fn same_text(a: Option<&str>, b: &str) -> bool {
    let b = b.trim();
    !b.is_empty() && a.is_some_and(|a| a.trim().eq_ignore_ascii_case(b))
}

fn limit_hit(count: usize, max: u32) -> bool {
    max > 0 && count >= max as usize
}

pub struct AdmissionController<'a> {
    policy: &'a RequestPolicy,
}

impl<'a> AdmissionController<'a> {
    pub fn new(policy: &'a RequestPolicy) -> Self {
        Self { policy }
    }

    /// Evaluate a request for `track` against prior log entries.
    ///
    /// `log` should cover at least the last 24 hours; older entries are
    /// ignored and rejected entries never count.
    pub fn evaluate(
        &self,
        track: &TrackRecord,
        requester: &str,
        log: &[RequestLogEntry],
        now: &StationTime,
    ) -> Result<(), RejectionReason> {
        let p = self.policy;
        let now_unix = now.timestamp();
        let day_start = now_unix - DAY_SECS;
        let hour_start = now_unix - HOUR_SECS;

        // Blacklists
        if p.blacklisted_song_ids.contains(&track.id) {
            return Err(RejectionReason::BlacklistSong);
        }
        for cat in &p.blacklisted_categories {
            if track
                .categories
                .iter()
                .any(|c| c.trim().eq_ignore_ascii_case(cat.trim()))
            {
                return Err(RejectionReason::BlacklistCategory {
                    category: cat.clone(),
                });
            }
        }

        // Active hours
        if let Some((start, end)) = p.active_hours {
            if !hour_in_window(start, end, now.hour() as u8) {
                return Err(RejectionReason::ActiveHours { start, end });
            }
        }

        let live: Vec<&RequestLogEntry> = log.iter().filter(|e| e.counts()).collect();
        let count_since = |since: i64, pred: &dyn Fn(&RequestLogEntry) -> bool| {
            live.iter()
                .filter(|e| e.requested_at > since && pred(e))
                .count()
        };
        let latest = |pred: &dyn Fn(&RequestLogEntry) -> bool| {
            live.iter()
                .filter(|e| pred(e))
                .map(|e| e.requested_at)
                .max()
        };

        // Same song per day
        let same_song = |e: &RequestLogEntry| e.song_id == track.id;
        let song_day = count_since(day_start, &same_song);
        if limit_hit(song_day, p.max_requests_per_song_per_day) {
            return Err(RejectionReason::SongDayLimit {
                count: song_day as u32,
                max: p.max_requests_per_song_per_day,
            });
        }
        if let Some(wait) = min_gap_wait(latest(&same_song), p.min_minutes_between_same_song, now_unix)
        {
            return Err(RejectionReason::SongMinGap { wait_minutes: wait });
        }

        // Artist per hour
        if !track.artist.trim().is_empty() {
            let same_artist = |e: &RequestLogEntry| same_text(e.artist.as_deref(), &track.artist);
            if limit_hit(
                count_since(hour_start, &same_artist),
                p.max_requests_per_artist_per_hour,
            ) {
                return Err(RejectionReason::ArtistHourLimit {
                    max: p.max_requests_per_artist_per_hour,
                });
            }
            if let Some(wait) = min_gap_wait(
                latest(&same_artist),
                p.min_minutes_between_same_artist,
                now_unix,
            ) {
                return Err(RejectionReason::ArtistMinGap { wait_minutes: wait });
            }
        }

        // Album per day
        if !track.album.trim().is_empty() {
            let same_album = |e: &RequestLogEntry| same_text(e.album.as_deref(), &track.album);
            if limit_hit(
                count_since(day_start, &same_album),
                p.max_requests_per_album_per_day,
            ) {
                return Err(RejectionReason::AlbumDayLimit {
                    max: p.max_requests_per_album_per_day,
                });
            }
        }

        // Requester per day / per hour
        let same_requester =
            |e: &RequestLogEntry| e.requester_name.as_deref().unwrap_or("") == requester;
        if limit_hit(
            count_since(day_start, &same_requester),
            p.max_requests_per_requester_per_day,
        ) {
            return Err(RejectionReason::RequesterDayLimit {
                max: p.max_requests_per_requester_per_day,
            });
        }
        if limit_hit(
            count_since(hour_start, &same_requester),
            p.max_requests_per_requester_per_hour,
        ) {
            return Err(RejectionReason::RequesterHourLimit {
                max: p.max_requests_per_requester_per_hour,
            });
        }

        Ok(())
    }
}

/// Minutes left before the gap has elapsed, rounded up.
fn min_gap_wait(last: Option<i64>, gap_minutes: u32, now_unix: i64) -> Option<i64> {
    let last = last?;
    if gap_minutes == 0 {
        return None;
    }
    let until = last + gap_minutes as i64 * 60;
    if until > now_unix {
        Some((until - now_unix + 59) / 60)
    } else {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
