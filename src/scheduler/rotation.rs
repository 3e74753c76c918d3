/// Clockwheel configuration model
///
/// A station's rotation policy: global separation rules plus an ordered list
/// of slots. Stored as JSON by the config store and normalised on every load.
use serde::{Deserialize, Serialize};

// ── Slot kinds / selection methods ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClockwheelSlotKind {
    Category,
    Directory,
    Request,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClockwheelSelectionMethod {
    Weighted,
    Priority,
    Random,
    MostRecentlyPlayedSong,
    LeastRecentlyPlayedSong,
    MostRecentlyPlayedArtist,
    LeastRecentlyPlayedArtist,
    Lemming,
    PlaylistOrder,
}

impl ClockwheelSelectionMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Weighted => "weighted",
            Self::Priority => "priority",
            Self::Random => "random",
            Self::MostRecentlyPlayedSong => "most_recently_played_song",
            Self::LeastRecentlyPlayedSong => "least_recently_played_song",
            Self::MostRecentlyPlayedArtist => "most_recently_played_artist",
            Self::LeastRecentlyPlayedArtist => "least_recently_played_artist",
            Self::Lemming => "lemming",
            Self::PlaylistOrder => "playlist_order",
        }
    }
}

/// Where a slot draws its candidates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource<'a> {
    Category(&'a str),
    Directory(&'a str),
    Request,
}

// ── Slot ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockwheelSlot {
    pub id: String,
    pub kind: ClockwheelSlotKind,
    /// Category name or directory path; ignored for request slots.
    pub target: String,
    pub selection_method: ClockwheelSelectionMethod,
    pub enforce_rules: bool,
    pub start_hour: Option<u8>,
    pub end_hour: Option<u8>,
    pub active_days: Vec<u8>, // 0=Mon..6=Sun
}

impl Default for ClockwheelSlot {
    fn default() -> Self {
        Self {
            id: "slot-1".to_string(),
            kind: ClockwheelSlotKind::Category,
            target: String::new(),
            selection_method: ClockwheelSelectionMethod::Weighted,
            enforce_rules: true,
            start_hour: None,
            end_hour: None,
            active_days: vec![],
        }
    }
}

impl ClockwheelSlot {
    pub fn category(id: &str, name: &str, method: ClockwheelSelectionMethod) -> Self {
        Self {
            id: id.to_string(),
            kind: ClockwheelSlotKind::Category,
            target: name.to_string(),
            selection_method: method,
            ..Self::default()
        }
    }

    pub fn directory(id: &str, path: &str, method: ClockwheelSelectionMethod) -> Self {
        Self {
            id: id.to_string(),
            kind: ClockwheelSlotKind::Directory,
            target: path.to_string(),
            selection_method: method,
            ..Self::default()
        }
    }

    pub fn request(id: &str, method: ClockwheelSelectionMethod) -> Self {
        Self {
            id: id.to_string(),
            kind: ClockwheelSlotKind::Request,
            target: String::new(),
            selection_method: method,
            ..Self::default()
        }
    }

    pub fn source(&self) -> SlotSource<'_> {
        match self.kind {
            ClockwheelSlotKind::Category => SlotSource::Category(self.target.trim()),
            ClockwheelSlotKind::Directory => SlotSource::Directory(self.target.trim()),
            ClockwheelSlotKind::Request => SlotSource::Request,
        }
    }

    /// `(start, end)` when both hours are set.
    pub fn active_window(&self) -> Option<(u8, u8)> {
        match (self.start_hour, self.end_hour) {
            (Some(start), Some(end)) => Some((start, end)),
            _ => None,
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockwheelRules {
    pub no_same_album_minutes: u32,
    pub no_same_artist_minutes: u32,
    pub no_same_title_minutes: u32,
    pub no_same_track_minutes: u32,
    pub keep_songs_in_queue: u32,
    pub use_ghost_queue: bool,
    /// Reuse one history snapshot across all slots tried in a single
    /// selection instead of re-reading it per slot.
    pub cache_queue_count: bool,
    pub enforce_playlist_rotation_rules: bool,
}

impl Default for ClockwheelRules {
    fn default() -> Self {
        Self {
            no_same_album_minutes: 15,
            no_same_artist_minutes: 8,
            no_same_title_minutes: 15,
            no_same_track_minutes: 180,
            keep_songs_in_queue: 1,
            use_ghost_queue: false,
            cache_queue_count: true,
            enforce_playlist_rotation_rules: true,
        }
    }
}

impl ClockwheelRules {
    /// Effective ghost queue capacity (0 when disabled).
    pub fn ghost_capacity(&self) -> usize {
        if self.use_ghost_queue {
            self.keep_songs_in_queue as usize
        } else {
            0
        }
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClockwheelConfig {
    pub rules: ClockwheelRules,
    pub on_play_reduce_weight_by: f64,
    pub on_request_increase_weight_by: f64,
    pub verbose_logging: bool,
    pub slots: Vec<ClockwheelSlot>,
    /// Used when no slot in `slots` is due right now.
    pub default_slot: Option<ClockwheelSlot>,
}

impl Default for ClockwheelConfig {
    fn default() -> Self {
        Self {
            rules: ClockwheelRules::default(),
            on_play_reduce_weight_by: 0.0,
            on_request_increase_weight_by: 0.0,
            verbose_logging: false,
            slots: vec![ClockwheelSlot::default()],
            default_slot: None,
        }
    }
}

impl ClockwheelConfig {
    pub fn normalized(mut self) -> Self {
        self.on_play_reduce_weight_by = finite_or_zero(self.on_play_reduce_weight_by).max(0.0);
        self.on_request_increase_weight_by =
            finite_or_zero(self.on_request_increase_weight_by).max(0.0);

        if self.slots.is_empty() {
            self.slots.push(ClockwheelSlot::default());
        }

        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.id.trim().is_empty() {
                slot.id = format!("slot-{}", i + 1);
            }
            normalize_slot(slot);
        }

        if let Some(slot) = self.default_slot.as_mut() {
            if slot.id.trim().is_empty() {
                slot.id = "default".to_string();
            }
            normalize_slot(slot);
        }

        self
    }

    pub fn slot(&self, id: &str) -> Option<&ClockwheelSlot> {
        self.slots
            .iter()
            .chain(self.default_slot.iter())
            .find(|s| s.id == id)
    }
}

fn normalize_slot(slot: &mut ClockwheelSlot) {
    slot.start_hour = slot.start_hour.map(|h| h.min(23));
    slot.end_hour = slot.end_hour.map(|h| h.min(23));
    slot.active_days.retain(|d| *d <= 6);
    slot.active_days.sort_unstable();
    slot.active_days.dedup();
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
