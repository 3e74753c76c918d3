use serde::{Deserialize, Serialize};

/// Library primary key (SAM `songlist.ID`).
pub type TrackId = i64;

pub const DEFAULT_WEIGHT: f64 = 50.0;
pub const MIN_WEIGHT: f64 = 0.0;
pub const MAX_WEIGHT: f64 = 100.0;

/// A track as the library reports it. The engine only reads these; weight and
/// last-played are written back through [`super::ports::MetadataPort`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackRecord {
    pub id: TrackId,
    pub artist: String,
    pub album: String,
    pub title: String,
    /// Category names this track belongs to.
    pub categories: Vec<String>,
    /// Normalised (`/`-separated) file path.
    pub file_path: String,
    pub weight: f64,
    /// Seconds.
    pub duration: i64,
    /// Unix seconds; `None` = never played.
    pub last_played: Option<i64>,
    pub play_count: i64,
}

impl TrackRecord {
    pub fn new(id: TrackId, artist: &str, album: &str, title: &str) -> Self {
        Self {
            id,
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            categories: Vec::new(),
            file_path: String::new(),
            weight: DEFAULT_WEIGHT,
            duration: 0,
            last_played: None,
            play_count: 0,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.categories.push(category.to_string());
        self
    }

    pub fn with_path(mut self, path: &str) -> Self {
        self.file_path = path.replace('\\', "/");
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_last_played(mut self, unix: i64) -> Self {
        self.last_played = Some(unix);
        self
    }

    /// Directory part of `file_path`, without trailing slash.
    pub fn directory(&self) -> Option<&str> {
        self.file_path
            .rfind('/')
            .map(|idx| self.file_path[..idx].trim())
            .filter(|d| !d.is_empty())
    }
}

/// One row of play history, newest first when returned by the library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayRecord {
    pub track_id: TrackId,
    pub artist: String,
    pub album: String,
    pub title: String,
    pub played_at: i64,
}

impl PlayRecord {
    pub fn of(track: &TrackRecord, played_at: i64) -> Self {
        Self {
            track_id: track.id,
            artist: track.artist.clone(),
            album: track.album.clone(),
            title: track.title.clone(),
            played_at,
        }
    }
}

/// Weight buckets shown as library folders. Browsing only; selection never
/// looks at bands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationBand {
    PowerHit,
    Heavy,
    Medium,
    Light,
    Rare,
}

impl RotationBand {
    pub const ALL: [RotationBand; 5] = [
        RotationBand::PowerHit,
        RotationBand::Heavy,
        RotationBand::Medium,
        RotationBand::Light,
        RotationBand::Rare,
    ];

    /// Half-open `[min, max)` weight range. `PowerHit` includes 100.
    pub fn weight_range(self) -> (f64, f64) {
        match self {
            RotationBand::PowerHit => (80.0, MAX_WEIGHT + 1.0),
            RotationBand::Heavy => (60.0, 80.0),
            RotationBand::Medium => (40.0, 60.0),
            RotationBand::Light => (20.0, 40.0),
            RotationBand::Rare => (MIN_WEIGHT, 20.0),
        }
    }

    pub fn for_weight(weight: f64) -> Self {
        Self::ALL
            .into_iter()
            .find(|band| {
                let (min, max) = band.weight_range();
                weight >= min && weight < max
            })
            .unwrap_or(RotationBand::Rare)
    }

    pub fn label(self) -> &'static str {
        match self {
            RotationBand::PowerHit => "Power Hit",
            RotationBand::Heavy => "Heavy Rotation",
            RotationBand::Medium => "Medium Rotation",
            RotationBand::Light => "Light Rotation",
            RotationBand::Rare => "Rare",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
