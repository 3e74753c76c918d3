/// Separation rules
///
/// Minimum time gaps between plays sharing a track, artist, album or title.
/// Enforcement is on only when the global master switch and the slot's own
/// `enforce_rules` flag are both set.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::rotation::ClockwheelRules;
use crate::db::models::{PlayRecord, TrackId, TrackRecord};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SeparationRule {
    Track,
    Artist,
    Album,
    Title,
}

impl SeparationRule {
    pub fn as_str(self) -> &'static str {
        match self {
            SeparationRule::Track => "no_same_track",
            SeparationRule::Artist => "no_same_artist",
            SeparationRule::Album => "no_same_album",
            SeparationRule::Title => "no_same_title",
        }
    }
}

fn key(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Library-wide play history indexed by last play per track/artist/album/title.
#[derive(Debug, Clone, Default)]
pub struct PlayHistory {
    track_last: HashMap<TrackId, i64>,
    artist_last: HashMap<String, i64>,
    album_last: HashMap<String, i64>,
    title_last: HashMap<String, i64>,
    len: usize,
}

impl PlayHistory {
    pub fn from_records(records: &[PlayRecord]) -> Self {
        let mut history = Self::default();
        for r in records {
            history.record(r);
        }
        history
    }

    /// Add a play, keeping the most recent timestamp per key.
    pub fn record(&mut self, r: &PlayRecord) {
        fn bump<K: std::hash::Hash + Eq>(map: &mut HashMap<K, i64>, k: K, at: i64) {
            let slot = map.entry(k).or_insert(at);
            if at > *slot {
                *slot = at;
            }
        }
        bump(&mut self.track_last, r.track_id, r.played_at);
        if let Some(k) = key(&r.artist) {
            bump(&mut self.artist_last, k, r.played_at);
        }
        if let Some(k) = key(&r.album) {
            bump(&mut self.album_last, k, r.played_at);
        }
        if let Some(k) = key(&r.title) {
            bump(&mut self.title_last, k, r.played_at);
        }
        self.len += 1;
    }

    /// Most recent play of this exact track, from history or the record itself.
    pub fn track_last_played(&self, track: &TrackRecord) -> Option<i64> {
        let from_history = self.track_last.get(&track.id).copied();
        match (from_history, track.last_played) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn artist_last_played(&self, artist: &str) -> Option<i64> {
        key(artist).and_then(|k| self.artist_last.get(&k).copied())
    }

    pub fn album_last_played(&self, album: &str) -> Option<i64> {
        key(album).and_then(|k| self.album_last.get(&k).copied())
    }

    pub fn title_last_played(&self, title: &str) -> Option<i64> {
        key(title).and_then(|k| self.title_last.get(&k).copied())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub struct SeparationRuleEngine<'a> {
    rules: &'a ClockwheelRules,
    active: bool,
}

impl<'a> SeparationRuleEngine<'a> {
    pub fn new(rules: &'a ClockwheelRules, slot_enforce_rules: bool) -> Self {
        Self {
            rules,
            active: rules.enforce_playlist_rotation_rules && slot_enforce_rules,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Every rule the track currently breaks, regardless of enforcement.
    pub fn violations(
        &self,
        track: &TrackRecord,
        history: &PlayHistory,
        now_unix: i64,
    ) -> Vec<SeparationRule> {
        let too_recent = |last: Option<i64>, minutes: u32| -> bool {
            minutes > 0 && matches!(last, Some(t) if now_unix - t < minutes as i64 * 60)
        };

        let mut out = Vec::new();
        if too_recent(history.track_last_played(track), self.rules.no_same_track_minutes) {
            out.push(SeparationRule::Track);
        }
        if too_recent(
            history.artist_last_played(&track.artist),
            self.rules.no_same_artist_minutes,
        ) {
            out.push(SeparationRule::Artist);
        }
        if too_recent(
            history.album_last_played(&track.album),
            self.rules.no_same_album_minutes,
        ) {
            out.push(SeparationRule::Album);
        }
        if too_recent(
            history.title_last_played(&track.title),
            self.rules.no_same_title_minutes,
        ) {
            out.push(SeparationRule::Title);
        }
        out
    }

    pub fn passes(&self, track: &TrackRecord, history: &PlayHistory, now_unix: i64) -> bool {
        !self.active || self.violations(track, history, now_unix).is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const T: i64 = 1_700_000_000;

    fn rules() -> ClockwheelRules {
        ClockwheelRules {
            no_same_album_minutes: 15,
            no_same_artist_minutes: 8,
            no_same_title_minutes: 15,
            no_same_track_minutes: 180,
            ..ClockwheelRules::default()
        }
    }

    fn played(id: TrackId, artist: &str, album: &str, title: &str, at: i64) -> PlayRecord {
        PlayRecord {
            track_id: id,
            artist: artist.into(),
            album: album.into(),
            title: title.into(),
            played_at: at,
        }
    }

    #[test]
    fn artist_played_three_minutes_ago_fails() {
        let r = rules();
        let engine = SeparationRuleEngine::new(&r, true);
        let history = PlayHistory::from_records(&[played(1, "X", "A1", "Song 1", T)]);
        let candidate = TrackRecord::new(2, "x", "A2", "Song 2");
        assert_eq!(
            engine.violations(&candidate, &history, T + 180),
            vec![SeparationRule::Artist]
        );
        assert!(!engine.passes(&candidate, &history, T + 180));
        assert!(engine.passes(&candidate, &history, T + 8 * 60), "gap elapsed");
    }

    #[test]
    fn title_rule_catches_covers_with_different_ids() {
        let r = rules();
        let engine = SeparationRuleEngine::new(&r, true);
        let history = PlayHistory::from_records(&[played(1, "Orig", "A", "Hallelujah", T)]);
        let cover = TrackRecord::new(9, "Cover Band", "B", "HALLELUJAH ");
        assert_eq!(
            engine.violations(&cover, &history, T + 60),
            vec![SeparationRule::Title]
        );
    }

    #[test]
    fn track_rule_uses_record_last_played_when_history_is_short() {
        let r = rules();
        let engine = SeparationRuleEngine::new(&r, true);
        let history = PlayHistory::default();
        let t = TrackRecord::new(5, "", "", "").with_last_played(T);
        assert_eq!(
            engine.violations(&t, &history, T + 60 * 60),
            vec![SeparationRule::Track]
        );
        assert!(engine.passes(&t, &history, T + 180 * 60));
    }

    #[test]
    fn blank_fields_never_match() {
        let r = rules();
        let engine = SeparationRuleEngine::new(&r, true);
        let history = PlayHistory::from_records(&[played(1, "", "", "", T)]);
        let t = TrackRecord::new(2, " ", "", "");
        assert!(engine.passes(&t, &history, T + 1));
    }

    #[test]
    fn zero_minutes_disables_a_rule() {
        let r = ClockwheelRules {
            no_same_artist_minutes: 0,
            ..rules()
        };
        let engine = SeparationRuleEngine::new(&r, true);
        let history = PlayHistory::from_records(&[played(1, "X", "", "", T)]);
        assert!(engine.passes(&TrackRecord::new(2, "X", "", ""), &history, T + 1));
    }

    #[test]
    fn enforcement_requires_both_switches() {
        let history = PlayHistory::from_records(&[played(1, "X", "", "", T)]);
        let same = TrackRecord::new(1, "X", "", "");

        let r = rules();
        assert!(SeparationRuleEngine::new(&r, false).passes(&same, &history, T + 1));

        let off = ClockwheelRules {
            enforce_playlist_rotation_rules: false,
            ..rules()
        };
        let engine = SeparationRuleEngine::new(&off, true);
        assert!(!engine.is_active());
        assert!(engine.passes(&same, &history, T + 1));
    }

    #[test]
    fn history_keeps_latest_play_per_key() {
        let history = PlayHistory::from_records(&[
            played(1, "X", "A", "t", T + 100),
            played(1, "X", "A", "t", T),
        ]);
        let t = TrackRecord::new(1, "X", "A", "t");
        assert_eq!(history.track_last_played(&t), Some(T + 100));
        assert_eq!(history.artist_last_played("x"), Some(T + 100));
        assert_eq!(history.len(), 2);
    }
}
