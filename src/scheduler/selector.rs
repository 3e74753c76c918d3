/// Candidate selection
///
/// Picks one track from an already-filtered eligible set using a slot's
/// selection method. Every method is deterministic for a given RNG state:
/// ties always resolve to the earliest candidate in enumeration order.
use std::cmp::Ordering;
use std::collections::HashSet;

use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::rotation::ClockwheelSelectionMethod;
use super::separation::PlayHistory;
use crate::db::models::{TrackId, TrackRecord};

/// Lemming floor/ceiling on the 0..100 scale.
const LEMMING_MAX: f64 = 100.0;
const LEMMING_MIN: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pick {
    /// Index into the eligible slice.
    pub index: usize,
    pub method_used: ClockwheelSelectionMethod,
    /// New `playlist_order` position, only for that method.
    pub next_position: Option<usize>,
}

pub struct CandidateSelector<'a, R: Rng> {
    history: &'a PlayHistory,
    now_unix: i64,
    lemming_lookback_secs: i64,
    rng: &'a mut R,
}

impl<'a, R: Rng> CandidateSelector<'a, R> {
    pub fn new(
        history: &'a PlayHistory,
        now_unix: i64,
        lemming_lookback_minutes: u32,
        rng: &'a mut R,
    ) -> Self {
        Self {
            history,
            now_unix,
            lemming_lookback_secs: lemming_lookback_minutes as i64 * 60,
            rng,
        }
    }

    /// Choose from `eligible`. `universe` is the slot's full ordered list and
    /// `position` its persisted cursor; both only matter for `playlist_order`.
    pub fn select(
        &mut self,
        method: ClockwheelSelectionMethod,
        eligible: &[TrackRecord],
        universe: &[TrackRecord],
        position: usize,
    ) -> Option<Pick> {
        if eligible.is_empty() {
            return None;
        }
        let simple = |index| Pick {
            index,
            method_used: method,
            next_position: None,
        };

        use ClockwheelSelectionMethod as M;
        match method {
            M::Weighted => {
                let weights: Vec<f64> = eligible.iter().map(|t| sanitize(t.weight)).collect();
                Some(self.weighted_or_uniform(&weights, method))
            }
            M::Priority => best_index(eligible, |a, b| {
                a.weight
                    .total_cmp(&b.weight)
                    .then_with(|| {
                        // Older last-played wins; never played is oldest.
                        self.history
                            .track_last_played(b)
                            .cmp(&self.history.track_last_played(a))
                    })
            })
            .map(simple),
            M::Random => Some(simple(self.rng.gen_range(0..eligible.len()))),
            M::MostRecentlyPlayedSong => best_index(eligible, |a, b| {
                self.history
                    .track_last_played(a)
                    .cmp(&self.history.track_last_played(b))
            })
            .map(simple),
            M::LeastRecentlyPlayedSong => best_index(eligible, |a, b| {
                self.history
                    .track_last_played(b)
                    .cmp(&self.history.track_last_played(a))
            })
            .map(simple),
            M::MostRecentlyPlayedArtist => best_index(eligible, |a, b| {
                self.history
                    .artist_last_played(&a.artist)
                    .cmp(&self.history.artist_last_played(&b.artist))
            })
            .map(simple),
            M::LeastRecentlyPlayedArtist => best_index(eligible, |a, b| {
                self.history
                    .artist_last_played(&b.artist)
                    .cmp(&self.history.artist_last_played(&a.artist))
            })
            .map(simple),
            M::Lemming => {
                let weights: Vec<f64> = eligible.iter().map(|t| self.lemming_weight(t)).collect();
                Some(self.weighted_or_uniform(&weights, method))
            }
            M::PlaylistOrder => playlist_pick(eligible, universe, position),
        }
    }

    /// `max(1, 100 - penalty)` where the penalty falls linearly from 100 right
    /// after a play to 0 once the lookback window has passed.
    pub fn lemming_weight(&self, track: &TrackRecord) -> f64 {
        let Some(last) = self.history.track_last_played(track) else {
            return LEMMING_MAX;
        };
        if self.lemming_lookback_secs <= 0 {
            return LEMMING_MAX;
        }
        let age = (self.now_unix - last).max(0);
        if age >= self.lemming_lookback_secs {
            return LEMMING_MAX;
        }
        let penalty = LEMMING_MAX * (1.0 - age as f64 / self.lemming_lookback_secs as f64);
        (LEMMING_MAX - penalty).max(LEMMING_MIN)
    }

    fn weighted_or_uniform(&mut self, weights: &[f64], method: ClockwheelSelectionMethod) -> Pick {
        match WeightedIndex::<f64>::new(weights.iter().copied()) {
            Ok(dist) => Pick {
                index: dist.sample(&mut *self.rng),
                method_used: method,
                next_position: None,
            },
            // All weights zero: uniform over the set.
            Err(_) => Pick {
                index: self.rng.gen_range(0..weights.len()),
                method_used: ClockwheelSelectionMethod::Random,
                next_position: None,
            },
        }
    }
}

fn sanitize(weight: f64) -> f64 {
    if weight.is_finite() && weight > 0.0 {
        weight
    } else {
        0.0
    }
}

/// Index of the greatest element under `cmp`; the first one wins ties.
fn best_index<F>(items: &[TrackRecord], mut cmp: F) -> Option<usize>
where
    F: FnMut(&TrackRecord, &TrackRecord) -> Ordering,
{
    let mut best: Option<usize> = None;
    for (i, item) in items.iter().enumerate() {
        match best {
            None => best = Some(i),
            Some(b) if cmp(item, &items[b]) == Ordering::Greater => best = Some(i),
            _ => {}
        }
    }
    best
}

/// Walk `universe` from `position`, wrapping, and take the first eligible track.
fn playlist_pick(eligible: &[TrackRecord], universe: &[TrackRecord], position: usize) -> Option<Pick> {
    let eligible_ids: HashSet<TrackId> = eligible.iter().map(|t| t.id).collect();
    let len = universe.len();
    if len == 0 {
        return None;
    }
    let start = position % len;
    (0..len)
        .map(|offset| (start + offset) % len)
        .find(|&idx| eligible_ids.contains(&universe[idx].id))
        .and_then(|idx| {
            let id = universe[idx].id;
            eligible.iter().position(|t| t.id == id).map(|index| Pick {
                index,
                method_used: ClockwheelSelectionMethod::PlaylistOrder,
                next_position: Some((idx + 1) % len),
            })
        })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
