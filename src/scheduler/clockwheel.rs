/// Slot scheduling
///
/// Decides which clockwheel slot is due. Declaration order is authoritative:
/// starting after the last-used slot, the first slot whose weekday mask and
/// hour window contain "now" wins. No randomness at this layer.
use std::collections::BTreeMap;

use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};

use super::rotation::{ClockwheelConfig, ClockwheelSlot};
use super::StationTime;
use crate::error::EngineError;

/// Persisted rotation position.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RotationCursor {
    /// Index into `ClockwheelConfig.slots` to start searching from.
    pub next_slot: usize,
    /// `playlist_order` position per slot id.
    pub playlist_positions: BTreeMap<String, usize>,
}

/// `start == end` covers the whole day; `start > end` wraps midnight.
pub fn hour_in_window(start: u8, end: u8, hour: u8) -> bool {
    if start == end {
        true
    } else if start < end {
        hour >= start && hour < end
    } else {
        hour >= start || hour < end
    }
}

/// Weekday (0=Mon) and hour check for one slot.
pub fn slot_is_active(slot: &ClockwheelSlot, now: &StationTime) -> bool {
    if !slot.active_days.is_empty() {
        let day = now.weekday().num_days_from_monday() as u8;
        if !slot.active_days.contains(&day) {
            return false;
        }
    }

    match slot.active_window() {
        Some((start, end)) => hour_in_window(start, end, now.hour() as u8),
        None => true,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DueSlot<'a> {
    pub index: usize,
    pub slot: &'a ClockwheelSlot,
}

pub struct SlotScheduler<'a> {
    config: &'a ClockwheelConfig,
}

impl<'a> SlotScheduler<'a> {
    pub fn new(config: &'a ClockwheelConfig) -> Self {
        Self { config }
    }

    /// First active slot at or after `cursor`, wrapping around.
    pub fn next_due_slot(&self, cursor: usize, now: &StationTime) -> Result<DueSlot<'a>, EngineError> {
        self.due_slots(cursor, now)
            .into_iter()
            .next()
            .ok_or(EngineError::NoSlotAvailable)
    }

    /// Every active slot in rotation order starting at `cursor`. Each slot
    /// appears at most once.
    pub fn due_slots(&self, cursor: usize, now: &StationTime) -> Vec<DueSlot<'a>> {
        let slots = &self.config.slots;
        if slots.is_empty() {
            return Vec::new();
        }
        let start = cursor % slots.len();
        (0..slots.len())
            .map(|offset| (start + offset) % slots.len())
            .filter(|&idx| slot_is_active(&slots[idx], now))
            .map(|idx| DueSlot {
                index: idx,
                slot: &slots[idx],
            })
            .collect()
    }

    /// Ids of the slots active at `now`, in declaration order.
    pub fn active_slot_ids(&self, now: &StationTime) -> Vec<String> {
        self.config
            .slots
            .iter()
            .filter(|s| slot_is_active(s, now))
            .map(|s| s.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.config.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.config.slots.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
