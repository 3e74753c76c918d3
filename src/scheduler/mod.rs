pub mod autodj;
pub mod clockwheel;
pub mod ghost_queue;
pub mod request_policy;
pub mod rotation;
pub mod selector;
pub mod separation;
pub mod trigger;
pub mod weight;

use chrono::{DateTime, FixedOffset};

/// Station wall-clock time. Weekday and hour checks use this offset.
pub type StationTime = DateTime<FixedOffset>;
