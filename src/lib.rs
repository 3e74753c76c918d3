pub mod db;
pub mod error;
pub mod scheduler;

pub use db::models::{PlayRecord, RotationBand, TrackId, TrackRecord};
pub use db::ports::{ConfigStore, MetadataPort, QueueSink, RequestLog};
pub use error::{EngineError, StoreError, StoreResult};
pub use scheduler::autodj::{
    Clock, EngineEvent, EngineSettings, EngineState, ManualClock, Relaxation, RelaxationLimit,
    RotationEngine, SelectionOutcome, SystemClock,
};
pub use scheduler::request_policy::{
    AdmissionDecision, RejectionReason, RequestPolicy, RequestStatus, RequestSubmission,
};
pub use scheduler::rotation::{ClockwheelConfig, ClockwheelSlot};
pub use scheduler::trigger::{drive, spawn_hour_ticker, Trigger, TriggerOutcome};
