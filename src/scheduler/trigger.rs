/// Engine triggers
///
/// Hosts feed the engine through a channel of [`Trigger`]s. The driver runs
/// each trigger on its own task; selections still queue behind the engine's
/// selection lock, so a burst of `QueueEmpty` events never races.
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::autodj::{RotationEngine, SelectionOutcome};
use super::request_policy::{AdmissionDecision, RequestSubmission};
use crate::error::EngineError;

/// Events that can drive the rotation engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// The playback queue ran dry (or dropped below the host's low-water mark).
    QueueEmpty,
    /// A listener song request arrived.
    RequestReceived { submission: RequestSubmission },
    /// Fired at the start of each calendar hour.
    HourTick,
    /// Operator pressed "add next"; optionally pinned to one slot.
    ManualEnqueue { slot_id: Option<String> },
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::QueueEmpty => "on_queue_empty",
            Trigger::RequestReceived { .. } => "on_request_received",
            Trigger::HourTick => "on_hour",
            Trigger::ManualEnqueue { .. } => "manual",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerOutcome {
    Selected(SelectionOutcome),
    Admission(AdmissionDecision),
    ActiveSlots(Vec<String>),
}

impl RotationEngine {
    /// Dispatch one trigger to the matching engine operation.
    pub async fn handle(&self, trigger: Trigger) -> Result<TriggerOutcome, EngineError> {
        match trigger {
            Trigger::QueueEmpty => self.on_queue_empty().await.map(TriggerOutcome::Selected),
            Trigger::RequestReceived { submission } => self
                .on_request_received(submission)
                .await
                .map(TriggerOutcome::Admission),
            Trigger::HourTick => self.on_hour_tick().await.map(TriggerOutcome::ActiveSlots),
            Trigger::ManualEnqueue { slot_id } => self
                .on_manual_enqueue(slot_id.as_deref())
                .await
                .map(TriggerOutcome::Selected),
        }
    }
}

/// Consume triggers until every sender is dropped, then wait for the
/// in-flight ones to finish.
pub async fn drive(engine: Arc<RotationEngine>, mut rx: mpsc::Receiver<Trigger>) {
    let mut running: Vec<JoinHandle<()>> = Vec::new();
    while let Some(trigger) = rx.recv().await {
        running.retain(|h| !h.is_finished());
        let engine = engine.clone();
        running.push(tokio::spawn(async move {
            let name = trigger.as_str();
            if let Err(e) = engine.handle(trigger).await {
                log::warn!("[trigger] {} failed: {} ({})", name, e, e.as_label());
            }
        }));
    }
    for handle in running {
        if let Err(e) = handle.await {
            log::error!("[trigger] task panicked: {}", e);
        }
    }
    log::info!("[trigger] driver stopped");
}

/// Time until the next top of the hour.
fn until_next_hour() -> StdDuration {
    let now = Local::now();
    let into_hour = now.minute() as u64 * 60 + now.second() as u64;
    StdDuration::from_secs(3600 - into_hour.min(3599))
}

/// Send `HourTick` at the top of every hour until the receiver goes away.
pub fn spawn_hour_ticker(tx: mpsc::Sender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(until_next_hour()).await;
            if tx.send(Trigger::HourTick).await.is_err() {
                log::debug!("[trigger] hour ticker stopping: receiver closed");
                break;
            }
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
