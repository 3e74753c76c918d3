// Headless AutoDJ host: local SQLite for station policy and the request log,
// SAM Broadcaster MySQL for the library and the playback queue.

use std::env;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use desizone_rotation::db::{local, ports::QueueSink, sam};
use desizone_rotation::scheduler::autodj::{EngineEvent, EngineSettings, RotationEngine};
use desizone_rotation::scheduler::trigger::{self, Trigger};

const TRIGGER_CAPACITY: usize = 64;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn engine_settings() -> EngineSettings {
    match env::var("DESIZONE_ENGINE_SETTINGS") {
        Ok(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
            log::warn!("[startup] DESIZONE_ENGINE_SETTINGS is not valid JSON ({e}), using defaults");
            EngineSettings::default()
        }),
        Err(_) => EngineSettings::default(),
    }
}

/// `(url, path_from, path_to)` from the environment, falling back to the
/// stored `sam_db_config` row.
async fn sam_target(
    local_pool: &sqlx::SqlitePool,
) -> Result<Option<(String, String, String)>, sqlx::Error> {
    if let Ok(url) = env::var("DESIZONE_SAM_URL") {
        return Ok(Some((url, String::new(), String::new())));
    }
    if let Ok(user) = env::var("DESIZONE_SAM_USER") {
        let password = env::var("DESIZONE_SAM_PASSWORD").unwrap_or_default();
        let enc_pw = urlencoding::encode(&password);
        let url = format!(
            "mysql://{}:{}@{}:{}/{}",
            user,
            enc_pw,
            env::var("DESIZONE_SAM_HOST").unwrap_or_else(|_| "127.0.0.1".into()),
            env_or("DESIZONE_SAM_PORT", 3306u16),
            env::var("DESIZONE_SAM_DATABASE").unwrap_or_else(|_| "samdb".into()),
        );
        return Ok(Some((url, String::new(), String::new())));
    }
    Ok(local::load_sam_db_config_full(local_pool)
        .await?
        .map(|cfg| {
            let enc_pw = urlencoding::encode(&cfg.password);
            let url = format!(
                "mysql://{}:{}@{}:{}/{}",
                cfg.config.username,
                enc_pw,
                cfg.config.host,
                cfg.config.port,
                cfg.config.database_name,
            );
            (url, cfg.config.path_prefix_from, cfg.config.path_prefix_to)
        }))
}

fn log_events(mut rx: broadcast::Receiver<EngineEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(EngineEvent::TrackSelected { outcome }) => log::info!(
                    "[autodj] queued song {} from slot '{}' via {} (relaxation: {})",
                    outcome.track_id,
                    outcome.slot_id,
                    outcome.method_used.as_str(),
                    outcome.relaxation.as_str(),
                ),
                Ok(EngineEvent::SelectionFailed { reason, slot_id }) => log::warn!(
                    "[autodj] selection failed ({}) slot={:?}",
                    reason,
                    slot_id
                ),
                Ok(event) => log::debug!("[autodj] {:?}", event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("[autodj] event log lagged, {} events dropped", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let db_path = env::var("DESIZONE_DB_PATH").unwrap_or_else(|_| "app.db".into());
    let local_pool = local::init_db(&db_path).await?;
    log::info!("[startup] local database ready at {}", db_path);

    let Some((url, path_from, path_to)) = sam_target(&local_pool).await? else {
        return Err("no SAM database configured (set DESIZONE_SAM_URL or DESIZONE_SAM_USER)".into());
    };
    let sam_pool = sam::connect(&url).await?;
    let library = Arc::new(sam::SamLibrary::new(sam_pool).with_path_translation(&path_from, &path_to));
    let store = Arc::new(local::SqliteStore::new(local_pool));
    log::info!("[startup] SAM DB connected");

    let engine = Arc::new(RotationEngine::new(
        library.clone(),
        library.clone(),
        store.clone(),
        store,
        engine_settings(),
    ));
    let events = log_events(engine.subscribe());

    let (tx, rx) = mpsc::channel(TRIGGER_CAPACITY);
    let driver = tokio::spawn(trigger::drive(engine.clone(), rx));
    let ticker = trigger::spawn_hour_ticker(tx.clone());
    // Announce the active slots for the current hour right away.
    tx.send(Trigger::HourTick).await?;

    let low_water: usize = env_or("DESIZONE_QUEUE_LOW_WATER", 2);
    let poll = Duration::from_secs(env_or("DESIZONE_POLL_SECS", 5u64).max(1));
    log::info!(
        "[startup] AutoDJ running (low water {}, poll every {:?})",
        low_water,
        poll
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("[autodj] shutting down");
                break;
            }
            _ = tokio::time::sleep(poll) => {
                match library.queued_track_ids().await {
                    Ok(ids) if ids.len() < low_water => {
                        if tx.send(Trigger::QueueEmpty).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => log::warn!("[autodj] queue poll failed: {}", e),
                }
            }
        }
    }

    ticker.abort();
    drop(tx);
    driver.await?;
    drop(engine);
    events.abort();
    Ok(())
}
