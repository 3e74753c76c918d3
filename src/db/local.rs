//! Local SQLite store: station policy, rotation cursor and the request log.
//!
//! Policy objects are kept as single-row JSON documents so older rows keep
//! loading as fields are added (every config struct is `#[serde(default)]`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use super::ports::{ConfigStore, RequestLog};
use crate::error::StoreResult;
use crate::scheduler::clockwheel::RotationCursor;
use crate::scheduler::request_policy::{RequestLogEntry, RequestPolicy, RequestStatus};
use crate::scheduler::rotation::ClockwheelConfig;

/// Initialise (or migrate) the local SQLite database at `db_path`.
/// Creates all tables if they don't exist.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let url = format!("sqlite:{db_path}?mode=rwc");
    let pool = SqlitePool::connect(&url).await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

/// Private in-memory database. One connection, so every query sees the
/// same schema.
pub async fn init_memory_db() -> Result<SqlitePool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    run_migrations(&pool).await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        -- SAM-style clockwheel config + runtime cursor
        CREATE TABLE IF NOT EXISTS autodj_clockwheel_config (
            id           INTEGER PRIMARY KEY DEFAULT 1,
            config_json  TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS autodj_clockwheel_state (
            id           INTEGER PRIMARY KEY DEFAULT 1,
            next_index   INTEGER NOT NULL DEFAULT 0,
            positions_json TEXT  NOT NULL DEFAULT '{}',
            updated_at   INTEGER NOT NULL DEFAULT (strftime('%s','now'))
        );

        -- Request policy
        CREATE TABLE IF NOT EXISTS request_policy (
            id          INTEGER PRIMARY KEY DEFAULT 1,
            policy_json TEXT    NOT NULL
        );

        CREATE TABLE IF NOT EXISTS request_log (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            song_id            INTEGER NOT NULL,
            song_title         TEXT,
            artist             TEXT,
            album              TEXT,
            requester_name     TEXT,
            requester_platform TEXT,
            requester_ip       TEXT,
            requested_at       INTEGER DEFAULT (strftime('%s', 'now')),
            status             TEXT    DEFAULT 'pending',
            rejection_reason   TEXT,
            played_at          INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_request_log_requested_at
            ON request_log(requested_at);

        -- SAM Broadcaster MySQL connection settings
        CREATE TABLE IF NOT EXISTS sam_db_config (
            id               INTEGER PRIMARY KEY DEFAULT 1,
            host             TEXT    NOT NULL DEFAULT '127.0.0.1',
            port             INTEGER NOT NULL DEFAULT 3306,
            username         TEXT    NOT NULL DEFAULT '',
            password         TEXT    NOT NULL DEFAULT '',
            database_name    TEXT    NOT NULL DEFAULT 'samdb',
            path_prefix_from TEXT    NOT NULL DEFAULT '',
            path_prefix_to   TEXT    NOT NULL DEFAULT ''
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Backward-compat migrations for DBs created before the cursor held
    // playlist positions and before requests recorded the album.
    let _ = sqlx::query(
        "ALTER TABLE autodj_clockwheel_state ADD COLUMN positions_json TEXT NOT NULL DEFAULT '{}'",
    )
    .execute(pool)
    .await;
    let _ = sqlx::query("ALTER TABLE request_log ADD COLUMN album TEXT")
        .execute(pool)
        .await;

    Ok(())
}

// ── Clockwheel config / cursor ───────────────────────────────────────────────

/// Load the clockwheel; a missing or unreadable row yields the default.
pub async fn get_clockwheel_config(pool: &SqlitePool) -> Result<ClockwheelConfig, sqlx::Error> {
    let row: Option<String> =
        sqlx::query_scalar("SELECT config_json FROM autodj_clockwheel_config WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    let cfg = match row {
        Some(json) => serde_json::from_str::<ClockwheelConfig>(&json).unwrap_or_else(|e| {
            log::warn!("[local_db] clockwheel config unreadable, using defaults: {}", e);
            ClockwheelConfig::default()
        }),
        None => ClockwheelConfig::default(),
    };
    Ok(cfg.normalized())
}

pub async fn save_clockwheel_config(
    pool: &SqlitePool,
    config: &ClockwheelConfig,
) -> StoreResult<()> {
    let json = serde_json::to_string(&config.clone().normalized())?;
    sqlx::query(
        r#"
        INSERT INTO autodj_clockwheel_config (id, config_json)
        VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET config_json = excluded.config_json
        "#,
    )
    .bind(&json)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_clockwheel_cursor(pool: &SqlitePool) -> Result<RotationCursor, sqlx::Error> {
    let row = sqlx::query(
        "SELECT next_index, positions_json FROM autodj_clockwheel_state WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    let Some(r) = row else {
        return Ok(RotationCursor::default());
    };
    let positions: String = r.get("positions_json");
    Ok(RotationCursor {
        next_slot: r.get::<i64, _>("next_index").max(0) as usize,
        playlist_positions: serde_json::from_str(&positions).unwrap_or_default(),
    })
}

pub async fn save_clockwheel_cursor(pool: &SqlitePool, cursor: &RotationCursor) -> StoreResult<()> {
    let positions = serde_json::to_string(&cursor.playlist_positions)?;
    sqlx::query(
        r#"
        INSERT INTO autodj_clockwheel_state (id, next_index, positions_json, updated_at)
        VALUES (1, ?, ?, strftime('%s','now'))
        ON CONFLICT(id) DO UPDATE SET
          next_index = excluded.next_index,
          positions_json = excluded.positions_json,
          updated_at = excluded.updated_at
        "#,
    )
    .bind(cursor.next_slot as i64)
    .bind(&positions)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Request policy / log ─────────────────────────────────────────────────────

pub async fn load_policy(pool: &SqlitePool) -> Result<RequestPolicy, sqlx::Error> {
    let row = sqlx::query("SELECT policy_json FROM request_policy WHERE id = 1")
        .fetch_optional(pool)
        .await?;

    if let Some(r) = row {
        let json: String = r.get("policy_json");
        Ok(serde_json::from_str(&json).unwrap_or_else(|e| {
            log::warn!("[local_db] request policy unreadable, using defaults: {}", e);
            RequestPolicy::default()
        }))
    } else {
        Ok(RequestPolicy::default())
    }
}

pub async fn save_policy(pool: &SqlitePool, policy: &RequestPolicy) -> StoreResult<()> {
    let json = serde_json::to_string(policy)?;
    sqlx::query(
        "INSERT INTO request_policy (id, policy_json) VALUES (1, ?) ON CONFLICT(id) DO UPDATE SET policy_json = excluded.policy_json"
    )
    .bind(&json)
    .execute(pool)
    .await?;
    Ok(())
}

const REQUEST_COLUMNS: &str = "id, song_id, song_title, artist, album, requester_name, \
     requester_platform, requester_ip, requested_at, status, rejection_reason, played_at";

fn row_to_entry(r: &SqliteRow) -> RequestLogEntry {
    RequestLogEntry {
        id: r.get("id"),
        song_id: r.get("song_id"),
        song_title: r.get("song_title"),
        artist: r.get("artist"),
        album: r.get("album"),
        requester_name: r.get("requester_name"),
        requester_platform: r.get("requester_platform"),
        requester_ip: r.get("requester_ip"),
        requested_at: r.get::<Option<i64>, _>("requested_at").unwrap_or(0),
        status: RequestStatus::parse(
            r.get::<Option<String>, _>("status").as_deref().unwrap_or("pending"),
        ),
        rejection_reason: r.get("rejection_reason"),
        played_at: r.get("played_at"),
    }
}

pub async fn insert_request(pool: &SqlitePool, entry: &RequestLogEntry) -> Result<i64, sqlx::Error> {
    let r = sqlx::query(
        "INSERT INTO request_log (song_id, song_title, artist, album, requester_name, requester_platform, requester_ip, requested_at, status, rejection_reason) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    )
    .bind(entry.song_id)
    .bind(&entry.song_title)
    .bind(&entry.artist)
    .bind(&entry.album)
    .bind(&entry.requester_name)
    .bind(&entry.requester_platform)
    .bind(&entry.requester_ip)
    .bind(entry.requested_at)
    .bind(entry.status.as_str())
    .bind(&entry.rejection_reason)
    .execute(pool)
    .await?;
    Ok(r.last_insert_rowid())
}

pub async fn get_request(pool: &SqlitePool, id: i64) -> Result<Option<RequestLogEntry>, sqlx::Error> {
    let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM request_log WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(row_to_entry))
}

pub async fn update_request_status(
    pool: &SqlitePool,
    id: i64,
    status: RequestStatus,
    reason: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE request_log SET status = ?, rejection_reason = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(reason)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_request_played(
    pool: &SqlitePool,
    id: i64,
    played_at: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE request_log SET status = 'played', played_at = ? WHERE id = ?")
        .bind(played_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn get_requests_since(
    pool: &SqlitePool,
    since: i64,
) -> Result<Vec<RequestLogEntry>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request_log WHERE requested_at > ? ORDER BY requested_at ASC"
    ))
    .bind(since)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_entry).collect())
}

pub async fn get_requests(
    pool: &SqlitePool,
    status: RequestStatus,
    limit: i64,
) -> Result<Vec<RequestLogEntry>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request_log WHERE status = ? \
         ORDER BY requested_at ASC, id ASC LIMIT ?"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_entry).collect())
}

pub async fn get_request_history(
    pool: &SqlitePool,
    limit: i64,
    offset: i64,
) -> Result<Vec<RequestLogEntry>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        "SELECT {REQUEST_COLUMNS} FROM request_log \
         ORDER BY requested_at DESC, id DESC LIMIT ? OFFSET ?"
    ))
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(row_to_entry).collect())
}

// ── SAM DB config ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SamDbConfig {
    pub host: String,
    pub port: i64,
    pub username: String,
    pub database_name: String,
    /// Windows-style path prefix to replace (e.g. `C:\Music\`). Empty = no translation.
    pub path_prefix_from: String,
    /// Local path to substitute in (e.g. `/Volumes/Music/`). Empty = no translation.
    pub path_prefix_to: String,
}

impl Default for SamDbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3306,
            username: String::new(),
            database_name: "samdb".into(),
            path_prefix_from: String::new(),
            path_prefix_to: String::new(),
        }
    }
}

/// Config row plus the stored password, for connecting at startup.
pub struct SamDbConfigFull {
    pub config: SamDbConfig,
    pub password: String,
}

pub async fn load_sam_db_config_full(
    pool: &SqlitePool,
) -> Result<Option<SamDbConfigFull>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT host, port, username, password, database_name, \
         path_prefix_from, path_prefix_to FROM sam_db_config WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| SamDbConfigFull {
        password: r.get("password"),
        config: SamDbConfig {
            host: r.get("host"),
            port: r.get("port"),
            username: r.get("username"),
            database_name: r.get("database_name"),
            path_prefix_from: r.get("path_prefix_from"),
            path_prefix_to: r.get("path_prefix_to"),
        },
    }))
}

/// Save SAM DB config including password (stored locally only).
pub async fn save_sam_db_config(
    pool: &SqlitePool,
    config: &SamDbConfig,
    password: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO sam_db_config
            (id, host, port, username, password, database_name,
             path_prefix_from, path_prefix_to)
        VALUES (1, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            host             = excluded.host,
            port             = excluded.port,
            username         = excluded.username,
            password         = excluded.password,
            database_name    = excluded.database_name,
            path_prefix_from = excluded.path_prefix_from,
            path_prefix_to   = excluded.path_prefix_to
        "#,
    )
    .bind(&config.host)
    .bind(config.port)
    .bind(&config.username)
    .bind(password)
    .bind(&config.database_name)
    .bind(&config.path_prefix_from)
    .bind(&config.path_prefix_to)
    .execute(pool)
    .await?;
    Ok(())
}

// ── Port implementations ─────────────────────────────────────────────────────

/// SQLite-backed [`ConfigStore`] and [`RequestLog`].
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load_clockwheel_config(&self) -> StoreResult<ClockwheelConfig> {
        Ok(get_clockwheel_config(&self.pool).await?)
    }

    async fn load_request_policy(&self) -> StoreResult<RequestPolicy> {
        Ok(load_policy(&self.pool).await?)
    }

    async fn load_rotation_state(&self) -> StoreResult<RotationCursor> {
        Ok(load_clockwheel_cursor(&self.pool).await?)
    }

    async fn save_rotation_state(&self, cursor: &RotationCursor) -> StoreResult<()> {
        save_clockwheel_cursor(&self.pool, cursor).await
    }
}

#[async_trait]
impl RequestLog for SqliteStore {
    async fn insert(&self, entry: &RequestLogEntry) -> StoreResult<i64> {
        Ok(insert_request(&self.pool, entry).await?)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<RequestLogEntry>> {
        Ok(get_request(&self.pool, id).await?)
    }

    async fn update_status(
        &self,
        id: i64,
        status: RequestStatus,
        reason: Option<&str>,
    ) -> StoreResult<()> {
        Ok(update_request_status(&self.pool, id, status, reason).await?)
    }

    async fn mark_played(&self, id: i64, played_at: i64) -> StoreResult<()> {
        Ok(mark_request_played(&self.pool, id, played_at).await?)
    }

    async fn requested_since(&self, since: i64) -> StoreResult<Vec<RequestLogEntry>> {
        Ok(get_requests_since(&self.pool, since).await?)
    }

    async fn by_status(
        &self,
        status: RequestStatus,
        limit: usize,
    ) -> StoreResult<Vec<RequestLogEntry>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(get_requests(&self.pool, status, limit).await?)
    }

    async fn history(&self, limit: i64, offset: i64) -> StoreResult<Vec<RequestLogEntry>> {
        Ok(get_request_history(&self.pool, limit, offset).await?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
