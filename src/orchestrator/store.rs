use std::path::Path;
use std::time::Duration;

use chrono::{Local, TimeZone};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, Row};

use super::error::StoreResult;

mod time_keys;

pub use time_keys::{
    format_local, local_from_naive, parse_created_at, prefilter_key, start_of_day,
    start_of_hour, unix_ms, TIME_LAYOUT,
};

pub(crate) const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) fn open_connection(path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

/// One row of `request_log` as written by the request path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestLogRow {
    pub id: i64,
    pub platform: String,
    pub model: String,
    pub provider: String,
    pub http_code: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
    pub created_at: String,
}

/// Input for [`RequestLogStore::append`].
#[derive(Debug, Clone, Default)]
pub struct NewRequestLog {
    pub platform: String,
    pub model: String,
    pub provider: String,
    pub http_code: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub is_stream: bool,
    pub duration_sec: f64,
    /// Defaults to the current local time in [`TIME_LAYOUT`].
    pub created_at: Option<String>,
}

/// Token sums for one row as consumed by the aggregation views.
#[derive(Debug, Clone, Default)]
pub(crate) struct UsageRow {
    pub provider: String,
    pub model: String,
    pub http_code: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_create_tokens: i64,
    pub cache_read_tokens: i64,
    pub reasoning_tokens: i64,
    pub created_at: String,
}

/// Append-only request log. The analytics engine only reads from it.
pub struct RequestLogStore {
    conn: Mutex<Connection>,
}

const SELECT_COLUMNS: &str = "id, platform, model, provider, http_code,
    input_tokens, output_tokens, cache_create_tokens, cache_read_tokens, reasoning_tokens,
    is_stream, duration_sec, created_at";

impl RequestLogStore {
    /// Opens the database without creating `request_log`; readers must cope with it missing.
    pub fn open(path: &Path) -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(open_connection(path)?),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    pub fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS request_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT DEFAULT '',
                model TEXT DEFAULT '',
                provider TEXT DEFAULT '',
                http_code INTEGER DEFAULT 0,
                input_tokens INTEGER DEFAULT 0,
                output_tokens INTEGER DEFAULT 0,
                cache_create_tokens INTEGER DEFAULT 0,
                cache_read_tokens INTEGER DEFAULT 0,
                reasoning_tokens INTEGER DEFAULT 0,
                is_stream INTEGER DEFAULT 0,
                duration_sec REAL DEFAULT 0,
                created_at DATETIME
             );
             CREATE INDEX IF NOT EXISTS idx_request_log_created_at ON request_log(created_at);
             CREATE INDEX IF NOT EXISTS idx_request_log_platform ON request_log(platform);",
        )?;
        Ok(())
    }

    pub fn append(&self, entry: &NewRequestLog) -> StoreResult<i64> {
        let created_at = entry
            .created_at
            .clone()
            .unwrap_or_else(|| format_local(&Local::now()));
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO request_log (platform, model, provider, http_code,
                input_tokens, output_tokens, cache_create_tokens, cache_read_tokens, reasoning_tokens,
                is_stream, duration_sec, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                entry.platform,
                entry.model,
                entry.provider,
                entry.http_code,
                entry.input_tokens,
                entry.output_tokens,
                entry.cache_create_tokens,
                entry.cache_read_tokens,
                entry.reasoning_tokens,
                entry.is_stream,
                entry.duration_sec,
                created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest-first rows, optionally filtered. Empty filters match everything.
    pub fn list_recent(
        &self,
        platform: &str,
        provider: &str,
        limit: usize,
    ) -> StoreResult<Vec<RequestLogRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS}
             FROM request_log
             WHERE (?1 = '' OR platform = ?1) AND (?2 = '' OR provider = ?2)
             ORDER BY id DESC
             LIMIT ?3"
        ))?;
        let rows = stmt.query_map(params![platform, provider, limit as i64], read_log_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Distinct, trimmed, non-empty provider names in ascending order.
    pub fn distinct_providers(&self, platform: &str) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT TRIM(provider) AS provider
             FROM request_log
             WHERE TRIM(COALESCE(provider, '')) <> '' AND (?1 = '' OR platform = ?1)
             ORDER BY provider ASC",
        )?;
        let rows = stmt.query_map(params![platform], |row| row.get::<_, String>(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Rows whose `created_at` text sorts at or after `since_key`.
    ///
    /// The textual comparison is only a coarse prefilter; callers re-check the
    /// parsed timestamp against their exact window.
    pub(crate) fn usage_rows_since(
        &self,
        since_key: &str,
        platform: &str,
    ) -> StoreResult<Vec<UsageRow>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT provider, model, http_code,
                input_tokens, output_tokens, cache_create_tokens, cache_read_tokens, reasoning_tokens,
                created_at
             FROM request_log
             WHERE (typeof(created_at) = 'integer' OR created_at >= ?1)
               AND (?2 = '' OR platform = ?2)",
        )?;
        let rows = stmt.query_map(params![since_key, platform], |row| {
            Ok(UsageRow {
                provider: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                model: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                http_code: int_or_zero(row, 2)?,
                input_tokens: int_or_zero(row, 3)?,
                output_tokens: int_or_zero(row, 4)?,
                cache_create_tokens: int_or_zero(row, 5)?,
                cache_read_tokens: int_or_zero(row, 6)?,
                reasoning_tokens: int_or_zero(row, 7)?,
                created_at: created_at_text(row, 8)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn read_log_row(row: &Row<'_>) -> rusqlite::Result<RequestLogRow> {
    Ok(RequestLogRow {
        id: row.get(0)?,
        platform: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        model: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        provider: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        http_code: int_or_zero(row, 4)?,
        input_tokens: int_or_zero(row, 5)?,
        output_tokens: int_or_zero(row, 6)?,
        cache_create_tokens: int_or_zero(row, 7)?,
        cache_read_tokens: int_or_zero(row, 8)?,
        reasoning_tokens: int_or_zero(row, 9)?,
        is_stream: int_or_zero(row, 10)? != 0,
        duration_sec: row.get::<_, Option<f64>>(11)?.unwrap_or(0.0),
        created_at: created_at_text(row, 12)?,
    })
}

fn int_or_zero(row: &Row<'_>, idx: usize) -> rusqlite::Result<i64> {
    Ok(row.get::<_, Option<i64>>(idx)?.unwrap_or(0))
}

fn created_at_text(row: &Row<'_>, idx: usize) -> rusqlite::Result<String> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Text(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        // Some writers stored unix seconds.
        ValueRef::Integer(secs) => Local
            .timestamp_opt(secs, 0)
            .single()
            .map(|dt| format_local(&dt))
            .unwrap_or_default(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests;
