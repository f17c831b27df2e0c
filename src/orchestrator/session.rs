use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::config::SessionConfig;
use super::error::{StoreError, StoreResult};
use super::store::{open_connection, unix_ms};
use crate::constants::{PLATFORM_CLAUDE, PLATFORM_CODEX, SESSION_SWEEP_INTERVAL_SECONDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    Codex,
}

impl Platform {
    pub const ALL: [Platform; 2] = [Platform::Claude, Platform::Codex];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Claude => PLATFORM_CLAUDE,
            Platform::Codex => PLATFORM_CODEX,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            PLATFORM_CLAUDE => Ok(Platform::Claude),
            PLATFORM_CODEX => Ok(Platform::Codex),
            other => Err(StoreError::InvalidArgument(format!(
                "unknown platform: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionBinding {
    pub platform: Platform,
    pub session_id: String,
    pub provider_name: String,
    pub last_success_at_unix_ms: u64,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionTtl {
    pub claude: Duration,
    pub codex: Duration,
}

impl SessionTtl {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            claude: Duration::from_secs(cfg.claude_ttl_seconds),
            codex: Duration::from_secs(cfg.codex_ttl_seconds),
        }
    }

    pub fn for_platform(&self, platform: Platform) -> Duration {
        match platform {
            Platform::Claude => self.claude,
            Platform::Codex => self.codex,
        }
    }

    fn millis(&self, platform: Platform) -> u64 {
        self.for_platform(platform).as_millis() as u64
    }
}

impl Default for SessionTtl {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

/// Sticky (platform, session) -> provider bindings with per-platform TTL.
///
/// Every operation holds the connection lock for its whole read-modify-write,
/// so a lookup never observes a binding that another caller is expiring.
pub struct SessionStore {
    conn: Mutex<Connection>,
    ttl: SessionTtl,
}

impl SessionStore {
    pub fn open(path: &Path, ttl: SessionTtl) -> StoreResult<Self> {
        Self::with_connection(open_connection(path)?, ttl)
    }

    pub fn open_in_memory(ttl: SessionTtl) -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, ttl)
    }

    fn with_connection(conn: Connection, ttl: SessionTtl) -> StoreResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS session_provider_binding (
                platform TEXT NOT NULL,
                session_id TEXT NOT NULL,
                provider_name TEXT NOT NULL,
                last_success_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (platform, session_id)
             );
             CREATE INDEX IF NOT EXISTS idx_session_binding_provider
                ON session_provider_binding(provider_name);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
        })
    }

    fn expired(&self, platform: Platform, last_success_at: u64, now_ms: u64) -> bool {
        now_ms.saturating_sub(last_success_at) > self.ttl.millis(platform)
    }

    pub fn lookup(&self, platform: Platform, session_id: &str) -> StoreResult<Option<String>> {
        self.lookup_at(platform, session_id, unix_ms())
    }

    /// Returns the bound provider, deleting the binding first if it has expired.
    pub fn lookup_at(
        &self,
        platform: Platform,
        session_id: &str,
        now_ms: u64,
    ) -> StoreResult<Option<String>> {
        if session_id.is_empty() {
            return Ok(None);
        }
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT provider_name, last_success_at FROM session_provider_binding
                 WHERE platform = ?1 AND session_id = ?2",
                params![platform.as_str(), session_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
            )
            .optional()?;
        let Some((provider, last_success_at)) = row else {
            return Ok(None);
        };
        if self.expired(platform, last_success_at.max(0) as u64, now_ms) {
            if let Err(e) = conn.execute(
                "DELETE FROM session_provider_binding WHERE platform = ?1 AND session_id = ?2",
                params![platform.as_str(), session_id],
            ) {
                log::warn!("failed to delete expired session {platform}/{session_id}: {e}");
            }
            return Ok(None);
        }
        Ok(Some(provider))
    }

    pub fn bind(&self, platform: Platform, session_id: &str, provider: &str) -> StoreResult<()> {
        self.bind_at(platform, session_id, provider, unix_ms())
    }

    /// Upserts the binding. Empty session or provider is a no-op.
    pub fn bind_at(
        &self,
        platform: Platform,
        session_id: &str,
        provider: &str,
        now_ms: u64,
    ) -> StoreResult<()> {
        if session_id.is_empty() || provider.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO session_provider_binding
                (platform, session_id, provider_name, last_success_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(platform, session_id) DO UPDATE SET
                provider_name = excluded.provider_name,
                last_success_at = excluded.last_success_at",
            params![platform.as_str(), session_id, provider, now_ms as i64],
        )?;
        log::info!("session bound: {platform}/{session_id} -> {provider}");
        Ok(())
    }

    pub fn touch(&self, platform: Platform, session_id: &str) -> StoreResult<bool> {
        self.touch_at(platform, session_id, unix_ms())
    }

    /// Refreshes `last_success_at` of an existing binding. Returns whether one existed.
    pub fn touch_at(&self, platform: Platform, session_id: &str, now_ms: u64) -> StoreResult<bool> {
        if session_id.is_empty() {
            return Ok(false);
        }
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE session_provider_binding SET last_success_at = ?3
             WHERE platform = ?1 AND session_id = ?2",
            params![platform.as_str(), session_id, now_ms as i64],
        )?;
        if changed > 0 {
            log::info!("session refreshed: {platform}/{session_id}");
        }
        Ok(changed > 0)
    }

    pub fn is_expired(&self, platform: Platform, session_id: &str) -> StoreResult<bool> {
        self.is_expired_at(platform, session_id, unix_ms())
    }

    pub fn is_expired_at(
        &self,
        platform: Platform,
        session_id: &str,
        now_ms: u64,
    ) -> StoreResult<bool> {
        Ok(match self.peek(platform, session_id)? {
            Some(b) => self.expired(platform, b.last_success_at_unix_ms, now_ms),
            None => true,
        })
    }

    /// Reads a binding without any expiry handling.
    pub fn peek(&self, platform: Platform, session_id: &str) -> StoreResult<Option<SessionBinding>> {
        let conn = self.conn.lock();
        let binding = conn
            .query_row(
                "SELECT provider_name, last_success_at, created_at FROM session_provider_binding
                 WHERE platform = ?1 AND session_id = ?2",
                params![platform.as_str(), session_id],
                |row| {
                    Ok(SessionBinding {
                        platform,
                        session_id: session_id.to_string(),
                        provider_name: row.get(0)?,
                        last_success_at_unix_ms: row.get::<_, i64>(1)?.max(0) as u64,
                        created_at_unix_ms: row.get::<_, i64>(2)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(binding)
    }

    pub fn unbind(&self, platform: Platform, session_id: &str) -> StoreResult<()> {
        if session_id.is_empty() {
            return Err(StoreError::InvalidArgument(
                "session id must not be empty".to_string(),
            ));
        }
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM session_provider_binding WHERE platform = ?1 AND session_id = ?2",
            params![platform.as_str(), session_id],
        )?;
        if removed > 0 {
            log::info!("session unbound: {platform}/{session_id}");
        }
        Ok(())
    }

    pub fn list_by_provider(&self, provider: &str) -> StoreResult<Vec<SessionBinding>> {
        self.list_by_provider_at(provider, unix_ms())
    }

    /// Live bindings for `provider`, most recently active first. Expired rows are
    /// skipped but left for the sweep.
    pub fn list_by_provider_at(
        &self,
        provider: &str,
        now_ms: u64,
    ) -> StoreResult<Vec<SessionBinding>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT platform, session_id, provider_name, last_success_at, created_at
             FROM session_provider_binding
             WHERE provider_name = ?1
             ORDER BY last_success_at DESC, session_id ASC",
        )?;
        let rows = stmt.query_map(params![provider], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (platform, session_id, provider_name, last, created) = row?;
            let Ok(platform) = platform.parse::<Platform>() else {
                continue;
            };
            let last = last.max(0) as u64;
            if self.expired(platform, last, now_ms) {
                continue;
            }
            out.push(SessionBinding {
                platform,
                session_id,
                provider_name,
                last_success_at_unix_ms: last,
                created_at_unix_ms: created.max(0) as u64,
            });
        }
        Ok(out)
    }

    pub fn sweep_expired(&self) -> StoreResult<usize> {
        self.sweep_expired_at(unix_ms())
    }

    /// Deletes every binding older than its platform's TTL.
    pub fn sweep_expired_at(&self, now_ms: u64) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let mut removed = 0;
        for platform in Platform::ALL {
            removed += conn.execute(
                "DELETE FROM session_provider_binding
                 WHERE platform = ?1 AND ?2 - last_success_at > ?3",
                params![
                    platform.as_str(),
                    now_ms as i64,
                    self.ttl.millis(platform) as i64
                ],
            )?;
        }
        if removed > 0 {
            log::info!("session sweep removed {removed} expired bindings");
        }
        Ok(removed)
    }

    pub fn binding_count(&self) -> StoreResult<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_provider_binding",
            [],
            |row| row.get(0),
        )?;
        Ok(n.max(0) as usize)
    }

    /// Spawns the periodic sweep on the current tokio runtime.
    pub fn start_sweep(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let interval = if interval.is_zero() {
            Duration::from_secs(SESSION_SWEEP_INTERVAL_SECONDS)
        } else {
            interval
        };
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let store = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = store.sweep_expired() {
                            log::error!("session sweep failed: {e}");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            log::debug!("session sweep stopped");
        });
        log::info!("session sweep started, interval {}s", interval.as_secs());
        SweepHandle { stop_tx, task }
    }
}

/// Owns the background sweep task. Dropping it without `stop` detaches the task.
pub struct SweepHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            log::warn!("session sweep task ended abnormally: {e}");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
