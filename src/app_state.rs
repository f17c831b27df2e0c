use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::claude_settings::{user_profile_dir, ClaudeSettings};
use crate::constants::{APP_DB_FILE, APP_DIR_NAME, APP_SETTINGS_FILE};
use crate::orchestrator::analytics::LogService;
use crate::orchestrator::config::AppConfig;
use crate::orchestrator::pricing::{ModelPricingTable, PricingLookup};
use crate::orchestrator::session::{SessionStore, SessionTtl, SweepHandle};
use crate::orchestrator::settings::AppSettingsStore;
use crate::orchestrator::store::RequestLogStore;

pub struct AppState {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub config: AppConfig,
    pub sessions: Arc<SessionStore>,
    pub request_logs: Arc<RequestLogStore>,
    pub logs: LogService,
    pub settings: AppSettingsStore,
    pub claude: ClaudeSettings,
}

impl AppState {
    /// Starts the periodic session sweep. Requires a tokio runtime.
    pub fn start_background_tasks(&self) -> SweepHandle {
        let interval = Duration::from_secs(self.config.sessions.sweep_interval_seconds);
        self.sessions.start_sweep(interval)
    }
}

/// `~/.code-switch`, or `./.code-switch` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    user_profile_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}

pub fn load_or_init_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        let txt = std::fs::read_to_string(path)
            .with_context(|| format!("read {}", path.display()))?;
        let cfg: AppConfig =
            toml::from_str(&txt).with_context(|| format!("parse {}", path.display()))?;
        return Ok(cfg);
    }
    let cfg = AppConfig::default_config();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, toml::to_string_pretty(&cfg)?)?;
    log::info!("wrote default config to {}", path.display());
    Ok(cfg)
}

fn load_pricing(cfg: &AppConfig, data_dir: &Path) -> ModelPricingTable {
    let Some(table_path) = cfg.pricing.table_path.as_deref().filter(|p| !p.trim().is_empty())
    else {
        return ModelPricingTable::empty();
    };
    let path = data_dir.join(table_path);
    match ModelPricingTable::load(&path) {
        Ok(table) => table,
        Err(e) => {
            log::warn!("pricing table {} unavailable: {e:#}", path.display());
            ModelPricingTable::empty()
        }
    }
}

pub fn build_state(config_path: PathBuf, data_dir: PathBuf) -> anyhow::Result<AppState> {
    let config = load_or_init_config(&config_path)?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("create {}", data_dir.display()))?;

    let db_path = data_dir.join(APP_DB_FILE);
    let sessions = Arc::new(
        SessionStore::open(&db_path, SessionTtl::from_config(&config.sessions))
            .with_context(|| format!("open session store {}", db_path.display()))?,
    );
    let request_logs = Arc::new(
        RequestLogStore::open(&db_path)
            .with_context(|| format!("open request log {}", db_path.display()))?,
    );
    let pricing: Arc<dyn PricingLookup> = Arc::new(load_pricing(&config, &data_dir));
    let logs = LogService::new(Arc::clone(&request_logs), pricing);
    let settings = AppSettingsStore::new(data_dir.join(APP_SETTINGS_FILE));
    let claude = ClaudeSettings::new(&config.relay.addr);

    Ok(AppState {
        config_path,
        data_dir,
        config,
        sessions,
        request_logs,
        logs,
        settings,
        claude,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::session::Platform;
    use crate::orchestrator::store::NewRequestLog;

    #[test]
    fn first_run_writes_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let cfg = load_or_init_config(&path).unwrap();
        assert_eq!(cfg.sessions.claude_ttl_seconds, 300);
        let txt = std::fs::read_to_string(&path).unwrap();
        assert!(txt.contains("codex_ttl_seconds = 900"));

        std::fs::write(&path, "[sessions]\nclaude_ttl_seconds = 60\n").unwrap();
        let cfg = load_or_init_config(&path).unwrap();
        assert_eq!(cfg.sessions.claude_ttl_seconds, 60);
        assert_eq!(cfg.sessions.codex_ttl_seconds, 900);
    }

    #[test]
    fn build_state_wires_stores_over_one_database() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path().join("config.toml"), tmp.path().join("data")).unwrap();

        // The request log table is created by the request path, not here.
        assert!(state.logs.list_request_logs("", "", 10).unwrap().is_empty());
        state.request_logs.ensure_schema().unwrap();
        state
            .request_logs
            .append(&NewRequestLog {
                platform: "codex".to_string(),
                provider: "p".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(state.logs.list_providers("").unwrap(), vec!["p"]);

        state.sessions.bind(Platform::Codex, "s1", "p").unwrap();
        assert_eq!(
            state.sessions.lookup(Platform::Codex, "s1").unwrap(),
            Some("p".to_string())
        );
        assert!(tmp.path().join("data").join(APP_DB_FILE).exists());
    }

    #[test]
    fn bad_pricing_path_falls_back_to_empty_table() {
        let tmp = tempfile::tempdir().unwrap();
        let config_path = tmp.path().join("config.toml");
        std::fs::write(&config_path, "[pricing]\ntable_path = \"missing.json\"\n").unwrap();
        let state = build_state(config_path, tmp.path().to_path_buf()).unwrap();
        state.request_logs.ensure_schema().unwrap();
        state
            .request_logs
            .append(&NewRequestLog {
                model: "claude-sonnet-4".to_string(),
                input_tokens: 10,
                ..Default::default()
            })
            .unwrap();
        let logs = state.logs.list_request_logs("", "", 1).unwrap();
        assert!(!logs[0].cost.has_pricing);
    }

    #[tokio::test]
    async fn background_tasks_stop_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let state = build_state(tmp.path().join("config.toml"), tmp.path().to_path_buf()).unwrap();
        let handle = state.start_background_tasks();
        assert!(!handle.is_finished());
        handle.stop().await;
    }
}
