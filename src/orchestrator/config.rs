use serde::{Deserialize, Serialize};

use crate::constants::{
    CLAUDE_SESSION_TTL_SECONDS, CODEX_SESSION_TTL_SECONDS, DEFAULT_RELAY_ADDR,
    SESSION_SWEEP_INTERVAL_SECONDS,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Gateway listen address. Only used here to derive the base URL written into client configs.
    pub addr: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_RELAY_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub claude_ttl_seconds: u64,
    pub codex_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            claude_ttl_seconds: CLAUDE_SESSION_TTL_SECONDS,
            codex_ttl_seconds: CODEX_SESSION_TTL_SECONDS,
            sweep_interval_seconds: SESSION_SWEEP_INTERVAL_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub rotation: LogRotation,
    /// Rotated files kept in the log dir, current one included. `0` keeps all.
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            rotation: LogRotation::Daily,
            max_files: 14,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Optional litellm-style pricing JSON. Relative paths resolve against the data dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub sessions: SessionConfig,
    pub log: LogConfig,
    pub pricing: PricingConfig,
}

impl AppConfig {
    pub fn default_config() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults_for_missing_fields() {
        let cfg: AppConfig = toml::from_str(
            r#"
[sessions]
codex_ttl_seconds = 60
"#,
        )
        .unwrap();
        assert_eq!(cfg.sessions.codex_ttl_seconds, 60);
        assert_eq!(cfg.sessions.claude_ttl_seconds, 300);
        assert_eq!(cfg.sessions.sweep_interval_seconds, 300);
        assert_eq!(cfg.relay.addr, ":18100");
        assert_eq!(cfg.log.rotation, LogRotation::Daily);
        assert_eq!(cfg.log.max_files, 14);
        assert!(cfg.pricing.table_path.is_none());
    }

    #[test]
    fn log_rotation_reads_lowercase_names() {
        let cfg: AppConfig = toml::from_str(
            r#"
[log]
rotation = "hourly"
max_files = 48
"#,
        )
        .unwrap();
        assert_eq!(cfg.log.rotation, LogRotation::Hourly);
        assert_eq!(cfg.log.max_files, 48);
        assert!(toml::from_str::<AppConfig>("[log]\nrotation = \"weekly\"\n").is_err());
    }
}
