pub const PLATFORM_CLAUDE: &str = "claude";
pub const PLATFORM_CODEX: &str = "codex";

pub const CLAUDE_SESSION_TTL_SECONDS: u64 = 5 * 60;
pub const CODEX_SESSION_TTL_SECONDS: u64 = 15 * 60;
pub const SESSION_SWEEP_INTERVAL_SECONDS: u64 = 5 * 60;

pub const UNKNOWN_PROVIDER_LABEL: &str = "(unknown)";
pub const DEFAULT_RELAY_ADDR: &str = ":18100";

pub const APP_DIR_NAME: &str = ".code-switch";
pub const APP_SETTINGS_FILE: &str = "app.json";
pub const APP_CONFIG_FILE: &str = "config.toml";
pub const APP_DB_FILE: &str = "app.db";
pub const APP_LOG_PREFIX: &str = "app";
pub const APP_LOG_SUFFIX: &str = "log";
