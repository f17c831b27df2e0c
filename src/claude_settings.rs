use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::constants::DEFAULT_RELAY_ADDR;

const CLAUDE_DIR: &str = ".claude";
const SETTINGS_FILE: &str = "settings.json";
const BACKUP_FILE: &str = "cc-studio.back.settings.json";
const AUTH_TOKEN_VALUE: &str = "code-switch";
const ENV_AUTH_TOKEN: &str = "ANTHROPIC_AUTH_TOKEN";
const ENV_BASE_URL: &str = "ANTHROPIC_BASE_URL";

pub(crate) fn user_profile_dir() -> Option<PathBuf> {
    std::env::var("USERPROFILE")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaudeProxyStatus {
    pub enabled: bool,
    pub base_url: String,
}

/// Points the Claude CLI at the local relay by editing `~/.claude/settings.json`,
/// keeping a verbatim backup of whatever was there before.
pub struct ClaudeSettings {
    relay_addr: String,
    home: Option<PathBuf>,
}

impl ClaudeSettings {
    pub fn new(relay_addr: &str) -> Self {
        Self {
            relay_addr: relay_addr.to_string(),
            home: user_profile_dir(),
        }
    }

    pub fn with_home(relay_addr: &str, home: PathBuf) -> Self {
        Self {
            relay_addr: relay_addr.to_string(),
            home: Some(home),
        }
    }

    fn paths(&self) -> anyhow::Result<(PathBuf, PathBuf)> {
        let home = self
            .home
            .as_ref()
            .context("missing HOME/USERPROFILE")?;
        let dir = home.join(CLAUDE_DIR);
        Ok((dir.join(SETTINGS_FILE), dir.join(BACKUP_FILE)))
    }

    pub fn base_url(&self) -> String {
        let addr = self.relay_addr.trim();
        let addr = if addr.is_empty() { DEFAULT_RELAY_ADDR } else { addr };
        if addr.starts_with("http://") || addr.starts_with("https://") {
            return addr.to_string();
        }
        let host = if addr.starts_with(':') {
            format!("127.0.0.1{addr}")
        } else {
            addr.to_string()
        };
        if host.contains("://") {
            host
        } else {
            format!("http://{host}")
        }
    }

    /// An absent or unreadable-as-JSON settings file reports "disabled".
    pub fn proxy_status(&self) -> anyhow::Result<ClaudeProxyStatus> {
        let base_url = self.base_url();
        let (settings_path, _) = self.paths()?;
        let txt = match std::fs::read_to_string(&settings_path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ClaudeProxyStatus {
                    enabled: false,
                    base_url,
                })
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", settings_path.display()))
            }
        };
        let env_value = |v: &Value, key: &str| -> String {
            v.get("env")
                .and_then(|env| env.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let enabled = match serde_json::from_str::<Value>(&txt) {
            Ok(v) => {
                env_value(&v, ENV_AUTH_TOKEN).eq_ignore_ascii_case(AUTH_TOKEN_VALUE)
                    && env_value(&v, ENV_BASE_URL).eq_ignore_ascii_case(&base_url)
            }
            Err(_) => false,
        };
        Ok(ClaudeProxyStatus { enabled, base_url })
    }

    pub fn enable_proxy(&self) -> anyhow::Result<()> {
        let (settings_path, backup_path) = self.paths()?;
        let mut root = Map::new();
        if settings_path.exists() {
            let content = std::fs::read(&settings_path)
                .with_context(|| format!("read {}", settings_path.display()))?;
            write_private(&backup_path, &content)?;
            if let Ok(Value::Object(existing)) = serde_json::from_slice::<Value>(&content) {
                root = existing;
            }
        }

        let mut env = match root.remove("env") {
            Some(Value::Object(env)) => env,
            _ => Map::new(),
        };
        env.insert(ENV_AUTH_TOKEN.to_string(), Value::from(AUTH_TOKEN_VALUE));
        env.insert(ENV_BASE_URL.to_string(), Value::from(self.base_url()));
        root.insert("env".to_string(), Value::Object(env));

        let txt = serde_json::to_string_pretty(&Value::Object(root))?;
        write_private(&settings_path, txt.as_bytes())?;
        log::info!("claude proxy enabled -> {}", self.base_url());
        Ok(())
    }

    /// Removes the managed settings file and puts the backup back if there is one.
    pub fn disable_proxy(&self) -> anyhow::Result<()> {
        let (settings_path, backup_path) = self.paths()?;
        match std::fs::remove_file(&settings_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("remove {}", settings_path.display()))
            }
        }
        if backup_path.exists() {
            std::fs::rename(&backup_path, &settings_path).with_context(|| {
                format!(
                    "restore {} -> {}",
                    backup_path.display(),
                    settings_path.display()
                )
            })?;
        }
        log::info!("claude proxy disabled");
        Ok(())
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("chmod {}", path.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_in(tmp: &tempfile::TempDir) -> ClaudeSettings {
        ClaudeSettings::with_home(":18100", tmp.path().to_path_buf())
    }

    fn settings_path(tmp: &tempfile::TempDir) -> PathBuf {
        tmp.path().join(CLAUDE_DIR).join(SETTINGS_FILE)
    }

    #[test]
    fn base_url_normalisation() {
        let home = PathBuf::from("/nowhere");
        let url = |addr: &str| ClaudeSettings::with_home(addr, home.clone()).base_url();
        assert_eq!(url(""), "http://127.0.0.1:18100");
        assert_eq!(url(":9000"), "http://127.0.0.1:9000");
        assert_eq!(url("localhost:9000"), "http://localhost:9000");
        assert_eq!(url("https://relay.example"), "https://relay.example");
    }

    #[test]
    fn status_without_file_is_disabled() {
        let tmp = tempfile::tempdir().unwrap();
        let status = settings_in(&tmp).proxy_status().unwrap();
        assert!(!status.enabled);
        assert_eq!(status.base_url, "http://127.0.0.1:18100");

        std::fs::create_dir_all(settings_path(&tmp).parent().unwrap()).unwrap();
        std::fs::write(settings_path(&tmp), "not json").unwrap();
        assert!(!settings_in(&tmp).proxy_status().unwrap().enabled);
    }

    #[test]
    fn enable_merges_env_and_disable_restores_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let path = settings_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let original = r#"{"model":"opus","env":{"KEEP":"1","ANTHROPIC_BASE_URL":"https://x"}}"#;
        std::fs::write(&path, original).unwrap();

        let s = settings_in(&tmp);
        s.enable_proxy().unwrap();
        assert!(s.proxy_status().unwrap().enabled);

        let merged: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(merged["model"], "opus");
        assert_eq!(merged["env"]["KEEP"], "1");
        assert_eq!(merged["env"][ENV_AUTH_TOKEN], AUTH_TOKEN_VALUE);
        assert_eq!(merged["env"][ENV_BASE_URL], "http://127.0.0.1:18100");
        assert_eq!(
            std::fs::read_to_string(path.with_file_name(BACKUP_FILE)).unwrap(),
            original
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        s.disable_proxy().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert!(!path.with_file_name(BACKUP_FILE).exists());
        assert!(!s.proxy_status().unwrap().enabled);
    }

    #[test]
    fn enable_replaces_non_object_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = settings_path(&tmp);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "[1, 2]").unwrap();
        let s = settings_in(&tmp);
        s.enable_proxy().unwrap();
        let v: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(v.is_object());
        assert!(s.proxy_status().unwrap().enabled);
    }

    #[test]
    fn disable_without_anything_is_fine() {
        let tmp = tempfile::tempdir().unwrap();
        let s = settings_in(&tmp);
        s.disable_proxy().unwrap();
        assert!(!settings_path(&tmp).exists());

        // Fresh enable has nothing to back up, so disable just removes the file.
        s.enable_proxy().unwrap();
        s.disable_proxy().unwrap();
        assert!(!settings_path(&tmp).exists());
    }
}
