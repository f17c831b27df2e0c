use std::path::PathBuf;

use anyhow::Context;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::session::Platform;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    #[default]
    Auto,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub show_heatmap: bool,
    pub show_home_title: bool,
    pub enable_provider_fallback: bool,
    pub routing_mode: RoutingMode,
    pub default_claude_provider: String,
    pub default_codex_provider: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            show_heatmap: true,
            show_home_title: true,
            enable_provider_fallback: true,
            routing_mode: RoutingMode::Auto,
            default_claude_provider: String::new(),
            default_codex_provider: String::new(),
        }
    }
}

impl AppSettings {
    fn default_provider(&self, platform: Platform) -> &str {
        match platform {
            Platform::Claude => &self.default_claude_provider,
            Platform::Codex => &self.default_codex_provider,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub name: String,
    pub enabled: bool,
}

/// Source of the configured providers per platform.
pub trait ProviderCatalog {
    fn load_providers(&self, platform: Platform) -> anyhow::Result<Vec<ProviderEntry>>;
}

/// `app.json` preferences. Reads and writes are serialised by one lock.
pub struct AppSettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AppSettingsStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn get(&self) -> anyhow::Result<AppSettings> {
        let _guard = self.lock.lock();
        let txt = match std::fs::read_to_string(&self.path) {
            Ok(txt) => txt,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(AppSettings::default())
            }
            Err(e) => {
                return Err(e).with_context(|| format!("read {}", self.path.display()));
            }
        };
        if txt.trim().is_empty() {
            return Ok(AppSettings::default());
        }
        serde_json::from_str(&txt).with_context(|| format!("parse {}", self.path.display()))
    }

    pub fn save(&self, settings: AppSettings) -> anyhow::Result<AppSettings> {
        let _guard = self.lock.lock();
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let txt = serde_json::to_string_pretty(&settings)?;
        std::fs::write(&self.path, txt)
            .with_context(|| format!("write {}", self.path.display()))?;
        Ok(settings)
    }

    /// Problems with the pinned default providers. Only checked in manual routing mode.
    pub fn validate_default_providers(
        &self,
        catalog: &dyn ProviderCatalog,
        settings: &AppSettings,
    ) -> Vec<String> {
        let mut problems = Vec::new();
        if settings.routing_mode != RoutingMode::Manual {
            return problems;
        }
        for platform in Platform::ALL {
            let wanted = settings.default_provider(platform);
            if wanted.is_empty() {
                continue;
            }
            let providers = match catalog.load_providers(platform) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("load {platform} providers: {e:#}");
                    problems.push(format!("cannot load {platform} providers"));
                    continue;
                }
            };
            match providers.iter().find(|p| p.name == wanted) {
                None => problems.push(format!(
                    "{platform} default provider does not exist: {wanted}"
                )),
                Some(p) if !p.enabled => problems.push(format!(
                    "{platform} default provider is disabled: {wanted}"
                )),
                Some(_) => {}
            }
        }
        problems
    }
}
