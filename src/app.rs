use crate::error::ConfigError;
use directories::ProjectDirs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BASE_URL_ENV: &str = "DISHCHAT_BASE_URL";
const DATA_DIR_ENV: &str = "DISHCHAT_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub draft_debounce_ms: u64,
    pub reveal_cadence_ms: u64,
    pub pending_grace_ms: u64,
    pub recents_limit: usize,
    /// 0 disables the background history refresh.
    pub refresh_interval_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".into(),
            request_timeout_secs: 30,
            draft_debounce_ms: 500,
            reveal_cadence_ms: 500,
            pending_grace_ms: 500,
            recents_limit: 3,
            refresh_interval_secs: 0,
            data_dir: None,
        }
    }
}

impl Settings {
    fn toml_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "DishChat")?;
        Some(proj.config_dir().join("settings.toml"))
    }

    /// Settings from the config dir, or defaults, with env overrides applied.
    ///
    /// On first run the defaults are written out so they can be edited.
    pub fn load() -> Self {
        let mut settings = match Self::toml_path() {
            Some(path) if path.exists() => Self::load_from(&path).unwrap_or_else(|e| {
                warn!("ignoring unreadable settings at {}: {e}", path.display());
                Self::default()
            }),
            _ => {
                let defaults = Self::default();
                if let Err(e) = defaults.save() {
                    warn!("could not write default settings: {e}");
                }
                defaults
            }
        };
        settings.apply_env(|key| std::env::var(key).ok());
        settings
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let mut settings: Settings = toml::from_str(&text)?;
        settings.base_url = crate::utils::normalize_url(&settings.base_url);
        Ok(settings)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(BASE_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.base_url = crate::utils::normalize_url(&url);
        }
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
            self.data_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn draft_debounce(&self) -> Duration {
        Duration::from_millis(self.draft_debounce_ms)
    }

    pub fn reveal_cadence(&self) -> Duration {
        Duration::from_millis(self.reveal_cadence_ms)
    }

    pub fn pending_grace(&self) -> Duration {
        Duration::from_millis(self.pending_grace_ms)
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.refresh_interval_secs > 0).then(|| Duration::from_secs(self.refresh_interval_secs))
    }
}
