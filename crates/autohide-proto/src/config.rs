use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use super::platform;

/// Version string written into every saved document.
pub const CONFIG_VERSION: &str = "1.0.0";

/// Lower bound for the polling period; anything faster hammers the presentation host.
pub const MIN_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// On-disk configuration document (`config.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub holyrics: HolyricsConfig,
    #[serde(default)]
    pub plugin: PluginConfig,
    #[serde(default)]
    pub scenes: ScenesConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HolyricsConfig {
    #[serde(default = "default_url")]
    pub url: String,
    /// Milliseconds between polls of `/view/text.json`.
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub auto_activate: bool,
    /// Hide the sources and stop monitoring when a song is projected.
    #[serde(default)]
    pub disable_in_music: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenesConfig {
    #[serde(default)]
    pub monitored_scene: String,
    #[serde(default)]
    pub sources_to_hide: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default = "default_true")]
    pub restore_previous_state: bool,
    #[serde(default = "default_action_delay")]
    pub action_delay_ms: u64,
    #[serde(default = "default_true")]
    pub show_notifications: bool,
    /// Cancel still-pending hide/restore actions when a newer one is scheduled.
    #[serde(default = "default_true")]
    pub cancel_superseded_actions: bool,
}

impl Default for HolyricsConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            polling_interval: default_polling_interval(),
        }
    }
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            auto_activate: false,
            disable_in_music: false,
        }
    }
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            restore_previous_state: true,
            action_delay_ms: default_action_delay(),
            show_notifications: true,
            cancel_superseded_actions: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            holyrics: HolyricsConfig::default(),
            plugin: PluginConfig::default(),
            scenes: ScenesConfig::default(),
            behavior: BehaviorConfig::default(),
        }
    }
}

fn default_version() -> String {
    CONFIG_VERSION.to_string()
}

fn default_url() -> String {
    "http://localhost:9000".to_string()
}

fn default_polling_interval() -> u64 {
    1000
}

fn default_action_delay() -> u64 {
    150
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load the document at `path`.
    ///
    /// A missing file yields defaults. A corrupt file is reported and also
    /// yields defaults, so a bad edit never keeps the engine from starting.
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {:?}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                warn!("Could not read config {:?}: {}", path, e);
                return Self::default();
            }
        };

        match Self::from_json_str(&content) {
            Ok(config) => {
                info!("Config loaded from {:?}", path);
                config
            }
            Err(e) => {
                warn!("Invalid config {:?} ({}), using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut doc = self.clone();
        doc.version = CONFIG_VERSION.to_string();
        let content = serde_json::to_string_pretty(&doc)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.json")
    }

    /// The slice of the document the monitoring engine reads.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            endpoint: self.holyrics.url.clone(),
            poll_interval_ms: self.holyrics.polling_interval,
            monitored_layers: self.scenes.sources_to_hide.clone(),
            action_delay_ms: self.behavior.action_delay_ms,
            restore_previous_state: self.behavior.restore_previous_state,
            disable_on_music: self.plugin.disable_in_music,
            cancel_superseded_actions: self.behavior.cancel_superseded_actions,
        }
        .normalized()
    }

    /// Write engine settings back into the document, leaving UI-only fields alone.
    pub fn apply_monitor_config(&mut self, monitor: &MonitorConfig) {
        self.holyrics.url = monitor.endpoint.clone();
        self.holyrics.polling_interval = monitor.poll_interval_ms;
        self.scenes.sources_to_hide = monitor.monitored_layers.clone();
        self.behavior.action_delay_ms = monitor.action_delay_ms;
        self.behavior.restore_previous_state = monitor.restore_previous_state;
        self.behavior.cancel_superseded_actions = monitor.cancel_superseded_actions;
        self.plugin.disable_in_music = monitor.disable_on_music;
    }
}

/// Engine settings for one monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub endpoint: String,
    pub poll_interval_ms: u64,
    pub monitored_layers: Vec<String>,
    pub action_delay_ms: u64,
    pub restore_previous_state: bool,
    pub disable_on_music: bool,
    #[serde(default = "default_true")]
    pub cancel_superseded_actions: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Config::default().monitor_config()
    }
}

impl MonitorConfig {
    /// Clamp the poll interval and drop duplicate or blank layer names,
    /// keeping the first occurrence of each.
    pub fn normalized(mut self) -> Self {
        if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
            warn!(
                "poll interval {}ms below minimum, using {}ms",
                self.poll_interval_ms, MIN_POLL_INTERVAL_MS
            );
            self.poll_interval_ms = MIN_POLL_INTERVAL_MS;
        }

        let mut seen = std::collections::HashSet::new();
        self.monitored_layers
            .retain(|name| !name.trim().is_empty() && seen.insert(name.clone()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, "1.0.0");
        assert_eq!(config.holyrics.url, "http://localhost:9000");
        assert_eq!(config.holyrics.polling_interval, 1000);
        assert!(!config.plugin.auto_activate);
        assert!(!config.plugin.disable_in_music);
        assert!(config.scenes.sources_to_hide.is_empty());
        assert!(config.behavior.restore_previous_state);
        assert_eq!(config.behavior.action_delay_ms, 150);
        assert!(config.behavior.cancel_superseded_actions);
    }

    #[test]
    fn partial_document_fills_defaults() {
        let json = r#"{
            "holyrics": { "url": "http://192.168.0.10:8091" },
            "scenes": { "sources_to_hide": ["Camera", "Lower third"] }
        }"#;
        let config = Config::from_json_str(json).unwrap();
        assert_eq!(config.holyrics.url, "http://192.168.0.10:8091");
        assert_eq!(config.holyrics.polling_interval, 1000);
        assert_eq!(config.scenes.sources_to_hide, vec!["Camera", "Lower third"]);
        assert_eq!(config.scenes.monitored_scene, "");
        assert_eq!(config.behavior, BehaviorConfig::default());
    }

    #[test]
    fn monitor_config_projection() {
        let mut config = Config::default();
        config.holyrics.polling_interval = 20;
        config.plugin.disable_in_music = true;
        config.scenes.sources_to_hide =
            vec!["Cam".into(), "".into(), "Logo".into(), "Cam".into()];

        let monitor = config.monitor_config();
        assert_eq!(monitor.poll_interval_ms, MIN_POLL_INTERVAL_MS);
        assert_eq!(monitor.monitored_layers, vec!["Cam", "Logo"]);
        assert!(monitor.disable_on_music);
        assert!(monitor.restore_previous_state);
    }

    #[test]
    fn apply_monitor_config_keeps_ui_fields() {
        let mut config = Config::default();
        config.scenes.monitored_scene = "Worship".into();
        config.behavior.show_notifications = false;

        let mut monitor = config.monitor_config();
        monitor.endpoint = "http://holyrics.local:9000".into();
        monitor.action_delay_ms = 0;
        config.apply_monitor_config(&monitor);

        assert_eq!(config.holyrics.url, "http://holyrics.local:9000");
        assert_eq!(config.behavior.action_delay_ms, 0);
        assert_eq!(config.scenes.monitored_scene, "Worship");
        assert!(!config.behavior.show_notifications);
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.plugin.auto_activate = true;
        config.scenes.sources_to_hide = vec!["Camera".into()];
        config.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"sources_to_hide\""));
        assert!(raw.contains("\"version\": \"1.0.0\""));

        assert_eq!(Config::load_from(&path), config);
    }

    #[test]
    fn missing_or_corrupt_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert_eq!(Config::load_from(&missing), Config::default());

        let corrupt = dir.path().join("corrupt.json");
        std::fs::write(&corrupt, "{ not json").unwrap();
        assert_eq!(Config::load_from(&corrupt), Config::default());
    }
}
