//! Station settings

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use eol_link::LinkConfig;
use eol_runner::{BenchWiring, RunnerConfig};
use serde::{Deserialize, Serialize};

/// Everything the station reads from its settings file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// CAN transports and supervision
    pub link: LinkConfig,
    /// Run timing
    pub runner: RunnerConfig,
    /// Relay and multiplexer lines
    pub wiring: BenchWiring,
    /// Health-check cadence in milliseconds
    pub health_interval_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            runner: RunnerConfig::default(),
            wiring: BenchWiring::default(),
            health_interval_ms: 1000,
        }
    }
}

impl Settings {
    /// Get the XDG config directory for eolbench
    /// Uses $XDG_CONFIG_HOME/eolbench, falls back to ~/.config/eolbench
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("eolbench"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("eolbench"))
    }

    /// Default settings file path
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a file that exists but does not
    /// parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse settings {}", path.display()))
    }

    /// Save to `path`, or to the default location when `None`
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::default_path().context("Could not determine settings path")?,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write settings {}", path.display()))?;
        Ok(path)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("eolbench-test-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: Settings = serde_json::from_str(
            r#"{ "link": { "socketcan_interface": "can1" }, "health_interval_ms": 250 }"#,
        )
        .unwrap();
        assert_eq!(settings.link.socketcan_interface, "can1");
        assert_eq!(settings.link.bitrate, 500_000);
        assert_eq!(settings.runner, RunnerConfig::default());
        assert_eq!(settings.wiring.relay_output("Boost"), Some(22));
        assert_eq!(settings.health_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings = Settings::load(Some(&scratch_file("absent.json"))).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_then_load() {
        let path = scratch_file("settings.json");
        let mut settings = Settings::default();
        settings.runner.debounce_ms = 42;
        settings.wiring.relay_outputs.insert("Horn".to_string(), 12);

        let written = settings.save(Some(&path)).unwrap();
        assert_eq!(written, path);
        assert_eq!(Settings::load(Some(&path)).unwrap(), settings);

        std::fs::write(&path, "{ not json").unwrap();
        assert!(Settings::load(Some(&path)).is_err());
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
