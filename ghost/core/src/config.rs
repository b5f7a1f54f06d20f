//! Runtime configuration
//!
//! TOML file with `[runtime]`, `[dialogue]`, and `[daemon]` sections, every
//! key optional. Missing file means defaults. Socket paths can additionally
//! be overridden with `GHOST_SHIORI_SOCKET` / `GHOST_RENDER_SOCKET` for
//! test harnesses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path that failed
        path: PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
    /// The file is not valid TOML for our schema.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    /// The values parsed but are unusable.
    #[error("invalid config: {0}")]
    ValidationError(String),
}

/// Canned dialogue pools. A handler picks one line at random from the pool
/// that matches its event.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DialogueTable {
    /// Spoken on OnBoot
    pub boot: Vec<String>,
    /// Boot lines preferred in the morning hours; falls back to `boot`
    pub boot_morning: Vec<String>,
    /// Boot lines preferred in the evening hours; falls back to `boot`
    pub boot_evening: Vec<String>,
    /// Returned on OnClose
    pub close: Vec<String>,
    /// Spoken on OnMouseClick
    pub click: Vec<String>,
    /// Spoken on OnMouseDoubleClick
    pub double_click: Vec<String>,
    /// Spoken when the idle timer fires
    pub idle: Vec<String>,
}

impl DialogueTable {
    /// The boot pool for a local hour. Morning is 5..12, evening 18..24;
    /// an empty slot falls back to the all-day `boot` lines.
    #[must_use]
    pub fn boot_pool(&self, hour: u32) -> &[String] {
        let slot = match hour {
            5..=11 => &self.boot_morning,
            18..=23 => &self.boot_evening,
            _ => &self.boot,
        };
        if slot.is_empty() {
            &self.boot
        } else {
            slot
        }
    }
}

impl Default for DialogueTable {
    fn default() -> Self {
        Self {
            boot: vec![
                "\\0\\s[0]Hello again. Ready when you are.\\e".to_string(),
            ],
            boot_morning: vec![
                "\\0\\s[0]Good morning! I'm awake.\\e".to_string(),
            ],
            boot_evening: vec![
                "\\0\\s[0]Good evening. Burning the midnight oil?\\e".to_string(),
            ],
            close: vec!["\\0\\s[0]See you next time.\\e".to_string()],
            click: vec![
                "\\0\\s[1]Yes? Did you need something?\\e".to_string(),
                "\\0\\s[0]Hm?\\e".to_string(),
            ],
            double_click: vec![
                "\\0\\s[2]Hey, that tickles!\\e".to_string(),
            ],
            idle: vec![
                "\\0\\s[0]It's quiet today...\\e".to_string(),
                "\\0\\s[0]\\w8Still here, just thinking.\\e".to_string(),
            ],
        }
    }
}

/// Timing knobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Tick period in milliseconds; drives OnSecondChange
    pub tick_period_ms: u64,
    /// Seconds of silence before idle chatter
    pub idle_talk_interval_secs: u64,
    /// Default choice prompt lifetime in seconds
    pub choice_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1000,
            idle_talk_interval_secs: 180,
            choice_timeout_secs: 20,
        }
    }
}

/// Daemon-side paths.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket serving the request protocol
    pub shiori_socket: PathBuf,
    /// Unix socket streaming render commands as JSON lines
    pub render_socket: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            shiori_socket: dir.join("ghost-runtime.sock"),
            render_socket: dir.join("ghost-runtime-render.sock"),
        }
    }
}

/// Whole-runtime configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct GhostConfig {
    /// Timing section
    pub runtime: RuntimeConfig,
    /// Dialogue pools
    pub dialogue: DialogueTable,
    /// Daemon paths
    pub daemon: DaemonConfig,
}

impl GhostConfig {
    /// Default config file location.
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ghost-runtime")
            .join("config.toml")
    }

    /// Load from `path`, falling back to defaults when the file is absent.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })?;
            let parsed: Self = toml::from_str(&contents)?;
            tracing::info!(path = %path.display(), "loaded config");
            parsed
        } else {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("GHOST_SHIORI_SOCKET") {
            self.daemon.shiori_socket = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("GHOST_RENDER_SOCKET") {
            self.daemon.render_socket = PathBuf::from(path);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.runtime.tick_period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.tick_period_ms must be positive".to_string(),
            ));
        }
        if self.runtime.choice_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "runtime.choice_timeout_secs must be positive".to_string(),
            ));
        }
        if self.dialogue.boot.is_empty() || self.dialogue.close.is_empty() {
            return Err(ConfigError::ValidationError(
                "dialogue.boot and dialogue.close must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Tick period as a [`Duration`].
    #[must_use]
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.runtime.tick_period_ms)
    }

    /// Idle chatter threshold as a [`Duration`].
    #[must_use]
    pub fn idle_talk_interval(&self) -> Duration {
        Duration::from_secs(self.runtime.idle_talk_interval_secs)
    }

    /// Choice prompt lifetime as a [`Duration`].
    #[must_use]
    pub fn choice_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.choice_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = GhostConfig::load(Path::new("/nonexistent/ghost.toml")).unwrap();
        assert_eq!(config.runtime.tick_period_ms, 1000);
        assert!(!config.dialogue.boot.is_empty());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[runtime]
choice_timeout_secs = 5

[dialogue]
boot = ["\\0Custom boot.\\e"]
"#
        )
        .unwrap();
        let config = GhostConfig::load(file.path()).unwrap();
        assert_eq!(config.runtime.choice_timeout_secs, 5);
        assert_eq!(config.runtime.tick_period_ms, 1000);
        assert_eq!(config.dialogue.boot, vec!["\\0Custom boot.\\e".to_string()]);
        // Unspecified pools keep the built-in lines.
        assert!(!config.dialogue.close.is_empty());
    }

    #[test]
    fn test_boot_pool_by_hour() {
        let table = DialogueTable::default();
        assert_eq!(table.boot_pool(8), table.boot_morning.as_slice());
        assert_eq!(table.boot_pool(14), table.boot.as_slice());
        assert_eq!(table.boot_pool(21), table.boot_evening.as_slice());

        // Empty time slots fall back to the all-day lines.
        let sparse = DialogueTable {
            boot_morning: Vec::new(),
            boot_evening: Vec::new(),
            ..DialogueTable::default()
        };
        assert_eq!(sparse.boot_pool(8), sparse.boot.as_slice());
        assert_eq!(sparse.boot_pool(21), sparse.boot.as_slice());
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runtime]\ntick_period_ms = 0").unwrap();
        let err = GhostConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_bad_toml_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "runtime = \"not a table\"").unwrap();
        let err = GhostConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
