//! Configuration loading and resolution
//!
//! Resolution priority for the configuration file:
//! 1. Explicit path (command-line argument)
//! 2. `NBHD_CONFIG` environment variable
//! 3. Per-user config file (`~/.config/nbhd/resilience.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing file never prevents startup: the loader logs a warning and
//! continues with defaults.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "NBHD_CONFIG";

/// Environment indicator; `production` enables the production reporter
pub const ENVIRONMENT_ENV_VAR: &str = "NBHD_ENV";

/// Full resilience-layer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub error_bus: ErrorBusConfig,
    pub service_worker: ServiceWorkerConfig,
    pub audio: AudioConfig,
    pub manifest: ManifestConfig,
    pub logging: LoggingConfig,
}

/// Error bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorBusConfig {
    /// Bounded collection capacity (FIFO eviction beyond this)
    pub max_errors: usize,
    /// Suppression window for repeated `(category, severity)` notifications
    pub notification_cooldown_ms: u64,
    /// Forward every record to the production reporter
    pub is_production: bool,
}

impl Default for ErrorBusConfig {
    fn default() -> Self {
        Self {
            max_errors: 100,
            notification_cooldown_ms: 300_000,
            is_production: is_production_environment(),
        }
    }
}

/// Service worker lifecycle settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceWorkerConfig {
    pub script_path: String,
    pub scope: String,
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
}

impl Default for ServiceWorkerConfig {
    fn default() -> Self {
        Self {
            script_path: "/sw.js".to_string(),
            scope: "/".to_string(),
            max_retries: 3,
            initial_retry_delay_ms: 1000,
        }
    }
}

/// Audio notifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Playback gain, 0.0 to 1.0
    pub default_volume: f32,
    /// Try the Web-Audio path before the media-element path
    pub prefer_web_audio: bool,
    /// Sound name → candidate source URLs, loaded by the preflight tool
    pub sounds: std::collections::BTreeMap<String, Vec<String>>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            default_volume: 0.7,
            prefer_web_audio: true,
            sounds: Default::default(),
        }
    }
}

/// Manifest guard settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub manifest_path: String,
    /// Minimum icon edge, in pixels, for an icon to count as usable
    pub min_icon_dimension: u32,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            manifest_path: "/manifest.json".to_string(),
            min_icon_dimension: 192,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full EnvFilter string)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// Whether the host environment indicator says "production"
pub fn is_production_environment() -> bool {
    std::env::var(ENVIRONMENT_ENV_VAR)
        .map(|v| v.trim().eq_ignore_ascii_case("production"))
        .unwrap_or(false)
}

impl ResilienceConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ResilienceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded resilience config from {}", path.display());
        Ok(config)
    }

    /// Resolve and load configuration following the priority order.
    ///
    /// An explicitly named file (argument or env var) that cannot be read is
    /// an error; a missing per-user file falls back to defaults.
    pub fn resolve(cli_path: Option<&Path>) -> Result<Self> {
        // Priority 1: Command-line argument
        if let Some(path) = cli_path {
            return Self::load_from(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from(Path::new(&path));
        }

        // Priority 3: Per-user config file
        if let Some(path) = default_config_path().filter(|p| p.exists()) {
            return Self::load_from(&path);
        }

        // Priority 4: Compiled defaults
        warn!("No resilience config file found, using compiled defaults");
        Ok(Self::default())
    }

    /// Reject values the components cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.error_bus.max_errors == 0 {
            return Err(Error::Config("error_bus.max_errors must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.audio.default_volume) {
            return Err(Error::Config(format!(
                "audio.default_volume must be within 0.0..=1.0, got {}",
                self.audio.default_volume
            )));
        }
        if self.manifest.min_icon_dimension == 0 {
            return Err(Error::Config("manifest.min_icon_dimension must be positive".to_string()));
        }
        let script_path = &self.service_worker.script_path;
        if !script_path.starts_with('/') && !script_path.contains("://") {
            return Err(Error::Config(format!(
                "service_worker.script_path must be absolute, got '{}'",
                script_path
            )));
        }
        Ok(())
    }
}

/// Per-user configuration file path for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("nbhd").join("resilience.toml"))
}
