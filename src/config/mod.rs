//! Configuration module for scopestream
//!
//! This module handles the persistent configuration of the acquisition
//! pipeline: streaming parameters, which units to open and how their
//! channels start out, math-channel slider limits, display sink sizes, file
//! export and the simulated driver used for headless runs.
//!
//! # File Location
//!
//! The configuration is a TOML file stored in the platform config directory:
//! - **Linux**: `~/.config/dev.scopestream/config.toml`
//! - **macOS**: `~/Library/Application Support/dev.scopestream/config.toml`
//! - **Windows**: `%APPDATA%\dev.scopestream\config.toml`
//!
//! Logs go to the platform data directory under the same application id.
//!
//! # Example
//!
//! ```ignore
//! use scopestream::config::AppConfig;
//!
//! let mut config = AppConfig::load_or_default(None);
//! config.export.enabled = true;
//! config.save(&scopestream::config::default_config_path().unwrap())?;
//! ```

use crate::backend::parse_serial_list;
use crate::error::{Result, ScopeError};
use crate::sinks::DensitySource;
use crate::types::{Coupling, Role, VoltageRange};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config and data directories
pub const APP_ID: &str = "dev.scopestream";

/// Config filename
pub const CONFIG_FILE: &str = "config.toml";

/// Samples per channel buffer and per poll
pub const DEFAULT_SAMPLE_QUOTA: u32 = 10_000;

/// Nominal sample interval in microseconds
pub const DEFAULT_SAMPLE_INTERVAL_US: u32 = 10;

/// Smallest allowed density grid size
pub const MIN_DENSITY_BINS: usize = 50;

/// Largest allowed density grid size
pub const MAX_DENSITY_BINS: usize = 350;

// ==================== Directories ====================

/// Directory holding the config file
pub fn app_config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Directory holding logs
pub fn app_data_dir() -> Option<PathBuf> {
    dirs_next::data_dir().map(|p| p.join(APP_ID))
}

/// Ensure the app data directory exists
pub fn ensure_app_data_dir() -> Result<PathBuf> {
    let dir = app_data_dir().ok_or_else(|| {
        ScopeError::Config("Could not determine app data directory".to_string())
    })?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            ScopeError::Config(format!("Failed to create app data directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// Default path of the config file
pub fn default_config_path() -> Option<PathBuf> {
    app_config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Sections ====================

/// Streaming and backend thread settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Capacity of every channel buffer, also the driver's poll quota
    pub sample_quota: u32,
    /// Sample interval requested from the driver
    pub sample_interval_us: u32,
    /// Sleep after a poll that produced no samples; 0 just yields
    pub idle_backoff_us: u64,
    /// Capacity of the backend→frontend message channel
    pub message_buffer_size: usize,
    /// How often statistics are pushed to the frontend
    pub stats_interval_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_quota: DEFAULT_SAMPLE_QUOTA,
            sample_interval_us: DEFAULT_SAMPLE_INTERVAL_US,
            idle_backoff_us: 0,
            message_buffer_size: 1024,
            stats_interval_ms: 500,
        }
    }
}

/// Which units to open and their initial channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial numbers to open; empty opens every attached unit
    pub serials: Vec<String>,
    pub default_range: VoltageRange,
    pub default_coupling: Coupling,
    pub default_enabled: bool,
    /// Initial roles, one list per opened unit, applied to channels 0..
    pub channel_roles: Vec<Vec<Role>>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serials: Vec::new(),
            default_range: VoltageRange::V5,
            default_coupling: Coupling::Ac,
            default_enabled: true,
            channel_roles: Vec::new(),
        }
    }
}

impl DeviceConfig {
    /// Replace the serial list from a comma-separated string
    pub fn set_serials_from_list(&mut self, list: &str) {
        self.serials = parse_serial_list(list);
    }

    /// Initial role of a channel on the `device`-th opened unit
    pub fn initial_role(&self, device: usize, channel: usize) -> Role {
        self.channel_roles
            .get(device)
            .and_then(|roles| roles.get(channel))
            .copied()
            .unwrap_or(Role::Off)
    }
}

/// Math-channel parameter sliders and startup formulas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionConfig {
    pub slider_min: i32,
    pub slider_max: i32,
    /// Slider position of a freshly created parameter
    pub slider_default: i32,
    /// Parameter value = slider position × scale
    pub parameter_scale: f64,
    /// Formulas compiled when the backend starts
    pub formulas: Vec<String>,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            slider_min: -100,
            slider_max: 100,
            slider_default: 2,
            parameter_scale: 1.0,
            formulas: Vec::new(),
        }
    }
}

/// Display sink sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Cells per side of the density grid
    pub density_bins: usize,
    /// Points kept per time series
    pub time_series_capacity: usize,
    /// Value written into the density cell of every tick
    pub density_source: DensitySource,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            density_bins: 200,
            time_series_capacity: 100_000,
            density_source: DensitySource::default(),
        }
    }
}

impl DisplayConfig {
    /// Grid size clamped to the supported range
    pub fn clamped_density_bins(&self) -> usize {
        self.density_bins.clamp(MIN_DENSITY_BINS, MAX_DENSITY_BINS)
    }
}

/// Tab-separated tick export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("scope_log.tsv"),
        }
    }
}

/// Simulated digitizer used by the headless runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Serials of the simulated units
    pub units: Vec<String>,
    pub channels_per_unit: usize,
    /// Samples delivered per poll
    pub block_size: u32,
    /// Time spent inside every poll
    pub poll_delay_us: u64,
    /// How long the headless runner captures before stopping
    pub run_seconds: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            units: vec!["SIM0001".to_string()],
            channels_per_unit: 4,
            block_size: 250,
            poll_delay_us: 2_500,
            run_seconds: 5,
        }
    }
}

// ==================== App Config ====================

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub acquisition: AcquisitionConfig,
    pub devices: DeviceConfig,
    pub expressions: ExpressionConfig,
    pub display: DisplayConfig,
    pub export: ExportConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ScopeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        toml::from_str(&content).map_err(|e| {
            ScopeError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load from `path`, or the default location when `None`
    ///
    /// A missing file silently yields defaults; an unreadable or malformed
    /// one is logged and also yields defaults.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => return Self::default(),
            },
        };

        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Self::default();
        }

        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ScopeError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ScopeError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content).map_err(|e| {
            ScopeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.acquisition.sample_quota, 10_000);
        assert_eq!(config.acquisition.sample_interval_us, 10);
        assert_eq!(config.expressions.slider_default, 2);
        assert_eq!(config.display.density_bins, 200);
        assert_eq!(config.display.density_source, DensitySource::Role(Role::Z0));
        assert!(!config.export.enabled);
        assert_eq!(config.devices.default_range, VoltageRange::V5);
        assert_eq!(config.devices.default_coupling, Coupling::Ac);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = AppConfig::default();
        config.devices.serials = vec!["AB123/0001".to_string()];
        config.devices.channel_roles = vec![vec![Role::X, Role::Y, Role::Z0]];
        config.expressions.formulas = vec!["a*x0".to_string()];
        config.display.density_source = DensitySource::Fixed(1.0);
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(
            &path,
            "[acquisition]\nsample_quota = 500\n\n[devices]\nchannel_roles = [[\"X\", \"Off\", \"Z3\"]]\n",
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.acquisition.sample_quota, 500);
        assert_eq!(config.acquisition.sample_interval_us, 10);
        assert_eq!(config.devices.initial_role(0, 2), Role::Z3);
        assert_eq!(config.devices.initial_role(0, 3), Role::Off);
        assert_eq!(config.devices.initial_role(1, 0), Role::Off);
    }

    #[test]
    fn test_malformed_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "acquisition = 3").unwrap();

        assert!(matches!(AppConfig::load(&path), Err(ScopeError::Config(_))));
        assert_eq!(AppConfig::load_or_default(Some(&path)), AppConfig::default());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert_eq!(AppConfig::load_or_default(Some(&path)), AppConfig::default());
    }

    #[test]
    fn test_serial_list_and_bins() {
        let mut devices = DeviceConfig::default();
        devices.set_serials_from_list("A1, B2,");
        assert_eq!(devices.serials, vec!["A1".to_string(), "B2".to_string()]);

        let display = DisplayConfig {
            density_bins: 1000,
            ..Default::default()
        };
        assert_eq!(display.clamped_density_bins(), MAX_DENSITY_BINS);
    }
}
