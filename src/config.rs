//! Configuration management using Figment
//!
//! Settings are layered, later sources overriding earlier ones:
//! 1. Built-in defaults (the values the bench was tuned with)
//! 2. A TOML file (`config/sweep.toml` unless another path is given)
//! 3. Environment variables prefixed with `SWEEP_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use sweep_daq::config::Settings;
//!
//! // SWEEP_ACQUISITION__MAX_RETRY_WINDOW=30s overrides the file
//! let settings = Settings::load(None)?;
//! println!("retry window: {:?}", settings.acquisition.max_retry_window);
//! # Ok::<(), sweep_daq::error::SweepError>(())
//! ```

use crate::error::{SweepError, SweepResult};
use crate::range::SCOPE_SCALE_TABLE;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/sweep.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// `[scope]`
    pub scope: ScopeSettings,
    /// `[acquisition]`
    pub acquisition: AcquisitionSettings,
    /// `[ranging]`
    pub ranging: RangingSettings,
    /// `[session]`
    pub session: SessionSettings,
    /// `[instruments]`
    pub instruments: InstrumentSettings,
    /// `[logging]`
    pub logging: LoggingSettings,
}

/// Oscilloscope screen geometry and scale steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScopeSettings {
    /// Signal periods to fit across the screen.
    pub peaks_per_frame: f64,
    /// Horizontal grid divisions.
    pub horizontal_divisions: f64,
    /// Vertical grid divisions.
    pub vertical_divisions: f64,
    /// Discrete volts/div steps, ascending.
    pub scale_table: Vec<f64>,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            peaks_per_frame: 10.0,
            horizontal_divisions: 12.0,
            vertical_divisions: 8.0,
            scale_table: SCOPE_SCALE_TABLE.to_vec(),
        }
    }
}

/// Equilibrium and integrity policy for one setpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// Pause after configuring a point, before the first sample.
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Pause after a failed or corrupt sample.
    #[serde(with = "humantime_serde")]
    pub failure_backoff: Duration,
    /// Abort the point once this many consecutive samples have failed and one more fails.
    pub max_consecutive_failures: u32,
    /// Pause between samples while waiting for the reading to settle.
    #[serde(with = "humantime_serde")]
    pub equilibrium_interval: Duration,
    /// Give up on a point this long after its configuration started.
    #[serde(with = "humantime_serde")]
    pub max_retry_window: Duration,
    /// Largest percent change between consecutive samples still counted as settled.
    pub equilibrium_tolerance_percent: f64,
    /// Largest percent difference between commanded and measured frequency.
    pub frequency_tolerance_percent: f64,
    /// Readings above this magnitude are treated as corrupt.
    pub sanity_ceiling: f64,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(700),
            failure_backoff: Duration::from_millis(333),
            max_consecutive_failures: 15,
            equilibrium_interval: Duration::from_millis(500),
            max_retry_window: Duration::from_secs(15),
            equilibrium_tolerance_percent: 10.0,
            frequency_tolerance_percent: 5.0,
            sanity_ceiling: 1e30,
        }
    }
}

/// Vertical auto-ranging factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangingSettings {
    /// Headroom on the reference channel; 1.0 fills the screen exactly.
    pub vertical_expand_factor: f64,
    /// Coarse-pass volts/div as a fraction of the generator amplitude.
    pub crude_sweep_factor: f64,
    /// Headroom applied to coarse readings when picking fine scales.
    pub fine_scale_factor: f64,
    /// Run a coarse pass followed by a fine pass.
    pub auto_dual_sweep: bool,
}

impl Default for RangingSettings {
    fn default() -> Self {
        Self {
            vertical_expand_factor: 1.5,
            crude_sweep_factor: 0.25,
            fine_scale_factor: 1.5,
            auto_dual_sweep: true,
        }
    }
}

/// Result handling between sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Keep every single-band sweep until cleared instead of only the latest.
    pub accumulate_until_clear: bool,
    /// Advance the band/gain position after each multiband sweep.
    pub auto_next: bool,
    /// Switch the generator output off when a sweep finishes.
    pub turn_off_after_scan: bool,
    /// Current-sense resistor used in I-V sweeps, in ohms.
    pub shunt_resistance: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            accumulate_until_clear: true,
            auto_next: true,
            turn_off_after_scan: false,
            shunt_resistance: 100.0,
        }
    }
}

/// Where the instruments live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Oscilloscope address (`host[:port]`).
    pub scope_address: Option<String>,
    /// Generator address (`host[:port]`).
    pub generator_address: Option<String>,
    /// Generator output used for the stimulus.
    pub generator_channel: String,
    /// Read/write timeout per command.
    #[serde(with = "humantime_serde")]
    pub io_timeout: Duration,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            scope_address: None,
            generator_address: None,
            generator_channel: "C2".to_string(),
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// Log output options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Line format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line with colors (for the bench terminal)
    Pretty,
    /// Single-line without colors
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl Settings {
    /// Load defaults, then `path` (or [`DEFAULT_CONFIG_PATH`]), then `SWEEP_*` variables.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load(path: Option<&Path>) -> SweepResult<Self> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        Self::extract(Self::figment().merge(Toml::file(path)))
    }

    /// Load from an in-memory TOML document (plus the environment).
    pub fn from_toml_str(toml: &str) -> SweepResult<Self> {
        Self::extract(Self::figment().merge(Toml::string(toml)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
    }

    fn extract(figment: Figment) -> SweepResult<Self> {
        let settings: Settings = figment
            .merge(Env::prefixed("SWEEP_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Render the effective settings as TOML, in the config file layout.
    pub fn to_toml(&self) -> SweepResult<String> {
        toml::to_string_pretty(self).map_err(|e| SweepError::Configuration(e.to_string()))
    }

    /// Reject values that parse but cannot work on the bench.
    pub fn validate(&self) -> SweepResult<()> {
        let invalid = |msg: String| Err(SweepError::Configuration(msg));

        let scope = &self.scope;
        if scope.scale_table.is_empty() {
            return invalid("scope.scale_table must not be empty".into());
        }
        if scope.scale_table.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return invalid("scope.scale_table entries must be positive".into());
        }
        if scope.scale_table.windows(2).any(|w| w[1] <= w[0]) {
            return invalid("scope.scale_table must be strictly ascending".into());
        }
        for (name, value) in [
            ("scope.peaks_per_frame", scope.peaks_per_frame),
            ("scope.horizontal_divisions", scope.horizontal_divisions),
            ("scope.vertical_divisions", scope.vertical_divisions),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive (got {value})"));
            }
        }

        let acq = &self.acquisition;
        for (name, value) in [
            ("acquisition.equilibrium_tolerance_percent", acq.equilibrium_tolerance_percent),
            ("acquisition.frequency_tolerance_percent", acq.frequency_tolerance_percent),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be zero or positive (got {value})"));
            }
        }
        if !(acq.sanity_ceiling > 0.0) {
            return invalid("acquisition.sanity_ceiling must be positive".into());
        }

        let ranging = &self.ranging;
        if ranging.vertical_expand_factor < 1.0 {
            return invalid(format!(
                "ranging.vertical_expand_factor must be at least 1 (got {})",
                ranging.vertical_expand_factor
            ));
        }
        for (name, value) in [
            ("ranging.crude_sweep_factor", ranging.crude_sweep_factor),
            ("ranging.fine_scale_factor", ranging.fine_scale_factor),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return invalid(format!("{name} must be positive (got {value})"));
            }
        }

        if !(self.session.shunt_resistance > 0.0) {
            return invalid("session.shunt_resistance must be positive".into());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_bench_tuning() {
        let settings = Settings::default();
        assert_eq!(settings.acquisition.settle_delay, Duration::from_millis(700));
        assert_eq!(settings.acquisition.max_consecutive_failures, 15);
        assert_eq!(settings.acquisition.max_retry_window, Duration::from_secs(15));
        assert_eq!(settings.acquisition.equilibrium_tolerance_percent, 10.0);
        assert_eq!(settings.acquisition.frequency_tolerance_percent, 5.0);
        assert_eq!(settings.scope.vertical_divisions, 8.0);
        assert!(settings.ranging.auto_dual_sweep);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn toml_overrides_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            [acquisition]
            settle_delay = "250ms"
            max_retry_window = "30s"
            equilibrium_tolerance_percent = 5.0

            [ranging]
            auto_dual_sweep = false

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(settings.acquisition.settle_delay, Duration::from_millis(250));
        assert_eq!(settings.acquisition.max_retry_window, Duration::from_secs(30));
        assert_eq!(settings.acquisition.equilibrium_tolerance_percent, 5.0);
        // untouched keys keep their defaults
        assert_eq!(settings.acquisition.failure_backoff, Duration::from_millis(333));
        assert!(!settings.ranging.auto_dual_sweep);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings.scope, ScopeSettings::default());
    }

    #[test]
    fn rendered_toml_loads_back() {
        let mut settings = Settings::default();
        settings.acquisition.max_retry_window = Duration::from_secs(20);
        settings.instruments.scope_address = Some("10.0.0.5".into());
        let text = settings.to_toml().unwrap();
        assert!(text.contains("[acquisition]"));
        assert_eq!(Settings::from_toml_str(&text).unwrap(), settings);
    }

    #[test]
    fn rejects_descending_scale_table() {
        let mut settings = Settings::default();
        settings.scope.scale_table = vec![1.0, 0.5, 2.0];
        assert!(matches!(settings.validate(), Err(SweepError::Configuration(_))));
    }

    #[test]
    fn rejects_small_expand_factor() {
        let mut settings = Settings::default();
        settings.ranging.vertical_expand_factor = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let result = Settings::from_toml_str("[logging]\nlevel = \"loud\"\n");
        assert!(matches!(result, Err(SweepError::Configuration(_))));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let result = Settings::from_toml_str("[acquisition]\nsettle_delay = \"soon\"\n");
        assert!(matches!(result, Err(SweepError::Config(_))));
    }
}
