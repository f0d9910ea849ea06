//! Layered configuration: file, then environment.

use serial_test::serial;
use std::time::Duration;
use sweep_daq::config::{LogFormat, Settings};
use sweep_daq::error::SweepError;

const SAMPLE: &str = r#"
[scope]
vertical_divisions = 10.0

[acquisition]
settle_delay = "1s"
max_consecutive_failures = 5

[session]
accumulate_until_clear = false
shunt_resistance = 47.0

[instruments]
scope_address = "192.168.1.20"
generator_address = "192.168.1.21:5025"
"#;

fn write_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let path = dir.path().join("sweep.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

#[test]
#[serial]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load(Some(&write_config(&dir))).unwrap();

    assert_eq!(settings.scope.vertical_divisions, 10.0);
    assert_eq!(settings.acquisition.settle_delay, Duration::from_secs(1));
    assert_eq!(settings.acquisition.max_consecutive_failures, 5);
    assert!(!settings.session.accumulate_until_clear);
    assert_eq!(settings.session.shunt_resistance, 47.0);
    assert_eq!(
        settings.instruments.generator_address.as_deref(),
        Some("192.168.1.21:5025")
    );
    // untouched sections keep their defaults
    assert_eq!(settings.ranging.fine_scale_factor, 1.5);
}

#[test]
#[serial]
fn environment_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir);

    std::env::set_var("SWEEP_ACQUISITION__MAX_CONSECUTIVE_FAILURES", "9");
    std::env::set_var("SWEEP_LOGGING__FORMAT", "json");
    let result = Settings::load(Some(&path));
    std::env::remove_var("SWEEP_ACQUISITION__MAX_CONSECUTIVE_FAILURES");
    std::env::remove_var("SWEEP_LOGGING__FORMAT");

    let settings = result.unwrap();
    assert_eq!(settings.acquisition.max_consecutive_failures, 9);
    assert_eq!(settings.logging.format, LogFormat::Json);
    assert_eq!(settings.acquisition.settle_delay, Duration::from_secs(1));
}

#[test]
#[serial]
fn invalid_environment_value_is_rejected() {
    std::env::set_var("SWEEP_RANGING__VERTICAL_EXPAND_FACTOR", "0.5");
    let result = Settings::from_toml_str("");
    std::env::remove_var("SWEEP_RANGING__VERTICAL_EXPAND_FACTOR");

    assert!(matches!(result, Err(SweepError::Configuration(_))));
}
