use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::app::error::AppError;

pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdbSettings {
    pub command_path: String,
    pub serial: String,
    pub command_timeout_secs: u64,
}

impl Default for AdbSettings {
    fn default() -> Self {
        Self {
            command_path: String::new(),
            serial: String::new(),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DumpSettings {
    pub output_path: String,
}

impl Default for DumpSettings {
    fn default() -> Self {
        Self {
            output_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub dump: DumpSettings,
    #[serde(default)]
    pub version: String,
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("BLOCKDUMP_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blockdump_config.json")
}

pub fn backup_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".blockdump_config.backup.json")
}

pub fn load_config() -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path())
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    save_config_to_path(config, &config_path(), &backup_config_path())
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), ""))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|err| AppError::system(format!("Failed to parse config: {err}"), ""))?;
    let mut config: AppConfig = serde_json::from_value(value.clone()).unwrap_or_default();
    config = apply_legacy_overrides(config, &value);
    Ok(validate_config(config))
}

pub fn save_config_to_path(
    config: &AppConfig,
    path: &Path,
    backup_path: &Path,
) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    if path.exists() {
        let _ = fs::copy(path, backup_path);
    }
    let payload = serde_json::to_string_pretty(config)
        .map_err(|err| AppError::system(format!("Failed to serialize config: {err}"), ""))?;
    fs::write(path, payload)
        .map_err(|err| AppError::system(format!("Failed to write config: {err}"), ""))?;
    Ok(())
}

/// Earlier builds stored flat top-level keys; keep reading them.
fn apply_legacy_overrides(mut config: AppConfig, value: &serde_json::Value) -> AppConfig {
    if let Some(output_path) = value.get("output_path").and_then(|v| v.as_str()) {
        config.dump.output_path = output_path.to_string();
    }
    if let Some(adb_path) = value.get("adb_path").and_then(|v| v.as_str()) {
        config.adb.command_path = adb_path.to_string();
    }
    if let Some(serial) = value.get("serial").and_then(|v| v.as_str()) {
        config.adb.serial = serial.to_string();
    }
    config
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    if config.adb.command_timeout_secs == 0 {
        config.adb.command_timeout_secs = DEFAULT_COMMAND_TIMEOUT_SECS;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let config = load_config_from_path(&dir.path().join("missing.json")).expect("load");
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.adb.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn round_trips_and_backs_up() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        let backup = dir.path().join("config.backup.json");

        let mut config = AppConfig::default();
        config.dump.output_path = "/data/dumps".to_string();
        config.adb.serial = "SER123".to_string();
        save_config_to_path(&config, &path, &backup).expect("first save");
        save_config_to_path(&config, &path, &backup).expect("second save");
        assert!(backup.exists());

        let loaded = load_config_from_path(&path).expect("load");
        assert_eq!(loaded.dump.output_path, "/data/dumps");
        assert_eq!(loaded.adb.serial, "SER123");
    }

    #[test]
    fn merges_legacy_flat_keys() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            serde_json::json!({
                "output_path": "/tmp/out",
                "adb_path": "/opt/platform-tools/adb",
                "serial": "LEGACY1"
            })
            .to_string(),
        )
        .expect("write config");

        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.dump.output_path, "/tmp/out");
        assert_eq!(config.adb.command_path, "/opt/platform-tools/adb");
        assert_eq!(config.adb.serial, "LEGACY1");
    }

    #[test]
    fn clamps_zero_timeout() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            serde_json::json!({
                "adb": { "command_path": "", "serial": "", "command_timeout_secs": 0 }
            })
            .to_string(),
        )
        .expect("write config");

        let config = load_config_from_path(&path).expect("load");
        assert_eq!(config.adb.command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::TempDir::new().expect("tmp");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write config");
        assert!(load_config_from_path(&path).is_err());
    }
}
