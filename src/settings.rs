use config::{Config, File as ConfigFile};
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::filter::LevelFilter;

use crate::errors::AppError;

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct MiscSettings {
    log_level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct BLESettings {
    /// Only connect to a device advertising this name, if set
    pub saved_name: String,
    /// Only connect to a device with this address, if set
    pub saved_address: String,
    pub scan_duration_ms: u64,
}

impl BLESettings {
    pub fn scan_duration(&self) -> Duration {
        Duration::from_millis(self.scan_duration_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct DummySettings {
    pub low_bpm: u16,
    pub high_bpm: u16,
    pub bpm_speed: f32,
    pub loops_before_dc: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct Settings {
    pub ble: BLESettings,
    pub misc: MiscSettings,
    pub dummy: DummySettings,
}

impl Settings {
    /// Loads settings from `config_path` (if any), falling back to defaults for anything missing.
    pub fn load(config_path: Option<&Path>, required: bool) -> Result<Self, AppError> {
        let default_log_level = if cfg!(debug_assertions) {
            "debug"
        } else {
            "info"
        };

        let mut builder = Config::builder();
        if let Some(config_path) = config_path {
            builder = builder.add_source(ConfigFile::from(config_path).required(required));
        }
        let s = builder
            .set_default("ble.saved_name", "")?
            .set_default("ble.saved_address", "")?
            .set_default("ble.scan_duration_ms", 5000)?
            .set_default("misc.log_level", default_log_level)?
            .set_default("dummy.low_bpm", 50)?
            .set_default("dummy.high_bpm", 120)?
            .set_default("dummy.bpm_speed", 1.5)?
            .set_default("dummy.loops_before_dc", 2)?
            .build()?;

        Ok(s.try_deserialize()?)
    }
    pub fn save(&self, config_path: &Path) -> Result<(), AppError> {
        let toml_string = toml::to_string(self)?;

        let mut file = File::create(config_path)?;
        file.write_all(toml_string.as_bytes())?;

        Ok(())
    }
    pub fn get_log_level(&self) -> LevelFilter {
        match self.misc.log_level.to_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            _ => LevelFilter::INFO,
        }
    }
}

/// `<exe name>.toml` inside the working directory
pub fn default_config_path() -> Result<PathBuf, AppError> {
    let working_directory = determine_working_directory().ok_or(AppError::WorkDir)?;
    let exe_path = std::env::current_exe()?;
    let file_name = exe_path
        .with_extension("toml")
        .file_name()
        .ok_or(AppError::WorkDir)?
        .to_owned();
    Ok(working_directory.join(file_name))
}

/// Returns the directory that logs and config should be placed in by default.
// If the crate is built with the portable feature (or in debug), it's the executable's parent directory.
// If there is a config file present adjacent to the executable, it's also the executable's parent.
// Otherwise, it's the `directories` `config_dir` output.
pub fn determine_working_directory() -> Option<PathBuf> {
    let exe_path = std::env::current_exe().ok()?;
    let exe_parent = exe_path.parent()?.to_path_buf();
    let config_path = exe_path.with_extension("toml");

    if is_portable() || config_path.exists() {
        Some(exe_parent)
    } else {
        get_user_dir()
    }
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn is_portable() -> bool {
    true
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn is_portable() -> bool {
    false
}

#[cfg(any(debug_assertions, feature = "portable"))]
fn get_user_dir() -> Option<PathBuf> {
    None
}

#[cfg(not(any(debug_assertions, feature = "portable")))]
fn get_user_dir() -> Option<PathBuf> {
    use directories::BaseDirs;

    let base_dirs = BaseDirs::new()?;
    let mut config_dir = base_dirs.config_dir().to_owned();
    config_dir.push(env!("CARGO_PKG_NAME"));
    Some(config_dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parsing() {
        let mut settings = Settings::default();
        for (raw, level) in [
            ("off", LevelFilter::OFF),
            ("ERROR", LevelFilter::ERROR),
            ("Warn", LevelFilter::WARN),
            ("debug", LevelFilter::DEBUG),
            ("trace", LevelFilter::TRACE),
            ("nonsense", LevelFilter::INFO),
        ] {
            settings.misc.log_level = raw.into();
            assert_eq!(settings.get_log_level(), level);
        }
    }

    #[test]
    fn scan_duration_from_millis() {
        let ble = BLESettings {
            scan_duration_ms: 1500,
            ..Default::default()
        };
        assert_eq!(ble.scan_duration(), Duration::from_millis(1500));
    }
}
