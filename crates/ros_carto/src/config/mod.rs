use log::error;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;
use toml::de::Error as TomlError;
use toml::ser::Error as TomlSeError;

pub mod defs;
pub use defs::{
    BridgeConfig, Config, DBConfig, FrameConfig, InputConfig, StreamConfig, TopicSource,
};

use crate::cli::Options;

pub static CONFIG: std::sync::LazyLock<RwLock<Config>> = std::sync::LazyLock::new(RwLock::default);

/// Errors occurring during config loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to find config file")]
    NotFound,

    #[error("failed to validate config: {0}")]
    Validation(#[from] anyhow::Error),

    #[error("failed to read config file")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Toml(#[from] TomlError),

    #[error(transparent)]
    TomlSe(#[from] TomlSeError),
}

/// Load the configuration file
///
/// The configuration must be a TOML file.
/// The search order is as follows:
/// 1. CLI --config argument file path
/// 2. config.toml in the current directory
///
/// # Errors
/// Returns `ConfigError::NotFound` if neither file exists, or the error from
/// reading, parsing or validating the file that was found.
pub fn load(options: &Options) -> Result<(), ConfigError> {
    let config_path = options.config.clone().filter(|p| p.is_file()).or_else(|| {
        let path = PathBuf::from("config.toml");
        if path.is_file() {
            Some(path)
        } else {
            None
        }
    });

    match config_path {
        Some(path) => load_from_path(&path).and_then(|()| {
            let mut config = CONFIG.write();

            // Modifications after the `Config` object is created.
            options.override_config(&mut config);
            validate_config(&config)
        }),
        None => Err(ConfigError::NotFound),
    }
}

/// Load configuration file and log errors.
fn load_from_path(path: &Path) -> Result<(), ConfigError> {
    match read_config(path) {
        Ok(loaded_config) => {
            let mut config = CONFIG.write();
            *config = loaded_config;
            Ok(())
        }
        Err(ConfigError::Io(io)) if io.kind() == io::ErrorKind::NotFound => {
            error!("Unable to load config {path:?}: File not found");
            Err(ConfigError::Io(io))
        }
        Err(err) => {
            error!("Unable to load config {path:?}: {err}");
            Err(err)
        }
    }
}

/// Read configuration file from path.
///
/// Validation is left to the caller so CLI overrides can be applied first.
pub fn read_config(path: &Path) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path)?;

    let mut config: Config = toml::from_str(&contents)?;
    config.config_paths.push(path.to_path_buf());

    Ok(config)
}

/// Check a fully assembled configuration.
///
/// # Errors
/// Returns `ConfigError::Validation` describing the first problem found.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    config.bridge.validate()?;
    for (name, topic) in config.topics() {
        if topic.topic.is_empty() {
            return Err(ConfigError::Validation(anyhow::anyhow!(
                "topic for sensor '{name}' must not be empty"
            )));
        }
        topic.ros_type()?;
    }
    defs::validate_frames(&config.frames)?;
    config.db.validate()?;

    Ok(())
}

/// Serialize a configuration back to TOML.
///
/// # Errors
/// Returns `ConfigError::TomlSe` if the configuration cannot be represented.
pub fn to_toml(config: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}
