//! Configuration file handling for ~/.tilesched/config.ini.
//!
//! ```ini
//! [scheduler]
//! default_concurrency = 6
//!
//! [type.google]
//! concurrency = 4
//!
//! [logging]
//! level = debug
//! directory = ~/.tilesched/logs
//! file = tilesched.log
//! ```
//!
//! Every key is optional. A missing file yields the defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

/// Default log level when neither the config nor `RUST_LOG` sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "tilesched.log";

const TYPE_SECTION_PREFIX: &str = "type.";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set (e.g. "info", "tilesched=debug").
    pub level: String,
    /// Directory for the log file. No file is written when unset.
    pub directory: Option<PathBuf>,
    /// Log file name inside `directory`.
    pub file_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            directory: None,
            file_name: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Global concurrency for tile types without an override.
    pub default_concurrency: Option<usize>,
    /// Global concurrency per tile type.
    pub type_concurrency: HashMap<String, usize>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl SchedulerConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the global concurrency used for types without an override.
    pub fn with_default_concurrency(mut self, concurrency: usize) -> Self {
        self.default_concurrency = Some(concurrency);
        self
    }

    /// Sets the global concurrency for one tile type.
    pub fn with_type_concurrency(mut self, tile_type: impl Into<String>, concurrency: usize) -> Self {
        self.type_concurrency.insert(tile_type.into(), concurrency);
        self
    }

    /// Sets the logging configuration.
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }

    /// Global concurrency for a new tile manager.
    ///
    /// Falls back to the first provider's concurrency when neither the type
    /// nor the default is configured. Never less than 1.
    pub fn concurrency_for(&self, tile_type: &str, provider_concurrency: usize) -> usize {
        self.type_concurrency
            .get(tile_type)
            .copied()
            .or(self.default_concurrency)
            .unwrap_or(provider_concurrency)
            .max(1)
    }

    /// Loads configuration from the default path (~/.tilesched/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Loads configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        parse_ini(&ini)
    }

    /// Parses configuration from INI text.
    pub fn from_ini_str(content: &str) -> Result<Self, ConfigFileError> {
        let ini = Ini::load_from_str(content).map_err(|e| ConfigFileError::ReadError(ini::Error::Parse(e)))?;
        parse_ini(&ini)
    }

    /// Renders the configuration as INI text.
    pub fn to_config_string(&self) -> String {
        let mut ini = Ini::new();

        if let Some(concurrency) = self.default_concurrency {
            ini.with_section(Some("scheduler"))
                .set("default_concurrency", concurrency.to_string());
        }

        let mut types: Vec<_> = self.type_concurrency.iter().collect();
        types.sort();
        for (tile_type, concurrency) in types {
            ini.with_section(Some(format!("{}{}", TYPE_SECTION_PREFIX, tile_type)))
                .set("concurrency", concurrency.to_string());
        }

        let mut logging = ini.with_section(Some("logging"));
        logging
            .set("level", self.logging.level.as_str())
            .set("file", self.logging.file_name.as_str());
        if let Some(directory) = &self.logging.directory {
            logging.set("directory", directory.display().to_string());
        }

        let mut out = Vec::new();
        ini.write_to(&mut out).ok();
        String::from_utf8_lossy(&out).into_owned()
    }
}

/// Get the path to the config directory (~/.tilesched).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tilesched")
}

/// Get the path to the config file (~/.tilesched/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

fn parse_ini(ini: &Ini) -> Result<SchedulerConfig, ConfigFileError> {
    let mut config = SchedulerConfig::default();

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        if let Some(v) = section.get("default_concurrency") {
            config.default_concurrency = Some(parse_concurrency("scheduler", "default_concurrency", v)?);
        }
    }

    // [type.<name>] sections
    for (name, section) in ini.iter() {
        let Some(tile_type) = name.and_then(|n| n.strip_prefix(TYPE_SECTION_PREFIX)) else {
            continue;
        };
        if tile_type.is_empty() {
            return Err(ConfigFileError::InvalidValue {
                section: TYPE_SECTION_PREFIX.to_string(),
                key: String::new(),
                value: String::new(),
                reason: "tile type name must not be empty".to_string(),
            });
        }
        if let Some(v) = section.get("concurrency") {
            let section_name = format!("{}{}", TYPE_SECTION_PREFIX, tile_type);
            let concurrency = parse_concurrency(&section_name, "concurrency", v)?;
            config
                .type_concurrency
                .insert(tile_type.to_string(), concurrency);
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("level") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.level = v.to_string();
            }
        }
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = Some(expand_tilde(v));
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.file_name = v.to_string();
            }
        }
    }

    Ok(config)
}

fn parse_concurrency(section: &str, key: &str, value: &str) -> Result<usize, ConfigFileError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigFileError::InvalidValue {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: "must be a positive integer".to_string(),
        }),
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
