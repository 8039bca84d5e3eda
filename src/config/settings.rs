//! TOML-based configuration for the report engine.
//!
//! Supports a config file (unireport.toml) with environment variable expansion
//! in recipe paths.
//!
//! Example configuration:
//! ```toml
//! [engine]
//! default_format = "json"
//! default_locale = "en-US"
//! default_currency = "USD"
//! default_cache_ttl_secs = 300   # -1 never expires, 0 disables caching
//! single_flight = true
//!
//! [recipes]
//! include_builtin = true
//! paths = ["./recipes", "${REPORTS_HOME}/recipes"]
//!
//! [logging]
//! filter = "info"
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cache::CacheTtl;
use crate::format::OutputFormat;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Engine defaults.
    pub engine: EngineSettings,

    /// Where recipes come from.
    pub recipes: RecipeSettings,

    /// Log filter used by the binary.
    pub logging: LoggingSettings,
}

/// Engine defaults applied when a request leaves them unset.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Output format: json, table, csv, excel, pdf.
    pub default_format: String,

    /// Locale tag such as "en-US".
    pub default_locale: String,

    /// ISO 4217 currency code.
    pub default_currency: String,

    /// Cache TTL for recipes that do not declare one.
    pub default_cache_ttl_secs: i64,

    /// Collapse concurrent identical cache misses into one execution.
    pub single_flight: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_format: "json".to_string(),
            default_locale: "en-US".to_string(),
            default_currency: "USD".to_string(),
            default_cache_ttl_secs: 300,
            single_flight: true,
        }
    }
}

impl EngineSettings {
    pub fn default_cache_ttl(&self) -> Result<CacheTtl, SettingsError> {
        CacheTtl::try_from(self.default_cache_ttl_secs).map_err(|_| {
            SettingsError::InvalidConfig(format!(
                "engine.default_cache_ttl_secs must be -1, 0 or positive, got {}",
                self.default_cache_ttl_secs
            ))
        })
    }

    pub fn output_format(&self) -> Result<OutputFormat, SettingsError> {
        self.default_format.parse().map_err(|_| {
            SettingsError::InvalidConfig(format!(
                "engine.default_format '{}' is not one of {}",
                self.default_format,
                OutputFormat::ALL
                    .iter()
                    .map(|f| f.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        })
    }
}

/// Recipe sources.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecipeSettings {
    /// Register the built-in recipe library first.
    pub include_builtin: bool,

    /// Recipe files or directories (supports ${ENV_VAR} expansion).
    pub paths: Vec<String>,
}

impl Default for RecipeSettings {
    fn default() -> Self {
        Self {
            include_builtin: true,
            paths: Vec::new(),
        }
    }
}

impl RecipeSettings {
    /// Configured paths with environment variables expanded.
    pub fn resolved_paths(&self) -> Result<Vec<PathBuf>, SettingsError> {
        self.paths
            .iter()
            .map(|p| expand_env_vars(p).map(PathBuf::from))
            .collect()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` takes precedence.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `UNIREPORT_CONFIG`
    /// 2. `./unireport.toml`
    ///
    /// Falls back to defaults when neither exists.
    pub fn discover() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("UNIREPORT_CONFIG") {
            return Self::load(&path);
        }

        let local_config = PathBuf::from("unireport.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Settings::default())
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.engine.output_format()?;
        self.engine.default_cache_ttl()?;
        if self.engine.default_locale.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "engine.default_locale must not be empty".to_string(),
            ));
        }
        if self.engine.default_currency.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "engine.default_currency must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let var_name = if chars.next_if_eq(&'{').is_some() {
            let mut name = String::new();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                name.push(ch);
            }
            name
        } else {
            let mut name = String::new();
            while let Some(ch) = chars.next_if(|ch| ch.is_alphanumeric() || *ch == '_') {
                name.push(ch);
            }
            if name.is_empty() {
                // lone $
                result.push('$');
                continue;
            }
            name
        };

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
