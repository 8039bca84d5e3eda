//! Configuration module.
//!
//! Handles the settings file and environment variable expansion.

mod settings;

pub use settings::{
    expand_env_vars, EngineSettings, LoggingSettings, RecipeSettings, Settings, SettingsError,
};
