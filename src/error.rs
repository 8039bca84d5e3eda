//! Error types for the report engine.
//!
//! Every failure surfaced to a caller is a [`ReportError`]. Callers that need
//! to map failures onto transport-level responses should match on
//! [`ReportError::kind`] rather than on display strings.

use crate::config::SettingsError;
use crate::store::StoreError;

/// Result type for engine operations.
pub type ReportResult<T> = Result<T, ReportError>;

/// Errors raised while planning or executing a recipe.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("recipe not found: {0}")]
    RecipeNotFound(String),

    #[error("recipe '{recipe}' step {step} references unknown primitive '{primitive}'")]
    UnknownPrimitive {
        recipe: String,
        step: usize,
        primitive: String,
    },

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("materialized view not found: {0}")]
    ViewNotFound(String),

    #[error("materialized view '{0}' has not been refreshed yet")]
    ViewNotRefreshed(String),

    #[error("cycle detected in hierarchy: {}", cycle.join(" -> "))]
    CycleDetected { cycle: Vec<String> },

    #[error("recipe '{recipe}' requires parameter '{parameter}'")]
    MissingParameter { recipe: String, parameter: String },

    #[error("invalid value for parameter '{parameter}': {reason}")]
    InvalidParameter { parameter: String, reason: String },

    #[error("invalid recipe '{recipe}': {reason}")]
    InvalidRecipe { recipe: String, reason: String },

    #[error("invalid {primitive} configuration: {message}")]
    InvalidConfig { primitive: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV encoding error: {0}")]
    Csv(#[from] csv::Error),

    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to load recipes from {path}: {message}")]
    RecipeLoad { path: String, message: String },
}

impl ReportError {
    /// Build an [`ReportError::InvalidConfig`] for the named primitive.
    pub fn invalid_config(primitive: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidConfig {
            primitive: primitive.into(),
            message: message.to_string(),
        }
    }

    /// Build an [`ReportError::InvalidRecipe`].
    pub fn invalid_recipe(recipe: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecipe {
            recipe: recipe.into(),
            reason: reason.into(),
        }
    }

    /// Stable classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RecipeNotFound(_) => ErrorKind::RecipeNotFound,
            Self::UnknownPrimitive { .. } => ErrorKind::UnknownPrimitive,
            Self::UnsupportedFormat(_) => ErrorKind::UnsupportedFormat,
            Self::ViewNotFound(_) => ErrorKind::ViewNotFound,
            Self::ViewNotRefreshed(_) => ErrorKind::ViewNotRefreshed,
            Self::CycleDetected { .. } => ErrorKind::CycleDetected,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. } => {
                ErrorKind::InvalidParameters
            }
            Self::InvalidRecipe { .. } | Self::RecipeLoad { .. } => ErrorKind::InvalidRecipe,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
            Self::Store(_) => ErrorKind::Store,
            Self::Serialization(_) | Self::Csv(_) | Self::Settings(_) => ErrorKind::Internal,
        }
    }

    /// True for errors detected before any primitive runs.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::RecipeNotFound
                | ErrorKind::UnknownPrimitive
                | ErrorKind::UnsupportedFormat
                | ErrorKind::InvalidParameters
                | ErrorKind::InvalidRecipe
        )
    }
}

/// Stable error classification for API layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RecipeNotFound,
    UnknownPrimitive,
    UnsupportedFormat,
    ViewNotFound,
    ViewNotRefreshed,
    CycleDetected,
    InvalidParameters,
    InvalidRecipe,
    InvalidConfig,
    Store,
    Internal,
}

impl ErrorKind {
    /// Machine-readable error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RecipeNotFound => "recipe_not_found",
            ErrorKind::UnknownPrimitive => "unknown_primitive",
            ErrorKind::UnsupportedFormat => "unsupported_format",
            ErrorKind::ViewNotFound => "view_not_found",
            ErrorKind::ViewNotRefreshed => "view_not_refreshed",
            ErrorKind::CycleDetected => "cycle_detected",
            ErrorKind::InvalidParameters => "invalid_parameters",
            ErrorKind::InvalidRecipe => "invalid_recipe",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Store => "store_error",
            ErrorKind::Internal => "internal_error",
        }
    }

    /// Suggested HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::RecipeNotFound | ErrorKind::ViewNotFound => 404,
            ErrorKind::UnsupportedFormat => 415,
            ErrorKind::ViewNotRefreshed => 409,
            ErrorKind::UnknownPrimitive
            | ErrorKind::InvalidParameters
            | ErrorKind::InvalidRecipe
            | ErrorKind::InvalidConfig
            | ErrorKind::CycleDetected => 400,
            ErrorKind::Store => 502,
            ErrorKind::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
