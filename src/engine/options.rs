//! Request options, execution plans and run reports.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheKey, CacheTtl};
use crate::format::{ColumnSpec, FormattedOutput, OutputFormat, RenderOptions};
use crate::recipe::{ParameterBag, Recipe};

/// Per-call options of [`super::ReportEngine::execute_recipe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Output format; the engine default when unset.
    pub format: Option<String>,
    pub locale: Option<String>,
    pub currency: Option<String>,
    /// Title for excel and pdf output; the recipe name when unset.
    pub title: Option<String>,
    pub columns: Vec<ColumnSpec>,
    /// `false` skips both the cache read and the cache write.
    pub use_cache: bool,
    /// Skip the cache read but overwrite the stored entry.
    pub refresh_cache: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            format: None,
            locale: None,
            currency: None,
            title: None,
            columns: Vec::new(),
            use_cache: true,
            refresh_cache: false,
        }
    }
}

impl ExecuteOptions {
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn refresh(mut self) -> Self {
        self.refresh_cache = true;
        self
    }
}

/// How a run interacted with the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// Served from the cache, no step ran.
    Hit,
    /// Computed and stored.
    Miss,
    /// Computed because `refresh_cache` was set, and stored.
    Refreshed,
    /// Computed and not stored: caching was off for this call or recipe.
    Bypassed,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Refreshed => "refreshed",
            CacheStatus::Bypassed => "bypassed",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request, ready to run.
///
/// Building a plan performs no I/O: the recipe is looked up, its primitives
/// resolved, the output format parsed and the parameters bound.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub recipe: Arc<Recipe>,
    pub parameters: ParameterBag,
    pub format: OutputFormat,
    pub render: RenderOptions,
    pub cache_key: CacheKey,
    pub ttl: CacheTtl,
    pub use_cache: bool,
    pub refresh_cache: bool,
}

impl ExecutionPlan {
    /// Whether the result may be read from or written to the cache.
    pub fn caching(&self) -> bool {
        self.use_cache && self.ttl.is_enabled()
    }

    /// Whether a cached result may be served.
    pub fn reads_cache(&self) -> bool {
        self.caching() && !self.refresh_cache
    }

    pub(super) fn computed_status(&self) -> CacheStatus {
        match (self.caching(), self.refresh_cache) {
            (false, _) => CacheStatus::Bypassed,
            (true, true) => CacheStatus::Refreshed,
            (true, false) => CacheStatus::Miss,
        }
    }
}

/// Outcome of [`super::ReportEngine::run`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRun {
    pub output: FormattedOutput,
    pub cache_status: CacheStatus,
    /// Zero on a cache hit.
    pub steps_executed: usize,
    pub cache_key: CacheKey,
}
