//! # Unireport
//!
//! A recipe-driven report and aggregation engine over a generic,
//! multi-tenant entity store.
//!
//! ## Architecture
//!
//! Reports are recipes: ordered lists of primitive steps whose outputs feed
//! later steps through `{{placeholders}}`.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │              Recipe (TOML / JSON / builder)              │
//! │   parameters, steps [{primitive, config, output_key}]    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [plan: lookup, bind, hash]
//! ┌─────────────────────────────────────────────────────────┐
//! │                     ReportEngine                         │
//! │   CacheManager (per org / recipe / parameter hash)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │ miss
//!                          ▼ [steps, in order]
//! ┌─────────────────────────────────────────────────────────┐
//! │  entityResolver → hierarchyBuilder → transactionFacts    │
//! │        → dynamicJoin → rollupBalance                     │
//! └─────────────────────────────────────────────────────────┘
//!                          │            ▲
//!                          │            │ EntityStore (host)
//!                          ▼ [format]
//! ┌─────────────────────────────────────────────────────────┐
//! │   PresentationFormatter: json, table, csv, excel, pdf    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use unireport::prelude::*;
//!
//! let store = Arc::new(InMemoryStore::load("snapshot.json")?);
//! let engine = ReportEngine::with_builtin_recipes(store)?;
//! let ctx = ExecutionContext::new("org-1");
//!
//! let output = engine
//!     .execute_recipe(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default().with_format("csv"))
//!     .await?;
//! println!("{}", output.as_csv().unwrap_or_default());
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod format;
pub mod model;
pub mod primitives;
pub mod recipe;
pub mod store;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{CacheKey, CacheManager, CacheStats, CacheTtl};
    pub use crate::config::Settings;
    pub use crate::context::ExecutionContext;
    pub use crate::engine::{
        CacheStatus, ExecuteOptions, ExecutionPlan, ReportEngine, ReportRun, ViewDescriptor,
        ViewStatus,
    };
    pub use crate::error::{ErrorKind, ReportError, ReportResult};
    pub use crate::format::{FormattedOutput, OutputFormat, PresentationFormatter};
    pub use crate::model::{Amount, Entity, EntrySide, Relationship, Transaction, TransactionLine};
    pub use crate::primitives::{Primitive, PrimitiveRegistry, TypedPrimitive};
    pub use crate::recipe::{ParameterBag, ParameterKind, ParameterSpec, Recipe, RecipeStep};
    pub use crate::store::{EntityStore, InMemoryStore};
}

// Also export at crate root for convenience
pub use context::ExecutionContext;
pub use engine::{ExecuteOptions, ReportEngine};
pub use error::{ReportError, ReportResult};
pub use format::{FormattedOutput, OutputFormat};
pub use recipe::Recipe;
