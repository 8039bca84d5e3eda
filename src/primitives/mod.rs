//! Composable report-building primitives.
//!
//! A recipe step names a primitive and hands it a JSON configuration (after
//! parameter substitution). Each primitive declares a typed configuration
//! and output via [`TypedPrimitive`]; the blanket [`Primitive`] impl does the
//! JSON conversion so the engine can treat all primitives uniformly.
//!
//! | Name                    | Type                    | Output                |
//! |-------------------------|-------------------------|-----------------------|
//! | `entityResolver`        | [`EntityResolver`]      | `Vec<Entity>`         |
//! | `hierarchyBuilder`      | [`HierarchyBuilder`]    | [`HierarchyOutput`]   |
//! | `transactionFacts`      | [`TransactionFacts`]    | `Vec<FactRow>`        |
//! | `dynamicJoin`           | [`DynamicJoin`]         | `Vec<Row>`            |
//! | `rollupBalance`         | [`RollupBalance`]       | [`RollupResult`]      |
//! | `presentationFormatter` | [`FormatterPrimitive`]  | `FormattedOutput`     |

mod dynamic_join;
mod entity_resolver;
mod hierarchy;
mod rollup;
mod transaction_facts;

pub use dynamic_join::{DynamicJoin, JoinConfig, JoinMode, JoinTarget, RelationshipDirection, UnmatchedPolicy};
pub use entity_resolver::{AttributePredicate, EntityResolver, PredicateOp, ResolverConfig};
pub use hierarchy::{build_tree, HierarchyBuilder, HierarchyConfig, HierarchyNode, HierarchyOutput, ParentMatch};
pub use rollup::{RollupBalance, RollupConfig, RollupNode, RollupResult, RollupRow};
pub use transaction_facts::{
    FactLevel, FactRow, FactsConfig, MeasureDefinition, MeasureOp, TransactionFacts,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::format::{FormatRequest, PresentationFormatter};
use crate::store::EntityStore;

/// Uniform, JSON-in/JSON-out view of a primitive used by the engine.
#[async_trait]
pub trait Primitive: Send + Sync {
    /// Name recipes use to reference this primitive.
    fn name(&self) -> &'static str;

    /// Run with an already-substituted configuration.
    async fn run(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: Value,
    ) -> ReportResult<Value>;
}

/// A primitive with a typed configuration and output.
#[async_trait]
pub trait TypedPrimitive: Send + Sync {
    const NAME: &'static str;

    type Config: DeserializeOwned + Send;
    type Output: Serialize + Send;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: Self::Config,
    ) -> ReportResult<Self::Output>;
}

#[async_trait]
impl<T> Primitive for T
where
    T: TypedPrimitive,
{
    fn name(&self) -> &'static str {
        T::NAME
    }

    async fn run(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: Value,
    ) -> ReportResult<Value> {
        let config: T::Config =
            serde_json::from_value(config).map_err(|e| ReportError::invalid_config(T::NAME, e))?;
        let output = self.execute(ctx, store, config).await?;
        Ok(serde_json::to_value(output)?)
    }
}

/// Exposes the presentation formatter as a recipe step.
#[derive(Debug, Clone, Default)]
pub struct FormatterPrimitive {
    formatter: PresentationFormatter,
}

impl FormatterPrimitive {
    pub fn new(formatter: PresentationFormatter) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl TypedPrimitive for FormatterPrimitive {
    const NAME: &'static str = "presentationFormatter";

    type Config = FormatRequest;
    type Output = crate::format::FormattedOutput;

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _store: &dyn EntityStore,
        config: FormatRequest,
    ) -> ReportResult<Self::Output> {
        self.formatter.format(&config)
    }
}

/// Registry mapping primitive names to implementations.
#[derive(Clone, Default)]
pub struct PrimitiveRegistry {
    primitives: HashMap<String, Arc<dyn Primitive>>,
}

impl PrimitiveRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the six built-in primitives.
    pub fn with_defaults(formatter: PresentationFormatter) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(EntityResolver));
        registry.register(Arc::new(HierarchyBuilder));
        registry.register(Arc::new(TransactionFacts));
        registry.register(Arc::new(DynamicJoin));
        registry.register(Arc::new(RollupBalance));
        registry.register(Arc::new(FormatterPrimitive::new(formatter)));
        registry
    }

    /// Register a primitive under its own name, replacing any previous one.
    pub fn register(&mut self, primitive: Arc<dyn Primitive>) {
        self.primitives
            .insert(primitive.name().to_string(), primitive);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Primitive>> {
        self.primitives.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.primitives.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.primitives.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for PrimitiveRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrimitiveRegistry")
            .field("primitives", &self.names())
            .finish()
    }
}
