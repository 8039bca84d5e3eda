//! Recipe orchestration.
//!
//! ```text
//! execute_recipe(ctx, name, params, options)
//!        │
//!        ▼  plan: recipe lookup, primitive check, format, parameter binding
//! ┌──────────────┐   hit    ┌─────────┐
//! │  CacheCheck  │ ───────▶ │ Format  │ ──▶ FormattedOutput
//! └──────────────┘          └─────────┘
//!        │ miss / refresh        ▲
//!        ▼                       │
//! ┌──────────────┐   ok    ┌────────────┐
//! │ Step 0..n    │ ──────▶ │ CacheWrite │
//! └──────────────┘         └────────────┘
//!        │ error
//!        ▼
//!   ReportError (nothing cached)
//! ```
//!
//! Steps run strictly in recipe order. Each step's configuration has its
//! placeholders resolved against the parameter bag, and a step with an
//! `output_key` adds its output to the bag for the steps after it.

mod options;
mod views;

pub use options::{CacheStatus, ExecuteOptions, ExecutionPlan, ReportRun};
pub use views::{ViewDescriptor, ViewStatus};

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::Instrument;

use crate::cache::{compute_hash, CacheKey, CacheManager, CacheTtl};
use crate::config::Settings;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::format::{FormattedOutput, OutputFormat, PresentationFormatter, RenderOptions};
use crate::primitives::{Primitive, PrimitiveRegistry};
use crate::recipe::{
    bind_parameters, builtin_recipes, load_paths, resolve, ParameterBag, Recipe, RecipeRegistry,
};
use crate::store::EntityStore;

/// Executes recipes against an entity store.
///
/// The engine owns its primitives, recipe registry and cache; two engines
/// never share state.
pub struct ReportEngine {
    store: Arc<dyn EntityStore>,
    primitives: PrimitiveRegistry,
    recipes: RwLock<RecipeRegistry>,
    cache: CacheManager,
    formatter: PresentationFormatter,
    default_format: OutputFormat,
    single_flight: bool,
}

impl ReportEngine {
    /// An engine with the default primitives and no recipes.
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        let formatter = PresentationFormatter::default();
        Self {
            store,
            primitives: PrimitiveRegistry::with_defaults(formatter.clone()),
            recipes: RwLock::new(RecipeRegistry::new()),
            cache: CacheManager::default(),
            formatter,
            default_format: OutputFormat::Json,
            single_flight: true,
        }
    }

    /// An engine with the built-in recipe library registered.
    pub fn with_builtin_recipes(store: Arc<dyn EntityStore>) -> ReportResult<Self> {
        let engine = Self::new(store);
        for recipe in builtin_recipes()? {
            engine.register_recipe(recipe)?;
        }
        Ok(engine)
    }

    /// Build an engine from settings, registering built-in and file recipes.
    pub fn from_settings(store: Arc<dyn EntityStore>, settings: &Settings) -> ReportResult<Self> {
        settings.validate()?;
        let engine_settings = &settings.engine;
        let formatter = PresentationFormatter::new(
            &engine_settings.default_locale,
            &engine_settings.default_currency,
        );

        let engine = Self {
            store,
            primitives: PrimitiveRegistry::with_defaults(formatter.clone()),
            recipes: RwLock::new(RecipeRegistry::new()),
            cache: CacheManager::new(engine_settings.default_cache_ttl()?),
            formatter,
            default_format: engine_settings.output_format()?,
            single_flight: engine_settings.single_flight,
        };

        if settings.recipes.include_builtin {
            for recipe in builtin_recipes()? {
                engine.register_recipe(recipe)?;
            }
        }
        for recipe in load_paths(&settings.recipes.resolved_paths()?)? {
            engine.register_recipe(recipe)?;
        }

        tracing::info!(
            recipes = engine.recipe_count(),
            single_flight = engine.single_flight,
            "report engine ready"
        );
        Ok(engine)
    }

    /// Add or replace a primitive. Register primitives before the recipes
    /// that use them.
    pub fn with_primitive(mut self, primitive: Arc<dyn Primitive>) -> Self {
        self.primitives.register(primitive);
        self
    }

    pub fn with_cache_ttl(mut self, default_ttl: CacheTtl) -> Self {
        self.cache = CacheManager::new(default_ttl);
        self
    }

    /// Turn per-key de-duplication of concurrent cache misses on or off.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_default_format(mut self, format: OutputFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn primitives(&self) -> &PrimitiveRegistry {
        &self.primitives
    }

    // ------------------------------------------------------------------
    // Recipe registry
    // ------------------------------------------------------------------

    /// Validate and register a recipe, replacing one with the same name.
    ///
    /// Cached results of a replaced recipe are dropped.
    pub fn register_recipe(&self, recipe: Recipe) -> ReportResult<()> {
        let name = recipe.name.clone();
        let replaced = self
            .recipes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(recipe, &self.primitives)?;
        if replaced.is_some() {
            self.cache.invalidate_recipe(&name);
        }
        tracing::debug!(recipe = %name, replaced = replaced.is_some(), "recipe registered");
        Ok(())
    }

    /// Snapshot of the registered recipes, sorted by name.
    pub fn available_recipes(&self) -> Vec<Recipe> {
        self.recipes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn recipe(&self, name: &str) -> Option<Arc<Recipe>> {
        self.recipes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
    }

    fn recipe_count(&self) -> usize {
        self.recipes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop the caller's cached results for recipes matching `recipe` (a
    /// name or `*` glob), or for every recipe. Other organizations and
    /// materialized views are kept. Returns the number of entries removed.
    pub fn clear_cache(&self, ctx: &ExecutionContext, recipe: Option<&str>) -> usize {
        let removed = self
            .cache
            .invalidate_pattern(Some(&ctx.organization_id), recipe.unwrap_or("*"));
        tracing::info!(organization_id = %ctx.organization_id, recipe, removed, "cache cleared");
        removed
    }

    /// Like [`ReportEngine::clear_cache`], across every organization.
    pub fn clear_cache_all_organizations(&self, recipe: Option<&str>) -> usize {
        let removed = self.cache.invalidate_pattern(None, recipe.unwrap_or("*"));
        tracing::info!(recipe, removed, "cache cleared for all organizations");
        removed
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Validate a request without touching the store.
    pub fn plan(
        &self,
        ctx: &ExecutionContext,
        recipe_name: &str,
        parameters: &ParameterBag,
        options: &ExecuteOptions,
    ) -> ReportResult<ExecutionPlan> {
        let recipe = self
            .recipe(recipe_name)
            .ok_or_else(|| ReportError::RecipeNotFound(recipe_name.to_string()))?;
        self.check_primitives(&recipe)?;

        let format = match &options.format {
            Some(format) => format.parse::<OutputFormat>()?,
            None => self.default_format,
        };
        let bound = bind_parameters(&recipe, parameters)?;
        let cache_key = CacheKey::report(
            ctx.organization_id.as_str(),
            recipe.name.as_str(),
            compute_hash(&bound)?,
        );

        let render = RenderOptions {
            locale: options.locale.clone(),
            currency: options.currency.clone(),
            columns: options.columns.clone(),
            title: options.title.clone().or_else(|| Some(recipe.name.clone())),
        };

        Ok(ExecutionPlan {
            ttl: recipe.ttl_or(self.cache.default_ttl()),
            recipe,
            parameters: bound,
            format,
            render,
            cache_key,
            use_cache: options.use_cache,
            refresh_cache: options.refresh_cache,
        })
    }

    /// Execute a recipe and return its formatted output.
    pub async fn execute_recipe(
        &self,
        ctx: &ExecutionContext,
        recipe_name: &str,
        parameters: &ParameterBag,
        options: &ExecuteOptions,
    ) -> ReportResult<FormattedOutput> {
        self.run(ctx, recipe_name, parameters, options)
            .await
            .map(|run| run.output)
    }

    /// Execute a recipe and report how the result was produced.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        recipe_name: &str,
        parameters: &ParameterBag,
        options: &ExecuteOptions,
    ) -> ReportResult<ReportRun> {
        let plan = self.plan(ctx, recipe_name, parameters, options)?;
        let span = tracing::info_span!(
            "recipe",
            recipe = %plan.recipe.name,
            organization_id = %ctx.organization_id,
            execution_id = %ctx.execution_id,
        );
        self.run_plan(ctx, plan).instrument(span).await
    }

    async fn run_plan(&self, ctx: &ExecutionContext, plan: ExecutionPlan) -> ReportResult<ReportRun> {
        if plan.reads_cache() {
            if let Some(payload) = self.cache.get(&plan.cache_key) {
                tracing::debug!(key = %plan.cache_key, "cache hit");
                return self.finish(plan, &payload, CacheStatus::Hit, 0);
            }
            tracing::debug!(key = %plan.cache_key, "cache miss");
        }

        let inflight = if plan.caching() && self.single_flight {
            Some(self.cache.lock(&plan.cache_key).await)
        } else {
            None
        };
        if inflight.is_some() && plan.reads_cache() {
            if let Some(payload) = self.cache.get(&plan.cache_key) {
                tracing::debug!(key = %plan.cache_key, "cache filled while waiting");
                return self.finish(plan, &payload, CacheStatus::Hit, 0);
            }
        }

        let (payload, steps) = match self.execute_steps(ctx, &plan.recipe, &plan.parameters).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, kind = err.kind().as_str(), "recipe failed");
                return Err(err);
            }
        };

        if plan.caching() {
            self.cache
                .insert(plan.cache_key.clone(), payload.clone(), plan.ttl);
        }
        drop(inflight);

        let status = plan.computed_status();
        tracing::info!(steps, cache = %status, "recipe executed");
        self.finish(plan, &payload, status, steps)
    }

    fn finish(
        &self,
        plan: ExecutionPlan,
        payload: &Value,
        cache_status: CacheStatus,
        steps_executed: usize,
    ) -> ReportResult<ReportRun> {
        Ok(ReportRun {
            output: self.formatter.render(payload, plan.format, &plan.render)?,
            cache_status,
            steps_executed,
            cache_key: plan.cache_key,
        })
    }

    fn check_primitives(&self, recipe: &Recipe) -> ReportResult<()> {
        for (step, def) in recipe.steps.iter().enumerate() {
            if !self.primitives.contains(&def.primitive) {
                return Err(ReportError::UnknownPrimitive {
                    recipe: recipe.name.clone(),
                    step,
                    primitive: def.primitive.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run every step in order and return the recipe result with the number
    /// of steps executed.
    async fn execute_steps(
        &self,
        ctx: &ExecutionContext,
        recipe: &Recipe,
        parameters: &ParameterBag,
    ) -> ReportResult<(Value, usize)> {
        let mut bag = parameters.clone();
        let mut last = Value::Null;

        for (index, step) in recipe.steps.iter().enumerate() {
            let primitive = self.primitives.get(&step.primitive).ok_or_else(|| {
                ReportError::UnknownPrimitive {
                    recipe: recipe.name.clone(),
                    step: index,
                    primitive: step.primitive.clone(),
                }
            })?;

            let config = resolve(&step.config, &bag);
            tracing::debug!(step = index, primitive = %step.primitive, "executing step");
            let output = primitive.run(ctx, self.store.as_ref(), config).await?;

            if let Some(key) = &step.output_key {
                bag.insert(key.clone(), output.clone());
            }
            last = output;
        }

        let result = match &recipe.output {
            Some(name) => bag.remove(name).unwrap_or(Value::Null),
            None => last,
        };
        Ok((result, recipe.steps.len()))
    }
}

impl std::fmt::Debug for ReportEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportEngine")
            .field("primitives", &self.primitives)
            .field("recipes", &self.recipe_count())
            .field("cache", &self.cache.stats())
            .field("default_format", &self.default_format)
            .field("single_flight", &self.single_flight)
            .finish()
    }
}
