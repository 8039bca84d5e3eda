//! Materialized views.
//!
//! A view is a named, parameterized recipe whose result is stored until the
//! next explicit refresh. Both the descriptor and the data live in the
//! engine's cache with no expiry:
//!
//! ```text
//! {org}:view:{name}:-        -> ViewDescriptor
//! {org}:view_data:{name}:-   -> recipe result of the last refresh
//! ```
//!
//! Querying never refreshes. A view created with a refresh interval reports
//! itself as stale once the interval has passed; acting on that is up to
//! the host's scheduler.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use super::ReportEngine;
use crate::cache::{CacheKey, CacheNamespace, CacheTtl};
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::recipe::{bind_parameters, ParameterBag};

/// Stored definition of a materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    pub name: String,
    pub recipe: String,
    #[serde(default)]
    pub parameters: ParameterBag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_refreshed_at: Option<DateTime<Utc>>,
}

impl ViewDescriptor {
    /// True when the view has never been refreshed, or its refresh interval
    /// has elapsed at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (self.last_refreshed_at, self.refresh_interval_secs) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(at), Some(secs)) => {
                let due = i64::try_from(secs)
                    .ok()
                    .and_then(Duration::try_seconds)
                    .and_then(|interval| at.checked_add_signed(interval));
                due.is_some_and(|due| now >= due)
            }
        }
    }
}

/// Snapshot returned by [`ReportEngine::view_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewStatus {
    #[serde(flatten)]
    pub view: ViewDescriptor,
    pub refreshed: bool,
    pub stale: bool,
}

impl ReportEngine {
    /// Define a view over a recipe. Parameters are bound now so a bad view
    /// fails at creation, not at refresh. Re-creating a view discards its data.
    pub fn create_materialized_view(
        &self,
        ctx: &ExecutionContext,
        recipe_name: &str,
        view_name: &str,
        parameters: &ParameterBag,
        refresh_interval_secs: Option<u64>,
    ) -> ReportResult<ViewDescriptor> {
        let recipe = self
            .recipe(recipe_name)
            .ok_or_else(|| ReportError::RecipeNotFound(recipe_name.to_string()))?;
        let bound = bind_parameters(&recipe, parameters)?;

        let descriptor = ViewDescriptor {
            name: view_name.to_string(),
            recipe: recipe.name.clone(),
            parameters: bound,
            refresh_interval_secs,
            created_at: Utc::now(),
            last_refreshed_at: None,
        };

        let org = ctx.organization_id.as_str();
        self.cache.remove(&CacheKey::view_data(org, view_name));
        self.store_descriptor(ctx, &descriptor)?;
        tracing::info!(view = view_name, recipe = recipe_name, organization_id = org, "materialized view created");
        Ok(descriptor)
    }

    /// Re-execute the view's recipe and store the result.
    ///
    /// On failure the previous data, if any, is kept.
    pub async fn refresh_materialized_view(
        &self,
        ctx: &ExecutionContext,
        view_name: &str,
    ) -> ReportResult<ViewDescriptor> {
        let mut descriptor = self.load_descriptor(ctx, view_name)?;
        let recipe = self
            .recipe(&descriptor.recipe)
            .ok_or_else(|| ReportError::RecipeNotFound(descriptor.recipe.clone()))?;
        self.check_primitives(&recipe)?;

        let span = tracing::info_span!(
            "view_refresh",
            view = view_name,
            recipe = %recipe.name,
            organization_id = %ctx.organization_id,
            execution_id = %ctx.execution_id,
        );
        let (payload, steps) = self
            .execute_steps(ctx, &recipe, &descriptor.parameters)
            .instrument(span)
            .await?;

        self.cache.insert(
            CacheKey::view_data(ctx.organization_id.as_str(), view_name),
            payload,
            CacheTtl::Never,
        );
        descriptor.last_refreshed_at = Some(Utc::now());
        self.store_descriptor(ctx, &descriptor)?;
        tracing::info!(view = view_name, steps, "materialized view refreshed");
        Ok(descriptor)
    }

    /// Data stored by the last refresh.
    pub fn query_materialized_view(
        &self,
        ctx: &ExecutionContext,
        view_name: &str,
    ) -> ReportResult<Value> {
        self.load_descriptor(ctx, view_name)?;
        self.cache
            .get(&CacheKey::view_data(ctx.organization_id.as_str(), view_name))
            .ok_or_else(|| ReportError::ViewNotRefreshed(view_name.to_string()))
    }

    pub fn view_status(&self, ctx: &ExecutionContext, view_name: &str) -> ReportResult<ViewStatus> {
        let view = self.load_descriptor(ctx, view_name)?;
        let refreshed = self
            .cache
            .contains(&CacheKey::view_data(ctx.organization_id.as_str(), view_name));
        let stale = !refreshed || view.is_stale(Utc::now());
        Ok(ViewStatus {
            view,
            refreshed,
            stale,
        })
    }

    /// Views of the calling organization, sorted by name.
    pub fn list_materialized_views(&self, ctx: &ExecutionContext) -> Vec<ViewDescriptor> {
        self.cache
            .keys(&ctx.organization_id, CacheNamespace::View)
            .iter()
            .filter_map(|key| self.load_descriptor(ctx, &key.name).ok())
            .collect()
    }

    pub fn drop_materialized_view(&self, ctx: &ExecutionContext, view_name: &str) -> ReportResult<()> {
        let org = ctx.organization_id.as_str();
        if !self.cache.remove(&CacheKey::view(org, view_name)) {
            return Err(ReportError::ViewNotFound(view_name.to_string()));
        }
        self.cache.remove(&CacheKey::view_data(org, view_name));
        tracing::info!(view = view_name, organization_id = org, "materialized view dropped");
        Ok(())
    }

    fn load_descriptor(&self, ctx: &ExecutionContext, view_name: &str) -> ReportResult<ViewDescriptor> {
        let stored = self
            .cache
            .get(&CacheKey::view(ctx.organization_id.as_str(), view_name))
            .ok_or_else(|| ReportError::ViewNotFound(view_name.to_string()))?;
        Ok(serde_json::from_value(stored)?)
    }

    fn store_descriptor(&self, ctx: &ExecutionContext, descriptor: &ViewDescriptor) -> ReportResult<()> {
        self.cache.insert(
            CacheKey::view(ctx.organization_id.as_str(), descriptor.name.as_str()),
            serde_json::to_value(descriptor)?,
            CacheTtl::Never,
        );
        Ok(())
    }
}
