//! Materialized view lifecycle.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{chart_of_accounts, params, rollup_row, CountingStore, ORG, OTHER_ORG};
use serde_json::json;
use unireport::error::ErrorKind;
use unireport::recipe::ParameterBag;
use unireport::{ExecutionContext, ReportEngine, ReportError};

fn engine(store: Arc<CountingStore>) -> ReportEngine {
    ReportEngine::with_builtin_recipes(store).unwrap()
}

#[tokio::test]
async fn test_query_before_refresh_fails_without_executing() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    engine
        .create_materialized_view(&ctx, "account_balance_tree", "balances", &ParameterBag::new(), Some(3600))
        .unwrap();

    let err = engine.query_materialized_view(&ctx, "balances").unwrap_err();
    assert!(matches!(err, ReportError::ViewNotRefreshed(ref name) if name == "balances"));
    assert_eq!(err.kind(), ErrorKind::ViewNotRefreshed);
    assert_eq!(store.calls(), 0);

    let status = engine.view_status(&ctx, "balances").unwrap();
    assert!(!status.refreshed);
    assert!(status.stale);
}

#[tokio::test]
async fn test_refresh_then_query() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    engine
        .create_materialized_view(&ctx, "account_balance_tree", "balances", &ParameterBag::new(), None)
        .unwrap();
    let descriptor = engine.refresh_materialized_view(&ctx, "balances").await.unwrap();
    assert!(descriptor.last_refreshed_at.is_some());
    let calls = store.calls();

    let data = engine.query_materialized_view(&ctx, "balances").unwrap();
    assert_eq!(rollup_row(&data, "acc-1000")["balance"], json!(800));
    assert_eq!(store.calls(), calls);

    let status = engine.view_status(&ctx, "balances").unwrap();
    assert!(status.refreshed);
    assert!(!status.stale);
    assert_eq!(status.view.recipe, "account_balance_tree");
}

#[tokio::test]
async fn test_view_parameters_are_bound_at_creation() {
    let engine = engine(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);

    let descriptor = engine
        .create_materialized_view(
            &ctx,
            "account_balance_tree",
            "january",
            &params(json!({"date_to": "2024-01-31"})),
            None,
        )
        .unwrap();
    assert_eq!(descriptor.parameters["account_type"], "gl_account");

    engine.refresh_materialized_view(&ctx, "january").await.unwrap();
    let data = engine.query_materialized_view(&ctx, "january").unwrap();
    assert_eq!(rollup_row(&data, "acc-1000")["balance"], json!(500));

    let err = engine
        .create_materialized_view(&ctx, "account_balance_tree", "bad", &params(json!({"date_to": "soon"})), None)
        .unwrap_err();
    assert!(matches!(err, ReportError::InvalidParameter { .. }));
}

#[tokio::test]
async fn test_view_misuse_errors() {
    let engine = engine(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);

    assert!(matches!(
        engine.query_materialized_view(&ctx, "nope"),
        Err(ReportError::ViewNotFound(_))
    ));
    assert!(matches!(
        engine.refresh_materialized_view(&ctx, "nope").await,
        Err(ReportError::ViewNotFound(_))
    ));
    assert!(matches!(
        engine.drop_materialized_view(&ctx, "nope"),
        Err(ReportError::ViewNotFound(_))
    ));
    assert!(matches!(
        engine.create_materialized_view(&ctx, "missing_recipe", "v", &ParameterBag::new(), None),
        Err(ReportError::RecipeNotFound(_))
    ));
}

#[tokio::test]
async fn test_views_are_per_organization_and_survive_cache_clear() {
    let engine = engine(CountingStore::new(chart_of_accounts()));
    let acme = ExecutionContext::new(ORG);
    let globex = ExecutionContext::new(OTHER_ORG);

    engine
        .create_materialized_view(&acme, "trial_balance", "tb", &ParameterBag::new(), None)
        .unwrap();
    engine.refresh_materialized_view(&acme, "tb").await.unwrap();

    assert!(matches!(
        engine.query_materialized_view(&globex, "tb"),
        Err(ReportError::ViewNotFound(_))
    ));

    engine.clear_cache(&acme, None);
    engine.clear_cache_all_organizations(None);
    assert!(engine.query_materialized_view(&acme, "tb").is_ok());
    assert_eq!(engine.list_materialized_views(&acme).len(), 1);
    assert!(engine.list_materialized_views(&globex).is_empty());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_data() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    engine
        .create_materialized_view(&ctx, "account_balance_tree", "balances", &ParameterBag::new(), None)
        .unwrap();
    engine.refresh_materialized_view(&ctx, "balances").await.unwrap();
    let before = engine.query_materialized_view(&ctx, "balances").unwrap();

    store.fail_transactions(true);
    let err = engine.refresh_materialized_view(&ctx, "balances").await.unwrap_err();
    assert!(matches!(err, ReportError::Store(_)));
    assert_eq!(engine.query_materialized_view(&ctx, "balances").unwrap(), before);
}

#[tokio::test]
async fn test_drop_and_recreate() {
    let engine = engine(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);

    engine
        .create_materialized_view(&ctx, "trial_balance", "tb", &ParameterBag::new(), None)
        .unwrap();
    engine.refresh_materialized_view(&ctx, "tb").await.unwrap();

    // Re-creating discards the stored data.
    engine
        .create_materialized_view(&ctx, "trial_balance", "tb", &ParameterBag::new(), Some(60))
        .unwrap();
    assert!(matches!(
        engine.query_materialized_view(&ctx, "tb"),
        Err(ReportError::ViewNotRefreshed(_))
    ));

    engine.drop_materialized_view(&ctx, "tb").unwrap();
    assert!(matches!(
        engine.view_status(&ctx, "tb"),
        Err(ReportError::ViewNotFound(_))
    ));
}
