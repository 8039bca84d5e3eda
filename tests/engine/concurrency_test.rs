//! Concurrent identical requests.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{chart_of_accounts, CountingStore, ORG, OTHER_ORG};
use unireport::engine::CacheStatus;
use unireport::recipe::ParameterBag;
use unireport::{ExecuteOptions, ExecutionContext, ReportEngine};

async fn run_twice(engine: &ReportEngine, a: &ExecutionContext, b: &ExecutionContext) -> (CacheStatus, CacheStatus) {
    let params = ParameterBag::new();
    let options = ExecuteOptions::default();
    let (first, second) = futures::join!(
        engine.run(a, "account_balance_tree", &params, &options),
        engine.run(b, "account_balance_tree", &params, &options),
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.output.format(), second.output.format());
    (first.cache_status, second.cache_status)
}

#[tokio::test]
async fn test_single_flight_executes_once() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = ReportEngine::with_builtin_recipes(Arc::clone(&store) as _).unwrap();
    let ctx = ExecutionContext::new(ORG);

    let statuses = run_twice(&engine, &ctx, &ctx).await;

    assert_eq!(statuses, (CacheStatus::Miss, CacheStatus::Hit));
    assert_eq!(store.entity_calls(), 1);
    assert_eq!(engine.cache().stats().entries, 1);
}

#[tokio::test]
async fn test_without_single_flight_both_compute() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = ReportEngine::with_builtin_recipes(Arc::clone(&store) as _)
        .unwrap()
        .with_single_flight(false);
    let ctx = ExecutionContext::new(ORG);

    let statuses = run_twice(&engine, &ctx, &ctx).await;

    // Both requests missed before either stored its result.
    assert_eq!(statuses, (CacheStatus::Miss, CacheStatus::Miss));
    assert_eq!(store.entity_calls(), 2);
    assert_eq!(engine.cache().stats().entries, 1);
}

#[tokio::test]
async fn test_different_organizations_do_not_wait_on_each_other() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = ReportEngine::with_builtin_recipes(Arc::clone(&store) as _).unwrap();

    let statuses = run_twice(
        &engine,
        &ExecutionContext::new(ORG),
        &ExecutionContext::new(OTHER_ORG),
    )
    .await;

    assert_eq!(statuses, (CacheStatus::Miss, CacheStatus::Miss));
    assert_eq!(store.entity_calls(), 2);
    assert_eq!(engine.cache().stats().entries, 2);
    assert_eq!(engine.cache().lock_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_across_tasks() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = Arc::new(ReportEngine::with_builtin_recipes(Arc::clone(&store) as _).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                let ctx = ExecutionContext::new(ORG);
                engine
                    .run(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default())
                    .await
                    .map(|run| run.cache_status)
            })
        })
        .collect();

    let mut misses = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() != CacheStatus::Hit {
            misses += 1;
        }
    }
    assert_eq!(misses, 1);
    assert_eq!(engine.cache().lock_count(), 0);
}
