//! End-to-end recipe execution through the engine.

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;

use common::{
    chart_of_accounts, date, params, rollup_row, sales_ledger, CountingStore, ORG, OTHER_ORG,
};
use serde_json::json;
use unireport::cache::CacheTtl;
use unireport::engine::CacheStatus;
use unireport::error::ErrorKind;
use unireport::model::{Amount, Entity, Transaction, TransactionLine};
use unireport::primitives::RollupResult;
use unireport::recipe::{ParameterBag, ParameterKind, ParameterSpec, RecipeStep};
use unireport::store::InMemoryStore;
use unireport::{ExecuteOptions, ExecutionContext, FormattedOutput, Recipe, ReportEngine, ReportError};

fn engine_over(store: Arc<CountingStore>) -> ReportEngine {
    ReportEngine::with_builtin_recipes(store).unwrap()
}

#[tokio::test]
async fn test_account_balance_tree_rolls_up() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(store);
    let ctx = ExecutionContext::new(ORG);

    let output = engine
        .execute_recipe(&ctx, "account_balance_tree", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    let json = output.into_json().unwrap();

    assert_eq!(rollup_row(&json, "acc-1000")["balance"], json!(800));
    assert_eq!(rollup_row(&json, "acc-1100")["balance"], json!(500));
    assert_eq!(rollup_row(&json, "acc-1200")["balance"], json!(300));

    let result: RollupResult = serde_json::from_value(json).unwrap();
    assert_eq!(result.roots.len(), 1);
    assert_eq!(result.root_total(), Amount::from(800));
    assert_eq!(result.root_total() + result.unassigned_total, result.grand_total);
    assert!(result.unassigned_keys.is_empty());
}

#[tokio::test]
async fn test_amounts_beyond_float_precision_stay_exact() {
    let large: Amount = "1234567890123456.78".parse().unwrap();
    let small: Amount = "0.05".parse().unwrap();
    let store = InMemoryStore::new()
        .with_entity(Entity::new("acc-1000", ORG, "gl_account", "Assets").with_code("1000"))
        .with_entity(
            Entity::new("acc-1100", ORG, "gl_account", "Cash")
                .with_code("1100")
                .with_parent("acc-1000"),
        )
        .with_entity(
            Entity::new("acc-1200", ORG, "gl_account", "Petty Cash")
                .with_code("1200")
                .with_parent("acc-1000"),
        )
        .with_transaction(
            Transaction::new("je-1", ORG, "journal_entry", date(2024, 1, 15))
                .with_line(TransactionLine::debit(1, "acc-1100", large))
                .with_line(TransactionLine::debit(2, "acc-1200", small)),
        );
    let engine = engine_over(CountingStore::new(store));
    let ctx = ExecutionContext::new(ORG);

    // The second run reads the cached payload.
    for expected in [CacheStatus::Miss, CacheStatus::Hit] {
        let run = engine
            .run(&ctx, "account_balance_tree", &ParameterBag::new(), &ExecuteOptions::default())
            .await
            .unwrap();
        assert_eq!(run.cache_status, expected);

        let result: RollupResult = serde_json::from_value(run.output.into_json().unwrap()).unwrap();
        assert_eq!(result.grand_total, large + small);
        assert_eq!(result.find("acc-1100").unwrap().balance, large);
        assert_eq!(result.root_total(), "1234567890123456.83".parse().unwrap());
    }

    let csv = engine
        .execute_recipe(
            &ctx,
            "account_balance_tree",
            &ParameterBag::new(),
            &ExecuteOptions::default().with_format("csv"),
        )
        .await
        .unwrap();
    assert!(csv.as_csv().unwrap().contains("\"$1,234,567,890,123,456.78\""));
}

#[tokio::test]
async fn test_other_organization_sees_only_its_data() {
    let engine = engine_over(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(OTHER_ORG);

    let output = engine
        .execute_recipe(&ctx, "account_balance_tree", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    let result: RollupResult = serde_json::from_value(output.into_json().unwrap()).unwrap();

    assert_eq!(result.grand_total, Amount::from(99_999));
    assert!(result.find("acc-1000").is_none());
}

#[tokio::test]
async fn test_date_parameters_filter_postings() {
    let engine = engine_over(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);

    let output = engine
        .execute_recipe(
            &ctx,
            "account_balance_tree",
            &params(json!({"date_to": "2024-01-31"})),
            &ExecuteOptions::default(),
        )
        .await
        .unwrap();
    let json = output.into_json().unwrap();

    assert_eq!(rollup_row(&json, "acc-1000")["balance"], json!(500));
    assert_eq!(rollup_row(&json, "acc-1200")["balance"], json!(0));
}

#[tokio::test]
async fn test_missing_recipe_fails_before_any_io() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    let err = engine
        .execute_recipe(&ctx, "missing_recipe", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::RecipeNotFound(ref name) if name == "missing_recipe"));
    assert_eq!(err.kind(), ErrorKind::RecipeNotFound);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_missing_parameter_fails_before_any_io() {
    let store = CountingStore::new(sales_ledger());
    let engine = engine_over(Arc::clone(&store));

    let err = engine
        .execute_recipe(
            &ExecutionContext::new(ORG),
            "entity_directory",
            &ParameterBag::new(),
            &ExecuteOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::MissingParameter { ref parameter, .. } if parameter == "entity_type"));
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_format_names_format() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));

    let err = engine
        .execute_recipe(
            &ExecutionContext::new(ORG),
            "trial_balance",
            &ParameterBag::new(),
            &ExecuteOptions::default().with_format("docx"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::UnsupportedFormat(ref f) if f == "docx"));
    assert_eq!(err.kind().http_status(), 415);
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_second_call_is_served_from_cache() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);
    let options = ExecuteOptions::default();

    let first = engine
        .run(&ctx, "account_balance_tree", &ParameterBag::new(), &options)
        .await
        .unwrap();
    let calls_after_first = store.calls();
    assert!(calls_after_first > 0);

    let second = engine
        .run(&ctx, "account_balance_tree", &ParameterBag::new(), &options)
        .await
        .unwrap();

    assert_eq!(first.output, second.output);
    assert_eq!(second.cache_status, CacheStatus::Hit);
    assert_eq!(second.steps_executed, 0);
    assert_eq!(store.calls(), calls_after_first);
    assert_eq!(engine.cache().stats().hits, 1);
}

#[tokio::test]
async fn test_parameter_order_does_not_change_cache_key() {
    let engine = engine_over(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);
    let options = ExecuteOptions::default();

    let a = engine
        .plan(&ctx, "trial_balance", &params(json!({"date_from": "2024-01-01", "date_to": "2024-12-31"})), &options)
        .unwrap();
    let b = engine
        .plan(&ctx, "trial_balance", &params(json!({"date_to": "2024-12-31", "date_from": "2024-01-01"})), &options)
        .unwrap();
    let c = engine
        .plan(&ExecutionContext::new(OTHER_ORG), "trial_balance", &params(json!({"date_from": "2024-01-01", "date_to": "2024-12-31"})), &options)
        .unwrap();

    assert_eq!(a.cache_key, b.cache_key);
    assert_ne!(a.cache_key, c.cache_key);
    assert_eq!(a.ttl, CacheTtl::Seconds(300));
}

#[tokio::test]
async fn test_refresh_cache_bypasses_read_and_overwrites() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    engine
        .run(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    let calls = store.calls();

    let refreshed = engine
        .run(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default().refresh())
        .await
        .unwrap();
    assert_eq!(refreshed.cache_status, CacheStatus::Refreshed);
    assert_eq!(refreshed.steps_executed, 2);
    assert!(store.calls() > calls);

    let calls = store.calls();
    let cached = engine
        .run(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(cached.cache_status, CacheStatus::Hit);
    assert_eq!(store.calls(), calls);
}

#[tokio::test]
async fn test_use_cache_false_neither_reads_nor_writes() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    let run = engine
        .run(&ctx, "trial_balance", &ParameterBag::new(), &ExecuteOptions::default().without_cache())
        .await
        .unwrap();

    assert_eq!(run.cache_status, CacheStatus::Bypassed);
    assert!(!engine.cache().contains(&run.cache_key));
}

#[tokio::test]
async fn test_failed_execution_is_not_cached() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    store.fail_transactions(true);
    let err = engine
        .execute_recipe(&ctx, "account_balance_tree", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Store(_)));
    assert_eq!(err.kind(), ErrorKind::Store);
    assert_eq!(engine.cache().stats().entries, 0);

    store.fail_transactions(false);
    let run = engine
        .run(&ctx, "account_balance_tree", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(run.cache_status, CacheStatus::Miss);
}

#[tokio::test]
async fn test_steps_run_in_order_and_stop_at_first_error() {
    let store = CountingStore::new(chart_of_accounts());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    // The rollup step rejects the side, so the pipeline fails after three
    // steps with the primitive's own error.
    let err = engine
        .execute_recipe(
            &ctx,
            "account_balance_tree",
            &params(json!({"side": "sideways"})),
            &ExecuteOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::InvalidConfig { ref primitive, .. } if primitive == "rollupBalance"));
    assert_eq!(store.entity_calls(), 1);
    assert_eq!(engine.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_registered_recipe_threads_outputs_between_steps() {
    let engine = engine_over(CountingStore::new(sales_ledger()));
    let ctx = ExecutionContext::new(ORG);

    let recipe = Recipe::new("customers_with_reps")
        .with_parameter(ParameterSpec::new("tag", ParameterKind::String).required())
        .with_step(
            RecipeStep::new(
                "entityResolver",
                json!({"entity_type": "customer", "tags": ["{{tag}}"], "include_dynamic": true}),
            )
            .with_output("customers"),
        )
        .with_step(RecipeStep::new(
            "dynamicJoin",
            json!({
                "rows": "{{customers}}",
                "target": {"relationship": {"type": "sales_rep"}},
                "as": "rep"
            }),
        ))
        .with_cache_ttl(CacheTtl::Disabled);
    engine.register_recipe(recipe).unwrap();

    let run = engine
        .run(&ctx, "customers_with_reps", &params(json!({"tag": "retail"})), &ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(run.cache_status, CacheStatus::Bypassed);

    let rows = run.output.into_json().unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Acme Retail");
    assert_eq!(rows[0]["rep"]["name"], "Dana Park");
}

#[tokio::test]
async fn test_unknown_primitive_is_rejected_at_registration() {
    let engine = engine_over(CountingStore::new(sales_ledger()));

    let err = engine
        .register_recipe(
            Recipe::new("pivot")
                .with_step(RecipeStep::new("entityResolver", json!({})).with_output("rows"))
                .with_step(RecipeStep::new("pivotTable", json!({"rows": "{{rows}}"}))),
        )
        .unwrap_err();

    assert!(matches!(err, ReportError::UnknownPrimitive { step: 1, .. }));
    assert!(engine.recipe("pivot").is_none());
}

#[tokio::test]
async fn test_available_recipes_is_a_snapshot() {
    let engine = engine_over(CountingStore::new(sales_ledger()));

    let mut recipes = engine.available_recipes();
    let names: Vec<_> = recipes.iter().map(|r| r.name.clone()).collect();
    assert_eq!(
        names,
        vec!["account_balance_tree", "entity_directory", "sales_by_customer", "trial_balance"]
    );

    recipes.clear();
    assert_eq!(engine.available_recipes().len(), 4);
}

#[tokio::test]
async fn test_clear_cache_by_recipe() {
    let engine = engine_over(CountingStore::new(sales_ledger()));
    let ctx = ExecutionContext::new(ORG);
    let options = ExecuteOptions::default();

    engine.run(&ctx, "sales_by_customer", &ParameterBag::new(), &options).await.unwrap();
    engine
        .run(&ctx, "entity_directory", &params(json!({"entity_type": "customer"})), &options)
        .await
        .unwrap();
    assert_eq!(engine.cache().stats().entries, 2);

    assert_eq!(engine.clear_cache(&ctx, Some("sales_by_customer")), 1);
    assert_eq!(engine.clear_cache(&ctx, None), 1);
    assert_eq!(engine.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_clear_cache_keeps_other_organizations() {
    let engine = engine_over(CountingStore::new(chart_of_accounts()));
    let acme = ExecutionContext::new(ORG);
    let globex = ExecutionContext::new(OTHER_ORG);
    let options = ExecuteOptions::default();

    for ctx in [&acme, &globex] {
        engine
            .run(ctx, "account_balance_tree", &ParameterBag::new(), &options)
            .await
            .unwrap();
    }
    assert_eq!(engine.cache().stats().entries, 2);

    assert_eq!(engine.clear_cache(&acme, Some("account_balance_tree")), 1);
    assert_eq!(engine.clear_cache(&acme, None), 0);

    let globex_run = engine
        .run(&globex, "account_balance_tree", &ParameterBag::new(), &options)
        .await
        .unwrap();
    assert_eq!(globex_run.cache_status, CacheStatus::Hit);

    let acme_run = engine
        .run(&acme, "account_balance_tree", &ParameterBag::new(), &options)
        .await
        .unwrap();
    assert_eq!(acme_run.cache_status, CacheStatus::Miss);

    assert_eq!(engine.clear_cache_all_organizations(Some("account_*")), 2);
    assert_eq!(engine.cache().stats().entries, 0);
}

#[tokio::test]
async fn test_huge_cache_ttl_is_accepted() {
    let engine = engine_over(CountingStore::new(chart_of_accounts()));
    let ctx = ExecutionContext::new(ORG);
    let recipe = Recipe::new("accounts_forever")
        .with_cache_ttl(CacheTtl::try_from(i64::MAX).unwrap())
        .with_step(RecipeStep::new(
            "entityResolver",
            json!({"entity_type": "gl_account"}),
        ));
    engine.register_recipe(recipe).unwrap();

    let first = engine
        .run(&ctx, "accounts_forever", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    let second = engine
        .run(&ctx, "accounts_forever", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();

    assert_eq!(first.cache_status, CacheStatus::Miss);
    assert_eq!(second.cache_status, CacheStatus::Hit);
}

#[tokio::test]
async fn test_sales_by_customer_csv() {
    let engine = engine_over(CountingStore::new(sales_ledger()));
    let ctx = ExecutionContext::new(ORG);

    let output = engine
        .execute_recipe(
            &ctx,
            "sales_by_customer",
            &ParameterBag::new(),
            &ExecuteOptions::default().with_format("csv"),
        )
        .await
        .unwrap();

    let FormattedOutput::Csv(text) = output else {
        panic!("expected csv output");
    };
    let mut lines = text.lines();
    let header = lines.next().unwrap();
    assert!(header.contains("Source Entity Id"));
    assert!(header.contains("Revenue"));
    let body: Vec<_> = lines.collect();
    assert_eq!(body.len(), 2);
    assert!(body[0].contains("cust-1") && body[0].contains("$150.00"));
    assert!(body[1].contains("cust-2") && body[1].contains("$80.00"));
}

#[tokio::test]
async fn test_cached_result_serves_every_format() {
    let store = CountingStore::new(sales_ledger());
    let engine = engine_over(Arc::clone(&store));
    let ctx = ExecutionContext::new(ORG);

    let json = engine
        .execute_recipe(&ctx, "sales_by_customer", &ParameterBag::new(), &ExecuteOptions::default())
        .await
        .unwrap();
    let calls = store.calls();

    let table = engine
        .run(
            &ctx,
            "sales_by_customer",
            &ParameterBag::new(),
            &ExecuteOptions::default().with_format("table").with_locale("de-DE").with_currency("EUR"),
        )
        .await
        .unwrap();

    assert_eq!(table.cache_status, CacheStatus::Hit);
    assert_eq!(store.calls(), calls);
    let table = table.output.as_table().unwrap().clone();
    assert_eq!(table.rows.len(), json.as_json().unwrap().as_array().unwrap().len());
}
