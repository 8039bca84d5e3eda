//! Properties of the primitives, exercised through their typed APIs.

#[path = "../common/mod.rs"]
mod common;

use common::{chart_of_accounts, date, sales_ledger, ORG};
use serde_json::{json, Value};
use unireport::model::{Amount, AttributeValue, Entity, Relationship, Row, Transaction, TransactionLine};
use unireport::primitives::{
    build_tree, DynamicJoin, EntityResolver, FactLevel, FactsConfig, HierarchyBuilder,
    HierarchyConfig, HierarchyNode, JoinConfig, JoinMode, JoinTarget, ResolverConfig,
    RollupBalance, RollupConfig, TransactionFacts, UnmatchedPolicy,
};
use unireport::store::InMemoryStore;
use unireport::{ExecutionContext, ReportError};

fn check_depths(node: &HierarchyNode, expected_depth: usize, seen: &mut usize) {
    assert_eq!(node.depth, expected_depth, "depth of {}", node.entity.id);
    assert_eq!(node.path.len(), expected_depth + 1);
    *seen += 1;
    for child in &node.children {
        check_depths(child, expected_depth + 1, seen);
    }
}

/// 40 entities in a ternary tree, listed in a scrambled order so children
/// often precede their parents.
fn ternary_tree() -> Vec<Entity> {
    let entities: Vec<Entity> = (0..40)
        .map(|i| {
            let entity = Entity::new(format!("n{i}"), ORG, "node", format!("Node {i}"));
            if i == 0 {
                entity
            } else {
                entity.with_parent(format!("n{}", (i - 1) / 3))
            }
        })
        .collect();
    // 7 is coprime with 40, so striding visits every entity once.
    let len = entities.len();
    (0..len).map(|i| entities[(i * 7) % len].clone()).collect()
}

#[test]
fn test_hierarchy_depths_and_node_count() {
    let entities = ternary_tree();
    let output = build_tree(&HierarchyConfig::new(entities.clone()), None).unwrap();

    assert_eq!(output.roots.len(), 1);
    assert_eq!(output.node_count, entities.len());
    assert!(output.orphans.is_empty());

    let mut seen = 0;
    for root in &output.roots {
        check_depths(root, 0, &mut seen);
    }
    assert_eq!(seen, entities.len());
    assert_eq!(output.max_depth, 3);
}

#[test]
fn test_hierarchy_orphans_become_roots() {
    let entities = vec![
        Entity::new("a", ORG, "node", "A"),
        Entity::new("b", ORG, "node", "B").with_parent("missing"),
        Entity::new("c", ORG, "node", "C").with_parent("a"),
    ];
    let output = build_tree(&HierarchyConfig::new(entities), None).unwrap();

    let roots: Vec<_> = output.roots.iter().map(|r| r.entity.id.as_str()).collect();
    assert_eq!(roots, vec!["a", "b"]);
    assert_eq!(output.orphans, vec!["b".to_string()]);
    assert_eq!(output.node_count, 3);
}

#[test]
fn test_hierarchy_cycle_fails_or_is_broken() {
    let entities = vec![
        Entity::new("root", ORG, "node", "Root"),
        Entity::new("x", ORG, "node", "X").with_parent("y"),
        Entity::new("y", ORG, "node", "Y").with_parent("x"),
    ];

    let err = build_tree(&HierarchyConfig::new(entities.clone()), None).unwrap_err();
    match err {
        ReportError::CycleDetected { cycle } => {
            assert!(cycle.contains(&"x".to_string()) && cycle.contains(&"y".to_string()));
        }
        other => panic!("expected a cycle error, got {other}"),
    }

    let config = HierarchyConfig {
        break_cycles: true,
        ..HierarchyConfig::new(entities)
    };
    let output = build_tree(&config, None).unwrap();
    assert_eq!(output.node_count, 3);
    assert_eq!(output.cycles.len(), 1);
}

#[tokio::test]
async fn test_hierarchy_from_relationships() {
    let store = InMemoryStore::new()
        .with_relationship(Relationship::new(ORG, "team-a", "dept", "reports_to"))
        .with_relationship(Relationship::new(ORG, "team-b", "dept", "reports_to"));
    let entities = vec![
        Entity::new("dept", ORG, "org_unit", "Department"),
        Entity::new("team-a", ORG, "org_unit", "Team A"),
        Entity::new("team-b", ORG, "org_unit", "Team B"),
    ];
    let config = HierarchyConfig {
        relationship_type: Some("reports_to".into()),
        ..HierarchyConfig::new(entities)
    };

    let output = HierarchyBuilder
        .build(&ExecutionContext::new(ORG), &store, &config)
        .await
        .unwrap();
    assert_eq!(output.roots.len(), 1);
    assert_eq!(output.roots[0].children.len(), 2);
}

#[tokio::test]
async fn test_fact_sums_are_exact() {
    let mut tx = Transaction::new("bulk", ORG, "journal_entry", date(2024, 5, 1));
    for n in 0..1000 {
        tx = tx.with_line(TransactionLine::debit(n, "acc", Amount::from_minor(1, 1)));
    }
    let store = InMemoryStore::new().with_transaction(tx);

    let config = FactsConfig {
        level: FactLevel::Line,
        group_by: vec!["entity_id".into()],
        ..FactsConfig::default()
    };
    let rows = TransactionFacts
        .aggregate(&ExecutionContext::new(ORG), &store, &config)
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].measure("amount"), Amount::from(100));
    assert_eq!(rows[0].measure("count"), Amount::from(1000));
}

#[tokio::test]
async fn test_fact_rows_per_distinct_group() {
    let store = sales_ledger();
    let config: FactsConfig = serde_json::from_value(json!({
        "group_by": ["transaction_type", "month"],
        "measures": [
            {"name": "total", "op": "sum", "field": "amount"},
            {"name": "average", "op": "avg", "field": "amount"},
            {"name": "discount", "op": "sum", "field": "fields.discount"}
        ]
    }))
    .unwrap();

    let rows = TransactionFacts
        .aggregate(&ExecutionContext::new(ORG), &store, &config)
        .await
        .unwrap();

    // sale/March, purchase/March, sale/April
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].measure("total"), Amount::from(200));
    assert_eq!(rows[0].measure("average"), Amount::from(100));
    // Missing measure fields aggregate to zero rather than disappearing.
    assert_eq!(rows[0].measure("discount"), Amount::ZERO);
    assert!(rows.iter().all(|r| r.measures.contains_key("discount")));
}

#[tokio::test]
async fn test_unknown_dimension_fails_before_reading() {
    let store = sales_ledger();
    let config = FactsConfig {
        group_by: vec!["weather".into()],
        ..FactsConfig::default()
    };
    let err = TransactionFacts
        .aggregate(&ExecutionContext::new(ORG), &store, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::InvalidConfig { .. }));
}

fn contact_store() -> InMemoryStore {
    InMemoryStore::new()
        .with_entity(Entity::new("p1", ORG, "person", "Pat"))
        .with_entity(Entity::new("p2", ORG, "person", "Sam"))
        .with_entity(Entity::new("p3", ORG, "person", "Lee"))
        .with_entity(
            Entity::new("c1", ORG, "customer", "Acme")
                .with_attribute("region", AttributeValue::Text("north".into())),
        )
        .with_entity(Entity::new("c2", ORG, "customer", "Bolt"))
        .with_entity(Entity::new("c3", ORG, "customer", "Core"))
        .with_relationship(Relationship::new(ORG, "c1", "p1", "contact"))
        .with_relationship(Relationship::new(ORG, "c1", "p2", "contact"))
        .with_relationship(Relationship::new(ORG, "c3", "p3", "contact"))
}

fn base_rows() -> Vec<Row> {
    ["c1", "c2", "c3"]
        .iter()
        .map(|id| {
            let mut row = Row::new();
            row.insert("id".into(), Value::String(id.to_string()));
            row
        })
        .collect()
}

#[tokio::test]
async fn test_one_to_one_join_never_changes_row_count() {
    let store = contact_store();
    let ctx = ExecutionContext::new(ORG);

    for target in [
        JoinTarget::Attribute("region".into()),
        JoinTarget::Entity,
        JoinTarget::Relationship {
            relationship_type: "contact".into(),
            direction: Default::default(),
        },
    ] {
        let rows = DynamicJoin
            .join(&ctx, &store, &JoinConfig::new(base_rows(), target))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
    }

    let rows = DynamicJoin
        .join(&ctx, &store, &JoinConfig::new(base_rows(), JoinTarget::Attribute("region".into())))
        .await
        .unwrap();
    assert_eq!(rows[0]["region"], "north");
    assert_eq!(rows[1]["region"], Value::Null);
}

#[tokio::test]
async fn test_one_to_many_join_counts_matches() {
    let store = contact_store();
    let ctx = ExecutionContext::new(ORG);
    let target = JoinTarget::Relationship {
        relationship_type: "contact".into(),
        direction: Default::default(),
    };

    let null_filled = JoinConfig {
        mode: JoinMode::OneToMany,
        ..JoinConfig::new(base_rows(), target.clone())
    };
    let rows = DynamicJoin.join(&ctx, &store, &null_filled).await.unwrap();
    // c1 has two contacts, c2 none (kept with null), c3 one.
    assert_eq!(rows.len(), 2 + 1 + 1);
    assert_eq!(rows[2]["contact"], Value::Null);

    let dropping = JoinConfig {
        mode: JoinMode::OneToMany,
        unmatched: UnmatchedPolicy::Drop,
        ..JoinConfig::new(base_rows(), target)
    };
    let rows = DynamicJoin.join(&ctx, &store, &dropping).await.unwrap();
    assert_eq!(rows.len(), 2 + 1);
    assert!(rows.iter().all(|r| r["id"] != "c2"));
}

#[tokio::test]
async fn test_resolver_hydrates_and_orders() {
    let store = sales_ledger();
    let config = ResolverConfig {
        include_dynamic: true,
        order_by: Some("name".into()),
        ..ResolverConfig::for_type("customer")
    };

    let entities = EntityResolver
        .resolve(&ExecutionContext::new(ORG), &store, &config)
        .await
        .unwrap();

    let names: Vec<_> = entities.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Acme Retail", "Bolt Hardware"]);
    assert_eq!(entities[1].attributes["tier"], AttributeValue::Text("silver".into()));

    let none = EntityResolver
        .resolve(&ExecutionContext::new("nobody"), &store, &config)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_rollup_roots_plus_unassigned_equal_grand_total() {
    let store = chart_of_accounts().with_transaction(
        Transaction::new("je-3", ORG, "journal_entry", date(2024, 3, 1))
            .with_line(TransactionLine::credit(1, "acc-1100", 120))
            .with_line(TransactionLine::debit(2, "acc-9999", 45)),
    );
    let ctx = ExecutionContext::new(ORG);

    let accounts = EntityResolver
        .resolve(&ctx, &store, &ResolverConfig::for_type("gl_account"))
        .await
        .unwrap();
    let tree = build_tree(&HierarchyConfig::new(accounts), None).unwrap();
    let facts = TransactionFacts
        .aggregate(
            &ctx,
            &store,
            &FactsConfig {
                level: FactLevel::Line,
                group_by: vec!["entity_id".into(), "side".into()],
                ..FactsConfig::default()
            },
        )
        .await
        .unwrap();

    let result = RollupBalance
        .calculate(&RollupConfig::new(tree.roots, facts))
        .unwrap();

    assert_eq!(result.find("acc-1100").unwrap().balance, Amount::from(380));
    assert_eq!(result.find("acc-1000").unwrap().balance, Amount::from(680));
    assert_eq!(result.unassigned_total, Amount::from(45));
    assert_eq!(result.unassigned_keys, vec!["acc-9999".to_string()]);
    assert_eq!(result.grand_total, Amount::from(725));
    assert_eq!(result.root_total() + result.unassigned_total, result.grand_total);
}
