//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use unireport::model::{AttributeValue, DynamicAttribute, Entity, Relationship, Transaction, TransactionLine};
use unireport::recipe::ParameterBag;
use unireport::store::{
    EntityFilter, EntityStore, InMemoryStore, RelationshipFilter, StoreError, StoreResult,
    TransactionFilter,
};

pub const ORG: &str = "acme";
pub const OTHER_ORG: &str = "globex";

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Turn a JSON object literal into a parameter bag.
pub fn params(value: Value) -> ParameterBag {
    value.as_object().cloned().unwrap_or_default()
}

/// Three GL accounts (1000 Assets with children 1100 Cash and 1200 AR) and
/// two journal entries debiting 500 to Cash and 300 to AR.
///
/// A second organization reuses the same account ids with a large posting,
/// so any cross-tenant leak shows up in the totals.
pub fn chart_of_accounts() -> InMemoryStore {
    InMemoryStore::new()
        .with_entity(Entity::new("acc-1000", ORG, "gl_account", "Assets").with_code("1000"))
        .with_entity(
            Entity::new("acc-1100", ORG, "gl_account", "Cash")
                .with_code("1100")
                .with_parent("acc-1000"),
        )
        .with_entity(
            Entity::new("acc-1200", ORG, "gl_account", "Accounts Receivable")
                .with_code("1200")
                .with_parent("acc-1000"),
        )
        .with_transaction(
            Transaction::new("je-1", ORG, "journal_entry", date(2024, 1, 15))
                .with_smart_code("FIN.GL.JE")
                .with_line(TransactionLine::debit(1, "acc-1100", 500)),
        )
        .with_transaction(
            Transaction::new("je-2", ORG, "journal_entry", date(2024, 2, 10))
                .with_smart_code("FIN.GL.JE")
                .with_line(TransactionLine::debit(1, "acc-1200", 300)),
        )
        .with_entity(Entity::new("acc-1100", OTHER_ORG, "gl_account", "Cash").with_code("1100"))
        .with_transaction(
            Transaction::new("je-x", OTHER_ORG, "journal_entry", date(2024, 1, 15))
                .with_line(TransactionLine::debit(1, "acc-1100", 99_999)),
        )
}

/// Customers with dynamic attributes, a sales rep relationship, and sales.
pub fn sales_ledger() -> InMemoryStore {
    InMemoryStore::new()
        .with_entity(
            Entity::new("cust-1", ORG, "customer", "Acme Retail")
                .with_code("C001")
                .with_tag("retail")
                .with_attribute("tier", AttributeValue::Text("gold".into())),
        )
        .with_entity(
            Entity::new("cust-2", ORG, "customer", "Bolt Hardware")
                .with_code("C002")
                .with_tag("wholesale"),
        )
        .with_entity(Entity::new("rep-1", ORG, "employee", "Dana Park"))
        .with_attribute(DynamicAttribute::new(
            ORG,
            "cust-2",
            "tier",
            AttributeValue::Text("silver".into()),
        ))
        .with_relationship(Relationship::new(ORG, "cust-1", "rep-1", "sales_rep"))
        .with_transaction(
            Transaction::new("inv-1", ORG, "sale", date(2024, 3, 1))
                .with_source("cust-1")
                .with_total(120)
                .with_currency("USD"),
        )
        .with_transaction(
            Transaction::new("inv-2", ORG, "sale", date(2024, 3, 5))
                .with_source("cust-2")
                .with_total(80)
                .with_currency("USD"),
        )
        .with_transaction(
            Transaction::new("inv-3", ORG, "sale", date(2024, 4, 2))
                .with_source("cust-1")
                .with_total(30)
                .with_currency("USD"),
        )
        .with_transaction(
            Transaction::new("po-1", ORG, "purchase", date(2024, 3, 2))
                .with_target("cust-2")
                .with_total(500),
        )
}

/// Wraps a store, counting calls and optionally failing transaction reads.
///
/// Every call yields once so concurrent executions interleave.
#[derive(Debug)]
pub struct CountingStore {
    inner: InMemoryStore,
    calls: AtomicUsize,
    entity_calls: AtomicUsize,
    fail_transactions: AtomicBool,
}

impl CountingStore {
    pub fn new(inner: InMemoryStore) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: AtomicUsize::new(0),
            entity_calls: AtomicUsize::new(0),
            fail_transactions: AtomicBool::new(false),
        })
    }

    /// Total store calls of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `query_entities` calls; one per entityResolver execution.
    pub fn entity_calls(&self) -> usize {
        self.entity_calls.load(Ordering::SeqCst)
    }

    pub fn fail_transactions(&self, fail: bool) {
        self.fail_transactions.store(fail, Ordering::SeqCst);
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl EntityStore for CountingStore {
    async fn query_entities(
        &self,
        organization_id: &str,
        filter: &EntityFilter,
    ) -> StoreResult<Vec<Entity>> {
        self.entity_calls.fetch_add(1, Ordering::SeqCst);
        self.enter().await;
        self.inner.query_entities(organization_id, filter).await
    }

    async fn query_dynamic_attributes(
        &self,
        organization_id: &str,
        entity_ids: &[String],
    ) -> StoreResult<Vec<DynamicAttribute>> {
        self.enter().await;
        self.inner
            .query_dynamic_attributes(organization_id, entity_ids)
            .await
    }

    async fn query_relationships(
        &self,
        organization_id: &str,
        filter: &RelationshipFilter,
    ) -> StoreResult<Vec<Relationship>> {
        self.enter().await;
        self.inner.query_relationships(organization_id, filter).await
    }

    async fn query_transactions(
        &self,
        organization_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<Transaction>> {
        self.enter().await;
        if self.fail_transactions.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("ledger offline".into()));
        }
        self.inner.query_transactions(organization_id, filter).await
    }
}

/// Find the flattened rollup row for `entity_id` in a rollup result.
pub fn rollup_row<'a>(result: &'a Value, entity_id: &str) -> &'a Value {
    result["rows"]
        .as_array()
        .and_then(|rows| rows.iter().find(|r| r["entity_id"] == entity_id))
        .unwrap_or_else(|| panic!("no rollup row for {entity_id}: {result}"))
}
