//! Entity store collaborator.
//!
//! The engine never executes queries itself; it asks an [`EntityStore`]
//! supplied by the host system. Every call carries the organization id and
//! implementations must never return rows from another organization.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       EntityStore                        │
//! │  - query_entities(org, EntityFilter)                     │
//! │  - query_dynamic_attributes(org, entity_ids)             │
//! │  - query_relationships(org, RelationshipFilter)          │
//! │  - query_transactions(org, TransactionFilter)            │
//! └──────────────────────────────────────────────────────────┘
//!            │                               │
//!            ▼                               ▼
//!    host RPC/CRUD client             InMemoryStore
//!                               (JSON snapshot, tests & CLI)
//! ```

mod memory;

pub use memory::{InMemoryStore, StoreSnapshot};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::model::{DynamicAttribute, Entity, Relationship, Transaction};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by an entity store.
///
/// The engine surfaces these unmodified inside [`crate::ReportError::Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("entity store unavailable: {0}")]
    Unavailable(String),

    #[error("entity store query failed: {0}")]
    Query(String),

    #[error("failed to load store snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Pushdown filter for entity queries. Empty fields do not filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityFilter {
    pub entity_types: Vec<String>,
    pub ids: Vec<String>,
    pub codes: Vec<String>,
    /// Entities must carry every listed tag.
    pub tags: Vec<String>,
    pub parent_ref: Option<String>,
    pub smart_code_prefix: Option<String>,
}

impl EntityFilter {
    pub fn by_ids(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        (self.entity_types.is_empty() || self.entity_types.contains(&entity.entity_type))
            && (self.ids.is_empty() || self.ids.contains(&entity.id))
            && (self.codes.is_empty()
                || entity.code.as_ref().is_some_and(|c| self.codes.contains(c)))
            && self.tags.iter().all(|t| entity.has_tag(t))
            && self
                .parent_ref
                .as_ref()
                .is_none_or(|p| entity.parent_ref.as_ref() == Some(p))
            && self
                .smart_code_prefix
                .as_ref()
                .is_none_or(|p| entity.smart_code.starts_with(p.as_str()))
    }
}

/// Pushdown filter for relationship queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipFilter {
    pub relationship_types: Vec<String>,
    pub from_entity_ids: Vec<String>,
    pub to_entity_ids: Vec<String>,
}

impl RelationshipFilter {
    pub fn matches(&self, rel: &Relationship) -> bool {
        (self.relationship_types.is_empty()
            || self.relationship_types.contains(&rel.relationship_type))
            && (self.from_entity_ids.is_empty() || self.from_entity_ids.contains(&rel.from_entity_id))
            && (self.to_entity_ids.is_empty() || self.to_entity_ids.contains(&rel.to_entity_id))
    }
}

/// Pushdown filter for transaction queries. Date bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionFilter {
    pub transaction_types: Vec<String>,
    pub smart_code_prefix: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub source_entity_ids: Vec<String>,
    pub target_entity_ids: Vec<String>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        (self.transaction_types.is_empty() || self.transaction_types.contains(&tx.transaction_type))
            && self
                .smart_code_prefix
                .as_ref()
                .is_none_or(|p| tx.smart_code.starts_with(p.as_str()))
            && self.date_from.is_none_or(|d| tx.transaction_date >= d)
            && self.date_to.is_none_or(|d| tx.transaction_date <= d)
            && (self.source_entity_ids.is_empty()
                || tx
                    .source_entity_id
                    .as_ref()
                    .is_some_and(|id| self.source_entity_ids.contains(id)))
            && (self.target_entity_ids.is_empty()
                || tx
                    .target_entity_id
                    .as_ref()
                    .is_some_and(|id| self.target_entity_ids.contains(id)))
    }
}

/// Read access to the generic entity store.
///
/// Implementations scope every call to `organization_id`.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entities of the organization matching `filter`, attributes unhydrated.
    async fn query_entities(
        &self,
        organization_id: &str,
        filter: &EntityFilter,
    ) -> StoreResult<Vec<Entity>>;

    /// Dynamic attribute rows for the given entities.
    async fn query_dynamic_attributes(
        &self,
        organization_id: &str,
        entity_ids: &[String],
    ) -> StoreResult<Vec<DynamicAttribute>>;

    /// Relationships of the organization matching `filter`.
    async fn query_relationships(
        &self,
        organization_id: &str,
        filter: &RelationshipFilter,
    ) -> StoreResult<Vec<Relationship>>;

    /// Transactions (with lines) of the organization matching `filter`.
    async fn query_transactions(
        &self,
        organization_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<Transaction>>;
}
