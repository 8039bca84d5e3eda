//! In-memory entity store backed by a JSON snapshot.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{
    EntityFilter, EntityStore, RelationshipFilter, StoreError, StoreResult, TransactionFilter,
};
use crate::model::{DynamicAttribute, Entity, Organization, Relationship, Transaction};

/// Contents of the six-table store. Transaction lines are nested in their header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSnapshot {
    pub organizations: Vec<Organization>,
    pub entities: Vec<Entity>,
    pub dynamic_attributes: Vec<DynamicAttribute>,
    pub relationships: Vec<Relationship>,
    pub transactions: Vec<Transaction>,
}

/// An [`EntityStore`] holding everything in memory.
///
/// Rows are returned in insertion order, which keeps report output stable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    snapshot: StoreSnapshot,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self { snapshot }
    }

    /// Parse a snapshot from JSON text.
    pub fn from_json_str(json: &str) -> StoreResult<Self> {
        let snapshot: StoreSnapshot =
            serde_json::from_str(json).map_err(|e| StoreError::Snapshot(e.to_string()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Load a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Snapshot(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&json)
    }

    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.snapshot
    }

    pub fn with_organization(mut self, organization: Organization) -> Self {
        self.snapshot.organizations.push(organization);
        self
    }

    /// Add an entity. Attributes set on the entity are split out into
    /// dynamic attribute rows, as the real store keeps them.
    pub fn with_entity(mut self, mut entity: Entity) -> Self {
        let attributes = std::mem::take(&mut entity.attributes);
        for (name, value) in attributes {
            self.snapshot.dynamic_attributes.push(DynamicAttribute::new(
                entity.organization_id.clone(),
                entity.id.clone(),
                name,
                value,
            ));
        }
        self.snapshot.entities.push(entity);
        self
    }

    pub fn with_attribute(mut self, attribute: DynamicAttribute) -> Self {
        self.snapshot.dynamic_attributes.push(attribute);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.snapshot.relationships.push(relationship);
        self
    }

    pub fn with_transaction(mut self, transaction: Transaction) -> Self {
        self.snapshot.transactions.push(transaction);
        self
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn query_entities(
        &self,
        organization_id: &str,
        filter: &EntityFilter,
    ) -> StoreResult<Vec<Entity>> {
        Ok(self
            .snapshot
            .entities
            .iter()
            .filter(|e| e.organization_id == organization_id && filter.matches(e))
            .cloned()
            .collect())
    }

    async fn query_dynamic_attributes(
        &self,
        organization_id: &str,
        entity_ids: &[String],
    ) -> StoreResult<Vec<DynamicAttribute>> {
        Ok(self
            .snapshot
            .dynamic_attributes
            .iter()
            .filter(|a| a.organization_id == organization_id && entity_ids.contains(&a.entity_id))
            .cloned()
            .collect())
    }

    async fn query_relationships(
        &self,
        organization_id: &str,
        filter: &RelationshipFilter,
    ) -> StoreResult<Vec<Relationship>> {
        Ok(self
            .snapshot
            .relationships
            .iter()
            .filter(|r| r.organization_id == organization_id && filter.matches(r))
            .cloned()
            .collect())
    }

    async fn query_transactions(
        &self,
        organization_id: &str,
        filter: &TransactionFilter,
    ) -> StoreResult<Vec<Transaction>> {
        Ok(self
            .snapshot
            .transactions
            .iter()
            .filter(|t| t.organization_id == organization_id && filter.matches(t))
            .cloned()
            .collect())
    }
}
