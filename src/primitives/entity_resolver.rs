//! Entity resolution: fetch, filter, and optionally hydrate entities.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TypedPrimitive;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::model::{Amount, AttributeValue, Entity};
use crate::store::{EntityFilter, EntityStore};

/// Configuration of the `entityResolver` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub entity_type: Option<String>,
    pub entity_types: Vec<String>,
    pub ids: Vec<String>,
    pub codes: Vec<String>,
    pub tags: Vec<String>,
    /// Only entities whose `parent_ref` equals this value.
    pub parent: Option<String>,
    pub smart_code_prefix: Option<String>,
    /// Predicates over fixed fields or dynamic attributes, all must hold.
    #[serde(alias = "where")]
    pub predicates: Vec<AttributePredicate>,
    /// Hydrate `attributes` from dynamic attribute rows. Attributes the
    /// store returns on the entity itself are kept either way.
    pub include_dynamic: bool,
    /// `code` or `name`; store order when absent.
    pub order_by: Option<String>,
    pub limit: Option<usize>,
}

impl ResolverConfig {
    pub fn for_type(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: Some(entity_type.into()),
            ..Self::default()
        }
    }

    fn store_filter(&self) -> EntityFilter {
        let mut entity_types: Vec<String> = self.entity_type.iter().cloned().collect();
        entity_types.extend(self.entity_types.iter().cloned());
        EntityFilter {
            entity_types,
            ids: self.ids.clone(),
            codes: self.codes.clone(),
            tags: self.tags.clone(),
            parent_ref: self.parent.clone(),
            smart_code_prefix: self.smart_code_prefix.clone(),
        }
    }
}

/// Comparison applied by an [`AttributePredicate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Exists,
}

/// A custom entity predicate, e.g. `credit_limit gte 1000`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributePredicate {
    pub attribute: String,
    pub op: PredicateOp,
    #[serde(default)]
    pub value: Option<Value>,
}

impl AttributePredicate {
    pub fn new(attribute: impl Into<String>, op: PredicateOp, value: Value) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: Some(value),
        }
    }

    pub fn evaluate(&self, entity: &Entity) -> bool {
        let actual = entity.field(&self.attribute);
        if self.op == PredicateOp::Exists {
            return actual.as_ref().is_some_and(|v| !v.is_null());
        }
        let (Some(actual), Some(expected)) = (actual, self.value.as_ref()) else {
            return self.op == PredicateOp::Ne && self.value.is_some();
        };

        match self.op {
            PredicateOp::Eq => compare(&actual, expected) == Some(Ordering::Equal),
            PredicateOp::Ne => compare(&actual, expected) != Some(Ordering::Equal),
            PredicateOp::Gt => compare(&actual, expected) == Some(Ordering::Greater),
            PredicateOp::Gte => matches!(
                compare(&actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            PredicateOp::Lt => compare(&actual, expected) == Some(Ordering::Less),
            PredicateOp::Lte => matches!(
                compare(&actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            PredicateOp::Contains => match (&actual, expected) {
                (Value::String(haystack), Value::String(needle)) => haystack.contains(needle.as_str()),
                (Value::Array(items), needle) => items.contains(needle),
                _ => false,
            },
            PredicateOp::Exists => !actual.is_null(),
        }
    }
}

/// Numbers compare numerically, strings lexically (ISO dates sort correctly).
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => {
            let a = Amount::from_json(left)?;
            let b = Amount::from_json(right)?;
            Some(a.cmp(&b))
        }
    }
}

/// The `entityResolver` primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityResolver;

impl EntityResolver {
    /// Resolve entities for the calling organization.
    ///
    /// Returns an empty list when nothing matches; store errors propagate.
    pub async fn resolve(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: &ResolverConfig,
    ) -> ReportResult<Vec<Entity>> {
        let org = ctx.organization_id.as_str();
        let mut entities: Vec<Entity> = store
            .query_entities(org, &config.store_filter())
            .await?
            .into_iter()
            .filter(|e| {
                let own = e.organization_id == org;
                if !own {
                    tracing::warn!(
                        entity_id = %e.id,
                        organization_id = %e.organization_id,
                        "store returned an entity from another organization; dropped"
                    );
                }
                own
            })
            .collect();

        // Hydrating only for predicates: remember what the store returned so
        // the dynamic rows can be taken off again afterwards.
        let mut stored: Option<HashMap<String, BTreeMap<String, AttributeValue>>> = None;
        if (config.include_dynamic || !config.predicates.is_empty()) && !entities.is_empty() {
            if !config.include_dynamic {
                stored = Some(
                    entities
                        .iter()
                        .map(|e| (e.id.clone(), e.attributes.clone()))
                        .collect(),
                );
            }
            hydrate(ctx, store, &mut entities).await?;
        }

        if !config.predicates.is_empty() {
            entities.retain(|e| config.predicates.iter().all(|p| p.evaluate(e)));
        }

        if let Some(mut stored) = stored {
            for entity in &mut entities {
                entity.attributes = stored.remove(&entity.id).unwrap_or_default();
            }
        }

        match config.order_by.as_deref() {
            None => {}
            Some("code") => entities.sort_by(|a, b| a.code.cmp(&b.code)),
            Some("name") => entities.sort_by(|a, b| a.name.cmp(&b.name)),
            Some(other) => {
                return Err(ReportError::invalid_config(
                    "entityResolver",
                    format!("unsupported order_by '{}': expected 'code' or 'name'", other),
                ))
            }
        }

        if let Some(limit) = config.limit {
            entities.truncate(limit);
        }

        tracing::debug!(count = entities.len(), "resolved entities");
        Ok(entities)
    }
}

/// Fill each entity's `attributes` from its dynamic attribute rows.
async fn hydrate(
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    entities: &mut [Entity],
) -> ReportResult<()> {
    let ids: Vec<String> = entities.iter().map(|e| e.id.clone()).collect();
    let rows = store
        .query_dynamic_attributes(&ctx.organization_id, &ids)
        .await?;

    let mut by_entity: HashMap<String, Vec<(String, AttributeValue)>> = HashMap::new();
    for row in rows {
        if row.organization_id != ctx.organization_id {
            continue;
        }
        by_entity
            .entry(row.entity_id)
            .or_default()
            .push((row.name, row.value));
    }

    for entity in entities.iter_mut() {
        if let Some(attrs) = by_entity.remove(&entity.id) {
            entity.attributes.extend(attrs);
        }
    }
    Ok(())
}

#[async_trait]
impl TypedPrimitive for EntityResolver {
    const NAME: &'static str = "entityResolver";

    type Config = ResolverConfig;
    type Output = Vec<Entity>;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: ResolverConfig,
    ) -> ReportResult<Vec<Entity>> {
        self.resolve(ctx, store, &config).await
    }
}
