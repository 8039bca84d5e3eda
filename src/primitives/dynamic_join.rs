//! EAV-style joins onto an arbitrary row set.
//!
//! A join correlates each base row's key (a dotted path into the row) with
//! the keyed entity itself, one of its dynamic attributes, or entities
//! related to it through a typed relationship.
//!
//! One-to-one joins never change the row count: a missing match becomes
//! `null`, and extra matches are ignored (with a warning). One-to-many joins
//! emit one row per match and must be requested explicitly.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TypedPrimitive;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::model::{key_string, lookup, Row};
use crate::store::{EntityFilter, EntityStore, RelationshipFilter};

const NAME: &str = "dynamicJoin";

/// Direction to follow a relationship from the keyed entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipDirection {
    /// Key is `from_entity_id`; the related entity is `to_entity_id`.
    #[default]
    Outgoing,
    /// Key is `to_entity_id`; the related entity is `from_entity_id`.
    Incoming,
}

/// What a row key is joined against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinTarget {
    /// The entity whose id is the key.
    Entity,
    /// A dynamic attribute of the keyed entity.
    Attribute(String),
    /// Entities related to the keyed entity.
    Relationship {
        #[serde(rename = "type")]
        relationship_type: String,
        #[serde(default)]
        direction: RelationshipDirection,
    },
}

impl JoinTarget {
    fn default_alias(&self) -> &str {
        match self {
            JoinTarget::Entity => "entity",
            JoinTarget::Attribute(name) => name,
            JoinTarget::Relationship {
                relationship_type, ..
            } => relationship_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    OneToOne,
    OneToMany,
}

/// Fate of a base row without matches in one-to-many mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedPolicy {
    #[default]
    Null,
    Drop,
}

/// Configuration of the `dynamicJoin` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    pub rows: Vec<Row>,
    #[serde(default = "default_key")]
    pub key: String,
    pub target: JoinTarget,
    #[serde(default)]
    pub mode: JoinMode,
    /// Field the joined value is written to; defaults to the target name.
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default)]
    pub unmatched: UnmatchedPolicy,
}

fn default_key() -> String {
    "id".to_string()
}

impl JoinConfig {
    pub fn new(rows: Vec<Row>, target: JoinTarget) -> Self {
        Self {
            rows,
            key: default_key(),
            target,
            mode: JoinMode::default(),
            alias: None,
            unmatched: UnmatchedPolicy::default(),
        }
    }

    fn alias(&self) -> &str {
        self.alias
            .as_deref()
            .unwrap_or_else(|| self.target.default_alias())
    }
}

/// The `dynamicJoin` primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicJoin;

impl DynamicJoin {
    pub async fn join(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: &JoinConfig,
    ) -> ReportResult<Vec<Row>> {
        let alias = config.alias();
        if alias.is_empty() {
            return Err(ReportError::invalid_config(NAME, "join alias must not be empty"));
        }

        let keys: Vec<Option<String>> = config
            .rows
            .iter()
            .map(|row| row_key(row, &config.key))
            .collect();
        let mut distinct: Vec<String> = Vec::new();
        for key in keys.iter().flatten() {
            if !distinct.contains(key) {
                distinct.push(key.clone());
            }
        }

        let matches = if distinct.is_empty() {
            HashMap::new()
        } else {
            match &config.target {
                JoinTarget::Entity => entity_matches(ctx, store, &distinct).await?,
                JoinTarget::Attribute(name) => attribute_matches(ctx, store, &distinct, name).await?,
                JoinTarget::Relationship {
                    relationship_type,
                    direction,
                } => {
                    relationship_matches(ctx, store, &distinct, relationship_type, *direction)
                        .await?
                }
            }
        };

        let mut output = Vec::with_capacity(config.rows.len());
        for (row, key) in config.rows.iter().zip(&keys) {
            let found: &[Value] = key
                .as_ref()
                .and_then(|k| matches.get(k))
                .map(Vec::as_slice)
                .unwrap_or(&[]);

            match config.mode {
                JoinMode::OneToOne => {
                    if found.len() > 1 {
                        tracing::warn!(
                            key = key.as_deref().unwrap_or_default(),
                            matches = found.len(),
                            alias,
                            "one-to-one join matched several records; keeping the first"
                        );
                    }
                    output.push(with_field(row, alias, found.first().cloned()));
                }
                JoinMode::OneToMany => {
                    if found.is_empty() {
                        if config.unmatched == UnmatchedPolicy::Null {
                            output.push(with_field(row, alias, None));
                        }
                    } else {
                        output.extend(
                            found
                                .iter()
                                .map(|value| with_field(row, alias, Some(value.clone()))),
                        );
                    }
                }
            }
        }

        tracing::debug!(
            input_rows = config.rows.len(),
            output_rows = output.len(),
            alias,
            "joined rows"
        );
        Ok(output)
    }
}

fn row_key(row: &Row, path: &str) -> Option<String> {
    let (head, rest) = path.split_once('.').unwrap_or((path, ""));
    let value = lookup(row.get(head)?, rest)?;
    key_string(value)
}

fn with_field(row: &Row, alias: &str, value: Option<Value>) -> Row {
    let mut row = row.clone();
    row.insert(alias.to_string(), value.unwrap_or(Value::Null));
    row
}

async fn entity_matches(
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    keys: &[String],
) -> ReportResult<HashMap<String, Vec<Value>>> {
    let mut matches: HashMap<String, Vec<Value>> = HashMap::new();
    for entity in store
        .query_entities(&ctx.organization_id, &EntityFilter::by_ids(keys.to_vec()))
        .await?
    {
        if entity.organization_id == ctx.organization_id {
            matches
                .entry(entity.id.clone())
                .or_default()
                .push(serde_json::to_value(&entity)?);
        }
    }
    Ok(matches)
}

async fn attribute_matches(
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    keys: &[String],
    attribute: &str,
) -> ReportResult<HashMap<String, Vec<Value>>> {
    let rows = store
        .query_dynamic_attributes(&ctx.organization_id, keys)
        .await?;

    let mut matches: HashMap<String, Vec<Value>> = HashMap::new();
    for row in rows {
        if row.organization_id != ctx.organization_id || row.name != attribute {
            continue;
        }
        matches
            .entry(row.entity_id)
            .or_default()
            .push(row.value.to_json());
    }
    Ok(matches)
}

async fn relationship_matches(
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    keys: &[String],
    relationship_type: &str,
    direction: RelationshipDirection,
) -> ReportResult<HashMap<String, Vec<Value>>> {
    let mut filter = RelationshipFilter {
        relationship_types: vec![relationship_type.to_string()],
        ..RelationshipFilter::default()
    };
    match direction {
        RelationshipDirection::Outgoing => filter.from_entity_ids = keys.to_vec(),
        RelationshipDirection::Incoming => filter.to_entity_ids = keys.to_vec(),
    }

    let links: Vec<(String, String)> = store
        .query_relationships(&ctx.organization_id, &filter)
        .await?
        .into_iter()
        .filter(|rel| rel.organization_id == ctx.organization_id)
        .map(|rel| match direction {
            RelationshipDirection::Outgoing => (rel.from_entity_id, rel.to_entity_id),
            RelationshipDirection::Incoming => (rel.to_entity_id, rel.from_entity_id),
        })
        .collect();
    if links.is_empty() {
        return Ok(HashMap::new());
    }

    let mut related_ids: Vec<String> = Vec::new();
    for (_, related) in &links {
        if !related_ids.contains(related) {
            related_ids.push(related.clone());
        }
    }
    let mut related: HashMap<String, Value> = HashMap::new();
    for entity in store
        .query_entities(&ctx.organization_id, &EntityFilter::by_ids(related_ids))
        .await?
    {
        if entity.organization_id == ctx.organization_id {
            related.insert(entity.id.clone(), serde_json::to_value(&entity)?);
        }
    }

    let mut matches: HashMap<String, Vec<Value>> = HashMap::new();
    for (key, related_id) in links {
        match related.get(&related_id) {
            Some(entity) => matches.entry(key).or_default().push(entity.clone()),
            None => tracing::warn!(
                key = %key,
                related_id = %related_id,
                relationship_type,
                "relationship points to an entity outside the organization or store; skipped"
            ),
        }
    }
    Ok(matches)
}

#[async_trait]
impl TypedPrimitive for DynamicJoin {
    const NAME: &'static str = NAME;

    type Config = JoinConfig;
    type Output = Vec<Row>;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: JoinConfig,
    ) -> ReportResult<Vec<Row>> {
        self.join(ctx, store, &config).await
    }
}
