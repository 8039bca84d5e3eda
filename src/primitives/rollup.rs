//! Hierarchical balance roll-up.
//!
//! Posts fact rows onto hierarchy nodes and bubbles balances up the tree in
//! post-order: a node's balance is its direct postings plus the balances of
//! its children.
//!
//! ```text
//!   facts ──► signed direct balance per key ──┐
//!                                             ▼
//!   hierarchy ──► post-order walk ──► RollupNode tree + pre-order rows
//!                                             │
//!                 keys with no node ──────────┴──► unassigned_total
//! ```
//!
//! Every fact contributes to `grand_total` exactly once, so the root
//! balances plus `unassigned_total` always equal `grand_total`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::hierarchy::HierarchyNode;
use super::transaction_facts::FactRow;
use super::TypedPrimitive;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::model::{key_string, Amount, EntrySide};
use crate::store::EntityStore;

const NAME: &str = "rollupBalance";

/// Configuration of the `rollupBalance` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// Root nodes of a built hierarchy.
    #[serde(default)]
    pub hierarchy: Vec<HierarchyNode>,
    #[serde(default, alias = "transactions")]
    pub facts: Vec<FactRow>,
    /// Fact dimension holding the node id a fact posts to.
    #[serde(default = "default_key_dimension")]
    pub key_dimension: String,
    /// Fact dimension holding the posting side. Facts without it are taken as already signed.
    #[serde(default = "default_side_dimension")]
    pub side_dimension: Option<String>,
    /// Measure summed into balances.
    #[serde(default = "default_balance_field")]
    pub balance_field: String,
    /// Normal balance side; postings on the other side subtract.
    #[serde(default = "default_side")]
    pub side: EntrySide,
}

fn default_key_dimension() -> String {
    "entity_id".to_string()
}

fn default_side_dimension() -> Option<String> {
    Some("side".to_string())
}

fn default_balance_field() -> String {
    "amount".to_string()
}

fn default_side() -> EntrySide {
    EntrySide::Debit
}

impl RollupConfig {
    pub fn new(hierarchy: Vec<HierarchyNode>, facts: Vec<FactRow>) -> Self {
        Self {
            hierarchy,
            facts,
            key_dimension: default_key_dimension(),
            side_dimension: default_side_dimension(),
            balance_field: default_balance_field(),
            side: default_side(),
        }
    }
}

/// A hierarchy node with its rolled-up balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupNode {
    pub entity_id: String,
    pub code: Option<String>,
    pub name: String,
    pub depth: usize,
    /// Postings made to this node itself.
    pub direct_balance: Amount,
    /// `direct_balance` plus the balances of all children.
    pub balance: Amount,
    pub children: Vec<RollupNode>,
}

impl RollupNode {
    pub fn find(&self, entity_id: &str) -> Option<&RollupNode> {
        if self.entity_id == entity_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(entity_id))
    }
}

/// Flattened, pre-order view of the tree, convenient for tabular output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupRow {
    pub entity_id: String,
    pub code: Option<String>,
    pub name: String,
    pub depth: usize,
    pub direct_balance: Amount,
    pub balance: Amount,
    pub is_leaf: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollupResult {
    pub roots: Vec<RollupNode>,
    pub rows: Vec<RollupRow>,
    /// Signed sum of every input fact.
    pub grand_total: Amount,
    /// Signed sum of facts whose key matches no hierarchy node.
    pub unassigned_total: Amount,
    pub unassigned_keys: Vec<String>,
}

impl RollupResult {
    pub fn find(&self, entity_id: &str) -> Option<&RollupNode> {
        self.roots.iter().find_map(|r| r.find(entity_id))
    }

    /// Sum of the root balances.
    pub fn root_total(&self) -> Amount {
        self.roots.iter().map(|r| r.balance).sum()
    }
}

/// The `rollupBalance` primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollupBalance;

impl RollupBalance {
    pub fn calculate(&self, config: &RollupConfig) -> ReportResult<RollupResult> {
        if config.key_dimension.is_empty() {
            return Err(ReportError::invalid_config(NAME, "key_dimension must not be empty"));
        }

        let mut direct: HashMap<String, Amount> = HashMap::new();
        let mut key_order: Vec<String> = Vec::new();
        let mut grand_total = Amount::ZERO;
        let mut keyless = Amount::ZERO;

        for fact in &config.facts {
            let amount = signed_amount(fact, config)?;
            grand_total += amount;
            match fact.dimension(&config.key_dimension).and_then(key_string) {
                Some(key) => {
                    if !direct.contains_key(&key) {
                        key_order.push(key.clone());
                    }
                    *direct.entry(key).or_default() += amount;
                }
                None => keyless += amount,
            }
        }

        let mut visited: HashSet<String> = HashSet::new();
        let roots: Vec<RollupNode> = config
            .hierarchy
            .iter()
            .filter_map(|node| roll(node, &direct, &mut visited))
            .collect();

        let unassigned_keys: Vec<String> = key_order
            .into_iter()
            .filter(|k| !visited.contains(k))
            .collect();
        let unassigned_total = keyless
            + unassigned_keys
                .iter()
                .filter_map(|k| direct.get(k))
                .sum::<Amount>();
        if !unassigned_keys.is_empty() {
            tracing::warn!(
                keys = ?unassigned_keys,
                total = %unassigned_total,
                "facts posted to keys outside the hierarchy"
            );
        }

        let mut rows = Vec::new();
        for root in &roots {
            flatten(root, &mut rows);
        }

        Ok(RollupResult {
            roots,
            rows,
            grand_total,
            unassigned_total,
            unassigned_keys,
        })
    }
}

fn signed_amount(fact: &FactRow, config: &RollupConfig) -> ReportResult<Amount> {
    let amount = fact.measure(&config.balance_field);
    let posted = match config.side_dimension.as_deref() {
        Some(dim) => match fact.dimension(dim) {
            None | Some(serde_json::Value::Null) => None,
            Some(serde_json::Value::String(s)) => Some(EntrySide::parse(s).ok_or_else(|| {
                ReportError::invalid_config(NAME, format!("unknown posting side '{}'", s))
            })?),
            Some(other) => {
                return Err(ReportError::invalid_config(
                    NAME,
                    format!("posting side must be a string, got {}", other),
                ))
            }
        },
        None => None,
    };
    Ok(match posted {
        Some(posted) if config.side.sign_for(posted) < 0 => -amount,
        _ => amount,
    })
}

/// Post-order roll-up. A node reached twice is skipped so cyclic or shared
/// subtrees are never counted twice.
fn roll(
    node: &HierarchyNode,
    direct: &HashMap<String, Amount>,
    visited: &mut HashSet<String>,
) -> Option<RollupNode> {
    let id = &node.entity.id;
    if !visited.insert(id.clone()) {
        tracing::warn!(entity_id = %id, "hierarchy node visited twice; skipped");
        return None;
    }

    let children: Vec<RollupNode> = node
        .children
        .iter()
        .filter_map(|child| roll(child, direct, visited))
        .collect();
    let direct_balance = direct.get(id).copied().unwrap_or_default();
    let balance = direct_balance + children.iter().map(|c| c.balance).sum::<Amount>();

    Some(RollupNode {
        entity_id: id.clone(),
        code: node.entity.code.clone(),
        name: node.entity.name.clone(),
        depth: node.depth,
        direct_balance,
        balance,
        children,
    })
}

fn flatten(node: &RollupNode, rows: &mut Vec<RollupRow>) {
    rows.push(RollupRow {
        entity_id: node.entity_id.clone(),
        code: node.code.clone(),
        name: node.name.clone(),
        depth: node.depth,
        direct_balance: node.direct_balance,
        balance: node.balance,
        is_leaf: node.children.is_empty(),
    });
    for child in &node.children {
        flatten(child, rows);
    }
}

#[async_trait]
impl TypedPrimitive for RollupBalance {
    const NAME: &'static str = NAME;

    type Config = RollupConfig;
    type Output = RollupResult;

    async fn execute(
        &self,
        _ctx: &ExecutionContext,
        _store: &dyn EntityStore,
        config: RollupConfig,
    ) -> ReportResult<RollupResult> {
        self.calculate(&config)
    }
}
