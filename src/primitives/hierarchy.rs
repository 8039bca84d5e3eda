//! Tree construction from a flat entity list.
//!
//! Two passes: index entities by id (or code), then attach each entity to
//! its parent's children in input order. Entities whose parent cannot be
//! resolved become orphan roots and are reported, never dropped. Entities
//! unreachable from any root sit on (or below) a cycle.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TypedPrimitive;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::model::{key_string, Entity};
use crate::store::{EntityStore, RelationshipFilter};

/// How a parent reference is matched against entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParentMatch {
    #[default]
    Id,
    Code,
}

/// Configuration of the `hierarchyBuilder` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub entities: Vec<Entity>,
    /// `parent_ref` or a dynamic attribute name holding the parent reference.
    pub parent_field: String,
    /// A parent reference equal to this value marks a root.
    pub root_value: Option<Value>,
    pub match_on: ParentMatch,
    /// Derive parents from `child -> parent` relationships of this type instead.
    pub relationship_type: Option<String>,
    /// Promote one member of each cycle to a root instead of failing.
    pub break_cycles: bool,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
            parent_field: "parent_ref".to_string(),
            root_value: None,
            match_on: ParentMatch::Id,
            relationship_type: None,
            break_cycles: false,
        }
    }
}

impl HierarchyConfig {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self {
            entities,
            ..Self::default()
        }
    }
}

/// A node of the built tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub entity: Entity,
    pub depth: usize,
    /// Entity ids from the root down to this node, inclusive.
    pub path: Vec<String>,
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Number of nodes in this subtree.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(HierarchyNode::size).sum::<usize>()
    }

    /// Pre-order iterator over this subtree.
    pub fn iter(&self) -> impl Iterator<Item = &HierarchyNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }
}

/// Output of the `hierarchyBuilder` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HierarchyOutput {
    pub roots: Vec<HierarchyNode>,
    pub node_count: usize,
    pub max_depth: usize,
    /// Entities whose declared parent is not in the input set.
    pub orphans: Vec<String>,
    /// Cycles broken when `break_cycles` is set, each closed on its first id.
    pub cycles: Vec<Vec<String>>,
}

impl HierarchyOutput {
    pub fn find(&self, entity_id: &str) -> Option<&HierarchyNode> {
        self.roots
            .iter()
            .flat_map(HierarchyNode::iter)
            .find(|n| n.entity.id == entity_id)
    }
}

/// The `hierarchyBuilder` primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchyBuilder;

impl HierarchyBuilder {
    /// Build the tree, consulting the store only for relationship-derived parents.
    pub async fn build(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: &HierarchyConfig,
    ) -> ReportResult<HierarchyOutput> {
        let parents = match &config.relationship_type {
            Some(rel_type) => Some(relationship_parents(ctx, store, config, rel_type).await?),
            None => None,
        };
        build_tree(config, parents.as_ref())
    }
}

async fn relationship_parents(
    ctx: &ExecutionContext,
    store: &dyn EntityStore,
    config: &HierarchyConfig,
    rel_type: &str,
) -> ReportResult<HashMap<String, String>> {
    let filter = RelationshipFilter {
        relationship_types: vec![rel_type.to_string()],
        from_entity_ids: config.entities.iter().map(|e| e.id.clone()).collect(),
        to_entity_ids: Vec::new(),
    };
    let relationships = store
        .query_relationships(&ctx.organization_id, &filter)
        .await?;

    let mut parents = HashMap::new();
    for rel in relationships {
        if rel.organization_id != ctx.organization_id {
            continue;
        }
        if parents.contains_key(&rel.from_entity_id) {
            tracing::warn!(
                entity_id = %rel.from_entity_id,
                relationship_type = rel_type,
                "entity has several parent relationships; keeping the first"
            );
            continue;
        }
        parents.insert(rel.from_entity_id, rel.to_entity_id);
    }
    Ok(parents)
}

/// Build a tree from `config.entities`.
///
/// `parents` overrides the parent field with an explicit child -> parent map.
pub fn build_tree(
    config: &HierarchyConfig,
    parents: Option<&HashMap<String, String>>,
) -> ReportResult<HierarchyOutput> {
    // Pass 1: index.
    let mut entities: Vec<&Entity> = Vec::with_capacity(config.entities.len());
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    let mut by_code: HashMap<&str, usize> = HashMap::new();
    for entity in &config.entities {
        if by_id.contains_key(entity.id.as_str()) {
            tracing::warn!(entity_id = %entity.id, "duplicate entity in hierarchy input; skipped");
            continue;
        }
        let idx = entities.len();
        by_id.insert(entity.id.as_str(), idx);
        if let Some(code) = entity.code.as_deref() {
            by_code.entry(code).or_insert(idx);
        }
        entities.push(entity);
    }

    let root_key = config.root_value.as_ref().and_then(key_string);

    // Pass 2: resolve parents and attach children in input order.
    let mut parent_of: Vec<Option<usize>> = vec![None; entities.len()];
    let mut orphans = Vec::new();
    for (idx, entity) in entities.iter().enumerate() {
        let reference = match parents {
            Some(map) => map.get(&entity.id).cloned(),
            None => entity
                .field(&config.parent_field)
                .as_ref()
                .and_then(key_string),
        };
        let Some(reference) = reference.filter(|r| !r.is_empty()) else {
            continue;
        };
        if root_key.as_deref() == Some(reference.as_str()) {
            continue;
        }

        let resolved = match config.match_on {
            ParentMatch::Id => by_id.get(reference.as_str()),
            ParentMatch::Code => by_code.get(reference.as_str()),
        };
        match resolved {
            Some(&parent) => parent_of[idx] = Some(parent),
            None => {
                tracing::warn!(
                    entity_id = %entity.id,
                    parent = %reference,
                    "parent not found in hierarchy input; treating entity as an orphan root"
                );
                orphans.push(entity.id.clone());
            }
        }
    }

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); entities.len()];
    for (idx, parent) in parent_of.iter().enumerate() {
        if let Some(parent) = parent {
            children[*parent].push(idx);
        }
    }

    // Everything reachable from a root is acyclic; the rest hangs off a cycle.
    let mut reached = vec![false; entities.len()];
    for idx in 0..entities.len() {
        if parent_of[idx].is_none() {
            mark_reachable(idx, &children, &mut reached);
        }
    }

    let mut cycles = Vec::new();
    while let Some(start) = reached.iter().position(|r| !r) {
        let cycle = find_cycle(start, &parent_of);
        let ids: Vec<String> = cycle
            .iter()
            .chain(cycle.first())
            .map(|&i| entities[i].id.clone())
            .collect();

        if !config.break_cycles {
            return Err(ReportError::CycleDetected { cycle: ids });
        }

        let promoted = cycle.iter().copied().min().unwrap_or(start);
        tracing::warn!(
            entity_id = %entities[promoted].id,
            cycle = %ids.join(" -> "),
            "breaking hierarchy cycle by promoting entity to root"
        );
        if let Some(parent) = parent_of[promoted].take() {
            children[parent].retain(|&c| c != promoted);
        }
        mark_reachable(promoted, &children, &mut reached);
        cycles.push(ids);
    }

    let mut visited = HashSet::new();
    let roots: Vec<HierarchyNode> = (0..entities.len())
        .filter(|&idx| parent_of[idx].is_none())
        .map(|idx| attach(idx, 0, &[], &entities, &children, &mut visited))
        .collect();

    let node_count = roots.iter().map(HierarchyNode::size).sum();
    let max_depth = roots
        .iter()
        .flat_map(HierarchyNode::iter)
        .map(|n| n.depth)
        .max()
        .unwrap_or(0);

    Ok(HierarchyOutput {
        roots,
        node_count,
        max_depth,
        orphans,
        cycles,
    })
}

fn mark_reachable(root: usize, children: &[Vec<usize>], reached: &mut [bool]) {
    let mut stack = vec![root];
    while let Some(idx) = stack.pop() {
        if reached[idx] {
            continue;
        }
        reached[idx] = true;
        stack.extend(children[idx].iter().copied());
    }
}

/// Follow parent links from `start` until a node repeats; return the loop.
fn find_cycle(start: usize, parent_of: &[Option<usize>]) -> Vec<usize> {
    let mut seen: HashMap<usize, usize> = HashMap::new();
    let mut chain = Vec::new();
    let mut current = Some(start);
    while let Some(idx) = current {
        if let Some(&pos) = seen.get(&idx) {
            return chain[pos..].to_vec();
        }
        seen.insert(idx, chain.len());
        chain.push(idx);
        current = parent_of[idx];
    }
    // A chain ending at a root is reachable and never lands here.
    chain
}

fn attach(
    idx: usize,
    depth: usize,
    parent_path: &[String],
    entities: &[&Entity],
    children: &[Vec<usize>],
    visited: &mut HashSet<usize>,
) -> HierarchyNode {
    visited.insert(idx);
    let entity = entities[idx].clone();
    let mut path = parent_path.to_vec();
    path.push(entity.id.clone());

    let mut nodes = Vec::with_capacity(children[idx].len());
    for &child in &children[idx] {
        if visited.contains(&child) {
            continue;
        }
        nodes.push(attach(child, depth + 1, &path, entities, children, visited));
    }

    HierarchyNode {
        entity,
        depth,
        path,
        children: nodes,
    }
}

#[async_trait]
impl TypedPrimitive for HierarchyBuilder {
    const NAME: &'static str = "hierarchyBuilder";

    type Config = HierarchyConfig;
    type Output = HierarchyOutput;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: HierarchyConfig,
    ) -> ReportResult<HierarchyOutput> {
        self.build(ctx, store, &config).await
    }
}
