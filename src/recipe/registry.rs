//! Recipe registry.

use std::collections::HashMap;
use std::sync::Arc;

use super::Recipe;
use crate::error::ReportResult;
use crate::primitives::PrimitiveRegistry;

/// Recipes keyed by name. Registration is last-write-wins.
#[derive(Debug, Clone, Default)]
pub struct RecipeRegistry {
    recipes: HashMap<String, Arc<Recipe>>,
}

impl RecipeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert, replacing any recipe of the same name.
    ///
    /// Returns the replaced recipe, if any.
    pub fn register(
        &mut self,
        recipe: Recipe,
        primitives: &PrimitiveRegistry,
    ) -> ReportResult<Option<Arc<Recipe>>> {
        recipe.validate(primitives)?;
        let replaced = self.recipes.insert(recipe.name.clone(), Arc::new(recipe));
        if let Some(old) = &replaced {
            tracing::debug!(recipe = %old.name, "recipe replaced");
        }
        Ok(replaced)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Recipe>> {
        self.recipes.get(name).cloned()
    }

    pub fn remove(&mut self, name: &str) -> Option<Arc<Recipe>> {
        self.recipes.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Owned copies of every recipe, sorted by name.
    pub fn snapshot(&self) -> Vec<Recipe> {
        let mut recipes: Vec<Recipe> = self.recipes.values().map(|r| Recipe::clone(r)).collect();
        recipes.sort_by(|a, b| a.name.cmp(&b.name));
        recipes
    }
}
