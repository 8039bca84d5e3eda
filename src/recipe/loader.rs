//! Recipe files.
//!
//! Recipes can be written in TOML as `[[recipe]]` tables, or in JSON as an
//! array of recipe objects, a single recipe object, or `{"recipe": [...]}`.
//! A directory is loaded by reading every `*.toml` and `*.json` file in it,
//! in file-name order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use super::Recipe;
use crate::error::{ReportError, ReportResult};

#[derive(Debug, Deserialize)]
struct RecipeFile {
    #[serde(default)]
    recipe: Vec<Recipe>,
}

fn load_error(origin: impl Into<String>, message: impl ToString) -> ReportError {
    ReportError::RecipeLoad {
        path: origin.into(),
        message: message.to_string(),
    }
}

/// Parse a TOML document of `[[recipe]]` tables.
pub fn parse_toml(text: &str, origin: &str) -> ReportResult<Vec<Recipe>> {
    let file: RecipeFile = toml::from_str(text).map_err(|e| load_error(origin, e))?;
    Ok(file.recipe)
}

/// Parse a JSON recipe document.
pub fn parse_json(text: &str, origin: &str) -> ReportResult<Vec<Recipe>> {
    let value: Value = serde_json::from_str(text).map_err(|e| load_error(origin, e))?;
    let recipes = match value {
        Value::Array(_) => serde_json::from_value(value),
        Value::Object(ref map) if map.contains_key("recipe") && !map.contains_key("steps") => {
            serde_json::from_value::<RecipeFile>(value).map(|f| f.recipe)
        }
        Value::Object(_) => serde_json::from_value(value).map(|r: Recipe| vec![r]),
        _ => {
            return Err(load_error(
                origin,
                "expected a recipe object or an array of recipes",
            ))
        }
    };
    recipes.map_err(|e| load_error(origin, e))
}

fn is_recipe_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("toml") | Some("json")
    )
}

fn load_file(path: &Path) -> ReportResult<Vec<Recipe>> {
    let origin = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|e| load_error(&origin, e))?;
    let recipes = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => parse_toml(&text, &origin)?,
        Some("json") => parse_json(&text, &origin)?,
        _ => return Err(load_error(origin, "expected a .toml or .json file")),
    };
    tracing::debug!(path = %origin, count = recipes.len(), "loaded recipe file");
    Ok(recipes)
}

/// Load recipes from a file, or from every recipe file in a directory.
pub fn load_path(path: &Path) -> ReportResult<Vec<Recipe>> {
    if !path.exists() {
        return Err(load_error(path.display().to_string(), "no such file or directory"));
    }
    if path.is_file() {
        return load_file(path);
    }

    let entries = fs::read_dir(path).map_err(|e| load_error(path.display().to_string(), e))?;
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| load_error(path.display().to_string(), e))?;
        let file = entry.path();
        if file.is_file() && is_recipe_file(&file) {
            files.push(file);
        }
    }
    files.sort();

    let mut recipes = Vec::new();
    for file in &files {
        recipes.extend(load_file(file)?);
    }
    Ok(recipes)
}

/// Load recipes from several paths, in order.
pub fn load_paths(paths: &[PathBuf]) -> ReportResult<Vec<Recipe>> {
    let mut recipes = Vec::new();
    for path in paths {
        recipes.extend(load_path(path)?);
    }
    Ok(recipes)
}
