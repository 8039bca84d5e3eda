//! Built-in recipe library.

use super::{parse_toml, Recipe};
use crate::error::ReportResult;

const BUILTIN_TOML: &str = include_str!("builtin.toml");

/// Recipes shipped with the engine, in file order.
pub fn builtin_recipes() -> ReportResult<Vec<Recipe>> {
    parse_toml(BUILTIN_TOML, "<builtin>")
}
