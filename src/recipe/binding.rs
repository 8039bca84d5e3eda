//! Parameter binding and `{{placeholder}}` resolution.
//!
//! Binding happens once per execution, before any step runs: supplied
//! values are checked against the recipe's parameter specs, defaults are
//! filled in, and missing required parameters fail fast. Step outputs are
//! then added to the same bag as the pipeline advances.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::{ParameterKind, Recipe};
use crate::error::{ReportError, ReportResult};
use crate::model::lookup;

/// `{{name}}` or `{{name.path.to.field}}`, whitespace allowed inside the braces.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)((?:\.[A-Za-z0-9_]+)*)\s*\}\}").unwrap()
});

/// Values visible to placeholders: parameters plus prior step outputs.
pub type ParameterBag = Map<String, Value>;

/// A placeholder reference split into the bound name and the path below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    /// Dotted path without the leading dot; empty for the whole value.
    pub path: String,
}

/// Every placeholder in `value`, in document order.
pub fn placeholders(value: &Value) -> Vec<Placeholder> {
    let mut found = Vec::new();
    collect(value, &mut found);
    found
}

fn collect(value: &Value, found: &mut Vec<Placeholder>) {
    match value {
        Value::String(s) => {
            for cap in PLACEHOLDER.captures_iter(s) {
                found.push(Placeholder {
                    name: cap[1].to_string(),
                    path: cap[2].trim_start_matches('.').to_string(),
                });
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect(v, found)),
        Value::Object(map) => map.values().for_each(|v| collect(v, found)),
        _ => {}
    }
}

/// Validate supplied parameters against `recipe` and fill in defaults.
///
/// Undeclared placeholders that no step produces are treated as required.
/// Supplied parameters the recipe does not declare are kept as-is.
pub fn bind_parameters(recipe: &Recipe, supplied: &ParameterBag) -> ReportResult<ParameterBag> {
    let mut bound = ParameterBag::new();

    for spec in &recipe.parameters {
        let value = supplied
            .get(&spec.name)
            .filter(|v| !v.is_null())
            .cloned()
            .or_else(|| spec.default.clone());

        match value {
            Some(value) => {
                spec.kind.check(&value).map_err(|reason| ReportError::InvalidParameter {
                    parameter: spec.name.clone(),
                    reason,
                })?;
                bound.insert(spec.name.clone(), value);
            }
            None if spec.required => {
                return Err(ReportError::MissingParameter {
                    recipe: recipe.name.clone(),
                    parameter: spec.name.clone(),
                })
            }
            None => {}
        }
    }

    for name in recipe.implicit_parameters() {
        match supplied.get(&name).filter(|v| !v.is_null()) {
            Some(value) => {
                bound.insert(name, value.clone());
            }
            None => {
                return Err(ReportError::MissingParameter {
                    recipe: recipe.name.clone(),
                    parameter: name,
                })
            }
        }
    }

    for (name, value) in supplied {
        if !bound.contains_key(name) && !value.is_null() {
            bound.insert(name.clone(), value.clone());
        }
    }

    Ok(bound)
}

/// Substitute placeholders in a step configuration.
///
/// A string consisting of exactly one placeholder becomes the bound JSON
/// value of any type. Placeholders embedded in longer strings are rendered
/// as text. Object fields whose whole-placeholder value is unbound are
/// omitted so the primitive's defaults apply.
pub fn resolve(config: &Value, bag: &ParameterBag) -> Value {
    match config {
        Value::String(s) => resolve_string(s, bag).unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve(v, bag))
                .collect(),
        ),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                match value {
                    Value::String(s) => {
                        if let Some(resolved) = resolve_string(s, bag) {
                            out.insert(key.clone(), resolved);
                        }
                    }
                    other => {
                        out.insert(key.clone(), resolve(other, bag));
                    }
                }
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// `None` when `s` is a single placeholder with no bound value.
fn resolve_string(s: &str, bag: &ParameterBag) -> Option<Value> {
    if let Some(cap) = PLACEHOLDER.captures(s) {
        if cap.get(0).is_some_and(|m| m.start() == 0 && m.end() == s.len()) {
            return lookup_bound(bag, &cap[1], cap[2].trim_start_matches('.'))
                .filter(|v| !v.is_null())
                .cloned();
        }
    } else {
        return Some(Value::String(s.to_string()));
    }

    let text = PLACEHOLDER.replace_all(s, |cap: &regex::Captures<'_>| {
        match lookup_bound(bag, &cap[1], cap[2].trim_start_matches('.')) {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    });
    Some(Value::String(text.into_owned()))
}

fn lookup_bound<'a>(bag: &'a ParameterBag, name: &str, path: &str) -> Option<&'a Value> {
    lookup(bag.get(name)?, path)
}

impl ParameterKind {
    /// Check a bound value, returning the reason it is rejected.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        let ok = match self {
            ParameterKind::Any => true,
            ParameterKind::String => value.is_string(),
            ParameterKind::Number => value.is_number(),
            ParameterKind::Integer => value.is_i64() || value.is_u64(),
            ParameterKind::Boolean => value.is_boolean(),
            ParameterKind::Array => value.is_array(),
            ParameterKind::Object => value.is_object(),
            ParameterKind::Date => {
                return match value.as_str() {
                    Some(s) => s
                        .parse::<chrono::NaiveDate>()
                        .map(|_| ())
                        .map_err(|_| format!("expected a YYYY-MM-DD date, got '{}'", s)),
                    None => Err(format!("expected a YYYY-MM-DD date, got {}", value)),
                }
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("expected {}, got {}", self.as_str(), value))
        }
    }
}
