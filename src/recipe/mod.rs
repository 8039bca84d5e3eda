//! Recipes: declarative, named pipelines of primitive steps.
//!
//! ```text
//! Recipe "account_balance_tree"
//!   parameters: account_type = "gl_account", date_from?, date_to?
//!   steps:
//!     0 entityResolver   { entity_type: "{{account_type}}" }      -> accounts
//!     1 hierarchyBuilder { entities: "{{accounts}}" }              -> tree
//!     2 transactionFacts { level: "line", group_by: [...] }        -> facts
//!     3 rollupBalance    { hierarchy: "{{tree.roots}}", ... }      -> result
//! ```
//!
//! A recipe is validated when it is registered: every primitive must exist,
//! and a placeholder may only refer to parameters or to outputs of earlier
//! steps. The result of a recipe is the output of its last step, or of the
//! step named by `output`.

mod binding;
mod builtin;
mod loader;
mod registry;

pub use binding::{bind_parameters, placeholders, resolve, ParameterBag, Placeholder};
pub use builtin::builtin_recipes;
pub use loader::{load_path, load_paths, parse_json, parse_toml};
pub use registry::RecipeRegistry;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CacheTtl;
use crate::error::{ReportError, ReportResult};
use crate::primitives::PrimitiveRegistry;

/// Declared type of a recipe parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    #[default]
    Any,
    String,
    Number,
    Integer,
    Boolean,
    /// `YYYY-MM-DD` string.
    Date,
    Array,
    Object,
}

impl ParameterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterKind::Any => "any",
            ParameterKind::String => "string",
            ParameterKind::Number => "number",
            ParameterKind::Integer => "integer",
            ParameterKind::Boolean => "boolean",
            ParameterKind::Date => "date",
            ParameterKind::Array => "array",
            ParameterKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub kind: ParameterKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, kind: ParameterKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One primitive invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeStep {
    pub primitive: String,
    #[serde(default = "empty_config")]
    pub config: Value,
    /// Name the step's output is bound to for later steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_key: Option<String>,
}

fn empty_config() -> Value {
    Value::Object(Default::default())
}

impl RecipeStep {
    pub fn new(primitive: impl Into<String>, config: Value) -> Self {
        Self {
            primitive: primitive.into(),
            config,
            output_key: None,
        }
    }

    pub fn with_output(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub steps: Vec<RecipeStep>,
    /// Seconds; `-1` never expires, `0` disables caching, absent uses the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<CacheTtl>,
    /// Binding returned as the result; the last step's output when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl Recipe {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            parameters: Vec::new(),
            steps: Vec::new(),
            cache_ttl: None,
            output: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_step(mut self, step: RecipeStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_cache_ttl(mut self, ttl: CacheTtl) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    fn produces(&self, name: &str) -> bool {
        self.steps
            .iter()
            .any(|s| s.output_key.as_deref() == Some(name))
    }

    /// Placeholder names that are neither declared nor produced by a step.
    pub fn implicit_parameters(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for step in &self.steps {
            for placeholder in placeholders(&step.config) {
                if self.parameter(&placeholder.name).is_none()
                    && !self.produces(&placeholder.name)
                    && !names.contains(&placeholder.name)
                {
                    names.push(placeholder.name);
                }
            }
        }
        names
    }

    /// Structural checks plus primitive resolution.
    pub fn validate(&self, primitives: &PrimitiveRegistry) -> ReportResult<()> {
        let invalid = |reason: String| ReportError::invalid_recipe(&self.name, reason);

        if self.name.trim().is_empty() {
            return Err(invalid("recipe name must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(invalid("recipe has no steps".into()));
        }

        for (i, spec) in self.parameters.iter().enumerate() {
            if self.parameters[..i].iter().any(|p| p.name == spec.name) {
                return Err(invalid(format!("parameter '{}' is declared twice", spec.name)));
            }
            if let Some(default) = &spec.default {
                spec.kind.check(default).map_err(|reason| {
                    invalid(format!("default of parameter '{}': {}", spec.name, reason))
                })?;
            }
        }

        for (index, step) in self.steps.iter().enumerate() {
            if !primitives.contains(&step.primitive) {
                return Err(ReportError::UnknownPrimitive {
                    recipe: self.name.clone(),
                    step: index,
                    primitive: step.primitive.clone(),
                });
            }
            if !step.config.is_object() {
                return Err(invalid(format!("step {} config must be an object", index)));
            }
            if let Some(key) = &step.output_key {
                if self.parameter(key).is_some() {
                    return Err(invalid(format!(
                        "step {} output '{}' shadows a parameter",
                        index, key
                    )));
                }
            }

            for placeholder in placeholders(&step.config) {
                let produced_later = self.steps[index..]
                    .iter()
                    .enumerate()
                    .find(|(_, s)| s.output_key.as_deref() == Some(placeholder.name.as_str()));
                let produced_earlier = self.steps[..index]
                    .iter()
                    .any(|s| s.output_key.as_deref() == Some(placeholder.name.as_str()));
                if let (Some((offset, _)), false) = (produced_later, produced_earlier) {
                    return Err(invalid(format!(
                        "step {} references '{}', which step {} produces later",
                        index,
                        placeholder.name,
                        index + offset
                    )));
                }
            }
        }

        if let Some(output) = &self.output {
            if !self.produces(output) {
                return Err(invalid(format!("output '{}' is not produced by any step", output)));
            }
        }

        Ok(())
    }

    /// Effective TTL given the engine default.
    pub fn ttl_or(&self, default: CacheTtl) -> CacheTtl {
        self.cache_ttl.unwrap_or(default)
    }
}
