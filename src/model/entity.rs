//! Generic entities and their dynamic attributes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::amount::Amount;

/// A tenant owning entities, relationships, and transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub base_currency: Option<String>,
}

/// A generic typed record in the shared data store (a GL account, a customer, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub organization_id: String,
    pub entity_type: String,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub parent_ref: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Hydrated dynamic attributes, keyed by attribute name.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
    #[serde(default)]
    pub smart_code: String,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        entity_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            entity_type: entity_type.into(),
            name: name.into(),
            code: None,
            parent_ref: None,
            tags: Vec::new(),
            attributes: BTreeMap::new(),
            smart_code: String::new(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_ref = Some(parent.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_smart_code(mut self, smart_code: impl Into<String>) -> Self {
        self.smart_code = smart_code.into();
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Read a named field as plain JSON.
    ///
    /// Fixed fields (`id`, `code`, `parent_ref`, ...) take precedence;
    /// `attributes.<name>` or a bare attribute name reads a dynamic attribute.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.clone())),
            "organization_id" => Some(Value::String(self.organization_id.clone())),
            "entity_type" => Some(Value::String(self.entity_type.clone())),
            "name" => Some(Value::String(self.name.clone())),
            "code" => self.code.clone().map(Value::String),
            "parent_ref" | "parentRef" => self.parent_ref.clone().map(Value::String),
            "smart_code" => Some(Value::String(self.smart_code.clone())),
            other => {
                let attr = other.strip_prefix("attributes.").unwrap_or(other);
                self.attributes.get(attr).map(AttributeValue::to_json)
            }
        }
    }
}

/// The value of a dynamic attribute.
///
/// Serialized adjacently tagged: `{"type": "number", "value": 12.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AttributeValue {
    Text(String),
    Number(Amount),
    Boolean(bool),
    Date(NaiveDate),
    Json(Value),
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            AttributeValue::Text(_) => "text",
            AttributeValue::Number(_) => "number",
            AttributeValue::Boolean(_) => "boolean",
            AttributeValue::Date(_) => "date",
            AttributeValue::Json(_) => "json",
        }
    }

    /// Untagged JSON value, for joining onto rows.
    pub fn to_json(&self) -> Value {
        match self {
            AttributeValue::Text(s) => Value::String(s.clone()),
            AttributeValue::Number(n) => n.to_json(),
            AttributeValue::Boolean(b) => Value::Bool(*b),
            AttributeValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            AttributeValue::Json(v) => v.clone(),
        }
    }

    pub fn as_amount(&self) -> Option<Amount> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            AttributeValue::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// One EAV row attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicAttribute {
    pub entity_id: String,
    pub organization_id: String,
    pub name: String,
    #[serde(flatten)]
    pub value: AttributeValue,
}

impl DynamicAttribute {
    pub fn new(
        organization_id: impl Into<String>,
        entity_id: impl Into<String>,
        name: impl Into<String>,
        value: AttributeValue,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            organization_id: organization_id.into(),
            name: name.into(),
            value,
        }
    }
}

/// A typed, directed link between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub organization_id: String,
    pub from_entity_id: String,
    pub to_entity_id: String,
    pub relationship_type: String,
    #[serde(default)]
    pub data: serde_json::Map<String, Value>,
}

impl Relationship {
    pub fn new(
        organization_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        relationship_type: impl Into<String>,
    ) -> Self {
        Self {
            organization_id: organization_id.into(),
            from_entity_id: from.into(),
            to_entity_id: to.into(),
            relationship_type: relationship_type.into(),
            data: serde_json::Map::new(),
        }
    }
}
