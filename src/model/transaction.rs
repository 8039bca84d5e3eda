//! Universal transactions and their lines.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::amount::Amount;

/// Debit/credit convention of a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntrySide {
    Debit,
    Credit,
}

impl EntrySide {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySide::Debit => "debit",
            EntrySide::Credit => "credit",
        }
    }

    pub fn parse(s: &str) -> Option<EntrySide> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debit" | "dr" | "d" => Some(EntrySide::Debit),
            "credit" | "cr" | "c" => Some(EntrySide::Credit),
            _ => None,
        }
    }

    /// Sign applied to a posting on `posted` for an account whose normal balance is `self`.
    pub fn sign_for(&self, posted: EntrySide) -> i64 {
        if *self == posted {
            1
        } else {
            -1
        }
    }
}

/// A transaction header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub organization_id: String,
    pub transaction_type: String,
    #[serde(default)]
    pub smart_code: String,
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub source_entity_id: Option<String>,
    #[serde(default)]
    pub target_entity_id: Option<String>,
    #[serde(default)]
    pub total_amount: Amount,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub lines: Vec<TransactionLine>,
}

impl Transaction {
    pub fn new(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        transaction_type: impl Into<String>,
        transaction_date: NaiveDate,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            transaction_type: transaction_type.into(),
            smart_code: String::new(),
            transaction_date,
            source_entity_id: None,
            target_entity_id: None,
            total_amount: Amount::ZERO,
            currency: None,
            status: None,
            fields: Map::new(),
            lines: Vec::new(),
        }
    }

    pub fn with_smart_code(mut self, smart_code: impl Into<String>) -> Self {
        self.smart_code = smart_code.into();
        self
    }

    pub fn with_source(mut self, entity_id: impl Into<String>) -> Self {
        self.source_entity_id = Some(entity_id.into());
        self
    }

    pub fn with_target(mut self, entity_id: impl Into<String>) -> Self {
        self.target_entity_id = Some(entity_id.into());
        self
    }

    pub fn with_total(mut self, amount: impl Into<Amount>) -> Self {
        self.total_amount = amount.into();
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_line(mut self, line: TransactionLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn year(&self) -> i32 {
        self.transaction_date.year()
    }

    pub fn quarter(&self) -> u32 {
        (self.transaction_date.month() - 1) / 3 + 1
    }
}

/// A line of a transaction, usually posting to one entity (e.g. a GL account).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionLine {
    pub line_number: u32,
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub line_type: Option<String>,
    #[serde(default)]
    pub side: Option<EntrySide>,
    #[serde(default)]
    pub smart_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub quantity: Option<Amount>,
    #[serde(default)]
    pub unit_amount: Option<Amount>,
    pub line_amount: Amount,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl TransactionLine {
    pub fn new(line_number: u32, line_amount: impl Into<Amount>) -> Self {
        Self {
            line_number,
            entity_id: None,
            line_type: None,
            side: None,
            smart_code: None,
            description: None,
            quantity: None,
            unit_amount: None,
            line_amount: line_amount.into(),
            data: Map::new(),
        }
    }

    /// A debit posting to `entity_id`.
    pub fn debit(line_number: u32, entity_id: impl Into<String>, amount: impl Into<Amount>) -> Self {
        let mut line = Self::new(line_number, amount);
        line.entity_id = Some(entity_id.into());
        line.side = Some(EntrySide::Debit);
        line
    }

    /// A credit posting to `entity_id`.
    pub fn credit(line_number: u32, entity_id: impl Into<String>, amount: impl Into<Amount>) -> Self {
        let mut line = Self::new(line_number, amount);
        line.entity_id = Some(entity_id.into());
        line.side = Some(EntrySide::Credit);
        line
    }

    pub fn with_line_type(mut self, line_type: impl Into<String>) -> Self {
        self.line_type = Some(line_type.into());
        self
    }

    pub fn with_quantity(mut self, quantity: impl Into<Amount>) -> Self {
        self.quantity = Some(quantity.into());
        self
    }

    pub fn with_data(mut self, name: impl Into<String>, value: Value) -> Self {
        self.data.insert(name.into(), value);
        self
    }
}
