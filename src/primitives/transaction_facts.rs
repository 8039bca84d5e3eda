//! Transactional fact aggregation.
//!
//! Filters transactions (or their lines), groups them by a list of
//! dimensions, and computes measures per group. Monetary accumulation is
//! exact: every measure is summed as a [`Amount`].

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::TypedPrimitive;
use crate::context::ExecutionContext;
use crate::error::{ReportError, ReportResult};
use crate::model::{Amount, Transaction, TransactionLine};
use crate::store::{EntityStore, TransactionFilter};

const NAME: &str = "transactionFacts";

/// Granularity of the aggregated records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactLevel {
    /// One record per transaction header.
    #[default]
    Header,
    /// One record per transaction line.
    Line,
}

/// Aggregate function of a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureOp {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

/// A named measure, e.g. `{"name": "revenue", "op": "sum", "field": "amount"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasureDefinition {
    pub name: String,
    pub op: MeasureOp,
    #[serde(default)]
    pub field: Option<String>,
}

impl MeasureDefinition {
    pub fn sum(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MeasureOp::Sum,
            field: Some(field.into()),
        }
    }

    pub fn count(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: MeasureOp::Count,
            field: None,
        }
    }
}

/// Configuration of the `transactionFacts` step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactsConfig {
    pub transaction_type: Option<String>,
    pub transaction_types: Vec<String>,
    pub smart_code_prefix: Option<String>,
    pub date_from: Option<NaiveDate>,
    pub date_to: Option<NaiveDate>,
    pub statuses: Vec<String>,
    pub source_entity_ids: Vec<String>,
    pub target_entity_ids: Vec<String>,
    /// Transactions whose source or target is one of these.
    pub counterparty_ids: Vec<String>,
    /// Lines posting to one of these entities.
    pub entity_ids: Vec<String>,
    pub level: FactLevel,
    pub group_by: Vec<String>,
    /// Defaults to `amount = sum(amount)` and `count = count()`.
    pub measures: Vec<MeasureDefinition>,
}

impl FactsConfig {
    fn store_filter(&self) -> TransactionFilter {
        let mut transaction_types: Vec<String> = self.transaction_type.iter().cloned().collect();
        transaction_types.extend(self.transaction_types.iter().cloned());
        TransactionFilter {
            transaction_types,
            smart_code_prefix: self.smart_code_prefix.clone(),
            date_from: self.date_from,
            date_to: self.date_to,
            source_entity_ids: self.source_entity_ids.clone(),
            target_entity_ids: self.target_entity_ids.clone(),
        }
    }

    fn measures(&self) -> Vec<MeasureDefinition> {
        if self.measures.is_empty() {
            vec![
                MeasureDefinition::sum("amount", "amount"),
                MeasureDefinition::count("count"),
            ]
        } else {
            self.measures.clone()
        }
    }

    fn accepts(&self, tx: &Transaction) -> bool {
        (self.statuses.is_empty()
            || tx.status.as_ref().is_some_and(|s| self.statuses.contains(s)))
            && (self.counterparty_ids.is_empty()
                || [&tx.source_entity_id, &tx.target_entity_id]
                    .into_iter()
                    .flatten()
                    .any(|id| self.counterparty_ids.contains(id)))
    }

    fn accepts_line(&self, line: &TransactionLine) -> bool {
        self.entity_ids.is_empty()
            || line
                .entity_id
                .as_ref()
                .is_some_and(|id| self.entity_ids.contains(id))
    }
}

/// One aggregated group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRow {
    pub dimensions: Map<String, Value>,
    pub measures: BTreeMap<String, Amount>,
    pub record_count: u64,
}

impl FactRow {
    pub fn measure(&self, name: &str) -> Amount {
        self.measures.get(name).copied().unwrap_or(Amount::ZERO)
    }

    pub fn dimension(&self, name: &str) -> Option<&Value> {
        self.dimensions.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Dimension {
    TransactionId,
    TransactionType,
    SmartCode,
    SourceEntity,
    TargetEntity,
    Currency,
    Status,
    Date,
    Year,
    Quarter,
    Month,
    EntityId,
    LineType,
    Side,
    Field(String),
    LineData(String),
}

impl Dimension {
    fn parse(name: &str) -> Option<Dimension> {
        let dim = match name {
            "transaction_id" => Dimension::TransactionId,
            "transaction_type" => Dimension::TransactionType,
            "smart_code" => Dimension::SmartCode,
            "source_entity_id" => Dimension::SourceEntity,
            "target_entity_id" => Dimension::TargetEntity,
            "currency" => Dimension::Currency,
            "status" => Dimension::Status,
            "date" => Dimension::Date,
            "year" => Dimension::Year,
            "quarter" => Dimension::Quarter,
            "month" => Dimension::Month,
            "entity_id" => Dimension::EntityId,
            "line_type" => Dimension::LineType,
            "side" => Dimension::Side,
            other => {
                if let Some(field) = other.strip_prefix("fields.") {
                    Dimension::Field(field.to_string())
                } else if let Some(field) = other.strip_prefix("line.") {
                    Dimension::LineData(field.to_string())
                } else {
                    return None;
                }
            }
        };
        Some(dim)
    }

    fn needs_line(&self) -> bool {
        matches!(
            self,
            Dimension::EntityId | Dimension::LineType | Dimension::Side | Dimension::LineData(_)
        )
    }

    fn value(&self, record: &Record<'_>) -> Value {
        let tx = record.tx;
        let opt = |s: &Option<String>| s.clone().map(Value::String).unwrap_or(Value::Null);
        match self {
            Dimension::TransactionId => Value::String(tx.id.clone()),
            Dimension::TransactionType => Value::String(tx.transaction_type.clone()),
            Dimension::SmartCode => record
                .line
                .and_then(|l| l.smart_code.clone())
                .map(Value::String)
                .unwrap_or_else(|| Value::String(tx.smart_code.clone())),
            Dimension::SourceEntity => opt(&tx.source_entity_id),
            Dimension::TargetEntity => opt(&tx.target_entity_id),
            Dimension::Currency => opt(&tx.currency),
            Dimension::Status => opt(&tx.status),
            Dimension::Date => Value::String(tx.transaction_date.format("%Y-%m-%d").to_string()),
            Dimension::Year => Value::from(tx.year()),
            Dimension::Quarter => Value::String(format!("{}-Q{}", tx.year(), tx.quarter())),
            Dimension::Month => Value::String(tx.transaction_date.format("%Y-%m").to_string()),
            Dimension::Field(name) => tx.fields.get(name).cloned().unwrap_or(Value::Null),
            Dimension::EntityId => record
                .line
                .map(|l| opt(&l.entity_id))
                .unwrap_or(Value::Null),
            Dimension::LineType => record
                .line
                .map(|l| opt(&l.line_type))
                .unwrap_or(Value::Null),
            Dimension::Side => record
                .line
                .and_then(|l| l.side)
                .map(|s| Value::String(s.as_str().to_string()))
                .unwrap_or(Value::Null),
            Dimension::LineData(name) => record
                .line
                .and_then(|l| l.data.get(name).cloned())
                .unwrap_or(Value::Null),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum MeasureField {
    Amount,
    Quantity,
    UnitAmount,
    Field(String),
    LineData(String),
}

impl MeasureField {
    fn parse(name: &str) -> Option<MeasureField> {
        match name {
            "amount" => Some(MeasureField::Amount),
            "quantity" => Some(MeasureField::Quantity),
            "unit_amount" => Some(MeasureField::UnitAmount),
            other => other
                .strip_prefix("fields.")
                .map(|f| MeasureField::Field(f.to_string()))
                .or_else(|| {
                    other
                        .strip_prefix("line.")
                        .map(|f| MeasureField::LineData(f.to_string()))
                }),
        }
    }

    fn value(&self, record: &Record<'_>) -> Option<Amount> {
        match (self, record.line) {
            (MeasureField::Amount, Some(line)) => Some(line.line_amount),
            (MeasureField::Amount, None) => Some(record.tx.total_amount),
            (MeasureField::Quantity, line) => line.and_then(|l| l.quantity),
            (MeasureField::UnitAmount, line) => line.and_then(|l| l.unit_amount),
            (MeasureField::Field(name), _) => record.tx.fields.get(name).and_then(Amount::from_json),
            (MeasureField::LineData(name), line) => {
                line.and_then(|l| l.data.get(name)).and_then(Amount::from_json)
            }
        }
    }
}

struct Record<'a> {
    tx: &'a Transaction,
    line: Option<&'a TransactionLine>,
}

struct CompiledMeasure {
    name: String,
    op: MeasureOp,
    field: Option<MeasureField>,
}

#[derive(Debug, Clone, Default)]
struct Accumulator {
    sum: Amount,
    values: u64,
    min: Option<Amount>,
    max: Option<Amount>,
}

impl Accumulator {
    fn push(&mut self, value: Amount) {
        self.sum += value;
        self.values += 1;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    fn finish(&self, op: MeasureOp, records: u64, counts_records: bool) -> Amount {
        match op {
            MeasureOp::Sum => self.sum,
            MeasureOp::Count if counts_records => Amount::from(records as i64),
            MeasureOp::Count => Amount::from(self.values as i64),
            MeasureOp::Avg => self.sum.checked_div(self.values.into()),
            MeasureOp::Min => self.min.unwrap_or(Amount::ZERO),
            MeasureOp::Max => self.max.unwrap_or(Amount::ZERO),
        }
    }
}

struct Group {
    dimensions: Map<String, Value>,
    accumulators: Vec<Accumulator>,
    records: u64,
}

/// The `transactionFacts` primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionFacts;

impl TransactionFacts {
    /// Aggregate transactions of the calling organization into fact rows.
    ///
    /// One row per distinct combination of group-by values, in order of
    /// first appearance. Configuration errors are raised before the store
    /// is queried.
    pub async fn aggregate(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: &FactsConfig,
    ) -> ReportResult<Vec<FactRow>> {
        let dimensions = compile_dimensions(config)?;
        let measures = compile_measures(config)?;

        let transactions = store
            .query_transactions(&ctx.organization_id, &config.store_filter())
            .await?;

        let filter = config.store_filter();
        let records: Vec<Record<'_>> = transactions
            .iter()
            .filter(|tx| {
                tx.organization_id == ctx.organization_id && filter.matches(tx) && config.accepts(tx)
            })
            .flat_map(|tx| {
                match config.level {
                    FactLevel::Header => {
                        if config.entity_ids.is_empty()
                            || tx.lines.iter().any(|l| config.accepts_line(l))
                        {
                            vec![Record { tx, line: None }]
                        } else {
                            Vec::new()
                        }
                    }
                    FactLevel::Line => tx
                        .lines
                        .iter()
                        .filter(|l| config.accepts_line(l))
                        .map(|line| Record { tx, line: Some(line) })
                        .collect(),
                }
            })
            .collect();

        let rows = aggregate_records(&records, &dimensions, &measures);
        tracing::debug!(
            transactions = transactions.len(),
            records = records.len(),
            groups = rows.len(),
            "aggregated transaction facts"
        );
        Ok(rows)
    }
}

fn compile_dimensions(config: &FactsConfig) -> ReportResult<Vec<(String, Dimension)>> {
    config
        .group_by
        .iter()
        .map(|name| {
            let dim = Dimension::parse(name).ok_or_else(|| {
                ReportError::invalid_config(NAME, format!("unknown dimension '{}'", name))
            })?;
            if dim.needs_line() && config.level == FactLevel::Header {
                return Err(ReportError::invalid_config(
                    NAME,
                    format!("dimension '{}' requires level = \"line\"", name),
                ));
            }
            Ok((name.clone(), dim))
        })
        .collect()
}

fn compile_measures(config: &FactsConfig) -> ReportResult<Vec<CompiledMeasure>> {
    config
        .measures()
        .into_iter()
        .map(|m| {
            let field = match (&m.field, m.op) {
                (None, MeasureOp::Count) => None,
                (None, _) => {
                    return Err(ReportError::invalid_config(
                        NAME,
                        format!("measure '{}' needs a field", m.name),
                    ))
                }
                (Some(f), _) => Some(MeasureField::parse(f).ok_or_else(|| {
                    ReportError::invalid_config(
                        NAME,
                        format!("unknown measure field '{}' in measure '{}'", f, m.name),
                    )
                })?),
            };
            Ok(CompiledMeasure {
                name: m.name,
                op: m.op,
                field,
            })
        })
        .collect()
}

fn aggregate_records(
    records: &[Record<'_>],
    dimensions: &[(String, Dimension)],
    measures: &[CompiledMeasure],
) -> Vec<FactRow> {
    let mut groups: Vec<Group> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let values: Vec<Value> = dimensions.iter().map(|(_, d)| d.value(record)).collect();
        let key = Value::Array(values.clone()).to_string();
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Group {
                dimensions: dimensions
                    .iter()
                    .map(|(name, _)| name.clone())
                    .zip(values)
                    .collect(),
                accumulators: vec![Accumulator::default(); measures.len()],
                records: 0,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.records += 1;
        for (measure, acc) in measures.iter().zip(group.accumulators.iter_mut()) {
            if let Some(value) = measure.field.as_ref().and_then(|f| f.value(record)) {
                acc.push(value);
            }
        }
    }

    groups
        .into_iter()
        .map(|group| FactRow {
            measures: measures
                .iter()
                .zip(&group.accumulators)
                .map(|(m, acc)| {
                    (
                        m.name.clone(),
                        acc.finish(m.op, group.records, m.field.is_none()),
                    )
                })
                .collect(),
            dimensions: group.dimensions,
            record_count: group.records,
        })
        .collect()
}

#[async_trait]
impl TypedPrimitive for TransactionFacts {
    const NAME: &'static str = NAME;

    type Config = FactsConfig;
    type Output = Vec<FactRow>;

    async fn execute(
        &self,
        ctx: &ExecutionContext,
        store: &dyn EntityStore,
        config: FactsConfig,
    ) -> ReportResult<Vec<FactRow>> {
        self.aggregate(ctx, store, &config).await
    }
}
