//! Presentation formatting.
//!
//! Converts a recipe result into one of the supported encodings. `json` is
//! the identity transform; every other format first tabulates the payload
//! into rows and typed columns:
//!
//! ```text
//!   Value ──► tabulate ──► rows + inferred columns ──┬──► table  (raw + display)
//!                                                    ├──► csv    (RFC 4180 text)
//!                                                    ├──► excel  (workbook descriptor)
//!                                                    └──► pdf    (print layout)
//! ```
//!
//! Locale and currency only change the rendered strings. Raw values in
//! `table` rows and typed Excel cells are never altered.

mod locale;

pub use locale::{Currency, Locale};

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ReportError, ReportResult};
use crate::model::{Amount, Row};

/// Output encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Json,
    Table,
    Csv,
    Excel,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 5] = [
        OutputFormat::Json,
        OutputFormat::Table,
        OutputFormat::Csv,
        OutputFormat::Excel,
        OutputFormat::Pdf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Table => "table",
            OutputFormat::Csv => "csv",
            OutputFormat::Excel => "excel",
            OutputFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "table" => Ok(OutputFormat::Table),
            "csv" => Ok(OutputFormat::Csv),
            "excel" | "xlsx" => Ok(OutputFormat::Excel),
            "pdf" => Ok(OutputFormat::Pdf),
            _ => Err(ReportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// How a column's values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Text,
    Number,
    Currency,
    Date,
    Boolean,
}

/// Explicit column selection: a bare key or `{key, label?, kind?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ColumnSpecRepr")]
pub struct ColumnSpec {
    pub key: String,
    pub label: Option<String>,
    pub kind: Option<ColumnKind>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColumnSpecRepr {
    Key(String),
    Full {
        key: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        kind: Option<ColumnKind>,
    },
}

impl From<ColumnSpecRepr> for ColumnSpec {
    fn from(repr: ColumnSpecRepr) -> Self {
        match repr {
            ColumnSpecRepr::Key(key) => ColumnSpec::new(key),
            ColumnSpecRepr::Full { key, label, kind } => ColumnSpec { key, label, kind },
        }
    }
}

impl ColumnSpec {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
            kind: None,
        }
    }
}

/// Rendering options shared by the formatter step and the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub locale: Option<String>,
    pub currency: Option<String>,
    /// Restrict and order columns; inferred from the data when empty.
    pub columns: Vec<ColumnSpec>,
    pub title: Option<String>,
}

/// Input of [`PresentationFormatter::format`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatRequest {
    #[serde(default)]
    pub data: Value,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(flatten)]
    pub options: RenderOptions,
}

fn default_format() -> String {
    OutputFormat::Json.as_str().to_string()
}

impl FormatRequest {
    pub fn new(data: Value, format: impl Into<String>) -> Self {
        Self {
            data,
            format: format.into(),
            options: RenderOptions::default(),
        }
    }
}

/// A rendered column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub key: String,
    pub label: String,
    pub kind: ColumnKind,
}

/// Rows and columns with both raw values and their rendered strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub display: Vec<Vec<String>>,
}

/// A typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Cell {
    Empty,
    Text(String),
    Number(Amount),
    Boolean(bool),
    /// ISO date; the column's number format controls its display.
    Date(NaiveDate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetColumn {
    pub header: String,
    pub kind: ColumnKind,
    /// Excel number format, e.g. `"$"#,##0.00`.
    pub number_format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
    pub name: String,
    pub columns: Vec<SheetColumn>,
    pub rows: Vec<Vec<Cell>>,
}

/// Workbook descriptor for an external XLSX writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workbook {
    pub locale: String,
    pub sheets: Vec<Sheet>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Portrait,
    Landscape,
}

/// Print layout for an external PDF renderer: monospaced lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintDocument {
    pub title: Option<String>,
    pub locale: String,
    pub orientation: Orientation,
    pub lines: Vec<String>,
}

/// Result of formatting, tagged by encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", content = "content", rename_all = "snake_case")]
pub enum FormattedOutput {
    Json(Value),
    Table(Table),
    Csv(String),
    Excel(Workbook),
    Pdf(PrintDocument),
}

impl FormattedOutput {
    pub fn format(&self) -> OutputFormat {
        match self {
            FormattedOutput::Json(_) => OutputFormat::Json,
            FormattedOutput::Table(_) => OutputFormat::Table,
            FormattedOutput::Csv(_) => OutputFormat::Csv,
            FormattedOutput::Excel(_) => OutputFormat::Excel,
            FormattedOutput::Pdf(_) => OutputFormat::Pdf,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            FormattedOutput::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            FormattedOutput::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            FormattedOutput::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_csv(&self) -> Option<&str> {
        match self {
            FormattedOutput::Csv(s) => Some(s),
            _ => None,
        }
    }
}

/// Column names hinting at money values.
const MONEY_HINTS: &[&str] = &[
    "amount", "balance", "total", "revenue", "price", "cost", "debit", "credit", "sales",
];

/// Nested objects whose keys become top-level columns without a prefix.
const INLINE_OBJECTS: &[&str] = &["dimensions", "measures"];

/// Renders recipe output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationFormatter {
    default_locale: String,
    default_currency: String,
}

impl Default for PresentationFormatter {
    fn default() -> Self {
        Self::new(Locale::DEFAULT_TAG, "USD")
    }
}

impl PresentationFormatter {
    pub fn new(default_locale: impl Into<String>, default_currency: impl Into<String>) -> Self {
        Self {
            default_locale: default_locale.into(),
            default_currency: default_currency.into(),
        }
    }

    /// Format a request; an unknown format fails with `UnsupportedFormat`.
    pub fn format(&self, request: &FormatRequest) -> ReportResult<FormattedOutput> {
        let format: OutputFormat = request.format.parse()?;
        self.render(&request.data, format, &request.options)
    }

    /// Render already-parsed output.
    pub fn render(
        &self,
        data: &Value,
        format: OutputFormat,
        options: &RenderOptions,
    ) -> ReportResult<FormattedOutput> {
        if format == OutputFormat::Json {
            return Ok(FormattedOutput::Json(data.clone()));
        }

        let locale = Locale::resolve(options.locale.as_deref().unwrap_or(&self.default_locale));
        let currency = Currency::resolve(
            options
                .currency
                .as_deref()
                .unwrap_or(&self.default_currency),
        );
        let table = build_table(data, options, locale, &currency);

        Ok(match format {
            OutputFormat::Json => FormattedOutput::Json(data.clone()),
            OutputFormat::Table => FormattedOutput::Table(table),
            OutputFormat::Csv => FormattedOutput::Csv(write_csv(&table)?),
            OutputFormat::Excel => {
                FormattedOutput::Excel(build_workbook(&table, options, locale, &currency))
            }
            OutputFormat::Pdf => FormattedOutput::Pdf(build_print(&table, options, locale)),
        })
    }
}

/// Turn an arbitrary payload into flat rows.
///
/// Arrays become one row per element. An object with a `rows` array (a
/// rollup result, say) uses those rows; any other object is a single row.
pub fn tabulate(data: &Value) -> Vec<Row> {
    match data {
        Value::Array(items) => items.iter().map(to_row).collect(),
        Value::Object(map) => match map.get("rows") {
            Some(Value::Array(items)) => items.iter().map(to_row).collect(),
            _ => vec![to_row(data)],
        },
        Value::Null => Vec::new(),
        scalar => vec![to_row(scalar)],
    }
}

fn to_row(value: &Value) -> Row {
    let mut row = Map::new();
    match value {
        Value::Object(map) => flatten_into(&mut row, "", map),
        other => {
            row.insert("value".to_string(), other.clone());
        }
    }
    row
}

fn flatten_into(row: &mut Row, prefix: &str, map: &Map<String, Value>) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            Value::Object(inner) if prefix.is_empty() && INLINE_OBJECTS.contains(&key.as_str()) => {
                flatten_into(row, "", inner)
            }
            Value::Object(inner) => flatten_into(row, &name, inner),
            other => {
                row.insert(name, other.clone());
            }
        }
    }
}

fn build_table(data: &Value, options: &RenderOptions, locale: &Locale, currency: &Currency) -> Table {
    let rows = tabulate(data);

    let specs: Vec<ColumnSpec> = if options.columns.is_empty() {
        let mut keys: Vec<String> = Vec::new();
        for row in &rows {
            for key in row.keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys.into_iter().map(ColumnSpec::new).collect()
    } else {
        options.columns.clone()
    };

    let columns: Vec<Column> = specs
        .into_iter()
        .map(|spec| {
            let kind = spec
                .kind
                .unwrap_or_else(|| infer_kind(&spec.key, rows.iter().filter_map(|r| r.get(&spec.key))));
            Column {
                label: spec.label.unwrap_or_else(|| humanize(&spec.key)),
                key: spec.key,
                kind,
            }
        })
        .collect();

    let raw: Vec<Vec<Value>> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .map(|c| row.get(&c.key).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();

    let display = raw
        .iter()
        .map(|cells| {
            cells
                .iter()
                .zip(&columns)
                .map(|(value, column)| render_cell(value, column.kind, locale, currency))
                .collect()
        })
        .collect();

    Table {
        columns,
        rows: raw,
        display,
    }
}

fn infer_kind<'a>(key: &str, values: impl Iterator<Item = &'a Value>) -> ColumnKind {
    let values: Vec<&Value> = values.filter(|v| !v.is_null()).collect();
    if values.is_empty() {
        return ColumnKind::Text;
    }
    if values.iter().all(|v| v.is_boolean()) {
        return ColumnKind::Boolean;
    }
    let lower = key.to_ascii_lowercase();
    let leaf = lower.rsplit('.').next().unwrap_or(&lower);
    let money = MONEY_HINTS.iter().any(|h| leaf.contains(h));
    // Amounts too precise for a float arrive as decimal strings. They only
    // make a column numeric next to real numbers or under a money name, so
    // codes such as "1.10" stay text.
    if values.iter().all(|v| v.is_number() || decimal_text(v).is_some())
        && (money || values.iter().any(|v| v.is_number()))
    {
        return if money {
            ColumnKind::Currency
        } else {
            ColumnKind::Number
        };
    }
    if values.iter().all(|v| v.as_str().and_then(parse_date).is_some()) {
        return ColumnKind::Date;
    }
    ColumnKind::Text
}

/// A string holding a decimal fraction, as `Amount` writes high-precision values.
fn decimal_text(value: &Value) -> Option<Amount> {
    match value {
        Value::String(s) if s.contains('.') => s.parse().ok(),
        _ => None,
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let head = s.get(..10)?;
    if s.len() > 10 && !s[10..].starts_with('T') {
        return None;
    }
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// `account_code` -> `Account Code`, `dimensions.month` -> `Month`.
fn humanize(key: &str) -> String {
    let leaf = key.rsplit('.').next().unwrap_or(key);
    leaf.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn render_cell(value: &Value, kind: ColumnKind, locale: &Locale, currency: &Currency) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => match (kind, decimal_text(value)) {
            (ColumnKind::Date, _) => parse_date(s)
                .map(|d| locale.format_date(d))
                .unwrap_or_else(|| s.clone()),
            (ColumnKind::Currency, Some(amount)) => locale.format_currency(amount, currency),
            (ColumnKind::Number, Some(amount)) => locale.format_number(amount),
            _ => s.clone(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Number(_) => match (Amount::from_json(value), kind) {
            (Some(amount), ColumnKind::Currency) => locale.format_currency(amount, currency),
            (Some(amount), ColumnKind::Number) => locale.format_number(amount),
            _ => value.to_string(),
        },
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn write_csv(table: &Table) -> ReportResult<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());

    writer.write_record(table.columns.iter().map(|c| c.label.as_str()))?;
    for row in &table.display {
        writer.write_record(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn build_workbook(
    table: &Table,
    options: &RenderOptions,
    locale: &Locale,
    currency: &Currency,
) -> Workbook {
    let columns = table
        .columns
        .iter()
        .map(|c| SheetColumn {
            header: c.label.clone(),
            kind: c.kind,
            number_format: match c.kind {
                ColumnKind::Currency => Some(currency.excel_format(locale)),
                ColumnKind::Date => Some(locale.excel_date_pattern.to_string()),
                ColumnKind::Number => Some("#,##0.##########".to_string()),
                ColumnKind::Text | ColumnKind::Boolean => None,
            },
        })
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|cells| {
            cells
                .iter()
                .zip(&table.columns)
                .map(|(value, column)| to_cell(value, column.kind, currency))
                .collect()
        })
        .collect();

    Workbook {
        locale: locale.tag.to_string(),
        sheets: vec![Sheet {
            name: sheet_name(options.title.as_deref().unwrap_or("Report")),
            columns,
            rows,
        }],
    }
}

fn to_cell(value: &Value, kind: ColumnKind, currency: &Currency) -> Cell {
    match value {
        Value::Null => Cell::Empty,
        Value::Bool(b) => Cell::Boolean(*b),
        Value::Number(_) => match Amount::from_json(value) {
            Some(amount) if kind == ColumnKind::Currency => Cell::Number(currency.round(amount)),
            Some(amount) => Cell::Number(amount),
            None => Cell::Text(value.to_string()),
        },
        Value::String(s) => match (kind, decimal_text(value)) {
            (ColumnKind::Date, _) => match parse_date(s) {
                Some(date) => Cell::Date(date),
                None => Cell::Text(s.clone()),
            },
            (ColumnKind::Currency, Some(amount)) => Cell::Number(currency.round(amount)),
            (ColumnKind::Number, Some(amount)) => Cell::Number(amount),
            _ => Cell::Text(s.clone()),
        },
        Value::Array(_) | Value::Object(_) => Cell::Text(value.to_string()),
    }
}

/// Excel limits sheet names to 31 characters without `[]:*?/\`.
fn sheet_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| !matches!(c, '[' | ']' | ':' | '*' | '?' | '/' | '\\'))
        .take(31)
        .collect();
    if cleaned.trim().is_empty() {
        "Report".to_string()
    } else {
        cleaned
    }
}

fn build_print(table: &Table, options: &RenderOptions, locale: &Locale) -> PrintDocument {
    let widths: Vec<usize> = table
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            table
                .display
                .iter()
                .map(|row| row[i].chars().count())
                .chain(std::iter::once(c.label.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: Vec<&str>| -> String {
        cells
            .iter()
            .zip(&widths)
            .zip(&table.columns)
            .map(|((cell, width), column)| match column.kind {
                ColumnKind::Number | ColumnKind::Currency => format!("{:>width$}", cell, width = *width),
                _ => format!("{:<width$}", cell, width = *width),
            })
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = Vec::new();
    if let Some(title) = &options.title {
        lines.push(title.clone());
        lines.push(String::new());
    }
    lines.push(line(table.columns.iter().map(|c| c.label.as_str()).collect()));
    let total_width = widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1);
    lines.push("-".repeat(total_width));
    for row in &table.display {
        lines.push(line(row.iter().map(String::as_str).collect()));
    }

    PrintDocument {
        title: options.title.clone(),
        locale: locale.tag.to_string(),
        orientation: if total_width > 80 {
            Orientation::Landscape
        } else {
            Orientation::Portrait
        },
        lines,
    }
}
