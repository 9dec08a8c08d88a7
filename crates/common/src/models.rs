use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use quarry_error::{ErrorCode, QuarryError};

/// Logical column type shared by metrics, tables and columnar buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    String,
    Long,
    Double,
    Boolean,
    /// Milliseconds since the Unix epoch
    Timestamp,
}

impl DataType {
    pub fn name(&self) -> &'static str {
        match self {
            DataType::String => "STRING",
            DataType::Long => "LONG",
            DataType::Double => "DOUBLE",
            DataType::Boolean => "BOOLEAN",
            DataType::Timestamp => "TIMESTAMP",
        }
    }

    /// Parse a raw textual cell into this type.
    ///
    /// Empty or malformed input yields `None`.
    pub fn parse_value(&self, raw: &str) -> Option<Scalar> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match self {
            DataType::String => Some(Scalar::Utf8(raw.to_string())),
            DataType::Long => trimmed.parse().ok().map(Scalar::Int64),
            DataType::Double => trimmed
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(Scalar::Float64),
            DataType::Boolean => {
                if trimmed.eq_ignore_ascii_case("true") {
                    Some(Scalar::Boolean(true))
                } else if trimmed.eq_ignore_ascii_case("false") {
                    Some(Scalar::Boolean(false))
                } else {
                    None
                }
            }
            DataType::Timestamp => trimmed.parse().ok().map(Scalar::TimestampMillis),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Utf8(String),
    Int64(i64),
    Float64(f64),
    Boolean(bool),
    TimestampMillis(i64),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Utf8(_) => DataType::String,
            Scalar::Int64(_) => DataType::Long,
            Scalar::Float64(_) => DataType::Double,
            Scalar::Boolean(_) => DataType::Boolean,
            Scalar::TimestampMillis(_) => DataType::Timestamp,
        }
    }

    /// Convert to `target`, going through the textual form when the native
    /// types differ. Returns `None` when the value cannot be represented.
    pub fn coerce(&self, target: DataType) -> Option<Scalar> {
        match (self, target) {
            (v, t) if v.data_type() == t => Some(v.clone()),
            (Scalar::Int64(v), DataType::Double) => Some(Scalar::Float64(*v as f64)),
            (Scalar::Int64(v), DataType::Timestamp) => Some(Scalar::TimestampMillis(*v)),
            (Scalar::TimestampMillis(v), DataType::Long) => Some(Scalar::Int64(*v)),
            (Scalar::Float64(v), DataType::Long | DataType::Timestamp) => {
                let v = f64_to_i64(*v)?;
                Some(if target == DataType::Long {
                    Scalar::Int64(v)
                } else {
                    Scalar::TimestampMillis(v)
                })
            }
            (v, DataType::String) => Some(Scalar::Utf8(v.to_string())),
            (v, t) => t.parse_value(&v.to_string()),
        }
    }
}

/// Exact integral conversion; `None` for fractions, non-finite values and
/// anything outside the `i64` range.
fn f64_to_i64(v: f64) -> Option<i64> {
    // 2^63 is exactly representable, i64::MAX is not
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (v.is_finite() && v.fract() == 0.0 && (-LIMIT..LIMIT).contains(&v)).then_some(v as i64)
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Utf8(s) => f.write_str(s),
            Scalar::Int64(v) | Scalar::TimestampMillis(v) => write!(f, "{}", v),
            Scalar::Float64(v) => write!(f, "{}", v),
            Scalar::Boolean(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = "IN")]
    In,
}

impl Operator {
    /// Parse an operator symbol. `==` is accepted as `=` and `<>` as `!=`.
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::NotEq),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::GtEq),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::LtEq),
            s if s.eq_ignore_ascii_case("in") => Some(Self::In),
            _ => None,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::In => "IN",
        }
    }

    /// Operator with operands swapped (`a < b` is `b > a`).
    pub fn flip(&self) -> Self {
        match self {
            Self::Gt => Self::Lt,
            Self::GtEq => Self::LtEq,
            Self::Lt => Self::Gt,
            Self::LtEq => Self::GtEq,
            other => *other,
        }
    }

    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Gt | Self::GtEq | Self::Lt | Self::LtEq)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// `column <operator> value`. For `IN` the value holds a comma-separated list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub column: String,
    pub operator: Operator,
    pub value: Scalar,
}

impl Predicate {
    pub fn new(column: impl Into<String>, operator: Operator, value: Scalar) -> Self {
        Self {
            column: column.into(),
            operator,
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: Scalar) -> Self {
        Self::new(column, Operator::Eq, value)
    }

    /// Same predicate against a different column name.
    pub fn with_column(&self, column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            operator: self.operator,
            value: self.value.clone(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.operator, self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    FileCsv,
    FileJson,
    HttpCsv,
    HttpJson,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::FileCsv => "file_csv",
            SourceKind::FileJson => "file_json",
            SourceKind::HttpCsv => "http_csv",
            SourceKind::HttpJson => "http_json",
        }
    }

    pub fn is_http(&self) -> bool {
        matches!(self, SourceKind::HttpCsv | SourceKind::HttpJson)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, independently fetchable dataset.
///
/// The produced table has one column per `field_types` key, in declared order.
/// `column_alias` maps such a field to the header (CSV) or key (JSON) it is
/// read from; unmapped fields are read under their own name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    pub name: String,
    pub source_kind: SourceKind,
    pub source_locator: String,
    #[serde(default)]
    pub data_path: String,
    pub field_types: IndexMap<String, DataType>,
    #[serde(default)]
    pub column_alias: HashMap<String, String>,
}

impl MetricDescriptor {
    /// Physical source column a declared field is read from.
    pub fn source_column<'a>(&'a self, field: &'a str) -> &'a str {
        self.column_alias
            .get(field)
            .map(String::as_str)
            .unwrap_or(field)
    }

    pub fn declares(&self, field: &str) -> bool {
        self.field_types.contains_key(field)
    }

    pub fn validate(&self) -> quarry_error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(QuarryError::new(
                ErrorCode::SchemaViolation,
                "metric name must not be empty",
            ));
        }
        if self.field_types.is_empty() {
            return Err(QuarryError::new(
                ErrorCode::SchemaViolation,
                format!("metric '{}' declares no fields", self.name),
            ));
        }
        if let Some(field) = self
            .column_alias
            .keys()
            .find(|f| !self.field_types.contains_key(*f))
        {
            return Err(QuarryError::new(
                ErrorCode::SchemaViolation,
                format!(
                    "metric '{}' aliases undeclared field '{}'",
                    self.name, field
                ),
            ));
        }
        Ok(())
    }
}

/// A virtual table composed of metric fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicalTableDefinition {
    pub name: String,
    pub primary_keys: Vec<String>,
    pub field_to_metric: IndexMap<String, String>,
    /// Logical field to metric output column. Identity when absent.
    #[serde(default)]
    pub field_to_physical: HashMap<String, String>,
    #[serde(default)]
    pub field_types: IndexMap<String, DataType>,
}

impl LogicalTableDefinition {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.field_to_metric.keys().map(String::as_str)
    }

    pub fn metric_for(&self, field: &str) -> Option<&str> {
        self.field_to_metric.get(field).map(String::as_str)
    }

    pub fn physical_column<'a>(&'a self, field: &'a str) -> &'a str {
        self.field_to_physical
            .get(field)
            .map(String::as_str)
            .unwrap_or(field)
    }

    pub fn is_primary_key(&self, field: &str) -> bool {
        self.primary_keys.iter().any(|k| k == field)
    }

    /// Every primary key must be mapped to a metric.
    pub fn validate(&self) -> quarry_error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(QuarryError::new(
                ErrorCode::SchemaViolation,
                "table name must not be empty",
            ));
        }
        if self.field_to_metric.is_empty() {
            return Err(QuarryError::new(
                ErrorCode::SchemaViolation,
                format!("table '{}' maps no fields", self.name),
            ));
        }
        for key in &self.primary_keys {
            if !self.field_to_metric.contains_key(key) {
                return Err(QuarryError::new(
                    ErrorCode::SchemaViolation,
                    format!(
                        "primary key '{}' of table '{}' is not mapped to a metric",
                        key, self.name
                    ),
                ));
            }
        }
        Ok(())
    }
}
