//! Typed column construction from a decoded result bundle.
//!
//! Non-time columns are typed by the runtime type of their first element;
//! every later element must match exactly. Heterogeneous data means the
//! result expression returned something the caller did not intend, so it
//! fails the query rather than being coerced. Time columns are parsed with
//! the RFC 3339 round-trip profile; an unparsable element is substituted
//! with the zero timestamp (Unix epoch) and logged, which keeps the column
//! usable when a single cell is bad.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::decode::ResultBundle;
use crate::error::{Error, Result};

/// Scalar type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    String,
    Timestamp,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Integer => write!(f, "integer"),
            ColumnType::Float => write!(f, "float"),
            ColumnType::String => write!(f, "string"),
            ColumnType::Timestamp => write!(f, "timestamp"),
        }
    }
}

/// Uniformly-typed column values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Str(Vec<String>),
    Time(Vec<DateTime<Utc>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int(v) => v.len(),
            ColumnValues::Float(v) => v.len(),
            ColumnValues::Str(v) => v.len(),
            ColumnValues::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            ColumnValues::Int(_) => ColumnType::Integer,
            ColumnValues::Float(_) => ColumnType::Float,
            ColumnValues::Str(_) => ColumnType::String,
            ColumnValues::Time(_) => ColumnType::Timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: ColumnValues,
}

/// Substituted for time-column elements that fail to parse.
pub fn zero_timestamp() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

/// Build the typed column set, preserving the bundle's column order.
pub fn build_columns(bundle: &ResultBundle) -> Result<Vec<Column>> {
    let mut columns = Vec::with_capacity(bundle.data.len());
    for (name, values) in &bundle.data {
        let elements = values.as_array().ok_or_else(|| Error::ColumnTypeMismatch {
            column: name.clone(),
            detail: "values are not an array".to_string(),
        })?;
        let values = if bundle.is_time_column(name) {
            build_time_column(name, elements)?
        } else {
            build_scalar_column(name, elements)?
        };
        columns.push(Column {
            name: name.clone(),
            values,
        });
    }
    Ok(columns)
}

fn build_time_column(name: &str, elements: &[Value]) -> Result<ColumnValues> {
    let mut out = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        let text = element.as_str().ok_or_else(|| Error::ColumnTypeMismatch {
            column: name.to_string(),
            detail: format!("time element {index} is {}, not a string", type_of(element)),
        })?;
        match DateTime::parse_from_rfc3339(text) {
            Ok(ts) => out.push(ts.with_timezone(&Utc)),
            Err(e) => {
                log::warn!("column '{name}': element {index} '{text}' is not RFC 3339 ({e}); substituting epoch");
                out.push(zero_timestamp());
            }
        }
    }
    Ok(ColumnValues::Time(out))
}

fn build_scalar_column(name: &str, elements: &[Value]) -> Result<ColumnValues> {
    // An empty column carries no type evidence; the original indexed
    // element zero unconditionally, which is not safe to replicate.
    let first = elements.first().ok_or_else(|| Error::ColumnTypeMismatch {
        column: name.to_string(),
        detail: "empty column cannot determine a type".to_string(),
    })?;

    match scalar_type(first) {
        Some(ColumnType::Integer) => collect(name, elements, ColumnType::Integer, Value::as_i64)
            .map(ColumnValues::Int),
        Some(ColumnType::Float) => collect(name, elements, ColumnType::Float, as_float)
            .map(ColumnValues::Float),
        Some(ColumnType::String) => collect(name, elements, ColumnType::String, |v| {
            v.as_str().map(str::to_string)
        })
        .map(ColumnValues::Str),
        _ => Err(Error::ColumnTypeMismatch {
            column: name.to_string(),
            detail: format!("unsupported element type {}", type_of(first)),
        }),
    }
}

fn collect<T>(
    name: &str,
    elements: &[Value],
    expected: ColumnType,
    extract: impl Fn(&Value) -> Option<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(elements.len());
    for (index, element) in elements.iter().enumerate() {
        match extract(element) {
            Some(v) => out.push(v),
            None => {
                return Err(Error::ColumnTypeMismatch {
                    column: name.to_string(),
                    detail: format!(
                        "element {index} is {}, expected {expected}",
                        type_of(element)
                    ),
                })
            }
        }
    }
    Ok(out)
}

/// Float extraction that refuses integers: `[1.5, 2]` is heterogeneous,
/// not a float column with a convertible element.
fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) if !n.is_i64() && !n.is_u64() => n.as_f64(),
        _ => None,
    }
}

fn scalar_type(v: &Value) -> Option<ColumnType> {
    match v {
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
        Value::Number(_) => Some(ColumnType::Float),
        Value::String(_) => Some(ColumnType::String),
        _ => None,
    }
}

fn type_of(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "float",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
