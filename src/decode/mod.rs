//! Decoder for the dual-base64 result payload.
//!
//! The kernel returns its result as a single quoted string: two segments
//! joined by a literal `.`, each independently base64-encoded, each
//! decoding to a JSON document. Segment one is the column data (an object
//! of scalar arrays, insertion order significant); segment two is the list
//! of time-column names. The split encoding exists because the kernel has
//! no way to carry "the result" and "which keys are time-valued" in one
//! opaque blob without risking collision with user data.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

use crate::error::{Error, Result, Segment};

/// Decoded result: column data plus the declared time-column names.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultBundle {
    /// Column name → ordered scalar values. Iteration order is the
    /// kernel-side insertion order and defines column order.
    pub data: serde_json::Map<String, Value>,
    pub time_columns: Vec<String>,
}

impl ResultBundle {
    /// Whether `name` was declared a time column.
    pub fn is_time_column(&self, name: &str) -> bool {
        self.time_columns.iter().any(|c| c == name)
    }
}

/// Decode the textual payload extracted from an `execute_result` message.
pub fn decode_payload(raw: &str) -> Result<ResultBundle> {
    let body = strip_quotes(raw.trim());

    let segments: Vec<&str> = body.split('.').collect();
    if segments.len() != 2 {
        return Err(Error::ResultFormat(format!(
            "expected two dot-joined segments, found {}",
            segments.len()
        )));
    }

    let data_bytes = STANDARD
        .decode(segments[0])
        .map_err(|source| Error::ResultDecode { segment: Segment::Data, source })?;
    let time_bytes = STANDARD
        .decode(segments[1])
        .map_err(|source| Error::ResultDecode { segment: Segment::TimeColumns, source })?;

    let data = parse_data(&data_bytes)?;
    let time_columns: Vec<String> = serde_json::from_slice(&time_bytes)
        .map_err(|source| Error::ResultParse { segment: Segment::TimeColumns, source })?;

    Ok(ResultBundle { data, time_columns })
}

fn parse_data(bytes: &[u8]) -> Result<serde_json::Map<String, Value>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|source| Error::ResultParse { segment: Segment::Data, source })?;
    match value {
        Value::Object(map) => {
            for (name, column) in &map {
                if !column.is_array() {
                    return Err(Error::ResultFormat(format!(
                        "column '{name}' is not an array"
                    )));
                }
            }
            Ok(map)
        }
        other => Err(Error::ResultFormat(format!(
            "data segment is {} rather than an object",
            kind_name(&other)
        ))),
    }
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The kernel quotes the repr of the returned string; both single and
/// double quotes occur.
fn strip_quotes(s: &str) -> &str {
    for q in ['\'', '"'] {
        if let Some(inner) = s.strip_prefix(q).and_then(|r| r.strip_suffix(q)) {
            return inner;
        }
    }
    s
}

/// Inverse of [`decode_payload`]: encode a bundle into the on-wire quoted
/// form. Test support for the round-trip property and the fake kernel.
pub fn encode_bundle(bundle: &ResultBundle) -> String {
    let data_json = serde_json::to_string(&bundle.data).unwrap_or_default();
    let time_json = serde_json::to_string(&bundle.time_columns).unwrap_or_default();
    format!(
        "'{}.{}'",
        STANDARD.encode(data_json.as_bytes()),
        STANDARD.encode(time_json.as_bytes())
    )
}
