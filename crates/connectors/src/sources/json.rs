use quarry_columnar::ColumnarTable;
use quarry_common::Scalar;
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};
use serde_json::Value;
use tracing::warn;

use super::{LoadSpec, MetricLoader};

/// JSON document with an array of row objects at `data_path`.
pub struct JsonLoader;

impl MetricLoader for JsonLoader {
    fn format(&self) -> &'static str {
        "json"
    }

    fn parse(&self, payload: &[u8], spec: &LoadSpec) -> Result<ColumnarTable> {
        let document: Value = serde_json::from_slice(payload).map_err(|e| {
            QuarryError::new(
                ErrorCode::MalformedPayload,
                format!(
                    "metric '{}': invalid JSON from {}: {}",
                    spec.metric, spec.locator, e
                ),
            )
            .with_context(ErrorContext::Parse {
                locator: spec.locator.clone(),
                row: Some(e.line()),
                field: None,
            })
        })?;

        let mut table = ColumnarTable::create(spec.schema()?);

        let pointer = normalize_pointer(&spec.data_path);
        let node = document.pointer(&pointer).ok_or_else(|| {
            QuarryError::new(
                ErrorCode::InvalidDataPath,
                format!(
                    "metric '{}': data path '{}' does not resolve in the response from {}",
                    spec.metric, spec.data_path, spec.locator
                ),
            )
        })?;

        let Value::Array(items) = node else {
            warn!(
                metric = %spec.metric,
                data_path = %spec.data_path,
                "data path does not point to an array; returning an empty table"
            );
            return Ok(table);
        };

        let keys: Vec<&str> = spec
            .field_types
            .keys()
            .map(|f| spec.source_column(f))
            .collect();
        let filters = spec.row_filters()?;

        let mut row = 0usize;
        let mut skipped_non_objects = 0usize;
        for item in items {
            let Value::Object(object) = item else {
                skipped_non_objects += 1;
                continue;
            };

            let keep = filters.iter().all(|(column, predicate)| {
                object
                    .get(column)
                    .and_then(json_scalar)
                    .is_some_and(|v| predicate.matches_scalar(&v))
            });
            if !keep {
                continue;
            }

            for (col, key) in keys.iter().enumerate() {
                let value = object.get(*key).and_then(json_scalar);
                table.column_at_mut(col).set(row, value);
            }
            row += 1;
        }
        table.set_row_count(row);

        if skipped_non_objects > 0 {
            warn!(
                metric = %spec.metric,
                skipped = skipped_non_objects,
                "skipped array items that are not objects"
            );
        }
        Ok(table)
    }
}

/// `""` and `"/"` address the root. Paths without a leading slash are taken
/// as dot-separated keys.
fn normalize_pointer(data_path: &str) -> String {
    let path = data_path.trim();
    if path.is_empty() || path == "/" {
        String::new()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        path.split('.')
            .map(|segment| format!("/{}", segment.replace('~', "~0").replace('/', "~1")))
            .collect()
    }
}

fn json_scalar(value: &Value) -> Option<Scalar> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Scalar::Boolean(*b)),
        Value::Number(n) => n
            .as_i64()
            .map(Scalar::Int64)
            .or_else(|| n.as_f64().map(Scalar::Float64)),
        Value::String(s) => Some(Scalar::Utf8(s.clone())),
        nested => Some(Scalar::Utf8(nested.to_string())),
    }
}
