//! Multi-way inner equi-join over columnar tables.
//!
//! The first table drives: output rows follow its order, and a driver row is
//! kept only when every other table has a row with the same composite key.
//! Side tables contribute the first row seen for each key.

use std::borrow::Cow;
use std::collections::HashMap;

use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};

use crate::column::TypedColumn;
use crate::table::{ColumnarTable, Field, Schema};

const KEY_SEPARATOR: &str = "|";

/// Joins `tables` on `key_columns` (logical names, resolved through
/// `field_to_physical`; identity when unmapped).
///
/// A single table is returned as is.
pub fn join<'a>(
    tables: &[&'a ColumnarTable],
    key_columns: &[String],
    field_to_physical: &HashMap<String, String>,
) -> Result<Cow<'a, ColumnarTable>> {
    let (driver, sides) = match tables {
        [] => {
            return Err(QuarryError::new(
                ErrorCode::InvalidRequest,
                "join requires at least one table",
            ))
        }
        [only] => return Ok(Cow::Borrowed(*only)),
        [driver, sides @ ..] => (*driver, sides),
    };

    if key_columns.is_empty() {
        return Err(QuarryError::new(
            ErrorCode::MissingJoinKey,
            format!("joining {} tables requires key columns", tables.len()),
        ));
    }

    let physical_keys: Vec<&str> = key_columns
        .iter()
        .map(|k| {
            field_to_physical
                .get(k)
                .map(String::as_str)
                .unwrap_or(k.as_str())
        })
        .collect();

    let driver_keys = key_columns_of(driver, &physical_keys, 0)?;

    let mut lookups: Vec<HashMap<String, usize>> = Vec::with_capacity(sides.len());
    for (i, side) in sides.iter().enumerate() {
        let keys = key_columns_of(side, &physical_keys, i + 1)?;
        let mut lookup = HashMap::with_capacity(side.row_count());
        for row in 0..side.row_count() {
            lookup.entry(composite_key(&keys, row)).or_insert(row);
        }
        lookups.push(lookup);
    }

    let mut driver_rows = Vec::new();
    let mut side_rows: Vec<Vec<usize>> = vec![Vec::new(); sides.len()];
    let mut matched = Vec::with_capacity(sides.len());
    for row in 0..driver.row_count() {
        let key = composite_key(&driver_keys, row);
        matched.clear();
        for lookup in &lookups {
            match lookup.get(&key) {
                Some(&side_row) => matched.push(side_row),
                None => break,
            }
        }
        if matched.len() == sides.len() {
            driver_rows.push(row);
            for (rows, &side_row) in side_rows.iter_mut().zip(&matched) {
                rows.push(side_row);
            }
        }
    }

    let mut fields: Vec<Field> = driver.schema().fields().to_vec();
    let mut columns: Vec<TypedColumn> = (0..fields.len())
        .map(|i| driver.column_at(i).take(&driver_rows))
        .collect();

    for (side, rows) in sides.iter().zip(&side_rows) {
        for (i, field) in side.schema().fields().iter().enumerate() {
            if fields.iter().any(|f| f.name == field.name) {
                continue;
            }
            fields.push(field.clone());
            columns.push(side.column_at(i).take(rows));
        }
    }

    tracing::debug!(
        tables = tables.len(),
        driver_rows = driver.row_count(),
        output_rows = driver_rows.len(),
        columns = fields.len(),
        "hash join complete"
    );

    let rows = driver_rows.len();
    Ok(Cow::Owned(ColumnarTable::from_columns(
        Schema::new(fields)?,
        columns,
        rows,
    )?))
}

fn key_columns_of<'t>(
    table: &'t ColumnarTable,
    physical_keys: &[&str],
    table_index: usize,
) -> Result<Vec<&'t TypedColumn>> {
    physical_keys
        .iter()
        .map(|key| {
            table.get_column(key).ok_or_else(|| {
                QuarryError::new(
                    ErrorCode::ColumnNotFound,
                    format!(
                        "join key column '{}' is missing from table {}",
                        key, table_index
                    ),
                )
                .with_context(ErrorContext::ColumnNotFound {
                    column: key.to_string(),
                    available_columns: table.column_names(),
                    table_index: Some(table_index),
                })
            })
        })
        .collect()
}

fn composite_key(columns: &[&TypedColumn], row: usize) -> String {
    columns
        .iter()
        .map(|c| c.key_fragment(row))
        .collect::<Vec<_>>()
        .join(KEY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_common::{DataType, Scalar};

    fn s(v: &str) -> Option<Scalar> {
        Some(Scalar::Utf8(v.to_string()))
    }

    fn ts(v: i64) -> Option<Scalar> {
        Some(Scalar::TimestampMillis(v))
    }

    fn prices() -> ColumnarTable {
        let schema = Schema::new(vec![
            Field::new("ticker", DataType::String),
            Field::new("timestamp", DataType::Timestamp),
            Field::new("close", DataType::Double),
        ])
        .unwrap();
        ColumnarTable::from_rows(
            schema,
            vec![
                vec![s("AAPL"), ts(1), Some(Scalar::Float64(190.0))],
                vec![s("MSFT"), ts(1), Some(Scalar::Float64(410.0))],
            ],
        )
        .unwrap()
    }

    fn volumes() -> ColumnarTable {
        let schema = Schema::new(vec![
            Field::new("ticker", DataType::String),
            Field::new("timestamp", DataType::Timestamp),
            Field::new("volume", DataType::Long),
        ])
        .unwrap();
        ColumnarTable::from_rows(
            schema,
            vec![
                vec![s("AAPL"), ts(1), Some(Scalar::Int64(1_000))],
                vec![s("GOOG"), ts(1), Some(Scalar::Int64(2_000))],
                vec![s("AAPL"), ts(1), Some(Scalar::Int64(9_999))],
            ],
        )
        .unwrap()
    }

    fn keys() -> Vec<String> {
        vec!["ticker".to_string(), "timestamp".to_string()]
    }

    #[test]
    fn test_inner_join_keeps_only_matches() {
        let (p, v) = (prices(), volumes());
        let out = join(&[&p, &v], &keys(), &HashMap::new()).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(
            out.column_names(),
            vec!["ticker", "timestamp", "close", "volume"]
        );
        assert_eq!(
            out.row(0),
            vec![s("AAPL"), ts(1), Some(Scalar::Float64(190.0)), Some(Scalar::Int64(1_000))]
        );
    }

    #[test]
    fn test_single_table_is_identity() {
        let p = prices();
        let out = join(&[&p], &[], &HashMap::new()).unwrap();
        assert!(matches!(out, Cow::Borrowed(t) if std::ptr::eq(t, &p)));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(join(&[], &keys(), &HashMap::new()).is_err());
        let (p, v) = (prices(), volumes());
        let err = join(&[&p, &v], &[], &HashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingJoinKey);
    }

    #[test]
    fn test_missing_key_names_table_index() {
        let (p, v) = (prices(), volumes());
        let err = join(&[&p, &v], &["volume".to_string()], &HashMap::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::ColumnNotFound);
        assert!(err.message.contains("table 0"));
        match err.context {
            Some(ErrorContext::ColumnNotFound { table_index, .. }) => {
                assert_eq!(table_index, Some(0))
            }
            _ => panic!("expected column context"),
        }
    }

    #[test]
    fn test_keys_resolve_through_physical_mapping() {
        let (p, v) = (prices(), volumes());
        let mapping = HashMap::from([("date".to_string(), "timestamp".to_string())]);
        let out = join(
            &[&p, &v],
            &["ticker".to_string(), "date".to_string()],
            &mapping,
        )
        .unwrap();
        assert_eq!(out.row_count(), 1);
    }

    #[test]
    fn test_null_keys_match_each_other() {
        let schema = || Schema::new(vec![Field::new("k", DataType::String)]).unwrap();
        let a = ColumnarTable::from_rows(schema(), vec![vec![None], vec![s("x")]]).unwrap();
        let b = ColumnarTable::from_rows(schema(), vec![vec![None]]).unwrap();
        let out = join(&[&a, &b], &["k".to_string()], &HashMap::new()).unwrap();
        assert_eq!(out.row_count(), 1);
        assert_eq!(out.row(0), vec![None]);
    }

    #[test]
    fn test_driver_order_preserved() {
        let (p, v) = (prices(), volumes());
        let out = join(&[&v, &p], &keys(), &HashMap::new()).unwrap();
        assert_eq!(out.row_count(), 2);
        assert_eq!(
            out.get_column("volume").unwrap().i64_value(0),
            Some(1_000)
        );
        assert_eq!(
            out.get_column("volume").unwrap().i64_value(1),
            Some(9_999)
        );
        assert_eq!(
            out.column_names(),
            vec!["ticker", "timestamp", "volume", "close"]
        );
    }
}
