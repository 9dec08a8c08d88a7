use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMillisecondArray,
};
use quarry_common::{DataType, Scalar};
use quarry_error::{ErrorCode, QuarryError, Result};

use crate::bitmap::Bitmap;

#[derive(Debug, Clone)]
enum Buffer {
    Utf8(Vec<String>),
    /// LONG and TIMESTAMP share 64-bit signed storage
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Boolean(Bitmap),
}

impl Buffer {
    fn for_type(data_type: DataType, capacity: usize) -> Self {
        match data_type {
            DataType::String => Buffer::Utf8(Vec::with_capacity(capacity)),
            DataType::Long | DataType::Timestamp => Buffer::Int64(Vec::with_capacity(capacity)),
            DataType::Double => Buffer::Float64(Vec::with_capacity(capacity)),
            DataType::Boolean => Buffer::Boolean(Bitmap::with_capacity(capacity)),
        }
    }

    fn resize(&mut self, len: usize) {
        match self {
            Buffer::Utf8(v) => v.resize(len, String::new()),
            Buffer::Int64(v) => v.resize(len, 0),
            Buffer::Float64(v) => v.resize(len, 0.0),
            Buffer::Boolean(v) => v.resize(len),
        }
    }

    fn byte_size(&self) -> usize {
        match self {
            Buffer::Utf8(v) => {
                v.capacity() * std::mem::size_of::<String>()
                    + v.iter().map(String::capacity).sum::<usize>()
            }
            Buffer::Int64(v) => v.capacity() * std::mem::size_of::<i64>(),
            Buffer::Float64(v) => v.capacity() * std::mem::size_of::<f64>(),
            Buffer::Boolean(v) => v.byte_size(),
        }
    }
}

/// One typed, contiguous column buffer with a validity bitmap.
///
/// Writes past the current length grow the column, filling the gap with nulls.
#[derive(Debug, Clone)]
pub struct TypedColumn {
    data_type: DataType,
    values: Buffer,
    validity: Bitmap,
}

impl TypedColumn {
    pub fn new(data_type: DataType) -> Self {
        Self::with_capacity(data_type, 0)
    }

    pub fn with_capacity(data_type: DataType, capacity: usize) -> Self {
        Self {
            data_type,
            values: Buffer::for_type(data_type, capacity),
            validity: Bitmap::with_capacity(capacity),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, row: usize) -> bool {
        !self.validity.get(row)
    }

    pub fn null_count(&self) -> usize {
        self.len() - self.validity.count_ones()
    }

    /// Grows with nulls or truncates.
    pub fn resize(&mut self, len: usize) {
        self.values.resize(len);
        self.validity.resize(len);
    }

    fn ensure_row(&mut self, row: usize) {
        if row >= self.len() {
            self.resize(row + 1);
        }
    }

    pub fn get(&self, row: usize) -> Option<Scalar> {
        if self.is_null(row) {
            return None;
        }
        Some(match (&self.values, self.data_type) {
            (Buffer::Utf8(v), _) => Scalar::Utf8(v[row].clone()),
            (Buffer::Int64(v), DataType::Timestamp) => Scalar::TimestampMillis(v[row]),
            (Buffer::Int64(v), _) => Scalar::Int64(v[row]),
            (Buffer::Float64(v), _) => Scalar::Float64(v[row]),
            (Buffer::Boolean(v), _) => Scalar::Boolean(v.get(row)),
        })
    }

    pub fn str_value(&self, row: usize) -> Option<&str> {
        match &self.values {
            Buffer::Utf8(v) if !self.is_null(row) => Some(v[row].as_str()),
            _ => None,
        }
    }

    pub fn i64_value(&self, row: usize) -> Option<i64> {
        match &self.values {
            Buffer::Int64(v) if !self.is_null(row) => Some(v[row]),
            _ => None,
        }
    }

    pub fn f64_value(&self, row: usize) -> Option<f64> {
        match &self.values {
            Buffer::Float64(v) if !self.is_null(row) => Some(v[row]),
            _ => None,
        }
    }

    pub fn bool_value(&self, row: usize) -> Option<bool> {
        match &self.values {
            Buffer::Boolean(v) if !self.is_null(row) => Some(v.get(row)),
            _ => None,
        }
    }

    pub fn set_null(&mut self, row: usize) {
        self.ensure_row(row);
        self.validity.set(row, false);
    }

    /// Lenient write: a value that cannot be coerced to the column type is
    /// stored as null.
    pub fn set(&mut self, row: usize, value: Option<Scalar>) {
        match value.and_then(|v| v.coerce(self.data_type)) {
            Some(v) => self.write_native(row, v),
            None => self.set_null(row),
        }
    }

    /// Strict write used when a value must land with its declared type.
    pub fn set_strict(&mut self, row: usize, value: Option<Scalar>) -> Result<()> {
        match value {
            None => {
                self.set_null(row);
                Ok(())
            }
            Some(v) => {
                let coerced = v.coerce(self.data_type).ok_or_else(|| {
                    QuarryError::new(
                        ErrorCode::TypeMismatch,
                        format!("cannot store '{}' in a {} column", v, self.data_type),
                    )
                })?;
                self.write_native(row, coerced);
                Ok(())
            }
        }
    }

    /// Parses `raw` as the column type; empty or malformed text becomes null.
    pub fn set_parsed(&mut self, row: usize, raw: &str) {
        match self.data_type.parse_value(raw) {
            Some(v) => self.write_native(row, v),
            None => self.set_null(row),
        }
    }

    pub fn set_str(&mut self, row: usize, value: &str) {
        if let Buffer::Utf8(_) = self.values {
            self.ensure_row(row);
            if let Buffer::Utf8(v) = &mut self.values {
                v[row].clear();
                v[row].push_str(value);
            }
            self.validity.set(row, true);
        } else {
            self.set_parsed(row, value);
        }
    }

    pub fn set_i64(&mut self, row: usize, value: i64) {
        match self.data_type {
            DataType::Long => self.write_native(row, Scalar::Int64(value)),
            _ => self.set(row, Some(Scalar::Int64(value))),
        }
    }

    pub fn set_timestamp(&mut self, row: usize, millis: i64) {
        match self.data_type {
            DataType::Timestamp => self.write_native(row, Scalar::TimestampMillis(millis)),
            _ => self.set(row, Some(Scalar::TimestampMillis(millis))),
        }
    }

    pub fn set_f64(&mut self, row: usize, value: f64) {
        self.set(row, Some(Scalar::Float64(value)));
    }

    pub fn set_bool(&mut self, row: usize, value: bool) {
        self.set(row, Some(Scalar::Boolean(value)));
    }

    /// `value` must already carry the column's native type.
    fn write_native(&mut self, row: usize, value: Scalar) {
        self.ensure_row(row);
        match (&mut self.values, value) {
            (Buffer::Utf8(v), Scalar::Utf8(s)) => v[row] = s,
            (Buffer::Int64(v), Scalar::Int64(x) | Scalar::TimestampMillis(x)) => v[row] = x,
            (Buffer::Float64(v), Scalar::Float64(x)) => v[row] = x,
            (Buffer::Boolean(v), Scalar::Boolean(b)) => v.set(row, b),
            (_, other) => {
                tracing::error!(
                    column_type = %self.data_type,
                    value_type = %other.data_type(),
                    "native write with mismatched type"
                );
                self.validity.set(row, false);
                return;
            }
        }
        self.validity.set(row, true);
    }

    /// New column holding the given rows, in order.
    pub fn take(&self, rows: &[usize]) -> TypedColumn {
        let mut validity = Bitmap::with_capacity(rows.len());
        for &row in rows {
            validity.push(self.validity.get(row));
        }
        let values = match &self.values {
            Buffer::Utf8(v) => Buffer::Utf8(rows.iter().map(|&r| v[r].clone()).collect()),
            Buffer::Int64(v) => Buffer::Int64(rows.iter().map(|&r| v[r]).collect()),
            Buffer::Float64(v) => Buffer::Float64(rows.iter().map(|&r| v[r]).collect()),
            Buffer::Boolean(v) => {
                let mut out = Bitmap::with_capacity(rows.len());
                for &row in rows {
                    out.push(v.get(row));
                }
                Buffer::Boolean(out)
            }
        };
        TypedColumn {
            data_type: self.data_type,
            values,
            validity,
        }
    }

    /// Composite join-key fragment; null cells render as `NULL`.
    pub fn key_fragment(&self, row: usize) -> String {
        if self.is_null(row) {
            return "NULL".to_string();
        }
        match &self.values {
            Buffer::Utf8(v) => v[row].clone(),
            Buffer::Int64(v) => v[row].to_string(),
            Buffer::Float64(v) => v[row].to_string(),
            Buffer::Boolean(v) => v.get(row).to_string(),
        }
    }

    pub fn byte_size(&self) -> usize {
        self.values.byte_size() + self.validity.byte_size()
    }

    /// Frees both buffers; the column reads as empty afterwards.
    pub fn release(&mut self) {
        self.values = Buffer::for_type(self.data_type, 0);
        self.validity.clear();
    }

    pub fn to_arrow(&self) -> ArrayRef {
        let valid = |row: usize| self.validity.get(row);
        match (&self.values, self.data_type) {
            (Buffer::Utf8(v), _) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(i, s)| valid(i).then_some(s.as_str()))
                    .collect::<StringArray>(),
            ),
            (Buffer::Int64(v), DataType::Timestamp) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(i, x)| valid(i).then_some(*x))
                    .collect::<TimestampMillisecondArray>(),
            ),
            (Buffer::Int64(v), _) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(i, x)| valid(i).then_some(*x))
                    .collect::<Int64Array>(),
            ),
            (Buffer::Float64(v), _) => Arc::new(
                v.iter()
                    .enumerate()
                    .map(|(i, x)| valid(i).then_some(*x))
                    .collect::<Float64Array>(),
            ),
            (Buffer::Boolean(v), _) => Arc::new(
                (0..v.len().max(self.len()))
                    .map(|i| valid(i).then(|| v.get(i)))
                    .collect::<BooleanArray>(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Array;

    #[test]
    fn test_set_past_end_fills_nulls() {
        let mut col = TypedColumn::new(DataType::Long);
        col.set_i64(3, 7);
        assert_eq!(col.len(), 4);
        assert_eq!(col.null_count(), 3);
        assert_eq!(col.get(3), Some(Scalar::Int64(7)));
        assert_eq!(col.get(0), None);
    }

    #[test]
    fn test_lenient_write_stores_null() {
        let mut col = TypedColumn::new(DataType::Double);
        col.set(0, Some(Scalar::Utf8("1.25".into())));
        col.set(1, Some(Scalar::Utf8("abc".into())));
        col.set_parsed(2, "");
        assert_eq!(col.f64_value(0), Some(1.25));
        assert!(col.is_null(1));
        assert!(col.is_null(2));
    }

    #[test]
    fn test_strict_write_rejects_mismatch() {
        let mut col = TypedColumn::new(DataType::Long);
        let err = col
            .set_strict(0, Some(Scalar::Utf8("abc".into())))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::TypeMismatch);
        col.set_strict(0, Some(Scalar::Utf8("12".into()))).unwrap();
        assert_eq!(col.i64_value(0), Some(12));
    }

    #[test]
    fn test_overwrite_null_with_value() {
        let mut col = TypedColumn::new(DataType::String);
        col.set_null(0);
        col.set_str(0, "AAPL");
        assert_eq!(col.str_value(0), Some("AAPL"));
        col.set_null(0);
        assert_eq!(col.str_value(0), None);
    }

    #[test]
    fn test_timestamp_round_trips_as_timestamp() {
        let mut col = TypedColumn::new(DataType::Timestamp);
        col.set_parsed(0, "1700000000000");
        assert_eq!(col.get(0), Some(Scalar::TimestampMillis(1_700_000_000_000)));
        assert_eq!(col.i64_value(0), Some(1_700_000_000_000));
    }

    #[test]
    fn test_take_copies_rows() {
        let mut col = TypedColumn::new(DataType::Boolean);
        col.set_bool(0, true);
        col.set_null(1);
        col.set_bool(2, false);
        let taken = col.take(&[2, 1, 0]);
        assert_eq!(taken.get(0), Some(Scalar::Boolean(false)));
        assert_eq!(taken.get(1), None);
        assert_eq!(taken.get(2), Some(Scalar::Boolean(true)));
    }

    #[test]
    fn test_key_fragment() {
        let mut col = TypedColumn::new(DataType::Long);
        col.set_i64(0, 5);
        col.set_null(1);
        assert_eq!(col.key_fragment(0), "5");
        assert_eq!(col.key_fragment(1), "NULL");
    }

    #[test]
    fn test_to_arrow_preserves_nulls() {
        let mut col = TypedColumn::new(DataType::String);
        col.set_str(0, "a");
        col.set_null(1);
        let array = col.to_arrow();
        assert_eq!(array.len(), 2);
        assert_eq!(array.null_count(), 1);
    }

    #[test]
    fn test_release_empties_column() {
        let mut col = TypedColumn::new(DataType::Double);
        col.set_f64(10, 1.0);
        col.release();
        col.release();
        assert_eq!(col.len(), 0);
        assert_eq!(col.get(10), None);
    }
}
