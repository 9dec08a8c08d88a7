//! Result encoders: CSV, row-oriented JSON and Arrow IPC streams.

use std::io::Write;
use std::ops::Deref;
use std::sync::Arc;

use arrow::ipc::writer::StreamWriter;
use quarry_common::Scalar;
use quarry_error::{ErrorCode, QuarryError, Result};
use serde_json::{Map, Value};

use crate::table::ColumnarTable;

pub const ARROW_STREAM_CONTENT_TYPE: &str = "application/vnd.apache.arrow.stream";

/// Header row plus one record per row; nulls become empty cells.
pub fn write_csv<W: Write>(table: &ColumnarTable, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(table.column_names())?;
    let mut record: Vec<String> = Vec::with_capacity(table.schema().len());
    for row in 0..table.row_count() {
        record.clear();
        for value in table.row(row) {
            record.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        csv.write_record(&record)?;
    }
    csv.flush()?;
    Ok(())
}

pub fn to_csv(table: &ColumnarTable) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_csv(table, &mut buf)?;
    Ok(buf)
}

fn scalar_to_json(value: Option<Scalar>) -> Value {
    match value {
        None => Value::Null,
        Some(Scalar::Utf8(s)) => Value::String(s),
        Some(Scalar::Int64(v)) | Some(Scalar::TimestampMillis(v)) => Value::from(v),
        Some(Scalar::Float64(v)) => serde_json::Number::from_f64(v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Scalar::Boolean(v)) => Value::Bool(v),
    }
}

/// One JSON object per row, keys in schema order, explicit nulls.
pub fn row_to_json(table: &ColumnarTable, row: usize) -> Map<String, Value> {
    table
        .schema()
        .fields()
        .iter()
        .zip(table.row(row))
        .map(|(field, value)| (field.name.clone(), scalar_to_json(value)))
        .collect()
}

pub fn to_json_rows(table: &ColumnarTable) -> Vec<Value> {
    (0..table.row_count())
        .map(|row| Value::Object(row_to_json(table, row)))
        .collect()
}

/// Whole table as one Arrow IPC stream message sequence.
pub fn to_ipc_stream(table: &ColumnarTable) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for chunk in IpcChunks::new(table, table.row_count().max(1)) {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}

/// Encodes a table as an Arrow IPC stream, `batch_rows` rows per record batch.
///
/// Each item is a self-contained byte chunk: the first carries the schema,
/// the last carries the end-of-stream marker. Concatenated, the chunks form
/// one valid stream.
pub struct IpcChunks<T> {
    table: T,
    batch_rows: usize,
    offset: usize,
    writer: Option<StreamWriter<Vec<u8>>>,
    started: bool,
    finished: bool,
}

impl<T: Deref<Target = ColumnarTable>> IpcChunks<T> {
    pub fn new(table: T, batch_rows: usize) -> Self {
        Self {
            table,
            batch_rows: batch_rows.max(1),
            offset: 0,
            writer: None,
            started: false,
            finished: false,
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        if !self.started {
            self.started = true;
            let schema = Arc::new(self.table.schema().to_arrow());
            self.writer = Some(StreamWriter::try_new(Vec::new(), &schema)?);
        }
        let writer = self.writer.as_mut().ok_or_else(|| {
            QuarryError::new(ErrorCode::InternalPanic, "IPC writer missing")
        })?;

        let total = self.table.row_count();
        if self.offset < total {
            let batch = self
                .table
                .slice(self.offset, self.batch_rows)
                .to_record_batch()?;
            self.offset += batch.num_rows();
            writer.write(&batch)?;
            return Ok(Some(std::mem::take(writer.get_mut())));
        }

        writer.finish()?;
        self.finished = true;
        let tail = self
            .writer
            .take()
            .map(|w| w.into_inner())
            .transpose()?
            .unwrap_or_default();
        Ok(Some(tail))
    }
}

impl<T: Deref<Target = ColumnarTable>> Iterator for IpcChunks<T> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => None,
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
