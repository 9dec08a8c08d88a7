use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arrow::datatypes::{DataType as ArrowType, Field as ArrowField, Schema as ArrowSchema, TimeUnit};
use arrow::record_batch::RecordBatch;
use quarry_common::{DataType, Scalar};
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};

use crate::column::TypedColumn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    fn to_arrow(&self) -> ArrowField {
        let data_type = match self.data_type {
            DataType::String => ArrowType::Utf8,
            DataType::Long => ArrowType::Int64,
            DataType::Double => ArrowType::Float64,
            DataType::Boolean => ArrowType::Boolean,
            DataType::Timestamp => ArrowType::Timestamp(TimeUnit::Millisecond, None),
        };
        ArrowField::new(&self.name, data_type, self.nullable)
    }
}

/// Ordered, uniquely named fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(QuarryError::new(
                    ErrorCode::SchemaMismatch,
                    format!("duplicate column '{}' in schema", field.name),
                ));
            }
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn to_arrow(&self) -> ArrowSchema {
        ArrowSchema::new(
            self.fields
                .iter()
                .map(Field::to_arrow)
                .collect::<Vec<_>>(),
        )
    }
}

/// A schema-carrying set of typed columns that all hold `row_count` rows.
///
/// The table owns its buffers. `release` frees them early and may be called
/// any number of times; dropping the table frees them as well. Every derived
/// table (filter, join, projection, slice) owns fresh copies.
#[derive(Debug, Clone)]
pub struct ColumnarTable {
    schema: Schema,
    columns: Vec<TypedColumn>,
    index: HashMap<String, usize>,
    row_count: usize,
    released: bool,
}

impl ColumnarTable {
    /// Allocates one empty column per schema field.
    pub fn create(schema: Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| TypedColumn::new(f.data_type))
            .collect();
        Self::from_parts(schema, columns, 0)
    }

    fn from_parts(schema: Schema, columns: Vec<TypedColumn>, row_count: usize) -> Self {
        let index = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
        Self {
            schema,
            columns,
            index,
            row_count,
            released: false,
        }
    }

    /// Builds a table from row-major values with strict coercion.
    pub fn from_rows(schema: Schema, rows: Vec<Vec<Option<Scalar>>>) -> Result<Self> {
        let mut table = Self::create(schema);
        let width = table.schema.len();
        for (row_idx, row) in rows.into_iter().enumerate() {
            if row.len() != width {
                return Err(QuarryError::new(
                    ErrorCode::SchemaMismatch,
                    format!(
                        "row {} has {} values but the schema has {} columns",
                        row_idx,
                        row.len(),
                        width
                    ),
                ));
            }
            for (col_idx, value) in row.into_iter().enumerate() {
                table.columns[col_idx].set_strict(row_idx, value)?;
            }
        }
        let rows = table.columns.first().map(TypedColumn::len).unwrap_or(0);
        table.set_row_count(rows);
        Ok(table)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn column_names(&self) -> Vec<String> {
        self.schema.names()
    }

    pub fn get_column(&self, name: &str) -> Option<&TypedColumn> {
        self.index.get(name).map(|&i| &self.columns[i])
    }

    pub fn get_column_mut(&mut self, name: &str) -> Option<&mut TypedColumn> {
        self.index.get(name).map(|&i| &mut self.columns[i])
    }

    pub fn column_at(&self, index: usize) -> &TypedColumn {
        &self.columns[index]
    }

    pub fn column_at_mut(&mut self, index: usize) -> &mut TypedColumn {
        &mut self.columns[index]
    }

    /// Like `get_column`, failing with a ColumnNotFound error.
    pub fn require_column(&self, name: &str) -> Result<&TypedColumn> {
        self.get_column(name).ok_or_else(|| {
            QuarryError::new(
                ErrorCode::ColumnNotFound,
                format!("column '{}' does not exist", name),
            )
            .with_context(ErrorContext::ColumnNotFound {
                column: name.to_string(),
                available_columns: self.column_names(),
                table_index: None,
            })
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Sets the row count, padding short columns with nulls and truncating long ones.
    pub fn set_row_count(&mut self, rows: usize) {
        for column in &mut self.columns {
            if column.len() != rows {
                column.resize(rows);
            }
        }
        self.row_count = rows;
    }

    /// Row `row` as scalars in schema order.
    pub fn row(&self, row: usize) -> Vec<Option<Scalar>> {
        self.columns.iter().map(|c| c.get(row)).collect()
    }

    pub fn byte_size(&self) -> usize {
        self.columns.iter().map(TypedColumn::byte_size).sum()
    }

    /// Frees every column buffer. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        for column in &mut self.columns {
            column.release();
        }
        self.row_count = 0;
        self.released = true;
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// New table with the given rows, in order.
    pub fn take(&self, rows: &[usize]) -> ColumnarTable {
        let columns = self.columns.iter().map(|c| c.take(rows)).collect();
        Self::from_parts(self.schema.clone(), columns, rows.len())
    }

    /// Independent copy of rows `offset..offset + len`, clamped to the table.
    pub fn slice(&self, offset: usize, len: usize) -> ColumnarTable {
        let start = offset.min(self.row_count);
        let end = start.saturating_add(len).min(self.row_count);
        let rows: Vec<usize> = (start..end).collect();
        self.take(&rows)
    }

    /// New table with `(source, output)` columns in the given order.
    pub fn project(&self, columns: &[(&str, &str)]) -> Result<ColumnarTable> {
        let mut fields = Vec::with_capacity(columns.len());
        let mut data = Vec::with_capacity(columns.len());
        for (source, output) in columns {
            let idx = self.schema.index_of(source).ok_or_else(|| {
                QuarryError::new(
                    ErrorCode::ColumnNotFound,
                    format!("cannot project missing column '{}'", source),
                )
                .with_context(ErrorContext::ColumnNotFound {
                    column: source.to_string(),
                    available_columns: self.column_names(),
                    table_index: None,
                })
            })?;
            let field = &self.schema.fields()[idx];
            fields.push(Field {
                name: output.to_string(),
                data_type: field.data_type,
                nullable: field.nullable,
            });
            data.push(self.columns[idx].clone());
        }
        Ok(Self::from_parts(Schema::new(fields)?, data, self.row_count))
    }

    /// Assemble a table from columns built elsewhere. Column lengths must match.
    pub(crate) fn from_columns(schema: Schema, columns: Vec<TypedColumn>, rows: usize) -> Result<Self> {
        if schema.len() != columns.len() || columns.iter().any(|c| c.len() != rows) {
            return Err(QuarryError::new(
                ErrorCode::SchemaMismatch,
                format!(
                    "{} fields but {} columns for {} rows",
                    schema.len(),
                    columns.len(),
                    rows
                ),
            ));
        }
        Ok(Self::from_parts(schema, columns, rows))
    }

    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let schema = Arc::new(self.schema.to_arrow());
        if self.columns.is_empty() {
            return Ok(RecordBatch::new_empty(schema));
        }
        let arrays = self.columns.iter().map(TypedColumn::to_arrow).collect();
        Ok(RecordBatch::try_new(schema, arrays)?)
    }
}

impl fmt::Display for ColumnarTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_record_batch() {
            Ok(batch) => match arrow::util::pretty::pretty_format_batches(&[batch]) {
                Ok(table) => write!(f, "{}", table),
                Err(e) => write!(f, "<unprintable table: {}>", e),
            },
            Err(e) => write!(f, "<unprintable table: {}>", e),
        }
    }
}
