use quarry_columnar::ColumnarTable;
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};

use super::{LoadSpec, MetricLoader};

/// Header-first CSV. Empty or malformed cells load as null.
pub struct CsvLoader;

impl MetricLoader for CsvLoader {
    fn format(&self) -> &'static str {
        "csv"
    }

    fn parse(&self, payload: &[u8], spec: &LoadSpec) -> Result<ColumnarTable> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(::csv::Trim::Headers)
            .from_reader(payload);

        let headers = reader
            .headers()
            .map_err(|e| parse_error(e, spec))?
            .clone();
        let header_index = |column: &str| headers.iter().position(|h| h == column);
        let missing = |column: &str| {
            let available: Vec<String> = headers.iter().map(str::to_string).collect();
            QuarryError::new(
                ErrorCode::ColumnNotFound,
                format!(
                    "metric '{}': column '{}' not found in CSV header; available columns: [{}]",
                    spec.metric,
                    column,
                    available.join(", ")
                ),
            )
            .with_context(ErrorContext::ColumnNotFound {
                column: column.to_string(),
                available_columns: available,
                table_index: None,
            })
        };

        // Field position in the output -> position in the CSV record
        let mut field_positions = Vec::with_capacity(spec.field_types.len());
        for field in spec.field_types.keys() {
            let column = spec.source_column(field);
            field_positions.push(header_index(column).ok_or_else(|| missing(column))?);
        }

        let mut filters = Vec::new();
        for (column, predicate) in spec.row_filters()? {
            filters.push((header_index(&column).ok_or_else(|| missing(&column))?, predicate));
        }

        let mut table = ColumnarTable::create(spec.schema()?);
        let mut row = 0usize;
        let mut skipped = 0usize;
        let mut record = ::csv::StringRecord::new();
        while reader
            .read_record(&mut record)
            .map_err(|e| parse_error(e, spec))?
        {
            if !filters
                .iter()
                .all(|(pos, predicate)| predicate.matches_raw(record.get(*pos)))
            {
                skipped += 1;
                continue;
            }
            for (col, pos) in field_positions.iter().enumerate() {
                let column = table.column_at_mut(col);
                match record.get(*pos) {
                    Some(raw) => column.set_parsed(row, raw),
                    None => column.set_null(row),
                }
            }
            row += 1;
        }
        table.set_row_count(row);

        tracing::debug!(
            metric = %spec.metric,
            rows = row,
            filtered_out = skipped,
            "parsed CSV payload"
        );
        Ok(table)
    }
}

fn parse_error(err: ::csv::Error, spec: &LoadSpec) -> QuarryError {
    let row = err.position().map(|p| p.record() as usize);
    QuarryError::new(
        ErrorCode::MalformedPayload,
        format!("metric '{}': malformed CSV from {}: {}", spec.metric, spec.locator, err),
    )
    .with_context(ErrorContext::Parse {
        locator: spec.locator.clone(),
        row,
        field: None,
    })
}
