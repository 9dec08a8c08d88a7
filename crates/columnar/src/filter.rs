//! Single-comparison filter expressions (`<column> <op> <literal>`) evaluated
//! against a columnar table.

use std::borrow::Cow;

use quarry_common::{Operator, Predicate, Scalar};
use quarry_error::{ErrorCode, ErrorContext, QuarryError, Result};
use thiserror::Error;

use crate::predicate::CompiledPredicate;
use crate::table::ColumnarTable;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterParseError {
    #[error("no comparison operator in '{0}'")]
    MissingOperator(String),
    #[error("missing column name in '{0}'")]
    MissingColumn(String),
    #[error("missing literal in '{0}'")]
    MissingLiteral(String),
    #[error("invalid column name '{0}'")]
    InvalidColumn(String),
    #[error("unterminated quoted literal in '{0}'")]
    UnterminatedQuote(String),
}

impl From<FilterParseError> for QuarryError {
    fn from(err: FilterParseError) -> Self {
        QuarryError::new(ErrorCode::InvalidFilter, err.to_string())
            .with_hint("Expected '<column> <op> <value>' with op one of ==, !=, <, <=, >, >=")
    }
}

/// Parsed `<column> <op> <literal>`. The literal stays textual until it is
/// bound to a column type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterExpression {
    pub column: String,
    pub operator: Operator,
    pub literal: String,
}

// Two-character operators first so `<=` is not read as `<`.
const OPERATORS: [&str; 7] = ["==", "!=", "<=", ">=", "<", ">", "="];

impl FilterExpression {
    /// `Ok(None)` for a blank expression.
    pub fn parse(expression: &str) -> std::result::Result<Option<Self>, FilterParseError> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Ok(None);
        }

        let (pos, symbol) = expr
            .char_indices()
            .find_map(|(i, _)| {
                OPERATORS
                    .iter()
                    .find(|op| expr[i..].starts_with(**op))
                    .map(|op| (i, *op))
            })
            .ok_or_else(|| FilterParseError::MissingOperator(expr.to_string()))?;

        let column = expr[..pos].trim();
        let literal = expr[pos + symbol.len()..].trim();

        if column.is_empty() {
            return Err(FilterParseError::MissingColumn(expr.to_string()));
        }
        if column.contains(char::is_whitespace) || column.contains(['\'', '"']) {
            return Err(FilterParseError::InvalidColumn(column.to_string()));
        }
        if literal.is_empty() {
            return Err(FilterParseError::MissingLiteral(expr.to_string()));
        }

        let operator = Operator::from_symbol(symbol)
            .ok_or_else(|| FilterParseError::MissingOperator(expr.to_string()))?;

        Ok(Some(Self {
            column: column.to_string(),
            operator,
            literal: unquote(literal, expr)?,
        }))
    }

    pub fn to_predicate(&self) -> Predicate {
        Predicate::new(
            self.column.clone(),
            self.operator,
            Scalar::Utf8(self.literal.clone()),
        )
    }
}

fn unquote(literal: &str, expr: &str) -> std::result::Result<String, FilterParseError> {
    for quote in ['\'', '"'] {
        if let Some(rest) = literal.strip_prefix(quote) {
            return rest
                .strip_suffix(quote)
                .map(str::to_string)
                .ok_or_else(|| FilterParseError::UnterminatedQuote(expr.to_string()));
        }
    }
    Ok(literal.to_string())
}

/// Rows of `table` matching `expression`. A blank expression returns the
/// input itself.
pub fn evaluate<'a>(table: &'a ColumnarTable, expression: &str) -> Result<Cow<'a, ColumnarTable>> {
    match FilterExpression::parse(expression)? {
        None => Ok(Cow::Borrowed(table)),
        Some(expr) => evaluate_predicates(table, &[expr.to_predicate()]),
    }
}

/// Rows of `table` matching every predicate. No predicates returns the input.
pub fn evaluate_predicates<'a>(
    table: &'a ColumnarTable,
    predicates: &[Predicate],
) -> Result<Cow<'a, ColumnarTable>> {
    if predicates.is_empty() {
        return Ok(Cow::Borrowed(table));
    }

    let mut bound = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let column = table.get_column(&predicate.column).ok_or_else(|| {
            let available = table.column_names();
            let mut err = QuarryError::new(
                ErrorCode::ColumnNotFound,
                format!("unknown column '{}' in filter", predicate.column),
            );
            if let Some(closest) = quarry_error::find_closest_match(&predicate.column, &available)
            {
                err = err.with_hint(format!("Did you mean '{}'?", closest));
            }
            err.with_context(ErrorContext::ColumnNotFound {
                column: predicate.column.clone(),
                available_columns: available,
                table_index: None,
            })
        })?;
        let compiled = CompiledPredicate::compile(predicate, column.data_type())?;
        bound.push((column, compiled));
    }

    let rows: Vec<usize> = (0..table.row_count())
        .filter(|&row| bound.iter().all(|(col, p)| p.matches_column(col, row)))
        .collect();

    tracing::debug!(
        input_rows = table.row_count(),
        output_rows = rows.len(),
        predicates = predicates.len(),
        "filter evaluated"
    );

    Ok(Cow::Owned(table.take(&rows)))
}
