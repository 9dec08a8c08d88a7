use quarry_error::{find_closest_match, ErrorCode, ErrorContext, QuarryError};
use sqlparser::parser::ParserError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("SQL parser error: {0}")]
    Parser(#[from] ParserError),

    #[error("expected exactly one SELECT statement, found {0}")]
    StatementCount(usize),

    #[error("only SELECT queries are supported, got: {0}")]
    NotASelect(String),

    #[error("{0} is not supported")]
    UnsupportedClause(&'static str),

    #[error("table '{table}' not found")]
    TableNotFound {
        table: String,
        available: Vec<String>,
    },

    #[error("field '{field}' not found in table '{table}'")]
    FieldNotFound {
        field: String,
        table: String,
        available: Vec<String>,
    },

    #[error("unsupported expression: {0}")]
    UnsupportedExpr(String),

    #[error("unsupported literal: {0}")]
    UnsupportedLiteral(String),
}

impl From<CompileError> for QuarryError {
    fn from(err: CompileError) -> Self {
        let message = err.to_string();
        match err {
            CompileError::Parser(_)
            | CompileError::StatementCount(_)
            | CompileError::NotASelect(_)
            | CompileError::UnsupportedClause(_) => QuarryError::new(ErrorCode::SyntaxError, message)
                .with_hint("Only `SELECT <fields|*> FROM <table> [WHERE ...]` is accepted"),
            CompileError::TableNotFound { table, available } => {
                let mut e = QuarryError::new(ErrorCode::TableNotFound, message);
                if let Some(suggestion) = find_closest_match(&table, &available) {
                    e = e.with_hint(format!("Did you mean '{}'?", suggestion));
                }
                e.with_context(ErrorContext::TableNotFound {
                    table,
                    available_tables: available,
                })
            }
            CompileError::FieldNotFound {
                field,
                table,
                available,
            } => {
                let mut e = QuarryError::new(ErrorCode::FieldNotFound, message);
                if let Some(suggestion) = find_closest_match(&field, &available) {
                    e = e.with_hint(format!("Did you mean '{}'?", suggestion));
                }
                e.with_context(ErrorContext::FieldNotFound {
                    field,
                    table: Some(table),
                    available_fields: available,
                })
            }
            CompileError::UnsupportedExpr(_) => {
                QuarryError::new(ErrorCode::UnsupportedExpression, message).with_hint(
                    "WHERE accepts AND-ed comparisons between a column and a literal",
                )
            }
            CompileError::UnsupportedLiteral(_) => {
                QuarryError::new(ErrorCode::UnsupportedExpression, message)
                    .with_hint("Use a number, a single-quoted string or TRUE/FALSE")
            }
        }
    }
}
