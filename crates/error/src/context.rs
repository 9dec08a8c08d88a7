//! # Error Contexts
//!
//! Structured metadata attached to errors so API clients can react without
//! parsing messages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ErrorContext {
    /// Context for QRY-2002 (FieldNotFound)
    FieldNotFound {
        field: String,
        table: Option<String>,
        available_fields: Vec<String>,
    },

    /// Context for QRY-2003 (TableNotFound)
    TableNotFound {
        table: String,
        available_tables: Vec<String>,
    },

    /// Context for QRY-2001 (SyntaxError)
    SyntaxError { sql: String },

    /// Context for QRY-2008 (ColumnNotFound)
    ColumnNotFound {
        column: String,
        available_columns: Vec<String>,
        /// Position of the offending table in a join input list
        table_index: Option<usize>,
    },

    /// Context for fetch errors (QRY-1001..1003)
    Source {
        locator: String,
        status: Option<u16>,
        body_excerpt: Option<String>,
    },

    /// Context for QRY-4001 (MalformedPayload)
    Parse {
        locator: String,
        row: Option<usize>,
        field: Option<String>,
    },

    /// Context for QRY-3001/3002 (config errors)
    Config {
        file_path: Option<String>,
        field: Option<String>,
    },

    /// Generic key-value context for extensibility
    Generic {
        #[serde(flatten)]
        data: std::collections::HashMap<String, serde_json::Value>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_context_serde_roundtrip() {
        let ctx = ErrorContext::Source {
            locator: "http://feeds.local/prices".to_string(),
            status: Some(503),
            body_excerpt: Some("maintenance".to_string()),
        };

        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("\"type\":\"source\""));
        let de: ErrorContext = serde_json::from_str(&json).unwrap();

        match de {
            ErrorContext::Source { status, .. } => assert_eq!(status, Some(503)),
            _ => panic!("Wrong variant"),
        }
    }
}
