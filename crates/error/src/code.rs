use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric error codes following QRY-XXXX format.
///
/// ## Code Ranges
/// - **1000-1999**: Fetch errors (source transport)
/// - **2000-2999**: Validation errors (bad request shape, unknown names)
/// - **3000-3999**: Configuration and catalog errors
/// - **4000-4999**: Parse errors (malformed source payloads)
/// - **5000-5999**: Internal errors (contract violations)
///
/// Codes are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
#[non_exhaustive]
pub enum ErrorCode {
    // === Fetch Errors (1000-1999) ===
    /// QRY-1001: Source answered with a non-success status or refused the connection
    SourceUnavailable = 1001,
    /// QRY-1002: Request to the source timed out
    ConnectionTimeout = 1002,
    /// QRY-1003: Local source could not be read
    SourceIo = 1003,
    /// QRY-1004: No loader for the source kind
    UnsupportedSourceType = 1004,

    // === Validation Errors (2000-2999) ===
    /// QRY-2001: SQL syntax error or unsupported statement
    SyntaxError = 2001,
    /// QRY-2002: Field not defined on the logical table
    FieldNotFound = 2002,
    /// QRY-2003: Logical table not registered
    TableNotFound = 2003,
    /// QRY-2004: Value cannot be coerced to the column type
    TypeMismatch = 2004,
    /// QRY-2005: Expression shape not supported
    UnsupportedExpression = 2005,
    /// QRY-2006: Filter expression is malformed
    InvalidFilter = 2006,
    /// QRY-2007: Metric not registered
    MetricNotFound = 2007,
    /// QRY-2008: Column missing from a source or table
    ColumnNotFound = 2008,
    /// QRY-2009: JSON data path does not resolve
    InvalidDataPath = 2009,
    /// QRY-2010: Join requested without key columns
    MissingJoinKey = 2010,
    /// QRY-2011: Generic invalid request
    InvalidRequest = 2011,

    // === Configuration Errors (3000-3999) ===
    /// QRY-3001: Invalid YAML syntax
    InvalidYaml = 3001,
    /// QRY-3002: Catalog or configuration failed validation
    SchemaViolation = 3002,
    /// QRY-3003: Missing required field in config
    MissingRequiredField = 3003,

    // === Parse Errors (4000-4999) ===
    /// QRY-4001: Source payload is not well formed
    MalformedPayload = 4001,

    // === Internal Errors (5000-5999) ===
    /// QRY-5001: Result encoding failed
    EncodingFailed = 5001,
    /// QRY-5002: Serialization/deserialization failed
    SerializationFailed = 5002,
    /// QRY-5003: Unexpected internal state
    InternalPanic = 5003,
    /// QRY-5004: Feature not implemented
    NotImplemented = 5004,
    /// QRY-5005: Column count or schema mismatch between components
    SchemaMismatch = 5005,

    /// QRY-9999: Unknown/unclassified error
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the numeric code value
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Get the formatted code string (e.g., "QRY-2002")
    pub fn as_str(&self) -> String {
        format!("QRY-{:04}", self.as_u16())
    }

    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self.as_u16() {
            1000..=1999 => ErrorCategory::Fetch,
            2000..=2999 => ErrorCategory::Validation,
            3000..=3999 => ErrorCategory::Config,
            4000..=4999 => ErrorCategory::Parse,
            _ => ErrorCategory::Internal,
        }
    }

    /// HTTP status for the request layer.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::TableNotFound | Self::MetricNotFound => 404,
            _ => match self.category() {
                ErrorCategory::Validation => 400,
                _ => 500,
            },
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<ErrorCode> for String {
    fn from(code: ErrorCode) -> String {
        code.as_str()
    }
}

impl TryFrom<String> for ErrorCode {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let num: u16 = s
            .strip_prefix("QRY-")
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| "Invalid format".to_string())?;
        Self::try_from(num).map_err(|_| "Unknown code".to_string())
    }
}

impl TryFrom<u16> for ErrorCode {
    type Error = String;

    fn try_from(n: u16) -> std::result::Result<Self, Self::Error> {
        match n {
            1001 => Ok(Self::SourceUnavailable),
            1002 => Ok(Self::ConnectionTimeout),
            1003 => Ok(Self::SourceIo),
            1004 => Ok(Self::UnsupportedSourceType),
            2001 => Ok(Self::SyntaxError),
            2002 => Ok(Self::FieldNotFound),
            2003 => Ok(Self::TableNotFound),
            2004 => Ok(Self::TypeMismatch),
            2005 => Ok(Self::UnsupportedExpression),
            2006 => Ok(Self::InvalidFilter),
            2007 => Ok(Self::MetricNotFound),
            2008 => Ok(Self::ColumnNotFound),
            2009 => Ok(Self::InvalidDataPath),
            2010 => Ok(Self::MissingJoinKey),
            2011 => Ok(Self::InvalidRequest),
            3001 => Ok(Self::InvalidYaml),
            3002 => Ok(Self::SchemaViolation),
            3003 => Ok(Self::MissingRequiredField),
            4001 => Ok(Self::MalformedPayload),
            5001 => Ok(Self::EncodingFailed),
            5002 => Ok(Self::SerializationFailed),
            5003 => Ok(Self::InternalPanic),
            5004 => Ok(Self::NotImplemented),
            5005 => Ok(Self::SchemaMismatch),
            9999 => Ok(Self::Unknown),
            _ => Err(format!("Unknown error code: {}", n)),
        }
    }
}

/// High-level error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ErrorCategory {
    Fetch,
    Validation,
    Config,
    Parse,
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_formatting() {
        assert_eq!(ErrorCode::SourceUnavailable.as_str(), "QRY-1001");
        assert_eq!(ErrorCode::SyntaxError.as_str(), "QRY-2001");
        assert_eq!(ErrorCode::Unknown.as_str(), "QRY-9999");
    }

    #[test]
    fn test_error_code_parsing() {
        assert_eq!(
            ErrorCode::try_from("QRY-2007".to_string()).unwrap(),
            ErrorCode::MetricNotFound
        );
        assert!(ErrorCode::try_from("INVALID".to_string()).is_err());
        assert!(ErrorCode::try_from("QRY-0000".to_string()).is_err());
        assert!(ErrorCode::try_from("QRY-ABC".to_string()).is_err());
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(ErrorCode::ConnectionTimeout.category(), ErrorCategory::Fetch);
        assert_eq!(ErrorCode::InvalidFilter.category(), ErrorCategory::Validation);
        assert_eq!(ErrorCode::InvalidYaml.category(), ErrorCategory::Config);
        assert_eq!(ErrorCode::MalformedPayload.category(), ErrorCategory::Parse);
        assert_eq!(ErrorCode::SchemaMismatch.category(), ErrorCategory::Internal);
        assert_eq!(ErrorCode::Unknown.category(), ErrorCategory::Internal);
    }

    #[test]
    fn test_not_found_codes_map_to_404() {
        assert_eq!(ErrorCode::TableNotFound.http_status(), 404);
        assert_eq!(ErrorCode::MetricNotFound.http_status(), 404);
        assert_eq!(ErrorCode::FieldNotFound.http_status(), 400);
        assert_eq!(ErrorCode::InvalidYaml.http_status(), 500);
    }
}
