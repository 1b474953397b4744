//! Error types for bsonform

use std::fmt;
use thiserror::Error;

/// Result type alias for bsonform operations
pub type Result<T> = std::result::Result<T, OdmError>;

/// Unified error type for all bsonform operations
#[derive(Error, Debug, Clone)]
pub enum OdmError {
    #[error("MongoDB error: {0}")]
    MongoDB(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    /// A value did not match its field declaration
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A schema declaration is inconsistent (duplicate keys, bad names, unparseable types)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Access to a field the schema does not declare
    #[error("Field error: {0}")]
    Field(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OdmError {
    /// Returns true if this is a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self, OdmError::Validation(_))
    }

    /// Returns the validation error, if this is one
    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            OdmError::Validation(err) => Some(err),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for OdmError {
    fn from(err: serde_json::Error) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

// MongoDB-specific error conversions (when mongodb-errors feature is enabled)
#[cfg(feature = "mongodb-errors")]
impl From<mongodb::error::Error> for OdmError {
    fn from(err: mongodb::error::Error) -> Self {
        OdmError::MongoDB(err.to_string())
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::ser::Error> for OdmError {
    fn from(err: bson::ser::Error) -> Self {
        OdmError::Serialization(format!("BSON serialization error: {}", err))
    }
}

#[cfg(feature = "mongodb-errors")]
impl From<bson::de::Error> for OdmError {
    fn from(err: bson::de::Error) -> Self {
        OdmError::Deserialization(format!("BSON deserialization error: {}", err))
    }
}

// ============================================================================
// Validation Error
// ============================================================================

/// A field value that did not match its schema
///
/// `path` uses MongoDB dotted notation from the root of the document being
/// validated (e.g. `"address.lines.0"`). It is `None` for document-level
/// failures such as missing required fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Path to the erroneous field
    pub path: Option<String>,

    /// Human-readable error message
    pub message: String,

    /// Error type classification
    pub error_type: ErrorType,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(path: Option<String>, message: impl Into<String>, error_type: ErrorType) -> Self {
        Self {
            path,
            message: message.into(),
            error_type,
        }
    }

    /// Create a type error at `path`
    pub fn type_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Some(path.into()), message, ErrorType::TypeError)
    }

    /// Create a value error at `path`
    pub fn value_error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Some(path.into()), message, ErrorType::ValueError)
    }

    /// Create a missing required fields error
    pub fn missing(fields: &[String]) -> Self {
        Self::new(
            None,
            format!("missing required fields: {}", fields.join(", ")),
            ErrorType::Missing,
        )
    }

    /// Create an unknown field error at `path`
    pub fn extra_forbidden(path: impl Into<String>) -> Self {
        let path = path.into();
        let message = format!("field '{}' is not declared by the schema", path);
        Self::new(Some(path), message, ErrorType::ExtraForbidden)
    }

    /// Create a read-only violation at `path`
    pub fn read_only(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Some(path.into()), message, ErrorType::ReadOnly)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(
                f,
                "Validation error at '{}': {} [{}]",
                path, self.message, self.error_type
            ),
            None => write!(f, "Validation error: {} [{}]", self.message, self.error_type),
        }
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// Error Type Classification
// ============================================================================

/// Classification of validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    /// Type mismatch error (e.g., expected string, got integer)
    TypeError,

    /// Value constraint violation (e.g., fixed list of the wrong length)
    ValueError,

    /// Required field missing
    Missing,

    /// Key not declared by the (nested) schema
    ExtraForbidden,

    /// Assignment to a read-only or already written write-once field
    ReadOnly,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeError => write!(f, "type_error"),
            Self::ValueError => write!(f, "value_error"),
            Self::Missing => write!(f, "missing"),
            Self::ExtraForbidden => write!(f, "extra_forbidden"),
            Self::ReadOnly => write!(f, "read_only"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_mongodb() {
        let err = OdmError::MongoDB("connection refused".to_string());
        assert_eq!(err.to_string(), "MongoDB error: connection refused");
    }

    #[test]
    fn test_error_display_connection() {
        let err = OdmError::Connection("no default connection".to_string());
        assert_eq!(err.to_string(), "Connection error: no default connection");
    }

    #[test]
    fn test_error_display_schema() {
        let err = OdmError::Schema("duplicate 'name'".to_string());
        assert_eq!(err.to_string(), "Schema error: duplicate 'name'");
    }

    #[test]
    fn test_error_display_field() {
        let err = OdmError::Field("'nope' is not a settable key".to_string());
        assert_eq!(err.to_string(), "Field error: 'nope' is not a settable key");
    }

    #[test]
    fn test_validation_display_with_path() {
        let err = ValidationError::type_error("events.2", "expected int64, got string");
        assert_eq!(
            err.to_string(),
            "Validation error at 'events.2': expected int64, got string [type_error]"
        );
    }

    #[test]
    fn test_missing_lists_fields() {
        let err = ValidationError::missing(&["age".to_string(), "name".to_string()]);
        assert_eq!(err.path, None);
        assert_eq!(err.error_type, ErrorType::Missing);
        assert_eq!(err.message, "missing required fields: age, name");
    }

    #[test]
    fn test_validation_converts_transparently() {
        let err: OdmError = ValidationError::read_only("_id", "field is read-only").into();
        assert!(err.is_validation());
        assert_eq!(err.as_validation().unwrap().error_type, ErrorType::ReadOnly);
        assert!(err.to_string().starts_with("Validation error at '_id'"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: OdmError = json_err.into();
        assert!(matches!(err, OdmError::Serialization(_)));
    }

    #[test]
    fn test_error_type_display() {
        assert_eq!(ErrorType::TypeError.to_string(), "type_error");
        assert_eq!(ErrorType::ValueError.to_string(), "value_error");
        assert_eq!(ErrorType::Missing.to_string(), "missing");
        assert_eq!(ErrorType::ExtraForbidden.to_string(), "extra_forbidden");
        assert_eq!(ErrorType::ReadOnly.to_string(), "read_only");
    }
}
