//! Collection and field name validation
//!
//! Names declared in a schema end up as MongoDB keys and namespaces, so they
//! are checked once when the schema is built.

use bsonform_common::{OdmError, Result};

/// Maximum allowed length for collection names (MongoDB limit is 255, we're more conservative)
pub const MAX_COLLECTION_NAME_LENGTH: usize = 120;

/// Maximum allowed length for field names
pub const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Validated collection name
///
/// - Not empty
/// - Maximum 120 characters
/// - No null bytes
/// - No "system." prefix (system collections)
/// - No $ characters (special operators)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    /// Creates a new validated collection name
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(OdmError::Schema("Collection name cannot be empty".to_string()));
        }

        if name.len() > MAX_COLLECTION_NAME_LENGTH {
            return Err(OdmError::Schema(format!(
                "Collection name exceeds maximum length of {} characters",
                MAX_COLLECTION_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(OdmError::Schema(
                "Collection name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with("system.") {
            return Err(OdmError::Schema(format!(
                "Collection name cannot start with 'system.': '{}'",
                name
            )));
        }

        if name.contains('$') {
            return Err(OdmError::Schema(format!(
                "Collection name cannot contain '$' character: '{}'",
                name
            )));
        }

        if name.contains("..") || name.contains("//") {
            tracing::warn!(collection = name, "Collection name contains suspicious pattern");
        }

        Ok(ValidatedCollectionName {
            name: name.to_string(),
        })
    }

    /// Returns the validated collection name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedCollectionName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated document key
///
/// Declared field names and their short stored names must be plain keys:
/// not empty, at most 1024 characters, no null bytes, no `$` prefix and no
/// `.` (which MongoDB reads as a path separator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    /// Creates a new validated field name
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(OdmError::Schema("Field name cannot be empty".to_string()));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(OdmError::Schema(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(OdmError::Schema(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(OdmError::Schema(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.contains('.') {
            return Err(OdmError::Schema(format!(
                "Field name cannot contain '.' (path separator): '{}'",
                name
            )));
        }

        Ok(ValidatedFieldName {
            name: name.to_string(),
        })
    }

    /// Returns the validated field name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedFieldName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_collection_names() {
        for name in ["users", "posts", "my_collection", "test123"] {
            assert!(
                ValidatedCollectionName::new(name).is_ok(),
                "Should accept valid name: {}",
                name
            );
        }
    }

    #[test]
    fn test_empty_collection_name() {
        let result = ValidatedCollectionName::new("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_collection_name_too_long() {
        let long_name = "a".repeat(MAX_COLLECTION_NAME_LENGTH + 1);
        let result = ValidatedCollectionName::new(&long_name);
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_system_collection_blocked() {
        let result = ValidatedCollectionName::new("system.users");
        assert!(result.unwrap_err().to_string().contains("system."));
    }

    #[test]
    fn test_collection_name_with_dollar_sign() {
        let result = ValidatedCollectionName::new("$users");
        assert!(result.unwrap_err().to_string().contains("$"));
    }

    #[test]
    fn test_validated_collection_name_display() {
        let validated = ValidatedCollectionName::new("users").unwrap();
        assert_eq!(validated.as_str(), "users");
        assert_eq!(validated.to_string(), "users");
    }

    #[test]
    fn test_valid_field_names() {
        for name in ["email", "user_id", "_id", "n"] {
            assert!(
                ValidatedFieldName::new(name).is_ok(),
                "Should accept valid field name: {}",
                name
            );
        }
    }

    #[test]
    fn test_rejected_field_names() {
        let cases = [
            ("", "empty"),
            ("a\0b", "null bytes"),
            ("$set", "'$'"),
            ("address.city", "'.'"),
        ];
        for (name, fragment) in cases {
            let err = ValidatedFieldName::new(name).unwrap_err();
            assert!(
                err.to_string().contains(fragment),
                "{:?} should fail mentioning {}",
                name,
                fragment
            );
        }
    }

    #[test]
    fn test_field_name_too_long() {
        let long_name = "a".repeat(MAX_FIELD_NAME_LENGTH + 1);
        let result = ValidatedFieldName::new(&long_name);
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }
}
