//! Value validation, collapse and expansion
//!
//! Validation works on user-visible values: embedded documents keyed by
//! canonical field names, integers as Int32 or Int64. The stored form
//! produced by [`collapse`] uses the short keys from a schema's field map,
//! forces integers to Int64 and removes duplicates from sets. [`expand`]
//! reverses that transformation.

use bson::{Bson, Document as BsonDocument};
use bsonform_common::ValidationError;

use crate::schema::DocumentSchema;
use crate::spec::TypeSpec;

type ValidationResult = std::result::Result<(), ValidationError>;

/// Get the BSON type name for error messages
pub fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "double",
        Bson::String(_) => "string",
        Bson::Array(_) => "array",
        Bson::Document(_) => "object",
        Bson::Boolean(_) => "bool",
        Bson::Null => "null",
        Bson::Int32(_) => "int32",
        Bson::Int64(_) => "int64",
        Bson::Timestamp(_) => "timestamp",
        Bson::Binary(_) => "binary",
        Bson::ObjectId(_) => "objectid",
        Bson::DateTime(_) => "datetime",
        Bson::Symbol(_) => "symbol",
        Bson::Decimal128(_) => "decimal128",
        _ => "unknown",
    }
}

/// Join a parent path and a child segment using MongoDB dot notation
pub(crate) fn child_path(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        format!("{}.{}", parent, segment)
    }
}

fn mismatch(field_path: &str, expected: &TypeSpec, value: &Bson) -> ValidationError {
    ValidationError::type_error(
        field_path,
        format!(
            "expected type '{}', got '{}'",
            expected.type_name(),
            bson_type_name(value)
        ),
    )
}

/// Validate a field value against its expected type
///
/// # Arguments
/// * `field_path` - Dot-notation path to the field (e.g., "address.city")
/// * `value` - The BSON value to validate
/// * `expected` - The expected type spec
///
/// # Errors
/// Returns the first validation error encountered, located by its path
pub fn validate_field(field_path: &str, value: &Bson, expected: &TypeSpec) -> ValidationResult {
    match expected {
        TypeSpec::Any => Ok(()),

        TypeSpec::Bool => match value {
            Bson::Boolean(_) => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::Blob => match value {
            Bson::Binary(_) => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::Str => match value {
            Bson::String(_) => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::Int => match value {
            Bson::Int32(_) | Bson::Int64(_) => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::Float => match value {
            Bson::Double(_) => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::ObjectId => match value {
            Bson::ObjectId(_) | Bson::Null => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::DateTime => match value {
            Bson::DateTime(_) | Bson::Null => Ok(()),
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::List(items) | TypeSpec::Set(items) => match value {
            Bson::Array(arr) => {
                for (index, item) in arr.iter().enumerate() {
                    validate_field(&child_path(field_path, &index.to_string()), item, items)?;
                }
                Ok(())
            }
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::FixedList(items) => match value {
            Bson::Array(arr) => {
                if arr.len() != items.len() {
                    return Err(ValidationError::value_error(
                        field_path,
                        format!(
                            "value must contain {} elements, got {}",
                            items.len(),
                            arr.len()
                        ),
                    ));
                }
                for (index, (item, item_type)) in arr.iter().zip(items).enumerate() {
                    validate_field(&child_path(field_path, &index.to_string()), item, item_type)?;
                }
                Ok(())
            }
            _ => Err(mismatch(field_path, expected, value)),
        },

        TypeSpec::Document(schema) => match value {
            Bson::Document(doc) => validate_document(field_path, doc, schema),
            _ => Err(mismatch(field_path, expected, value)),
        },
    }
}

/// Validate an embedded document keyed by canonical field names
///
/// Every key must be declared by `schema`; missing keys are allowed (they may
/// have defaults, and required fields are only enforced before a save).
pub fn validate_document(
    field_path: &str,
    data: &BsonDocument,
    schema: &DocumentSchema,
) -> ValidationResult {
    for (key, value) in data {
        let path = child_path(field_path, key);
        let field = schema
            .field(key)
            .ok_or_else(|| ValidationError::extra_forbidden(path.clone()))?;
        if matches!(value, Bson::Null) {
            continue;
        }
        validate_field(&path, value, field.spec())?;
    }
    Ok(())
}

/// Convert a user-visible value into its stored form
pub(crate) fn collapse(value: &Bson, spec: &TypeSpec) -> Bson {
    match (spec, value) {
        (TypeSpec::Int, Bson::Int32(n)) => Bson::Int64(i64::from(*n)),
        (TypeSpec::List(items), Bson::Array(arr)) => {
            Bson::Array(arr.iter().map(|item| collapse(item, items)).collect())
        }
        (TypeSpec::Set(items), Bson::Array(arr)) => {
            let mut unique: Vec<Bson> = Vec::with_capacity(arr.len());
            for item in arr {
                let item = collapse(item, items);
                if !unique.contains(&item) {
                    unique.push(item);
                }
            }
            Bson::Array(unique)
        }
        (TypeSpec::FixedList(items), Bson::Array(arr)) => Bson::Array(
            arr.iter()
                .zip(items)
                .map(|(item, item_type)| collapse(item, item_type))
                .collect(),
        ),
        (TypeSpec::Document(schema), Bson::Document(doc)) => {
            Bson::Document(schema.collapse_document(doc))
        }
        _ => value.clone(),
    }
}

/// Convert a stored value back into its user-visible form
pub(crate) fn expand(value: &Bson, spec: &TypeSpec) -> Bson {
    match (spec, value) {
        (TypeSpec::Int, Bson::Int32(n)) => Bson::Int64(i64::from(*n)),
        (TypeSpec::List(items), Bson::Array(arr)) | (TypeSpec::Set(items), Bson::Array(arr)) => {
            Bson::Array(arr.iter().map(|item| expand(item, items)).collect())
        }
        (TypeSpec::FixedList(items), Bson::Array(arr)) => Bson::Array(
            arr.iter()
                .enumerate()
                .map(|(index, item)| match items.get(index) {
                    Some(item_type) => expand(item, item_type),
                    None => item.clone(),
                })
                .collect(),
        ),
        (TypeSpec::Document(schema), Bson::Document(doc)) => {
            Bson::Document(schema.expand_document(doc))
        }
        _ => value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use bsonform_common::ErrorType;

    #[test]
    fn test_scalar_types() {
        assert!(validate_field("age", &Bson::Int32(3), &TypeSpec::Int).is_ok());
        assert!(validate_field("age", &Bson::Int64(3), &TypeSpec::Int).is_ok());
        assert!(validate_field("age", &Bson::Boolean(true), &TypeSpec::Int).is_err());
        assert!(validate_field("age", &Bson::Double(3.0), &TypeSpec::Int).is_err());
        assert!(validate_field("ratio", &Bson::Double(0.5), &TypeSpec::Float).is_ok());
        assert!(validate_field("ratio", &Bson::Int32(1), &TypeSpec::Float).is_err());
        assert!(validate_field("name", &Bson::String("x".into()), &TypeSpec::Str).is_ok());
        assert!(validate_field("flag", &Bson::Boolean(false), &TypeSpec::Bool).is_ok());
        assert!(validate_field("anything", &Bson::Null, &TypeSpec::Any).is_ok());
    }

    #[test]
    fn test_objectid_accepts_null() {
        assert!(validate_field("_id", &Bson::ObjectId(ObjectId::new()), &TypeSpec::ObjectId).is_ok());
        assert!(validate_field("_id", &Bson::Null, &TypeSpec::ObjectId).is_ok());
        assert!(validate_field("_id", &Bson::String("abc".into()), &TypeSpec::ObjectId).is_err());
    }

    #[test]
    fn test_datetime_accepts_null() {
        let now = Bson::DateTime(bson::DateTime::now());
        assert!(validate_field("when", &now, &TypeSpec::DateTime).is_ok());
        assert!(validate_field("when", &Bson::Null, &TypeSpec::DateTime).is_ok());
        assert!(validate_field("when", &Bson::Int64(0), &TypeSpec::DateTime).is_err());

        let span = TypeSpec::fixed(vec![TypeSpec::DateTime, TypeSpec::DateTime]);
        assert!(validate_field("span", &span.default_value(), &span).is_ok());
    }

    #[test]
    fn test_type_error_message() {
        let err = validate_field("age", &Bson::String("dave".into()), &TypeSpec::Int).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("age"));
        assert_eq!(err.error_type, ErrorType::TypeError);
        assert_eq!(err.message, "expected type 'int64', got 'string'");
    }

    #[test]
    fn test_list_element_path() {
        let spec = TypeSpec::list(TypeSpec::Int);
        let value = Bson::Array(vec![Bson::Int32(1), Bson::Int32(2), Bson::String("x".into())]);
        let err = validate_field("events", &value, &spec).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("events.2"));
    }

    #[test]
    fn test_fixed_list_length() {
        let spec = TypeSpec::fixed(vec![TypeSpec::Int, TypeSpec::Str]);
        let ok = Bson::Array(vec![Bson::Int32(1), Bson::String("a".into())]);
        assert!(validate_field("pair", &ok, &spec).is_ok());

        let short = Bson::Array(vec![Bson::Int32(1)]);
        let err = validate_field("pair", &short, &spec).unwrap_err();
        assert_eq!(err.error_type, ErrorType::ValueError);
        assert!(err.message.contains("2 elements"));

        let swapped = Bson::Array(vec![Bson::String("a".into()), Bson::Int32(1)]);
        let err = validate_field("pair", &swapped, &spec).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("pair.0"));
    }

    #[test]
    fn test_collapse_int_and_set() {
        assert_eq!(collapse(&Bson::Int32(7), &TypeSpec::Int), Bson::Int64(7));

        let spec = TypeSpec::set(TypeSpec::Int);
        let value = Bson::Array(vec![Bson::Int32(1), Bson::Int64(1), Bson::Int32(2)]);
        assert_eq!(
            collapse(&value, &spec),
            Bson::Array(vec![Bson::Int64(1), Bson::Int64(2)])
        );
    }

    #[test]
    fn test_expand_keeps_unknown_shapes() {
        let value = Bson::String("not a list".into());
        assert_eq!(expand(&value, &TypeSpec::list(TypeSpec::Int)), value);
    }

    #[test]
    fn test_nested_document_paths() {
        let address = DocumentSchema::builder("Address")
            .field("city", TypeSpec::Str)
            .field("lines", TypeSpec::list(TypeSpec::Str))
            .build()
            .unwrap();
        let spec = TypeSpec::document(&address);

        let ok = Bson::Document(doc! { "city": "Oslo", "lines": ["a", "b"] });
        assert!(validate_field("address", &ok, &spec).is_ok());

        let bad = Bson::Document(doc! { "city": "Oslo", "lines": ["a", 2] });
        let err = validate_field("address", &bad, &spec).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("address.lines.1"));

        let extra = Bson::Document(doc! { "zip": "0150" });
        let err = validate_field("address", &extra, &spec).unwrap_err();
        assert_eq!(err.error_type, ErrorType::ExtraForbidden);
        assert_eq!(err.path.as_deref(), Some("address.zip"));
    }
}
