//! `$jsonSchema` export
//!
//! Generates MongoDB collection validators from document schemas. Keys in the
//! generated validator are the stored (short) keys, since that is what the
//! server sees.

use bson::{doc, Bson, Document as BsonDocument};

use crate::schema::DocumentSchema;
use crate::spec::TypeSpec;

/// Build the `$jsonSchema` body describing one field type
pub fn type_json_schema(spec: &TypeSpec) -> BsonDocument {
    match spec {
        TypeSpec::Any => BsonDocument::new(),
        TypeSpec::Bool => doc! { "bsonType": "bool" },
        TypeSpec::Blob => doc! { "bsonType": "binData" },
        TypeSpec::Str => doc! { "bsonType": "string" },
        TypeSpec::Int => doc! { "bsonType": ["int", "long"] },
        TypeSpec::Float => doc! { "bsonType": "double" },
        TypeSpec::ObjectId => doc! { "bsonType": ["objectId", "null"] },
        TypeSpec::DateTime => doc! { "bsonType": ["date", "null"] },

        TypeSpec::List(items) => doc! {
            "bsonType": "array",
            "items": type_json_schema(items),
        },

        TypeSpec::Set(items) => doc! {
            "bsonType": "array",
            "items": type_json_schema(items),
            "uniqueItems": true,
        },

        // Positional items use the draft-4 array form MongoDB understands
        TypeSpec::FixedList(items) => {
            let len = items.len() as i64;
            doc! {
                "bsonType": "array",
                "items": items.iter().map(|t| Bson::Document(type_json_schema(t))).collect::<Vec<_>>(),
                "minItems": len,
                "maxItems": len,
            }
        }

        TypeSpec::Document(schema) => document_json_schema(schema),
    }
}

/// Build the `$jsonSchema` body describing a whole document
pub fn document_json_schema(schema: &DocumentSchema) -> BsonDocument {
    let mut properties = BsonDocument::new();
    let mut required = Vec::new();

    for field in schema.fields() {
        let key = schema.long_to_short(field.name()).to_string();
        if field.is_required() {
            required.push(Bson::String(key.clone()));
        }
        properties.insert(key, type_json_schema(field.spec()));
    }

    let mut out = doc! {
        "bsonType": "object",
        "title": schema.name(),
        "properties": properties,
    };
    if !required.is_empty() {
        out.insert("required", required);
    }
    out
}

/// Wrap [`document_json_schema`] into a collection validator (`{"$jsonSchema": ...}`)
pub fn collection_validator(schema: &DocumentSchema) -> BsonDocument {
    doc! { "$jsonSchema": document_json_schema(schema) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_schemas() {
        assert_eq!(type_json_schema(&TypeSpec::Str), doc! { "bsonType": "string" });
        assert_eq!(
            type_json_schema(&TypeSpec::Int),
            doc! { "bsonType": ["int", "long"] }
        );
        assert!(type_json_schema(&TypeSpec::Any).is_empty());
    }

    #[test]
    fn test_set_schema_is_unique() {
        let schema = type_json_schema(&TypeSpec::set(TypeSpec::Str));
        assert!(schema.get_bool("uniqueItems").unwrap());
        assert_eq!(schema.get_str("bsonType").unwrap(), "array");
    }

    #[test]
    fn test_fixed_list_schema() {
        let schema = type_json_schema(&TypeSpec::fixed(vec![TypeSpec::Int, TypeSpec::Str]));
        assert_eq!(schema.get_array("items").unwrap().len(), 2);
        assert_eq!(schema.get_i64("minItems").unwrap(), 2);
        assert_eq!(schema.get_i64("maxItems").unwrap(), 2);
    }

    #[test]
    fn test_document_schema_uses_stored_keys() {
        let schema = DocumentSchema::builder("User")
            .field("email", "str")
            .field("age", "int")
            .short_name("email", "e")
            .required("email")
            .build()
            .unwrap();

        let validator = collection_validator(&schema);
        let body = validator.get_document("$jsonSchema").unwrap();
        assert_eq!(body.get_str("title").unwrap(), "User");

        let properties = body.get_document("properties").unwrap();
        assert!(properties.contains_key("_id"));
        assert!(properties.contains_key("e"));
        assert!(properties.contains_key("age"));
        assert!(!properties.contains_key("email"));

        let required = body.get_array("required").unwrap();
        assert_eq!(required, &vec![Bson::String("e".into())]);
    }
}
