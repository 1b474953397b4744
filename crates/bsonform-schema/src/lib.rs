//! bsonform schema layer
//!
//! Declares document schemas through a small type mini-language and checks
//! BSON values against them.
//!
//! # Example
//!
//! ```rust
//! use bsonform_schema::{DocumentSchema, TypeSpec};
//! use bson::Bson;
//!
//! let schema = DocumentSchema::builder("Doc")
//!     .database("test")
//!     .field("name", "str")
//!     .field("age", "int")
//!     .field("events", "[int]")
//!     .required("name")
//!     .build()
//!     .unwrap();
//!
//! let events = schema.field("events").unwrap();
//! assert_eq!(events.spec(), &TypeSpec::list(TypeSpec::Int));
//! assert!(events.spec().validate("events", &Bson::Array(vec![Bson::Int32(1)])).is_ok());
//! assert!(events.spec().validate("events", &Bson::String("x".into())).is_err());
//! ```

pub mod field;
pub mod json_schema;
pub mod names;
pub mod schema;
pub mod spec;
pub mod validation;

pub use bsonform_common::{ErrorType, OdmError, Result, ValidationError};
pub use field::{DefaultValue, Field};
pub use names::{ValidatedCollectionName, ValidatedFieldName};
pub use schema::{DocumentSchema, SchemaBuilder, SpecDecl, ID_FIELD};
pub use spec::TypeSpec;
pub use validation::{bson_type_name, validate_document, validate_field};
