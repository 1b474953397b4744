//! Schema-checked MongoDB documents for bsonform
//!
//! # Features
//! - Typed field assignment checked against a [`DocumentSchema`]
//! - Short stored keys with transparent query mapping
//! - Dirty tracking and atomic `$inc`/`$push`/`$pullAll`/`$addToSet` updates
//! - Lifecycle hooks around loads and saves
//! - Named connections, including an in-memory backend for tests
//! - Atomic named sequences
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use bson::doc;
//! use bsonform_mongodb::{ConnectionManager, DocumentSchema, MemoryBackend, Model};
//!
//! # tokio_test::block_on(async {
//! let manager = Arc::new(ConnectionManager::new());
//! manager.add_connection(Arc::new(MemoryBackend::new()), None);
//!
//! let schema = DocumentSchema::builder("User")
//!     .database("app")
//!     .field("name", "str")
//!     .field("logins", "int")
//!     .short_name("logins", "l")
//!     .required("name")
//!     .build()
//!     .unwrap();
//! let users = Model::new(schema).with_manager(manager);
//!
//! let mut user = users.new_document();
//! user.set_field("name", "ann").unwrap();
//! user.save().await.unwrap();
//!
//! user.inc("logins", 1).unwrap();
//! user.save().await.unwrap();
//!
//! let found = users.find_one(doc! { "logins": 1 }).await.unwrap().unwrap();
//! assert_eq!(found.get_as::<String>("name").unwrap(), "ann");
//! # });
//! ```

pub mod backend;
pub mod connection;
pub mod cursor;
pub mod document;
pub mod hooks;
pub mod memory;
pub mod model;
pub mod operations;
pub mod query;
pub mod sequence;
pub mod settings;
pub mod tracking;

pub use backend::{CollectionBackend, DatabaseBackend, FindOptions, RawDocumentStream};
pub use bsonform_common::{ErrorType, OdmError, Result, ValidationError};
pub use bsonform_schema::{DocumentSchema, Field, SchemaBuilder, TypeSpec, ID_FIELD};
pub use connection::{
    Connection, ConnectionManager, MongoCollection, PoolConfig, DEFAULT_CONNECTION,
};
pub use cursor::DocumentCursor;
pub use document::Document;
pub use hooks::{DocumentHooks, NoHooks};
pub use memory::MemoryBackend;
pub use model::Model;
pub use operations::PendingOperations;
pub use query::{map_query, Query};
pub use sequence::SequenceGenerator;
pub use settings::ConnectionSettings;
pub use tracking::{TrackedList, TrackedMap, TrackedSet};
