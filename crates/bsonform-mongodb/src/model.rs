//! Document classes
//!
//! A [`Model`] ties a [`DocumentSchema`] to the hooks that run around its
//! documents and to the [`ConnectionManager`] they are stored through. It is
//! cheap to clone and is the entry point for creating, loading and querying
//! documents.

use std::fmt;
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document as BsonDocument};
use bsonform_common::{OdmError, Result};
use bsonform_schema::DocumentSchema;
use serde::Serialize;

use crate::backend::CollectionBackend;
use crate::connection::ConnectionManager;
use crate::document::Document;
use crate::hooks::{DocumentHooks, NoHooks};
use crate::query::{map_query, Query};

#[derive(Clone)]
pub struct Model {
    schema: Arc<DocumentSchema>,
    hooks: Arc<dyn DocumentHooks>,
    manager: Arc<ConnectionManager>,
}

impl Model {
    /// Model without hooks, stored through the global connection manager
    pub fn new(schema: Arc<DocumentSchema>) -> Self {
        Self {
            schema,
            hooks: Arc::new(NoHooks),
            manager: ConnectionManager::global(),
        }
    }

    pub fn with_hooks(mut self, hooks: impl DocumentHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Store documents through `manager` instead of the global one
    pub fn with_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = manager;
        self
    }

    pub fn schema(&self) -> &Arc<DocumentSchema> {
        &self.schema
    }

    pub fn hooks(&self) -> &Arc<dyn DocumentHooks> {
        &self.hooks
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    /// A fresh, unsaved document
    pub fn new_document(&self) -> Document {
        Document::new(self)
    }

    /// Wrap a stored document (short keys) and run the `on_load` hook
    pub fn load(&self, raw: BsonDocument) -> Document {
        let mut document = Document::from_stored(self, &raw);
        if !raw.is_empty() {
            self.hooks.on_load(&mut document);
        }
        document
    }

    /// Build a document from a serde value; every field is validated
    pub fn from_struct<T: Serialize>(&self, value: &T) -> Result<Document> {
        Document::from_canonical(self, bson::to_document(value)?)
    }

    /// Build a document from relaxed or canonical extended JSON with canonical keys
    pub fn from_json(&self, json: &str) -> Result<Document> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let data = match Bson::try_from(value) {
            Ok(Bson::Document(data)) => data,
            Ok(other) => {
                return Err(OdmError::Deserialization(format!(
                    "expected a JSON object, got {}",
                    bsonform_schema::bson_type_name(&other)
                )))
            }
            Err(e) => return Err(OdmError::Deserialization(e.to_string())),
        };
        Document::from_canonical(self, data)
    }

    /// Resolve the collection documents of this model live in
    pub fn collection(&self) -> Result<Arc<dyn CollectionBackend>> {
        let database = self.schema.database().ok_or_else(|| {
            OdmError::Schema(format!("{} does not declare a database", self.name()))
        })?;
        let backend = self
            .manager
            .get_connection(self.schema.connection(), true)
            .ok_or_else(|| {
                OdmError::Connection(format!(
                    "no connection registered for {} (wanted '{}')",
                    self.name(),
                    self.schema
                        .connection()
                        .unwrap_or(crate::connection::DEFAULT_CONNECTION)
                ))
            })?;
        Ok(backend.collection(database, self.schema.collection()))
    }

    /// Rewrite canonical field names in a filter, sort or update into stored keys
    pub fn map_query(&self, query: &BsonDocument) -> BsonDocument {
        map_query(&self.schema, query)
    }

    /// Start a query over this model's collection
    pub fn find(&self, filter: BsonDocument) -> Query {
        Query::new(self.clone(), filter)
    }

    /// First document matching `filter`
    ///
    /// `Null` matches any document. Anything else that is not a document
    /// (an ObjectId, say) is taken as an `_id`.
    pub async fn find_one(&self, filter: impl Into<Bson>) -> Result<Option<Document>> {
        let filter = match filter.into() {
            Bson::Document(filter) => filter,
            Bson::Null => BsonDocument::new(),
            id => doc! { "_id": id },
        };
        self.find(filter).first().await
    }

    pub async fn get_by_id(&self, id: ObjectId) -> Result<Option<Document>> {
        self.find_one(id).await
    }

    /// Like [`Model::get_by_id`], but from a hex string; an invalid string finds nothing
    pub async fn get_by_id_str(&self, id: &str) -> Result<Option<Document>> {
        match ObjectId::parse_str(id) {
            Ok(id) => self.get_by_id(id).await,
            Err(_) => Ok(None),
        }
    }

    /// Apply an update to every matching document; returns the number modified
    pub async fn update(&self, filter: BsonDocument, update: BsonDocument) -> Result<u64> {
        let filter = self.map_query(&filter);
        let update = self.map_query(&update);
        let collection = self.collection()?;
        tracing::debug!(
            collection = collection.name(),
            filter = %filter,
            update = %update,
            "Updating documents"
        );
        collection.update_many(filter, update).await
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("schema", &self.schema.name())
            .field("collection", &self.schema.collection())
            .field("database", &self.schema.database())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;

    fn schema(database: bool) -> Arc<DocumentSchema> {
        let builder = DocumentSchema::builder("Thing").field("name", "str");
        let builder = if database { builder.database("test") } else { builder };
        builder.build().unwrap()
    }

    #[test]
    fn test_collection_requires_database() {
        let manager = Arc::new(ConnectionManager::new());
        manager.add_connection(Arc::new(MemoryBackend::new()), None);
        let model = Model::new(schema(false)).with_manager(manager);
        assert!(matches!(model.collection(), Err(OdmError::Schema(_))));
    }

    #[test]
    fn test_collection_requires_connection() {
        let model = Model::new(schema(true)).with_manager(Arc::new(ConnectionManager::new()));
        assert!(matches!(model.collection(), Err(OdmError::Connection(_))));
    }

    #[test]
    fn test_collection_resolves_default_connection() {
        let manager = Arc::new(ConnectionManager::new());
        manager.add_connection(Arc::new(MemoryBackend::new()), None);
        let model = Model::new(schema(true)).with_manager(manager);
        assert_eq!(model.collection().unwrap().name(), "thing");
    }

    #[test]
    fn test_on_load_skipped_for_empty_documents() {
        struct Mark;
        impl DocumentHooks for Mark {
            fn on_load(&self, doc: &mut Document) {
                doc.set("name", "loaded");
            }
        }

        let model = Model::new(schema(true)).with_hooks(Mark);
        assert!(!model.load(BsonDocument::new()).contains("name"));
        let loaded = model.load(doc! { "_id": ObjectId::new() });
        assert_eq!(loaded.get("name"), Some(&Bson::String("loaded".into())));
    }

    #[test]
    fn test_debug_names_schema() {
        let model = Model::new(schema(true));
        assert!(format!("{:?}", model).contains("Thing"));
    }
}
