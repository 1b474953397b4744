//! Driver abstraction
//!
//! Documents never talk to the `mongodb` crate directly. They go through a
//! [`DatabaseBackend`] registered with a
//! [`ConnectionManager`](crate::connection::ConnectionManager), which hands
//! out [`CollectionBackend`] handles. [`Connection`](crate::connection::Connection)
//! implements both traits over a live MongoDB client and
//! [`MemoryBackend`](crate::memory::MemoryBackend) keeps everything in process.

use std::sync::Arc;

use async_trait::async_trait;
use bson::Document as BsonDocument;
use bsonform_common::Result;
use futures::stream::BoxStream;

/// Stream of raw stored documents produced by a find
pub type RawDocumentStream = BoxStream<'static, Result<BsonDocument>>;

/// Options for [`CollectionBackend::find`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort specification (`{key: 1 | -1}`)
    pub sort: Option<BsonDocument>,
    /// Number of documents to skip
    pub skip: Option<u64>,
    /// Maximum number of documents to return
    pub limit: Option<i64>,
    /// Keys to include (`{key: 1}`)
    pub projection: Option<BsonDocument>,
}

/// A database server (or something pretending to be one)
pub trait DatabaseBackend: Send + Sync {
    /// Get a handle to `collection` in `database`
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionBackend>;
}

/// Operations documents need from a collection
#[async_trait]
pub trait CollectionBackend: Send + Sync {
    /// Name of the collection
    fn name(&self) -> &str;

    /// Apply `update` to the first document matching `filter` and return it
    /// as it is after the update. With `upsert`, a missing document is
    /// created from the filter's equality fields.
    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>>;

    /// Stream every document matching `filter`
    async fn find(&self, filter: BsonDocument, options: FindOptions) -> Result<RawDocumentStream>;

    /// Apply `update` to every matching document; returns the number modified
    async fn update_many(&self, filter: BsonDocument, update: BsonDocument) -> Result<u64>;

    /// Delete the first matching document; returns true if one was removed
    async fn delete_one(&self, filter: BsonDocument) -> Result<bool>;

    /// Create an index over `keys` unless it already exists
    async fn ensure_index(&self, keys: BsonDocument) -> Result<()>;
}
