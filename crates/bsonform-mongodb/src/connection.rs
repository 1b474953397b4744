//! MongoDB connections and the connection registry

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Document as BsonDocument};
use bsonform_common::{OdmError, Result};
use futures::{StreamExt, TryStreamExt};
use mongodb::{
    options::{ClientOptions, ReturnDocument, ServerApi, ServerApiVersion},
    Client, Collection, Database, IndexModel,
};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::backend::{CollectionBackend, DatabaseBackend, FindOptions, RawDocumentStream};

/// Name connections are registered under when no name is given
pub const DEFAULT_CONNECTION: &str = "default";

/// Pool and timeout overrides applied on top of a parsed connection string
///
/// `None` leaves whatever the connection string (or the driver) chose.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    pub max_idle_time: Option<Duration>,
    pub connect_timeout: Option<Duration>,
    pub server_selection_timeout: Option<Duration>,
    /// Reported to the server in its logs
    pub app_name: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool_size: Some(5),
            max_pool_size: Some(20),
            max_idle_time: None,
            connect_timeout: Some(Duration::from_secs(10)),
            server_selection_timeout: Some(Duration::from_secs(30)),
            app_name: Some("bsonform".to_string()),
        }
    }
}

impl PoolConfig {
    fn apply(self, options: &mut ClientOptions) {
        options.min_pool_size = self.min_pool_size.or(options.min_pool_size);
        options.max_pool_size = self.max_pool_size.or(options.max_pool_size);
        options.max_idle_time = self.max_idle_time.or(options.max_idle_time);
        options.connect_timeout = self.connect_timeout.or(options.connect_timeout);
        options.server_selection_timeout = self
            .server_selection_timeout
            .or(options.server_selection_timeout);
        options.app_name = self.app_name.or_else(|| options.app_name.take());
        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
    }
}

/// Live MongoDB client
#[derive(Debug, Clone)]
pub struct Connection {
    client: Client,
    default_database: Option<Database>,
}

impl Connection {
    pub async fn new(uri: &str) -> Result<Self> {
        Self::with_config(uri, PoolConfig::default()).await
    }

    /// Parse `uri`, apply `config` and build a client
    pub async fn with_config(uri: &str, config: PoolConfig) -> Result<Self> {
        let mut options = ClientOptions::parse(uri).await?;
        config.apply(&mut options);
        let client = Client::with_options(options)?;
        let default_database = client.default_database();

        tracing::debug!(
            database = default_database.as_ref().map(|db| db.name()),
            "Created MongoDB client"
        );

        Ok(Self {
            client,
            default_database,
        })
    }

    /// Get a reference to the client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// The database named in the connection string, if any
    pub fn default_database(&self) -> Option<&Database> {
        self.default_database.as_ref()
    }

    /// Get an untyped collection handle
    pub fn get_collection(&self, database: &str, name: &str) -> Collection<BsonDocument> {
        self.client.database(database).collection(name)
    }

    /// Check if the connection is healthy by pinging the server
    pub async fn ping(&self) -> Result<bool> {
        let database = self
            .default_database
            .clone()
            .unwrap_or_else(|| self.client.database("admin"));
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => Ok(true),
            Err(e) => Err(OdmError::Connection(format!("Ping failed: {}", e))),
        }
    }

    /// List all database names on the server
    pub async fn list_database_names(&self) -> Result<Vec<String>> {
        let names = self.client.list_database_names().await?;
        Ok(names)
    }
}

impl DatabaseBackend for Connection {
    fn collection(&self, database: &str, collection: &str) -> Arc<dyn CollectionBackend> {
        Arc::new(MongoCollection {
            inner: self.get_collection(database, collection),
        })
    }
}

/// [`CollectionBackend`] over a driver collection
#[derive(Debug, Clone)]
pub struct MongoCollection {
    inner: Collection<BsonDocument>,
}

impl MongoCollection {
    pub fn new(inner: Collection<BsonDocument>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl CollectionBackend for MongoCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn find_one_and_update(
        &self,
        filter: BsonDocument,
        update: BsonDocument,
        upsert: bool,
    ) -> Result<Option<BsonDocument>> {
        let result = self
            .inner
            .find_one_and_update(filter, update)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await?;
        Ok(result)
    }

    async fn find(&self, filter: BsonDocument, options: FindOptions) -> Result<RawDocumentStream> {
        let mut action = self.inner.find(filter);
        if let Some(sort) = options.sort {
            action = action.sort(sort);
        }
        if let Some(skip) = options.skip {
            action = action.skip(skip);
        }
        if let Some(limit) = options.limit {
            action = action.limit(limit);
        }
        if let Some(projection) = options.projection {
            action = action.projection(projection);
        }
        let cursor = action.await?;
        Ok(cursor.map_err(OdmError::from).boxed())
    }

    async fn update_many(&self, filter: BsonDocument, update: BsonDocument) -> Result<u64> {
        let result = self.inner.update_many(filter, update).await?;
        Ok(result.modified_count)
    }

    async fn delete_one(&self, filter: BsonDocument) -> Result<bool> {
        let result = self.inner.delete_one(filter).await?;
        Ok(result.deleted_count > 0)
    }

    async fn ensure_index(&self, keys: BsonDocument) -> Result<()> {
        self.inner
            .create_index(IndexModel::builder().keys(keys).build())
            .await?;
        Ok(())
    }
}

static GLOBAL_MANAGER: Lazy<Arc<ConnectionManager>> =
    Lazy::new(|| Arc::new(ConnectionManager::new()));

/// Registry of named database backends
///
/// Models look their backend up here by the connection name in their schema,
/// falling back to [`DEFAULT_CONNECTION`].
#[derive(Default)]
pub struct ConnectionManager {
    connections: RwLock<HashMap<String, Arc<dyn DatabaseBackend>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide manager used by models unless they are given another one
    pub fn global() -> Arc<ConnectionManager> {
        Arc::clone(&GLOBAL_MANAGER)
    }

    /// Register `backend` under `name` (or the default name), replacing any previous one
    pub fn add_connection(&self, backend: Arc<dyn DatabaseBackend>, name: Option<&str>) {
        let name = name.unwrap_or(DEFAULT_CONNECTION);
        tracing::debug!(connection = name, "Registered connection");
        self.connections.write().insert(name.to_string(), backend);
    }

    /// Look up a connection
    ///
    /// `None` asks for the default connection. An unknown name resolves to
    /// the default connection when `default_if_none` is set.
    pub fn get_connection(
        &self,
        name: Option<&str>,
        default_if_none: bool,
    ) -> Option<Arc<dyn DatabaseBackend>> {
        let connections = self.connections.read();
        let name = name.unwrap_or(DEFAULT_CONNECTION);
        if let Some(backend) = connections.get(name) {
            return Some(Arc::clone(backend));
        }
        if default_if_none && name != DEFAULT_CONNECTION {
            let fallback = connections.get(DEFAULT_CONNECTION).cloned();
            if fallback.is_some() {
                tracing::warn!(
                    connection = name,
                    "Connection not registered, using the default connection"
                );
            }
            return fallback;
        }
        None
    }

    /// Unregister a connection, returning it
    pub fn remove_connection(&self, name: Option<&str>) -> Option<Arc<dyn DatabaseBackend>> {
        self.connections
            .write()
            .remove(name.unwrap_or(DEFAULT_CONNECTION))
    }

    /// Registered connection names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("connections", &self.names())
            .finish()
    }
}
