//! Connection settings
//!
//! Serializable description of one MongoDB connection, loaded from JSON or
//! from the environment and turned into a registered [`Connection`].

use std::sync::Arc;
use std::time::Duration;

use bsonform_common::{OdmError, Result};
use serde::{Deserialize, Serialize};

use crate::connection::{Connection, ConnectionManager, PoolConfig, DEFAULT_CONNECTION};

/// Environment variable holding the connection string
pub const ENV_URI: &str = "BSONFORM_MONGODB_URI";
/// Environment variable holding the application name
pub const ENV_APP_NAME: &str = "BSONFORM_APP_NAME";
/// Environment variable holding the name to register the connection under
pub const ENV_CONNECTION_NAME: &str = "BSONFORM_CONNECTION_NAME";

fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Name to register under (`default` when absent)
    pub name: Option<String>,
    pub uri: String,
    pub app_name: Option<String>,
    pub min_pool_size: Option<u32>,
    pub max_pool_size: Option<u32>,
    pub max_idle_time_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub server_selection_timeout_ms: Option<u64>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        let millis = |d: Option<Duration>| d.map(|d| d.as_millis() as u64);
        Self {
            name: None,
            uri: default_uri(),
            app_name: pool.app_name,
            min_pool_size: pool.min_pool_size,
            max_pool_size: pool.max_pool_size,
            max_idle_time_ms: millis(pool.max_idle_time),
            connect_timeout_ms: millis(pool.connect_timeout),
            server_selection_timeout_ms: millis(pool.server_selection_timeout),
        }
    }
}

impl ConnectionSettings {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            OdmError::Deserialization(format!("invalid connection settings: {}", e))
        })
    }

    /// Defaults overridden by `BSONFORM_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();
        if let Some(uri) = lookup(ENV_URI) {
            settings.uri = uri;
        }
        if let Some(app_name) = lookup(ENV_APP_NAME) {
            settings.app_name = Some(app_name);
        }
        settings.name = lookup(ENV_CONNECTION_NAME);
        settings
    }

    pub fn connection_name(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_CONNECTION)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min_pool_size: self.min_pool_size,
            max_pool_size: self.max_pool_size,
            max_idle_time: self.max_idle_time_ms.map(Duration::from_millis),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
            server_selection_timeout: self
                .server_selection_timeout_ms
                .map(Duration::from_millis),
            app_name: self.app_name.clone(),
        }
    }

    /// Open a client; the server is not contacted until first use
    pub async fn connect(&self) -> Result<Connection> {
        Connection::with_config(&self.uri, self.pool_config()).await
    }

    /// Connect and register the connection with `manager`
    pub async fn register(&self, manager: &ConnectionManager) -> Result<Connection> {
        let connection = self.connect().await?;
        manager.add_connection(Arc::new(connection.clone()), self.name.as_deref());
        tracing::info!(name = self.connection_name(), "Registered MongoDB connection");
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_pool_config() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.uri, "mongodb://localhost:27017");
        assert_eq!(settings.connection_name(), "default");

        let pool = settings.pool_config();
        assert_eq!(pool.min_pool_size, Some(5));
        assert_eq!(pool.max_pool_size, Some(20));
        assert_eq!(pool.connect_timeout, Some(Duration::from_secs(10)));
        assert_eq!(pool.server_selection_timeout, Some(Duration::from_secs(30)));
        assert_eq!(pool.app_name.as_deref(), Some("bsonform"));
    }

    #[test]
    fn test_from_json_fills_missing_keys() {
        let settings = ConnectionSettings::from_json(
            r#"{"name": "reports", "uri": "mongodb://db:27017/reports", "max_pool_size": 50}"#,
        )
        .unwrap();
        assert_eq!(settings.connection_name(), "reports");
        assert_eq!(settings.max_pool_size, Some(50));
        assert_eq!(settings.min_pool_size, Some(5));

        let err = ConnectionSettings::from_json(r#"{"max_pool_size": "many"}"#).unwrap_err();
        assert!(matches!(err, OdmError::Deserialization(_)));
    }

    #[test]
    fn test_environment_overrides() {
        let settings = ConnectionSettings::from_lookup(|key| match key {
            ENV_URI => Some("mongodb://env:27017".to_string()),
            ENV_CONNECTION_NAME => Some("env".to_string()),
            _ => None,
        });
        assert_eq!(settings.uri, "mongodb://env:27017");
        assert_eq!(settings.connection_name(), "env");
        assert_eq!(settings.app_name.as_deref(), Some("bsonform"));
    }

    #[tokio::test]
    async fn test_register_adds_named_connection() {
        let manager = ConnectionManager::new();
        let settings = ConnectionSettings {
            name: Some("lazy".to_string()),
            ..ConnectionSettings::default()
        };
        settings.register(&manager).await.unwrap();
        assert_eq!(manager.names(), vec!["lazy".to_string()]);
    }
}
