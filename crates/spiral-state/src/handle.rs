//! SurrealDB Handle - Connection and Key/Value Operations
//!
//! `SurrealKvStore` implements [`KvStore`] and [`LeaseStore`] on top of
//! `surrealdb::engine::any`, so the same code serves three deployments:
//! - `mem://` for tests and ephemeral runs
//! - `surrealkv://<path>` for the embedded on-disk default
//! - `ws://` / `wss://` for a shared, networked backend

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::error::StorageError;
use crate::migrations;
use crate::storage_traits::{validate_key, KvStore, LeaseStore, StorageResult};

/// Default namespace for Spiral Memory data.
pub const DEFAULT_NAMESPACE: &str = "spiral";
/// Default database for Spiral Memory data.
pub const DEFAULT_DATABASE: &str = "memory";

/// Configuration for a networked SurrealDB connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// WebSocket endpoint URL (e.g., "wss://xxx.aws-use1.surrealdb.cloud")
    pub endpoint: String,
    /// Database username
    pub username: String,
    /// Database password
    pub password: String,
    /// Namespace (default: "spiral")
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Database name (default: "memory")
    #[serde(default = "default_database")]
    pub database: String,
    /// Whether this is a root user (true) or database user (false)
    #[serde(default)]
    pub is_root: bool,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_database() -> String {
    DEFAULT_DATABASE.to_string()
}

impl RemoteConfig {
    /// Create a new remote configuration for a database user
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: default_namespace(),
            database: default_database(),
            is_root: false,
        }
    }

    /// Set custom namespace
    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.namespace = ns.into();
        self
    }

    /// Set custom database
    pub fn with_database(mut self, db: impl Into<String>) -> Self {
        self.database = db.into();
        self
    }

    /// Set whether this is a root user
    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "spiral")
    /// - SURREALDB_DATABASE (optional, default: "memory")
    /// - SURREALDB_ROOT (optional, default: "false") - set to "true" for root users
    pub fn from_env() -> std::result::Result<Self, String> {
        let endpoint =
            std::env::var("SURREALDB_ENDPOINT").map_err(|_| "SURREALDB_ENDPOINT not set")?;
        let username =
            std::env::var("SURREALDB_USERNAME").map_err(|_| "SURREALDB_USERNAME not set")?;
        let password =
            std::env::var("SURREALDB_PASSWORD").map_err(|_| "SURREALDB_PASSWORD not set")?;
        let namespace = std::env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| default_namespace());
        let database = std::env::var("SURREALDB_DATABASE").unwrap_or_else(|_| default_database());
        let is_root = std::env::var("SURREALDB_ROOT")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        Ok(Self {
            endpoint,
            username,
            password,
            namespace,
            database,
            is_root,
        })
    }
}

#[derive(Debug, Deserialize)]
struct PayloadRow {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct KeyRow {
    key: String,
}

#[derive(Debug, Deserialize)]
struct LeaseRow {
    holder: String,
    expires_at_ms: i64,
}

/// SurrealDB-backed implementation of [`KvStore`] and [`LeaseStore`].
#[derive(Clone)]
pub struct SurrealKvStore {
    db: Surreal<Any>,
}

impl SurrealKvStore {
    /// Connect to an in-memory SurrealDB instance and set up schema.
    #[instrument]
    pub async fn connect_memory() -> StorageResult<Self> {
        info!("Connecting to SurrealDB (in-memory)");
        Self::connect_url("mem://").await
    }

    /// Open (or create) an embedded on-disk store under `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect_embedded(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path).map_err(|e| {
            StorageError::Connection(format!(
                "Failed to create database directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let url = format!("surrealkv://{}", path.display());
        info!("Using embedded persistence: {}", url);
        Self::connect_url(&url).await
    }

    /// Connect to any URL understood by `surrealdb::engine::any`, without
    /// authentication, using the default namespace and database.
    pub async fn connect_url(url: &str) -> StorageResult<Self> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns(DEFAULT_NAMESPACE)
            .use_db(DEFAULT_DATABASE)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let store = SurrealKvStore { db };
        store.init().await?;
        Ok(store)
    }

    /// Connect to a networked SurrealDB instance
    ///
    /// # Example
    /// ```ignore
    /// let config = RemoteConfig::new(
    ///     "wss://xxx.aws-use1.surrealdb.cloud",
    ///     "your_username",
    ///     "your_password",
    /// );
    /// let store = SurrealKvStore::connect_remote(&config).await?;
    /// ```
    #[instrument(skip(config), fields(endpoint = %config.endpoint, namespace = %config.namespace, database = %config.database))]
    pub async fn connect_remote(config: &RemoteConfig) -> StorageResult<Self> {
        info!("Connecting to remote SurrealDB (root={})", config.is_root);

        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| {
                StorageError::Connection(format!(
                    "Failed to connect to {}: {}",
                    config.endpoint, e
                ))
            })?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StorageError::Connection(format!("Root authentication failed: {}", e)))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Database authentication failed: {}", e))
            })?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| {
                StorageError::Connection(format!("Failed to select namespace/database: {}", e))
            })?;

        let store = SurrealKvStore { db };
        store.init().await?;

        info!("Remote SurrealDB connected and schema initialized");
        Ok(store)
    }

    /// Connect using environment variables
    ///
    /// If SURREALDB_ENDPOINT is set, connects to that remote instance.
    /// If SURREALDB_URL is set, connects to that URL.
    /// Otherwise, falls back to in-memory.
    #[instrument]
    pub async fn from_env() -> StorageResult<Self> {
        if let Ok(config) = RemoteConfig::from_env() {
            info!("Remote config found");
            return Self::connect_remote(&config).await;
        }

        if let Ok(url) = std::env::var("SURREALDB_URL") {
            info!("SURREALDB_URL found, connecting to {}", url);
            return Self::connect_url(&url).await;
        }

        info!("No remote config found, using in-memory database");
        Self::connect_memory().await
    }
}

#[async_trait]
impl KvStore for SurrealKvStore {
    async fn init(&self) -> StorageResult<()> {
        migrations::init_schema(&self.db).await
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        validate_key(key)?;

        let mut result = self
            .db
            .query("SELECT payload FROM type::thing('kv', $key)")
            .bind(("key", key.to_string()))
            .await?;

        let rows: Vec<PayloadRow> = result.take(0)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(serde_json::from_str(&row.payload)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> StorageResult<()> {
        validate_key(key)?;
        debug!("Writing snapshot");

        let payload = serde_json::to_string(&value)?;
        self.db
            .query(
                "UPSERT type::thing('kv', $key) CONTENT \
                 { key: $key, payload: $payload, updated_at: time::now() }",
            )
            .bind(("key", key.to_string()))
            .bind(("payload", payload))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        validate_key(key)?;

        self.db
            .query("DELETE type::thing('kv', $key)")
            .bind(("key", key.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut result = self
            .db
            .query("SELECT key FROM kv WHERE string::starts_with(key, $prefix) ORDER BY key")
            .bind(("prefix", prefix.to_string()))
            .await?;

        let rows: Vec<KeyRow> = result.take(0)?;
        Ok(rows.into_iter().map(|r| r.key).collect())
    }
}

#[async_trait]
impl LeaseStore for SurrealKvStore {
    #[instrument(skip(self, ttl), fields(ttl_ms = ttl.as_millis() as u64))]
    async fn try_acquire(&self, key: &str, holder: &str, ttl: Duration) -> StorageResult<bool> {
        validate_key(key)?;

        let now = Utc::now().timestamp_millis();
        let expires = now + ttl.as_millis() as i64;

        // Compare-and-set inside one transaction so two contenders cannot
        // both observe the lease as free.
        self.db
            .query(
                r#"
                BEGIN TRANSACTION;
                LET $current = (SELECT holder, expires_at_ms FROM type::thing('lease', $key))[0];
                IF $current = NONE OR $current.holder = $holder OR $current.expires_at_ms <= $now {
                    UPSERT type::thing('lease', $key)
                        CONTENT { key: $key, holder: $holder, expires_at_ms: $expires };
                };
                COMMIT TRANSACTION;
                "#,
            )
            .bind(("key", key.to_string()))
            .bind(("holder", holder.to_string()))
            .bind(("now", now))
            .bind(("expires", expires))
            .await?
            .check()?;

        let mut result = self
            .db
            .query("SELECT holder, expires_at_ms FROM type::thing('lease', $key)")
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<LeaseRow> = result.take(0)?;

        Ok(rows
            .into_iter()
            .next()
            .is_some_and(|row| row.holder == holder && row.expires_at_ms == expires))
    }

    #[instrument(skip(self))]
    async fn release(&self, key: &str, holder: &str) -> StorageResult<()> {
        validate_key(key)?;

        self.db
            .query("DELETE type::thing('lease', $key) WHERE holder = $holder")
            .bind(("key", key.to_string()))
            .bind(("holder", holder.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn holder(&self, key: &str) -> StorageResult<Option<String>> {
        validate_key(key)?;

        let mut result = self
            .db
            .query("SELECT holder, expires_at_ms FROM type::thing('lease', $key)")
            .bind(("key", key.to_string()))
            .await?;
        let rows: Vec<LeaseRow> = result.take(0)?;

        let now = Utc::now().timestamp_millis();
        Ok(rows
            .into_iter()
            .next()
            .filter(|row| row.expires_at_ms > now)
            .map(|row| row.holder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_surreal_connection_and_schema_creation() {
        let store = SurrealKvStore::connect_memory().await;
        assert!(store.is_ok(), "Failed to connect: {:?}", store.err());
    }

    #[tokio::test]
    async fn test_schema_init_is_idempotent() {
        let store = SurrealKvStore::connect_memory().await.unwrap();
        store.init().await.unwrap();
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = SurrealKvStore::connect_memory().await.unwrap();

        let node = json!({
            "id": "n-1",
            "content": "remember the milk",
            "tier": "shallow",
            "associations": ["n-2"]
        });
        store.set("mem:n-1", node.clone()).await.unwrap();

        let loaded = store.get("mem:n-1").await.unwrap();
        assert_eq!(loaded, Some(node));
    }

    #[tokio::test]
    async fn test_set_overwrites_existing_key() {
        let store = SurrealKvStore::connect_memory().await.unwrap();
        store.set("spiral:p-1", json!({"node_count": 1})).await.unwrap();
        store.set("spiral:p-1", json!({"node_count": 2})).await.unwrap();

        let loaded = store.get("spiral:p-1").await.unwrap().unwrap();
        assert_eq!(loaded["node_count"], 2);
        assert_eq!(store.keys("spiral:").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_and_prefix_listing() {
        let store = SurrealKvStore::connect_memory().await.unwrap();
        store.set("mem:a", json!(1)).await.unwrap();
        store.set("mem:b", json!(2)).await.unwrap();
        store.set("sigil:x", json!(3)).await.unwrap();

        store.delete("mem:a").await.unwrap();
        store.delete("mem:missing").await.unwrap();

        assert_eq!(store.keys("mem:").await.unwrap(), vec!["mem:b".to_string()]);
        assert_eq!(store.keys("sigil:").await.unwrap(), vec!["sigil:x".to_string()]);
        assert!(store.get("mem:a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_is_exclusive_and_renewable() {
        let store = SurrealKvStore::connect_memory().await.unwrap();
        let ttl = Duration::from_secs(30);

        assert!(store.try_acquire("gc-lease:1", "a", ttl).await.unwrap());
        assert!(!store.try_acquire("gc-lease:1", "b", ttl).await.unwrap());
        assert!(store.try_acquire("gc-lease:1", "a", ttl).await.unwrap());
        assert_eq!(
            store.holder("gc-lease:1").await.unwrap(),
            Some("a".to_string())
        );

        store.release("gc-lease:1", "b").await.unwrap();
        assert_eq!(
            store.holder("gc-lease:1").await.unwrap(),
            Some("a".to_string())
        );

        store.release("gc-lease:1", "a").await.unwrap();
        assert!(store.try_acquire("gc-lease:1", "b", ttl).await.unwrap());
    }
}
