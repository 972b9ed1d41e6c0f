//! Database connection management.

use job_core::StorageError;
use surrealdb::Surreal;
use surrealdb::engine::any::{Any, connect as connect_any};
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "file://path" or "rocksdb://path"
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "jobs".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for file-based persistence.
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("file://{}", path.into()),
            ..Default::default()
        }
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Read `SURREAL_ENDPOINT`, `SURREAL_NS`, `SURREAL_DB`, `SURREAL_USER`
    /// and `SURREAL_PASS`, falling back to the in-memory defaults.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(endpoint) = env_var("SURREAL_ENDPOINT") {
            cfg.endpoint = endpoint;
        }
        if let Some(ns) = env_var("SURREAL_NS") {
            cfg.namespace = ns;
        }
        if let Some(db) = env_var("SURREAL_DB") {
            cfg.database = db;
        }
        if let (Some(user), Some(pass)) = (env_var("SURREAL_USER"), env_var("SURREAL_PASS")) {
            cfg.credentials = Some((user, pass));
        }
        cfg
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    Duplicate(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<DbError> for StorageError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => StorageError::NotFound(what),
            DbError::Duplicate(what) => StorageError::Duplicate(what),
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Open a connection and select the configured namespace and database.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = connect_any(config.endpoint.as_str()).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace).use_db(&config.database).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
