//! SurrealDB integration for the job orchestration system.
//!
//! This crate provides database connectivity, repositories and a
//! [`SurrealStorage`] that implements the `job_core::Storage` contract.
//!
//! # Features
//!
//! - `memory` (default): Use in-memory storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod schema;
mod storage;
pub mod repositories;

pub use connection::{Database, DbConfig, DbError, connect};
pub use schema::init_schema;
pub use storage::SurrealStorage;

/// Open a storage backend with the given configuration.
///
/// Each call gets its own connection, so in-memory stores are isolated.
pub async fn init(config: DbConfig) -> Result<SurrealStorage, DbError> {
    SurrealStorage::connect(&config).await
}
