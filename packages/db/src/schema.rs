//! Database schema definitions using SurrealQL.

use crate::{Database, DbError};

/// Initialize the database schema.
///
/// This creates all necessary tables, fields, and indexes.
pub async fn init_schema(db: &Database) -> Result<(), DbError> {
    tracing::info!("Initializing database schema...");

    db.query(JOB_SCHEMA).await?.check()?;
    db.query(JOB_EVENT_SCHEMA).await?.check()?;

    tracing::info!("Database schema initialized");

    Ok(())
}

/// Job table schema. Timestamps are integer nanoseconds since the epoch.
const JOB_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job SCHEMALESS;

DEFINE FIELD IF NOT EXISTS job_id ON job TYPE string;
DEFINE FIELD IF NOT EXISTS name ON job TYPE string;
DEFINE FIELD IF NOT EXISTS job_type ON job TYPE string;
DEFINE FIELD IF NOT EXISTS status ON job TYPE string;
DEFINE FIELD IF NOT EXISTS priority ON job TYPE int;
DEFINE FIELD IF NOT EXISTS created_at ON job TYPE int;

-- Indexes for efficient job queries
DEFINE INDEX IF NOT EXISTS job_id_unique ON job FIELDS job_id UNIQUE;
DEFINE INDEX IF NOT EXISTS job_status ON job FIELDS status;
DEFINE INDEX IF NOT EXISTS job_type ON job FIELDS job_type;
DEFINE INDEX IF NOT EXISTS job_owner ON job FIELDS owner;
DEFINE INDEX IF NOT EXISTS job_created ON job FIELDS created_at;
"#;

/// Append-only audit log of job lifecycle events.
const JOB_EVENT_SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS job_event SCHEMALESS;

DEFINE FIELD IF NOT EXISTS event_id ON job_event TYPE string;
DEFINE FIELD IF NOT EXISTS job_id ON job_event TYPE string;
DEFINE FIELD IF NOT EXISTS event_type ON job_event TYPE string;
DEFINE FIELD IF NOT EXISTS timestamp ON job_event TYPE int;

DEFINE INDEX IF NOT EXISTS event_job ON job_event FIELDS job_id;
DEFINE INDEX IF NOT EXISTS event_job_time ON job_event FIELDS job_id, timestamp;
"#;
