//! Event repository for the append-only job audit log.

use std::collections::BTreeMap;

use job_core::{JobEvent, JobEventType, JobId, JobStatus};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;
use ulid::Ulid;

use super::job_repo::{from_nanos, parse_job_id, to_nanos};
use crate::{Database, DbError};

#[derive(Debug, Serialize, Deserialize)]
struct EventRecord {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    event_id: String,
    job_id: String,
    event_type: JobEventType,
    status: JobStatus,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: BTreeMap<String, serde_json::Value>,
    timestamp: i64,
}

impl TryFrom<&JobEvent> for EventRecord {
    type Error = DbError;

    fn try_from(event: &JobEvent) -> Result<Self, DbError> {
        Ok(Self {
            id: None,
            event_id: event.id.to_string(),
            job_id: event.job_id.to_string(),
            event_type: event.event_type,
            status: event.status,
            message: event.message.clone(),
            data: event.data.clone(),
            timestamp: to_nanos(event.timestamp)?,
        })
    }
}

impl EventRecord {
    fn into_event(self) -> Result<JobEvent, DbError> {
        let id = Ulid::from_string(&self.event_id)
            .map_err(|e| DbError::Serialization(format!("bad event id {}: {e}", self.event_id)))?;

        Ok(JobEvent {
            id,
            job_id: parse_job_id(&self.job_id)?,
            event_type: self.event_type,
            status: self.status,
            message: self.message,
            data: self.data,
            timestamp: from_nanos(self.timestamp),
        })
    }
}

/// Repository for job events.
#[derive(Clone)]
pub struct EventRepository {
    db: Database,
}

impl EventRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append an event.
    pub async fn create(&self, event: &JobEvent) -> Result<(), DbError> {
        let record: Option<EventRecord> = self
            .db
            .create(("job_event", event.id.to_string()))
            .content(EventRecord::try_from(event)?)
            .await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::Query("Failed to create job event".into()))
    }

    /// All events for a job in the order they happened.
    pub async fn list_for_job(&self, job_id: JobId) -> Result<Vec<JobEvent>, DbError> {
        let mut result = self
            .db
            .query(
                r#"
                SELECT * FROM job_event
                WHERE job_id = $job_id
                ORDER BY timestamp ASC, event_id ASC
                "#,
            )
            .bind(("job_id", job_id.to_string()))
            .await?;

        let records: Vec<EventRecord> = result.take(0)?;

        records.into_iter().map(EventRecord::into_event).collect()
    }

    /// Delete every event belonging to one of `job_ids`.
    pub async fn delete_for_jobs(&self, job_ids: Vec<String>) -> Result<(), DbError> {
        self.db
            .query("DELETE job_event WHERE job_id IN $job_ids")
            .bind(("job_ids", job_ids))
            .await?
            .check()?;
        Ok(())
    }
}
