//! Job repository for CRUD operations.

use chrono::{DateTime, Utc};
use job_core::{Job, JobFilter, JobId, JobStats, JobStatus, JobType, Priority};
use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{Database, DbError};

/// Convert a timestamp into its stored integer form. Only dates between
/// 1677 and 2262 fit in i64 nanoseconds.
pub(crate) fn to_nanos(at: DateTime<Utc>) -> Result<i64, DbError> {
    at.timestamp_nanos_opt()
        .ok_or_else(|| DbError::Serialization(format!("timestamp {at} is out of range")))
}

pub(crate) fn from_nanos(nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(nanos)
}

pub(crate) fn parse_job_id(raw: &str) -> Result<JobId, DbError> {
    JobId::parse(raw).map_err(|e| DbError::Serialization(format!("bad job id {raw}: {e}")))
}

/// Stored shape of a job.
#[derive(Debug, Serialize, Deserialize)]
struct JobRecord {
    #[serde(default, skip_serializing)]
    id: Option<Thing>,
    job_id: String,
    name: String,
    job_type: JobType,
    priority: i32,
    status: JobStatus,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scheduled_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    start_after: Option<i64>,
    timeout_secs: u64,
    max_retries: u32,
    retry_count: u32,
    retry_delay_secs: u64,
    created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    started_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl TryFrom<&Job> for JobRecord {
    type Error = DbError;

    fn try_from(job: &Job) -> Result<Self, DbError> {
        Ok(Self {
            id: None,
            job_id: job.id.to_string(),
            name: job.name.clone(),
            job_type: job.job_type,
            priority: job.priority.value(),
            status: job.status,
            payload: job.payload.clone(),
            owner: job.owner.clone(),
            description: job.description.clone(),
            tags: job.tags.clone(),
            depends_on: job.depends_on.iter().map(ToString::to_string).collect(),
            scheduled_at: job.scheduled_at.map(to_nanos).transpose()?,
            start_after: job.start_after.map(to_nanos).transpose()?,
            timeout_secs: job.timeout_secs,
            max_retries: job.max_retries,
            retry_count: job.retry_count,
            retry_delay_secs: job.retry_delay_secs,
            created_at: to_nanos(job.created_at)?,
            started_at: job.started_at.map(to_nanos).transpose()?,
            completed_at: job.completed_at.map(to_nanos).transpose()?,
            duration_ms: job.duration_ms,
            exit_code: job.exit_code,
            output: job.output.clone(),
            error_message: job.error_message.clone(),
        })
    }
}

impl JobRecord {
    fn into_job(self) -> Result<Job, DbError> {
        let depends_on = self
            .depends_on
            .iter()
            .map(|raw| parse_job_id(raw))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Job {
            id: parse_job_id(&self.job_id)?,
            name: self.name,
            job_type: self.job_type,
            priority: Priority(self.priority),
            status: self.status,
            payload: self.payload,
            owner: self.owner,
            description: self.description,
            tags: self.tags,
            depends_on,
            scheduled_at: self.scheduled_at.map(from_nanos),
            start_after: self.start_after.map(from_nanos),
            timeout_secs: self.timeout_secs,
            max_retries: self.max_retries,
            retry_count: self.retry_count,
            retry_delay_secs: self.retry_delay_secs,
            created_at: from_nanos(self.created_at),
            started_at: self.started_at.map(from_nanos),
            completed_at: self.completed_at.map(from_nanos),
            duration_ms: self.duration_ms,
            exit_code: self.exit_code,
            output: self.output,
            error_message: self.error_message,
        })
    }
}

fn is_duplicate(err: &surrealdb::Error) -> bool {
    let msg = err.to_string();
    msg.contains("already exists") || msg.contains("already contains")
}

fn into_jobs(records: Vec<JobRecord>) -> Result<Vec<Job>, DbError> {
    records.into_iter().map(JobRecord::into_job).collect()
}

/// Build a WHERE clause and its bindings from a filter. Paging is left to
/// the caller.
type Bindings = Vec<(&'static str, serde_json::Value)>;

fn filter_clause(filter: &JobFilter) -> Result<(String, Bindings), DbError> {
    let mut conditions = Vec::new();
    let mut bindings: Bindings = Vec::new();

    if !filter.statuses.is_empty() {
        conditions.push("status IN $statuses");
        bindings.push(("statuses", serde_json::json!(filter.statuses)));
    }

    if !filter.job_types.is_empty() {
        conditions.push("job_type IN $job_types");
        bindings.push(("job_types", serde_json::json!(filter.job_types)));
    }

    if let Some(owner) = &filter.owner {
        conditions.push("owner = $owner");
        bindings.push(("owner", serde_json::json!(owner)));
    }

    if let Some(tag) = &filter.tag {
        conditions.push("tags CONTAINS $tag");
        bindings.push(("tag", serde_json::json!(tag)));
    }

    if let Some(after) = filter.created_after {
        conditions.push("created_at > $created_after");
        bindings.push(("created_after", serde_json::json!(to_nanos(after)?)));
    }

    if let Some(before) = filter.created_before {
        conditions.push("created_at < $created_before");
        bindings.push(("created_before", serde_json::json!(to_nanos(before)?)));
    }

    if let Some(priority) = filter.priority {
        conditions.push("priority = $priority");
        bindings.push(("priority", serde_json::json!(priority.value())));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    Ok((where_clause, bindings))
}

/// Repository for job persistence operations.
#[derive(Clone)]
pub struct JobRepository {
    db: Database,
}

impl JobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new job in the database.
    pub async fn create(&self, job: &Job) -> Result<Job, DbError> {
        let created: Result<Option<JobRecord>, surrealdb::Error> = self
            .db
            .create(("job", job.id.to_string()))
            .content(JobRecord::try_from(job)?)
            .await;

        match created {
            Ok(Some(record)) => record.into_job(),
            Ok(None) => Err(DbError::Query("Failed to create job".into())),
            Err(e) if is_duplicate(&e) => {
                Err(DbError::Duplicate(format!("Job {}", job.id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a job by ID.
    pub async fn get(&self, id: JobId) -> Result<Job, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))?
            .into_job()
    }

    /// Check whether a job exists.
    pub async fn exists(&self, id: JobId) -> Result<bool, DbError> {
        let record: Option<JobRecord> = self.db.select(("job", id.to_string())).await?;
        Ok(record.is_some())
    }

    /// Replace a stored job.
    pub async fn update(&self, job: &Job) -> Result<Job, DbError> {
        if !self.exists(job.id).await? {
            return Err(DbError::NotFound(format!("Job not found: {}", job.id)));
        }

        let record: Option<JobRecord> = self
            .db
            .update(("job", job.id.to_string()))
            .content(JobRecord::try_from(job)?)
            .await?;

        record
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", job.id)))?
            .into_job()
    }

    /// Update only a job's status.
    pub async fn update_status(&self, id: JobId, status: JobStatus) -> Result<(), DbError> {
        let mut response = self
            .db
            .query("UPDATE job SET status = $status WHERE job_id = $job_id RETURN AFTER")
            .bind(("status", status))
            .bind(("job_id", id.to_string()))
            .await?;

        let updated: Vec<JobRecord> = response.take(0)?;
        if updated.is_empty() {
            return Err(DbError::NotFound(format!("Job not found: {}", id)));
        }

        Ok(())
    }

    /// Delete a job.
    pub async fn delete(&self, id: JobId) -> Result<(), DbError> {
        let record: Option<JobRecord> = self.db.delete(("job", id.to_string())).await?;

        record
            .map(|_| ())
            .ok_or_else(|| DbError::NotFound(format!("Job not found: {}", id)))
    }

    /// List jobs with optional filtering, newest first.
    pub async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, DbError> {
        let (where_clause, bindings) = filter_clause(filter)?;

        let limit_clause = filter
            .limit
            .map(|l| format!("LIMIT {}", l))
            .unwrap_or_default();

        let offset_clause = filter
            .offset
            .map(|o| format!("START {}", o))
            .unwrap_or_default();

        let query = format!(
            "SELECT * FROM job {} ORDER BY created_at DESC {} {}",
            where_clause, limit_clause, offset_clause
        );

        let mut result = self.db.query(&query);

        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        let mut response = result.await?;
        let records: Vec<JobRecord> = response.take(0)?;

        into_jobs(records)
    }

    /// Get all jobs in a status, oldest first.
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<Job>, DbError> {
        let mut result = self
            .db
            .query("SELECT * FROM job WHERE status = $status ORDER BY created_at ASC")
            .bind(("status", status))
            .await?;

        let records: Vec<JobRecord> = result.take(0)?;

        into_jobs(records)
    }

    /// Count jobs by status, honouring the filter's predicates.
    pub async fn stats(&self, filter: &JobFilter) -> Result<JobStats, DbError> {
        let (where_clause, bindings) = filter_clause(filter)?;

        let query = format!(
            "SELECT status, count() AS count FROM job {} GROUP BY status",
            where_clause
        );

        let mut result = self.db.query(&query);
        for (name, value) in bindings {
            result = result.bind((name, value));
        }

        #[derive(Deserialize)]
        struct StatusCount {
            status: JobStatus,
            count: i64,
        }

        let mut response = result.await?;
        let counts: Vec<StatusCount> = response.take(0)?;

        let mut stats = JobStats::default();
        for count in counts {
            stats.record(count.status, count.count.max(0) as u64);
        }

        Ok(stats)
    }

    /// Ids of terminal jobs created before `cutoff`.
    pub async fn expired_ids(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, DbError> {
        let terminal: Vec<JobStatus> = JobStatus::ALL
            .into_iter()
            .filter(JobStatus::is_terminal)
            .collect();

        let mut result = self
            .db
            .query("SELECT VALUE job_id FROM job WHERE created_at < $cutoff AND status IN $terminal")
            .bind(("cutoff", to_nanos(cutoff)?))
            .bind(("terminal", terminal))
            .await?;

        Ok(result.take(0)?)
    }

    /// Delete every job whose id is listed.
    pub async fn delete_many(&self, ids: Vec<String>) -> Result<(), DbError> {
        self.db
            .query("DELETE job WHERE job_id IN $ids")
            .bind(("ids", ids))
            .await?
            .check()?;
        Ok(())
    }
}
