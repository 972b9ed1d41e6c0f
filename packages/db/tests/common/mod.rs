use chrono::{DateTime, Utc};
use db::{DbConfig, DbError, SurrealStorage};
use job_core::{Job, JobType};
use serde_json::json;

/// Fresh in-memory store; every call gets its own datastore.
pub async fn setup_storage() -> Result<SurrealStorage, DbError> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    db::init(DbConfig::memory()).await
}

pub fn sample_job(name: &str) -> Job {
    Job::new(
        name,
        JobType::Ansible,
        json!({ "playbook": "site.yml", "inventory": "hosts.ini" }),
    )
}

pub fn job_created_at(name: &str, created_at: DateTime<Utc>) -> Job {
    let mut job = sample_job(name);
    job.created_at = created_at;
    job
}
