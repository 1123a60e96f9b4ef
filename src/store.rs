//! Redis-backed persistence: fingerprint hashes, job records and the
//! task records that guard against duplicate submissions.
//!
//! Key layout:
//! - `<canonicalUrlKey>` — hash of `timestamp -> base64 simhash`, plus
//!   optional `year -> "-1"` proof-of-absence sentinels
//! - `<jobId>` — `"STATUS|url|year"`, 1 hour TTL
//! - `taskstatus:<canonicalUrlKey>:<year>` — JSON task record

use crate::settings::Settings;
use crate::urlkey::{canonical_key, KeyError};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Identifies this pipeline in task records.
pub const TASK_TYPE: &str = "discover";

/// Field value proving a year has no captures.
pub const NO_CAPTURES_SENTINEL: &str = "-1";

/// Job records outlive their job by an hour at most.
pub const JOB_TTL_SECS: u64 = 3600;

const DIAL_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("malformed job record for {0}")]
    MalformedJob(String),
    #[error("malformed task record: {0}")]
    MalformedTask(#[from] serde_json::Error),
}

/// Lifecycle states shared by job and task records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Success,
    Failed,
    /// Undecodable payload; semantically `Failed`, kept distinct for
    /// observability.
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Idempotence guard stored per `(url, year)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_type: String,
    pub status: String,
    pub description: String,
    pub id: String,
}

/// Decoded `"STATUS|url|year"` job record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub status: String,
    pub url: String,
    pub year: String,
}

/// Parse a pipe-delimited job record. The URL may itself contain pipes,
/// so split at the first and last delimiter only.
pub fn parse_job_record(raw: &str) -> Option<JobRecord> {
    let first = raw.find('|')?;
    let last = raw.rfind('|')?;
    if first == last {
        return None;
    }
    Some(JobRecord {
        status: raw[..first].to_string(),
        url: raw[first + 1..last].to_string(),
        year: raw[last + 1..].to_string(),
    })
}

#[derive(Clone)]
pub struct Store {
    conn: ConnectionManager,
    expire_after: i64,
}

impl Store {
    pub async fn connect(settings: &Settings) -> Result<Self, StoreError> {
        let client = Client::open(settings.redis.url.as_str())?;
        let config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(DIAL_TIMEOUT_SECS))
            .set_response_timeout(Duration::from_secs(settings.redis.socket_timeout));
        let conn = ConnectionManager::new_with_config(client, config).await?;
        Ok(Self {
            conn,
            expire_after: settings.simhash.expire_after,
        })
    }

    /// Shared handle for collaborators that talk to the same Redis (the
    /// job queue).
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    /// Upsert many `timestamp -> encoded hash` fields and refresh the TTL.
    /// A failed TTL refresh leaves the write durable and is only logged.
    pub async fn put_all(&self, url: &str, entries: &[(String, String)]) -> Result<(), StoreError> {
        if entries.is_empty() {
            return Ok(());
        }
        let key = canonical_key(url)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset_multiple(&key, entries).await?;
        self.refresh_ttl(&key).await;
        Ok(())
    }

    /// Record the proof that `year` has no captures for this URL.
    pub async fn put_sentinel(&self, url: &str, year: &str) -> Result<(), StoreError> {
        let key = canonical_key(url)?;
        let mut conn = self.conn.clone();
        let _: () = conn.hset(&key, year, NO_CAPTURES_SENTINEL).await?;
        self.refresh_ttl(&key).await;
        Ok(())
    }

    async fn refresh_ttl(&self, key: &str) {
        let mut conn = self.conn.clone();
        let refreshed: Result<bool, redis::RedisError> = conn.expire(key, self.expire_after).await;
        if let Err(err) = refreshed {
            warn!(key, error = %err, "could not refresh fingerprint TTL");
        }
    }

    /// All field names (timestamps and year sentinels) stored for a URL.
    pub async fn list_timestamps(&self, url: &str) -> Result<Vec<String>, StoreError> {
        let key = canonical_key(url)?;
        let mut conn = self.conn.clone();
        Ok(conn.hkeys(&key).await?)
    }

    /// Fetch many fields at once; missing fields come back as `None`.
    pub async fn get_many(
        &self,
        url: &str,
        timestamps: &[String],
    ) -> Result<Vec<Option<String>>, StoreError> {
        if timestamps.is_empty() {
            return Ok(Vec::new());
        }
        let key = canonical_key(url)?;
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&key)
            .arg(timestamps)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    pub async fn get_one(&self, url: &str, timestamp: &str) -> Result<Option<String>, StoreError> {
        let key = canonical_key(url)?;
        let mut conn = self.conn.clone();
        Ok(conn.hget(&key, timestamp).await?)
    }

    pub async fn set_job(
        &self,
        job_id: &str,
        url: &str,
        year: &str,
        status: JobStatus,
    ) -> Result<(), StoreError> {
        let record = format!("{}|{}|{}", status, url, year);
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(job_id, record, JOB_TTL_SECS).await?;
        Ok(())
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(job_id).await?;
        match raw {
            Some(raw) => parse_job_record(&raw)
                .map(Some)
                .ok_or_else(|| StoreError::MalformedJob(job_id.to_string())),
            None => Ok(None),
        }
    }

    fn task_key(url: &str, year: &str) -> Result<String, KeyError> {
        Ok(format!("taskstatus:{}:{}", canonical_key(url)?, year))
    }

    pub async fn set_task(
        &self,
        url: &str,
        year: &str,
        status: JobStatus,
        description: &str,
        id: &str,
    ) -> Result<(), StoreError> {
        let key = Self::task_key(url, year)?;
        let record = TaskStatus {
            task_type: TASK_TYPE.to_string(),
            status: status.as_str().to_string(),
            description: description.to_string(),
            id: id.to_string(),
        };
        let body = serde_json::to_string(&record)?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&key, body, self.expire_after.max(1) as u64)
            .await?;
        Ok(())
    }

    pub async fn get_task(&self, url: &str, year: &str) -> Result<Option<TaskStatus>, StoreError> {
        let key = Self::task_key(url, year)?;
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_record() {
        let record = parse_job_record("PENDING|http://example.com|2014").unwrap();
        assert_eq!(record.status, "PENDING");
        assert_eq!(record.url, "http://example.com");
        assert_eq!(record.year, "2014");
    }

    #[test]
    fn test_parse_job_record_url_with_pipe() {
        let record = parse_job_record("SUCCESS|http://example.com/a|b|2016").unwrap();
        assert_eq!(record.status, "SUCCESS");
        assert_eq!(record.url, "http://example.com/a|b");
        assert_eq!(record.year, "2016");
    }

    #[test]
    fn test_parse_job_record_rejects_malformed() {
        assert!(parse_job_record("PENDING").is_none());
        assert!(parse_job_record("PENDING|only-one").is_none());
        assert!(parse_job_record("").is_none());
    }

    #[test]
    fn test_task_key_shape() {
        assert_eq!(
            Store::task_key("https://example.com/", "2014").unwrap(),
            "taskstatus:com,example)/:2014"
        );
        assert_eq!(
            Store::task_key("example.com", "2014").unwrap(),
            "taskstatus:com,example)/:2014"
        );
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(JobStatus::Pending.to_string(), "PENDING");
        assert_eq!(JobStatus::Success.to_string(), "SUCCESS");
        assert_eq!(JobStatus::Failed.to_string(), "FAILED");
        assert_eq!(JobStatus::Error.to_string(), "ERROR");
    }

    #[test]
    fn test_task_record_json_shape() {
        let record = TaskStatus {
            task_type: TASK_TYPE.to_string(),
            status: "PENDING".to_string(),
            description: "Started the task".to_string(),
            id: "0b9e2a1f".to_string(),
        };
        let body = serde_json::to_string(&record).unwrap();
        assert!(body.contains("\"task_type\":\"discover\""));
        let parsed: TaskStatus = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed, record);
    }
}
