//! Redis-backed job queue.
//!
//! Submissions `LPUSH` a JSON payload; the worker loop `BRPOP`s with a
//! short timeout so it can observe shutdown, and runs each job in its own
//! task behind a concurrency semaphore.

use crate::discover::{Discover, JobPayload};
use crate::metrics::Metrics;
use crate::store::{JobStatus, Store, StoreError};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const QUEUE_KEY: &str = "wayback_discover_diff:queue";
const POP_TIMEOUT_SECS: f64 = 1.0;
const DRAIN_TIMEOUT_SECS: u64 = 30;
const RETRY_BACKOFF_SECS: u64 = 1;

#[derive(Clone)]
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    pub async fn enqueue(&self, payload: &JobPayload) -> Result<(), StoreError> {
        let body = serde_json::to_string(payload)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(QUEUE_KEY, body).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = conn.brpop(QUEUE_KEY, POP_TIMEOUT_SECS).await?;
        Ok(popped.map(|(_, body)| body))
    }
}

/// Consume jobs until shutdown, then wait briefly for in-flight jobs.
///
/// A job interrupted by process exit leaves its task record `PENDING` to
/// expire on its own rather than being marked failed.
pub async fn run_worker(
    queue: JobQueue,
    discover: Arc<Discover>,
    store: Store,
    metrics: Metrics,
    concurrency: usize,
    shutdown: CancellationToken,
) {
    let concurrency = concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));
    info!(concurrency, "queue worker started");

    loop {
        let popped = tokio::select! {
            _ = shutdown.cancelled() => break,
            popped = queue.pop() => popped,
        };

        let body = match popped {
            Ok(Some(body)) => body,
            Ok(None) => continue,
            Err(err) => {
                error!(error = %err, "queue pop failed");
                tokio::time::sleep(Duration::from_secs(RETRY_BACKOFF_SECS)).await;
                continue;
            }
        };

        let payload: JobPayload = match serde_json::from_str(&body) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "dropping undecodable job payload");
                metrics.incr("invalid-job-payload");
                mark_payload_error(&store, &body).await;
                continue;
            }
        };

        let permit = match permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            // The semaphore is never closed; treat a close as shutdown.
            Err(_) => break,
        };
        let discover = discover.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(err) = discover.run_job(&payload).await {
                warn!(job_id = %payload.job_id, url = %payload.url, error = %err, "discover job failed");
            }
        });
    }

    info!("queue worker draining in-flight jobs");
    let drained = tokio::time::timeout(Duration::from_secs(DRAIN_TIMEOUT_SECS), async {
        let _ = permits.acquire_many(concurrency as u32).await;
    })
    .await;
    if drained.is_err() {
        warn!("in-flight jobs still running at shutdown");
    }
    info!("queue worker stopped");
}

/// Best-effort `ERROR` job record for a payload that failed to decode,
/// when enough of the blob is readable to recover its ids.
async fn mark_payload_error(store: &Store, body: &str) {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return;
    };
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let job_id = field("job_id");
    if job_id.is_empty() {
        return;
    }
    if let Err(err) = store
        .set_job(&job_id, &field("url"), &field("year"), JobStatus::Error)
        .await
    {
        error!(job_id = %job_id, error = %err, "could not record payload error");
    }
}
