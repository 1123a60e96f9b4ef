//! The discover pipeline: resolve the snapshots of a `(url, year)` pair,
//! fan them out to concurrent fetch+fingerprint workers and persist the
//! resulting `timestamp -> simhash` map.
//!
//! Fan-out is the channel pattern: one rendezvous input channel feeds N
//! workers, a single result channel feeds the aggregator, and the input
//! side closing drains everything cleanly. All job state (dedup cache,
//! download-error counter) lives inside one job and is discarded with it.

use crate::cdx::{CaptureClient, CdxError, Snapshot};
use crate::features::extract_html_features;
use crate::metrics::Metrics;
use crate::settings::Settings;
use crate::simhash::{SimhashEngine, SimhashError, TokenHasher};
use crate::store::{JobStatus, Store, StoreError};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Once this many downloads have failed, remaining snapshots are dropped.
/// Soft breaker: in-flight workers finish what they started.
pub const MAX_DOWNLOAD_ERRORS: usize = 10;

/// What the queue carries for one fingerprinting job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPayload {
    pub url: String,
    pub year: String,
    pub job_id: String,
}

#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("no captures of {url} in {year}")]
    NoCaptures { url: String, year: String },
    #[error(transparent)]
    Cdx(#[from] CdxError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Simhash(#[from] SimhashError),
    #[error("no snapshot could be fingerprinted")]
    NothingFingerprinted,
}

/// Executes discover jobs. Holds only immutable configuration and shared
/// clients; per-job state is created in [`Discover::run_job`].
pub struct Discover {
    engine: SimhashEngine,
    client: CaptureClient,
    store: Store,
    metrics: Metrics,
    threads: usize,
}

impl Discover {
    pub fn new(settings: &Settings, store: Store, metrics: Metrics) -> Result<Self, DiscoverError> {
        let engine = SimhashEngine::new(settings.simhash.size, TokenHasher::Blake2)?;
        let client = CaptureClient::new(
            settings.snapshots.number_per_year,
            settings.cdx_auth_token.as_deref(),
        )?;
        Ok(Self {
            engine,
            client,
            store,
            metrics,
            threads: settings.threads,
        })
    }

    /// Run one job to a terminal state. The task record is written
    /// `PENDING` before any fingerprint write and `SUCCESS`/`FAILED`
    /// strictly after the bulk upsert.
    pub async fn run_job(&self, payload: &JobPayload) -> Result<usize, DiscoverError> {
        let started = Instant::now();
        info!(url = %payload.url, year = %payload.year, job_id = %payload.job_id, "starting discover job");

        self.store
            .set_task(
                &payload.url,
                &payload.year,
                JobStatus::Pending,
                &format!("Fetching captures for {}", payload.year),
                &payload.job_id,
            )
            .await?;

        let snapshots = match self.client.list_snapshots(&payload.url, &payload.year).await {
            Ok(snapshots) => snapshots,
            Err(CdxError::NoCaptures) => {
                if let Err(err) = self.store.put_sentinel(&payload.url, &payload.year).await {
                    self.finish(payload, JobStatus::Failed, "cannot persist fingerprints")
                        .await;
                    return Err(err.into());
                }
                self.finish(payload, JobStatus::Failed, "no captures found for this year")
                    .await;
                return Err(DiscoverError::NoCaptures {
                    url: payload.url.clone(),
                    year: payload.year.clone(),
                });
            }
            Err(err) => {
                self.finish(payload, JobStatus::Failed, "cannot fetch the capture index")
                    .await;
                return Err(err.into());
            }
        };

        debug!(count = snapshots.len(), "resolved snapshots");
        let fingerprints = self.fingerprint_snapshots(&payload.url, snapshots).await;
        if fingerprints.is_empty() {
            self.finish(payload, JobStatus::Failed, "no snapshot could be fingerprinted")
                .await;
            return Err(DiscoverError::NothingFingerprinted);
        }

        let entries: Vec<(String, String)> = fingerprints.into_iter().collect();
        let count = entries.len();
        if let Err(err) = self.store.put_all(&payload.url, &entries).await {
            self.finish(payload, JobStatus::Failed, "cannot persist fingerprints")
                .await;
            return Err(err.into());
        }

        let elapsed = started.elapsed();
        self.metrics.timing("discover-duration", elapsed);
        self.finish(
            payload,
            JobStatus::Success,
            &format!("Completed in {}ms", elapsed.as_millis()),
        )
        .await;
        info!(url = %payload.url, year = %payload.year, count, "discover job finished");
        Ok(count)
    }

    /// Write the terminal task and job records; failures here are logged
    /// rather than surfaced so they cannot mask the job outcome.
    async fn finish(&self, payload: &JobPayload, status: JobStatus, description: &str) {
        if let Err(err) = self
            .store
            .set_task(&payload.url, &payload.year, status, description, &payload.job_id)
            .await
        {
            error!(job_id = %payload.job_id, error = %err, "could not write terminal task record");
        }
        if let Err(err) = self
            .store
            .set_job(&payload.job_id, &payload.url, &payload.year, status)
            .await
        {
            error!(job_id = %payload.job_id, error = %err, "could not write terminal job record");
        }
    }

    /// Fan the snapshots out to `threads` workers and aggregate whatever
    /// fingerprinted successfully. Failed or skipped snapshots simply
    /// produce no entry.
    async fn fingerprint_snapshots(
        &self,
        url: &str,
        snapshots: Vec<Snapshot>,
    ) -> HashMap<String, String> {
        let (capture_tx, capture_rx) = flume::bounded::<Snapshot>(0);
        let (result_tx, result_rx) = flume::unbounded::<(String, String)>();
        let download_errors = Arc::new(AtomicUsize::new(0));
        let seen: Arc<DashMap<String, String>> = Arc::new(DashMap::new());

        let mut workers = JoinSet::new();
        for _ in 0..self.threads.max(1) {
            let capture_rx = capture_rx.clone();
            let result_tx = result_tx.clone();
            let client = self.client.clone();
            let engine = self.engine.clone();
            let metrics = self.metrics.clone();
            let download_errors = download_errors.clone();
            let seen = seen.clone();
            let url = url.to_string();

            workers.spawn(async move {
                while let Ok(snapshot) = capture_rx.recv_async().await {
                    if download_errors.load(Ordering::Relaxed) >= MAX_DOWNLOAD_ERRORS {
                        metrics.incr("multiple-consecutive-errors");
                        debug!(timestamp = %snapshot.timestamp, "circuit breaker open, dropping snapshot");
                        continue;
                    }

                    if let Some(cached) = seen.get(&snapshot.digest).map(|h| h.value().clone()) {
                        let _ = result_tx.send_async((snapshot.timestamp, cached)).await;
                        continue;
                    }

                    let body = match client.download_capture(&snapshot.timestamp, &url).await {
                        Ok(Some(body)) => body,
                        Ok(None) => continue,
                        Err(err) => {
                            download_errors.fetch_add(1, Ordering::Relaxed);
                            metrics.incr("download-error");
                            warn!(timestamp = %snapshot.timestamp, error = %err, "capture download failed");
                            continue;
                        }
                    };

                    let text = String::from_utf8_lossy(&body);
                    let features = extract_html_features(&text);
                    let encoded = engine.calculate(&features).encode();
                    seen.insert(snapshot.digest.clone(), encoded.clone());
                    let _ = result_tx.send_async((snapshot.timestamp, encoded)).await;
                }
            });
        }
        // Only the workers hold receiver/sender clones from here on, so
        // channel shutdown is driven purely by the feeder and the workers.
        drop(capture_rx);
        drop(result_tx);

        let feeder = tokio::spawn(async move {
            for snapshot in snapshots {
                if capture_tx.send_async(snapshot).await.is_err() {
                    break;
                }
            }
        });

        let mut fingerprints = HashMap::new();
        while let Ok((timestamp, encoded)) = result_rx.recv_async().await {
            fingerprints.insert(timestamp, encoded);
        }

        let _ = feeder.await;
        while workers.join_next().await.is_some() {}
        fingerprints
    }
}
