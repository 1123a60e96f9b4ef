//! HTTP surface: JSON over HTTP/1.1, no auth.
//!
//! Parameter problems are reported as HTTP 200 with an in-body error
//! object; 5xx is reserved for genuine server faults. Lookups only ever
//! read the store, they never wait on a running computation.

use crate::discover::JobPayload;
use crate::metrics::Metrics;
use crate::queue::JobQueue;
use crate::store::{Store, JobStatus, NO_CAPTURES_SENTINEL};
use crate::urlkey::url_is_valid;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub queue: JobQueue,
    pub metrics: Metrics,
    pub snapshots_per_page: usize,
}

/// Field-polymorphic response body; absent fields are elided from the
/// JSON so every endpoint shares one shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simhash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

impl ApiResponse {
    pub fn error_info(info: &str) -> Self {
        Self {
            status: Some("error".to_string()),
            info: Some(Value::String(info.to_string())),
            ..Self::default()
        }
    }

    pub fn error_message(message: &str) -> Self {
        Self {
            status: Some("error".to_string()),
            message: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn simhash(hash: String) -> Self {
        Self {
            status: Some("success".to_string()),
            simhash: Some(hash),
            ..Self::default()
        }
    }

    pub fn job(status: &str, job_id: &str) -> Self {
        Self {
            status: Some(status.to_string()),
            job_id: Some(job_id.to_string()),
            ..Self::default()
        }
    }
}

/// Year lookup outcome before shaping into a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearLookup {
    /// `(timestamp, base64 hash)` pairs for the requested page.
    pub pairs: Vec<(String, String)>,
    /// Total page count, present only when pagination was requested.
    pub pages: Option<usize>,
    /// Number of timestamps selected for this page.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// The year sentinel proves there is nothing to find.
    NoCaptures,
    /// Nothing stored, with no proof of absence.
    NotCaptured,
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(serve_root))
        .route("/simhash", get(serve_simhash))
        .route("/calculate-simhash", get(serve_calculate_simhash))
        .route("/job", get(serve_job))
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(origin = %origin, error = %err, "skipping unparseable CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

async fn serve_root() -> String {
    format!(
        "wayback-discover-diff service version: {}",
        env!("CARGO_PKG_VERSION")
    )
}

#[derive(Debug, Default, Deserialize)]
struct SimhashParams {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    year: Option<String>,
    #[serde(default)]
    page: Option<String>,
    #[serde(default)]
    compress: Option<String>,
}

async fn serve_simhash(
    State(state): State<AppState>,
    Query(params): Query<SimhashParams>,
) -> Response {
    state.metrics.incr("get-simhash-year-request");

    let url = params.url.unwrap_or_default();
    if url.is_empty() {
        return Json(ApiResponse::error_info("url param is required.")).into_response();
    }
    if !url_is_valid(&url) {
        return Json(ApiResponse::error_info("invalid url format.")).into_response();
    }

    if let Some(timestamp) = params.timestamp.filter(|t| !t.is_empty()) {
        let response = get_timestamp_simhash(&state.store, &url, &timestamp).await;
        return Json(response).into_response();
    }

    let year = params.year.unwrap_or_default();
    if !year_is_valid(&year) {
        return Json(ApiResponse::error_info("year param is required.")).into_response();
    }
    let page: usize = params
        .page
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0);
    let compress = matches!(params.compress.as_deref(), Some("true") | Some("1"));

    match year_simhash(&state.store, &url, &year, page, state.snapshots_per_page).await {
        Ok(lookup) => {
            if compress {
                let (captures, hashes) = compress_captures(&lookup.pairs);
                let task_status = match state.store.get_task(&url, &year).await {
                    Ok(Some(task)) => Some(task.status),
                    _ => None,
                };
                let mut body = json!({
                    "status": "success",
                    "captures": captures,
                    "hashes": hashes,
                    "total_captures": lookup.total,
                });
                if let Some(pages) = lookup.pages {
                    body["pages"] = json!(pages);
                }
                if let Some(task_status) = task_status {
                    body["task_status"] = json!(task_status);
                }
                Json(body).into_response()
            } else {
                let mut rows: Vec<Value> = Vec::with_capacity(lookup.pairs.len() + 1);
                if let Some(pages) = lookup.pages {
                    rows.push(json!(["pages", pages.to_string()]));
                }
                for (timestamp, hash) in &lookup.pairs {
                    rows.push(json!([timestamp, hash]));
                }
                Json(Value::Array(rows)).into_response()
            }
        }
        Err(LookupError::NoCaptures) => {
            Json(ApiResponse::error_message("NO_CAPTURES")).into_response()
        }
        Err(LookupError::NotCaptured) => {
            Json(ApiResponse::error_message("CAPTURE_NOT_FOUND")).into_response()
        }
    }
}

/// Read the stored hashes of one year, optionally a single page of them.
pub async fn year_simhash(
    store: &Store,
    url: &str,
    year: &str,
    page: usize,
    per_page: usize,
) -> Result<YearLookup, LookupError> {
    if url.is_empty() || year.is_empty() {
        return Err(LookupError::NotCaptured);
    }

    let fields = store.list_timestamps(url).await.map_err(|err| {
        error!(url, year, error = %err, "error loading simhash fields");
        LookupError::NotCaptured
    })?;

    if fields.iter().any(|field| field == year) {
        return Err(LookupError::NoCaptures);
    }

    let mut matched: Vec<String> = fields
        .into_iter()
        .filter(|field| field.len() > 4 && field.starts_with(year))
        .collect();
    if matched.is_empty() {
        return Err(LookupError::NotCaptured);
    }
    matched.sort();

    let pages = matched.len().div_ceil(per_page.max(1));
    let mut page_count = None;
    if page > 0 {
        let page = page.min(pages);
        let start = (page - 1) * per_page;
        let end = (page * per_page).min(matched.len());
        matched = matched[start..end].to_vec();
        page_count = Some(pages);
    }
    let total = matched.len();

    let values = store.get_many(url, &matched).await.map_err(|err| {
        error!(url, year, page, error = %err, "cannot fetch simhash values");
        LookupError::NotCaptured
    })?;

    let pairs: Vec<(String, String)> = matched
        .into_iter()
        .zip(values)
        .filter_map(|(timestamp, value)| match value {
            // A "-1" under a full timestamp is tolerated as missing.
            Some(hash) if hash != NO_CAPTURES_SENTINEL => Some((timestamp, hash)),
            _ => None,
        })
        .collect();

    Ok(YearLookup {
        pairs,
        pages: page_count,
        total,
    })
}

/// Read the stored hash of one exact capture.
pub async fn get_timestamp_simhash(store: &Store, url: &str, timestamp: &str) -> ApiResponse {
    if !url.is_empty() && !timestamp.is_empty() {
        match store.get_one(url, timestamp).await {
            Ok(Some(hash)) if hash != NO_CAPTURES_SENTINEL => {
                return ApiResponse::simhash(hash);
            }
            Ok(_) => {}
            Err(err) => {
                error!(url, timestamp, error = %err, "error loading simhash data");
            }
        }

        // A miss may still be a proven absence for the whole year.
        if timestamp.len() >= 4 && timestamp.is_char_boundary(4) {
            if let Ok(Some(value)) = store.get_one(url, &timestamp[..4]).await {
                if value == NO_CAPTURES_SENTINEL {
                    return ApiResponse::error_message("NO_CAPTURES");
                }
            }
        }
    }
    ApiResponse::error_message("CAPTURE_NOT_FOUND")
}

/// Intern duplicate hashes and group captures year -> month -> day ->
/// `[hhmmss, hashIndex]` so big years compress well on the wire.
pub fn compress_captures(captures: &[(String, String)]) -> (Vec<Value>, Vec<String>) {
    let mut hash_ids: HashMap<&str, usize> = HashMap::new();
    let mut hashes: Vec<String> = Vec::new();
    let mut grouped: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, Vec<(String, usize)>>>> =
        BTreeMap::new();

    for (timestamp, hash) in captures {
        if timestamp.len() < 8 || !timestamp.is_ascii() {
            continue;
        }
        let id = *hash_ids.entry(hash.as_str()).or_insert_with(|| {
            hashes.push(hash.clone());
            hashes.len() - 1
        });
        grouped
            .entry(&timestamp[0..4])
            .or_default()
            .entry(&timestamp[4..6])
            .or_default()
            .entry(&timestamp[6..8])
            .or_default()
            .push((timestamp[8..].to_string(), id));
    }

    let compressed = grouped
        .into_iter()
        .map(|(year, months)| {
            let mut year_entry = vec![json!(year)];
            for (month, days) in months {
                let mut month_entry = vec![json!(month)];
                for (day, captures) in days {
                    let mut day_entry = vec![json!(day)];
                    for (hms, id) in captures {
                        day_entry.push(json!([hms, id]));
                    }
                    month_entry.push(Value::Array(day_entry));
                }
                year_entry.push(Value::Array(month_entry));
            }
            Value::Array(year_entry)
        })
        .collect();

    (compressed, hashes)
}

#[derive(Debug, Default, Deserialize)]
struct CalculateParams {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    year: Option<String>,
}

async fn serve_calculate_simhash(
    State(state): State<AppState>,
    Query(params): Query<CalculateParams>,
) -> Response {
    state.metrics.incr("calculate-simhash-year-request");

    let url = params.url.unwrap_or_default();
    if url.is_empty() {
        return Json(ApiResponse::error_info("url param is required.")).into_response();
    }
    if !url_is_valid(&url) {
        return Json(ApiResponse::error_info("invalid url format.")).into_response();
    }
    let year = params.year.unwrap_or_default();
    if !year_is_valid(&year) {
        return Json(ApiResponse::error_info("year param is required.")).into_response();
    }

    // Duplicate submissions reuse the stored task, whatever its state;
    // after SUCCESS the fingerprints are already readable.
    match state.store.get_task(&url, &year).await {
        Ok(Some(task)) => {
            return Json(ApiResponse::job(&task.status, &task.id)).into_response();
        }
        Ok(None) => {}
        Err(err) => {
            error!(url = %url, year = %year, error = %err, "failed to get task status");
            return internal_error("failed to get task status");
        }
    }

    let job_id = Uuid::new_v4().to_string();
    let payload = JobPayload {
        url: url.clone(),
        year: year.clone(),
        job_id: job_id.clone(),
    };
    if let Err(err) = state.queue.enqueue(&payload).await {
        error!(url = %url, year = %year, error = %err, "error enqueueing task");
        return internal_error("error enqueueing task");
    }
    if let Err(err) = state
        .store
        .set_job(&job_id, &url, &year, JobStatus::Pending)
        .await
    {
        error!(job_id = %job_id, error = %err, "error creating job record");
        return internal_error("error creating task");
    }
    if let Err(err) = state
        .store
        .set_task(&url, &year, JobStatus::Pending, "Started the task", &job_id)
        .await
    {
        // The worker rewrites this record on entry; enqueueing already
        // succeeded, so report the job as started.
        warn!(job_id = %job_id, error = %err, "error creating task record");
    }

    Json(ApiResponse::job("started", &job_id)).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct JobParams {
    #[serde(default)]
    job_id: Option<String>,
}

async fn serve_job(State(state): State<AppState>, Query(params): Query<JobParams>) -> Response {
    state.metrics.incr("status-request");

    let job_id = params.job_id.unwrap_or_default();
    if job_id.is_empty() {
        return Json(ApiResponse::error_info("job_id param is required.")).into_response();
    }

    let record = match state.store.get_job(&job_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            let body = ApiResponse::error_info(&format!(
                "job status not found for job_id: {}",
                job_id
            ));
            return (StatusCode::NOT_FOUND, Json(body)).into_response();
        }
        Err(err) => {
            error!(job_id = %job_id, error = %err, "cannot load job record");
            return internal_error(&format!("job status format invalid for job_id: {}", job_id));
        }
    };

    let task = match state.store.get_task(&record.url, &record.year).await {
        Ok(task) => task,
        Err(err) => {
            error!(job_id = %job_id, error = %err, "cannot load task record");
            return internal_error("internal error");
        }
    };

    let response = match task {
        None => ApiResponse {
            info: Some(Value::String("task status not yet available".to_string())),
            ..ApiResponse::job(&record.status, &job_id)
        },
        Some(task) if record.status == JobStatus::Success.as_str() => ApiResponse {
            duration: Some(task.description),
            ..ApiResponse::job(&record.status, &job_id)
        },
        Some(task) => ApiResponse {
            info: Some(Value::String(task.description)),
            ..ApiResponse::job(&record.status, &job_id)
        },
    };
    Json(response).into_response()
}

fn internal_error(info: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::error_info(info)),
    )
        .into_response()
}

fn year_is_valid(year: &str) -> bool {
    year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit())
}
