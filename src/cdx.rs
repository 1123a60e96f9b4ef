//! Client for the web archive: CDX index queries and capture downloads.

use reqwest::header::{HeaderValue, CONNECTION, COOKIE};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CDX_ENDPOINT: &str = "https://web.archive.org/cdx/search/cdx";
const WEB_ENDPOINT: &str = "https://web.archive.org/web";

/// Hard cap on bytes read from a capture body.
pub const MAX_CAPTURE_BYTES: usize = 1_000_000;

const USER_AGENT: &str = concat!("wayback-discover-diff/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT_SECS: u64 = 20;
const POOL_IDLE_TIMEOUT_SECS: u64 = 20;
const POOL_IDLE_PER_HOST: usize = 16;

/// One archived crawl of a URL: when it happened and what its body hashed
/// to in the index. Equal digests imply byte-identical bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub timestamp: String,
    pub digest: String,
}

#[derive(Debug, Error)]
pub enum CdxError {
    #[error("no captures found for this year")]
    NoCaptures,
    #[error("archive request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("archive index returned status {0}")]
    Status(u16),
    #[error("failed to build http client: {0}")]
    ClientBuild(String),
}

/// Failure while downloading one capture body. The caller counts these
/// toward the job's circuit breaker.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("capture download returned status {0}")]
    Status(u16),
}

/// Shared HTTP client for the archive; safe to clone across workers.
#[derive(Clone)]
pub struct CaptureClient {
    http: reqwest::Client,
    snapshots_per_year: i64,
    auth_cookie: Option<HeaderValue>,
}

impl CaptureClient {
    pub fn new(snapshots_per_year: i64, auth_token: Option<&str>) -> Result<Self, CdxError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .pool_max_idle_per_host(POOL_IDLE_PER_HOST)
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| CdxError::ClientBuild(e.to_string()))?;

        let auth_cookie = match auth_token {
            Some(token) if !token.is_empty() => Some(
                HeaderValue::from_str(&format!("cdx_auth_token={}", token))
                    .map_err(|e| CdxError::ClientBuild(e.to_string()))?,
            ),
            _ => None,
        };

        Ok(Self {
            http,
            snapshots_per_year,
            auth_cookie,
        })
    }

    /// List the snapshots of `url` within `year`, collapsed to roughly one
    /// capture per day. An empty index response is the `NoCaptures` error
    /// so callers can persist the proof of absence.
    pub async fn list_snapshots(&self, url: &str, year: &str) -> Result<Vec<Snapshot>, CdxError> {
        let query = snapshot_query(url, year, self.snapshots_per_year);
        let response = self.http.get(CDX_ENDPOINT).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(CdxError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        let snapshots = parse_snapshot_lines(&body);
        if snapshots.is_empty() {
            return Err(CdxError::NoCaptures);
        }
        Ok(snapshots)
    }

    /// Download one capture body, capped at [`MAX_CAPTURE_BYTES`].
    ///
    /// `Ok(None)` means the capture exists but is not text/HTML and must
    /// be skipped without penalty; `Err` is a transport failure that
    /// counts toward the circuit breaker.
    pub async fn download_capture(
        &self,
        timestamp: &str,
        url: &str,
    ) -> Result<Option<Vec<u8>>, CaptureError> {
        let capture_url = format!("{}/{}id_/{}", WEB_ENDPOINT, timestamp, url);

        let mut request = self
            .http
            .get(&capture_url)
            .header(CONNECTION, "keep-alive");
        if let Some(cookie) = &self.auth_cookie {
            request = request.header(COOKIE, cookie.clone());
        }

        let mut response = request.send().await?;
        if !response.status().is_success() {
            return Err(CaptureError::Status(response.status().as_u16()));
        }

        if !is_text_content(&response) {
            debug!(timestamp, url, "skipping non-text capture");
            return Ok(None);
        }

        let mut body: Vec<u8> = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() >= MAX_CAPTURE_BYTES {
                        body.truncate(MAX_CAPTURE_BYTES);
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Some(body))
    }
}

fn is_text_content(response: &reqwest::Response) -> bool {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    content_type.contains("text") || content_type.contains("html")
}

/// CDX query for one `(url, year)`: daily-collapsed successful captures,
/// with a `limit` only when one is configured (negative disables it).
fn snapshot_query(url: &str, year: &str, limit: i64) -> Vec<(&'static str, String)> {
    let mut query = vec![
        ("url", url.to_string()),
        ("from", year.to_string()),
        ("to", year.to_string()),
        ("statuscode", "200".to_string()),
        ("fl", "timestamp,digest".to_string()),
        ("collapse", "timestamp:9".to_string()),
    ];
    if limit >= 0 {
        query.push(("limit", limit.to_string()));
    }
    query
}

/// Parse CDX `timestamp digest` lines; malformed lines are skipped.
pub fn parse_snapshot_lines(body: &str) -> Vec<Snapshot> {
    body.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let timestamp = parts.next()?;
            let digest = parts.next()?;
            Some(Snapshot {
                timestamp: timestamp.to_string(),
                digest: digest.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_snapshot_lines() {
        let body = "20140202131837 OG2JGKWHSY4DIGEST\n20141021062411 O52ROF0HI2ODIGEST\n";
        let snapshots = parse_snapshot_lines(body);
        assert_eq!(
            snapshots,
            vec![
                Snapshot {
                    timestamp: "20140202131837".to_string(),
                    digest: "OG2JGKWHSY4DIGEST".to_string(),
                },
                Snapshot {
                    timestamp: "20141021062411".to_string(),
                    digest: "O52ROF0HI2ODIGEST".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_parse_skips_malformed_lines() {
        let body = "20140202131837 DIGESTA\nlonely-field\n\n20141021062411 DIGESTB extra\n";
        let snapshots = parse_snapshot_lines(body);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[1].timestamp, "20141021062411");
        assert_eq!(snapshots[1].digest, "DIGESTB");
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(parse_snapshot_lines("").is_empty());
        assert!(parse_snapshot_lines("\n\n").is_empty());
    }

    #[test]
    fn test_snapshot_query_limit() {
        let query = snapshot_query("http://example.com", "2014", -1);
        assert!(query.iter().all(|(name, _)| *name != "limit"));
        assert_eq!(query[1], ("from", "2014".to_string()));
        assert_eq!(query[5], ("collapse", "timestamp:9".to_string()));

        let query = snapshot_query("http://example.com", "2014", 0);
        assert!(query.contains(&("limit", "0".to_string())));

        let query = snapshot_query("http://example.com", "2014", 300);
        assert!(query.contains(&("limit", "300".to_string())));
    }

    #[test]
    fn test_client_accepts_optional_auth() {
        assert!(CaptureClient::new(-1, None).is_ok());
        assert!(CaptureClient::new(300, Some("token")).is_ok());
        // Empty tokens behave like no token at all.
        let client = CaptureClient::new(-1, Some("")).unwrap();
        assert!(client.auth_cookie.is_none());
    }
}
