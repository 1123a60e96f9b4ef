//! Statsd metrics emission.
//!
//! Counters and timers are fire-and-forget over UDP; when no statsd
//! endpoint is configured every call hits a no-op sink so callers never
//! branch on whether metrics are enabled.

use crate::settings::StatsdSettings;
use cadence::prelude::*;
use cadence::{NopMetricSink, StatsdClient, UdpMetricSink};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const PREFIX_BASE: &str = "wb.changes";

#[derive(Clone)]
pub struct Metrics {
    client: Arc<StatsdClient>,
}

impl Metrics {
    /// Build a metrics handle; falls back to a no-op sink when statsd is
    /// unconfigured or the UDP socket cannot be set up.
    pub fn new(statsd: Option<&StatsdSettings>) -> Self {
        let client = match statsd {
            Some(cfg) => match Self::udp_client(cfg) {
                Ok(client) => client,
                Err(err) => {
                    warn!(host = %cfg.host, port = cfg.port, error = %err, "statsd unavailable, metrics disabled");
                    Self::noop_client()
                }
            },
            None => Self::noop_client(),
        };
        Self {
            client: Arc::new(client),
        }
    }

    /// A handle that drops every metric; used by tests.
    pub fn disabled() -> Self {
        Self {
            client: Arc::new(Self::noop_client()),
        }
    }

    fn noop_client() -> StatsdClient {
        StatsdClient::from_sink(PREFIX_BASE, NopMetricSink)
    }

    fn udp_client(cfg: &StatsdSettings) -> Result<StatsdClient, cadence::MetricError> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        let sink = UdpMetricSink::from((cfg.host.as_str(), cfg.port), socket)?;
        Ok(StatsdClient::from_sink(&prefix(), sink))
    }

    pub fn incr(&self, metric: &str) {
        let _ = self.client.incr(metric);
    }

    pub fn timing(&self, metric: &str, elapsed: Duration) {
        let _ = self.client.time(metric, elapsed);
    }
}

/// Metric prefix `wb.changes.<short-hostname>`; the hostname segment is
/// dropped when the environment does not expose one.
fn prefix() -> String {
    match std::env::var("HOSTNAME") {
        Ok(hostname) if !hostname.is_empty() => {
            let short = hostname.split('.').next().unwrap_or(&hostname);
            format!("{}.{}", PREFIX_BASE, short)
        }
        _ => PREFIX_BASE.to_string(),
    }
}
