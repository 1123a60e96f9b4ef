//! Service configuration loaded from a YAML file at startup.

use crate::simhash::MAX_BIT_LENGTH;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid simhash size {0}: must be 64, 128, 256 or 512")]
    InvalidSimhashSize(usize),
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub simhash: SimhashSettings,
    #[serde(default)]
    pub redis: RedisSettings,
    /// Snapshot workers per job.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Concurrent discover jobs.
    #[serde(default = "default_queue_workers")]
    pub queue_workers: usize,
    #[serde(default)]
    pub snapshots: SnapshotSettings,
    #[serde(default = "default_cors")]
    pub cors: Vec<String>,
    #[serde(default)]
    pub statsd: Option<StatsdSettings>,
    /// Optional archive authentication cookie value.
    #[serde(default)]
    pub cdx_auth_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimhashSettings {
    /// Fingerprint width in bits.
    pub size: usize,
    /// TTL in seconds for fingerprint hashes and task records.
    #[serde(default = "default_expire_after")]
    pub expire_after: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Read/write timeout in seconds.
    #[serde(default = "default_redis_socket_timeout")]
    pub socket_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotSettings {
    /// CDX `limit` parameter; -1 disables the limit entirely.
    #[serde(default = "default_number_per_year")]
    pub number_per_year: i64,
    /// Page size for year lookups.
    #[serde(default = "default_number_per_page")]
    pub number_per_page: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsdSettings {
    pub host: String,
    pub port: u16,
}

fn default_threads() -> usize {
    5
}

fn default_queue_workers() -> usize {
    10
}

fn default_expire_after() -> i64 {
    86400
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/1".to_string()
}

fn default_redis_socket_timeout() -> u64 {
    20
}

fn default_number_per_year() -> i64 {
    -1
}

fn default_number_per_page() -> usize {
    600
}

fn default_cors() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            socket_timeout: default_redis_socket_timeout(),
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            number_per_year: default_number_per_year(),
            number_per_page: default_number_per_page(),
        }
    }
}

impl Settings {
    /// Load and validate settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.as_ref().display().to_string(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate settings from a YAML string.
    pub fn from_yaml(raw: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_yaml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        let size = self.simhash.size;
        if size == 0 || size > MAX_BIT_LENGTH || size % 64 != 0 {
            return Err(SettingsError::InvalidSimhashSize(size));
        }
        if self.simhash.expire_after <= 0 {
            return Err(SettingsError::Invalid {
                field: "simhash.expire_after",
                reason: "must be positive",
            });
        }
        if self.threads == 0 {
            return Err(SettingsError::Invalid {
                field: "threads",
                reason: "must be at least 1",
            });
        }
        if self.queue_workers == 0 {
            return Err(SettingsError::Invalid {
                field: "queue_workers",
                reason: "must be at least 1",
            });
        }
        if self.snapshots.number_per_page == 0 {
            return Err(SettingsError::Invalid {
                field: "snapshots.number_per_page",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_YAML: &str = r#"
simhash:
  size: 256
  expire_after: 86400
redis:
  url: redis://localhost:6379/1
  socket_timeout: 20
threads: 5
queue_workers: 10
snapshots:
  number_per_year: -1
  number_per_page: 600
cors:
  - "*"
statsd:
  host: localhost
  port: 8125
cdx_auth_token: "XXXX"
"#;

    #[test]
    fn test_full_config_parses() {
        let settings = Settings::from_yaml(FULL_YAML).unwrap();
        assert_eq!(settings.simhash.size, 256);
        assert_eq!(settings.simhash.expire_after, 86400);
        assert_eq!(settings.redis.socket_timeout, 20);
        assert_eq!(settings.threads, 5);
        assert_eq!(settings.queue_workers, 10);
        assert_eq!(settings.snapshots.number_per_year, -1);
        assert_eq!(settings.snapshots.number_per_page, 600);
        assert_eq!(settings.cors, vec!["*"]);
        assert_eq!(settings.statsd.as_ref().unwrap().port, 8125);
        assert_eq!(settings.cdx_auth_token.as_deref(), Some("XXXX"));
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let settings = Settings::from_yaml("simhash:\n  size: 128\n").unwrap();
        assert_eq!(settings.simhash.expire_after, 86400);
        assert_eq!(settings.threads, 5);
        assert_eq!(settings.queue_workers, 10);
        assert_eq!(settings.snapshots.number_per_year, -1);
        assert_eq!(settings.snapshots.number_per_page, 600);
        assert!(settings.statsd.is_none());
        assert!(settings.cdx_auth_token.is_none());
        assert_eq!(settings.redis.url, "redis://127.0.0.1:6379/1");
    }

    #[test]
    fn test_oversized_width_rejected() {
        let err = Settings::from_yaml("simhash:\n  size: 1024\n").unwrap_err();
        assert!(matches!(err, SettingsError::InvalidSimhashSize(1024)));
    }

    #[test]
    fn test_non_word_width_rejected() {
        assert!(Settings::from_yaml("simhash:\n  size: 100\n").is_err());
        assert!(Settings::from_yaml("simhash:\n  size: 0\n").is_err());
    }

    #[test]
    fn test_max_width_accepted() {
        let settings = Settings::from_yaml("simhash:\n  size: 512\n").unwrap();
        assert_eq!(settings.simhash.size, 512);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let err = Settings::from_yaml("simhash:\n  size: 128\nthreads: 0\n").unwrap_err();
        assert!(matches!(err, SettingsError::Invalid { field: "threads", .. }));
    }
}
