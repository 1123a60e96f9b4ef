pub mod cdx;
pub mod cli;
pub mod discover;
pub mod features;
pub mod logging;
pub mod metrics;
pub mod queue;
pub mod settings;
pub mod simhash;
pub mod store;
pub mod urlkey;
pub mod web;

// Re-export main types for library usage
pub use cdx::{CaptureClient, CdxError, Snapshot};
pub use discover::{Discover, DiscoverError, JobPayload};
pub use features::extract_html_features;
pub use metrics::Metrics;
pub use queue::JobQueue;
pub use settings::{Settings, SettingsError};
pub use simhash::{Simhash, SimhashEngine, TokenHasher};
pub use store::{JobStatus, Store, StoreError, TaskStatus};
pub use urlkey::{canonical_key, url_is_valid};
pub use web::{ApiResponse, AppState};
