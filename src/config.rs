//! Runtime configuration for stream applications.
//!
//! Configuration is plain data that can be deserialized from JSON, either
//! inline or from a file on disk. Missing fields fall back to defaults.

use crate::error::{Result, StreamsError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default consume timeout, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;

/// Default upper bound of records drained per input record.
pub const DEFAULT_MAX_POLL_RECORDS: usize = 10_000;

/// Configuration shared by a stream application's tasks.
///
/// # Example
///
/// ```rust
/// use kweave::config::StreamConfig;
///
/// let config = StreamConfig::from_json_str(r#"{ "application_id": "word-count" }"#)?;
/// assert_eq!(config.effective_client_id(), "word-count-client");
/// assert_eq!(config.poll_timeout_ms, 100);
/// # Ok::<(), kweave::error::StreamsError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
  /// Application identifier; also used as the consumer group id.
  pub application_id: String,
  /// Client identifier; derived from the application id when empty.
  pub client_id: String,
  /// How long a single consume call may wait for a record.
  pub poll_timeout_ms: u64,
  /// Maximum number of records a runtime drains in one pass.
  pub max_poll_records: usize,
}

impl Default for StreamConfig {
  fn default() -> Self {
    Self {
      application_id: String::new(),
      client_id: String::new(),
      poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
      max_poll_records: DEFAULT_MAX_POLL_RECORDS,
    }
  }
}

impl StreamConfig {
  /// Creates a configuration with the given application id and defaults elsewhere.
  pub fn new(application_id: impl Into<String>) -> Self {
    Self {
      application_id: application_id.into(),
      ..Self::default()
    }
  }

  /// Sets the consume timeout. Timeouts beyond `u64::MAX` milliseconds saturate.
  pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
    self.poll_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
    self
  }

  /// Sets the client id.
  pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
    self.client_id = client_id.into();
    self
  }

  /// Parses and validates a configuration from JSON text.
  pub fn from_json_str(json: &str) -> Result<Self> {
    let config: Self =
      serde_json::from_str(json).map_err(|e| StreamsError::Config(e.to_string()))?;
    config.validate()?;
    Ok(config)
  }

  /// Loads and validates a configuration from a JSON file.
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
    let data = std::fs::read_to_string(path)?;
    Self::from_json_str(&data)
  }

  /// Checks that required fields are present and values are usable.
  pub fn validate(&self) -> Result<()> {
    if self.application_id.trim().is_empty() {
      return Err(StreamsError::Config(
        "application_id must not be empty".to_string(),
      ));
    }
    if self.max_poll_records == 0 {
      return Err(StreamsError::Config(
        "max_poll_records must be greater than zero".to_string(),
      ));
    }
    Ok(())
  }

  /// Returns the consume timeout as a [`Duration`].
  pub fn poll_timeout(&self) -> Duration {
    Duration::from_millis(self.poll_timeout_ms)
  }

  /// Returns the client id, falling back to `<application_id>-client`.
  pub fn effective_client_id(&self) -> String {
    if self.client_id.is_empty() {
      format!("{}-client", self.application_id)
    } else {
      self.client_id.clone()
    }
  }
}
