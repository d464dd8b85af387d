//! Partition transport capability and the in-memory simulation transport.
//!
//! The transport is the message bus as seen by the engine: it appends records
//! to per-topic logs and hands back the log contents in publish order. Each
//! topic has exactly one partition, [`DEFAULT_PARTITION`]; reads addressed to
//! any other partition index see an empty log.

use crate::error::Result;
use crate::topic::{DEFAULT_PARTITION, Message, Offset, TopicPartition};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::trace;

/// Append-only, per-topic record logs.
///
/// Implementations must preserve publish order as consumption order within a
/// partition.
#[async_trait]
pub trait PartitionTransport: Send + Sync + fmt::Debug {
  /// Appends a record with an explicit timestamp, returning its offset.
  fn publish_at(
    &self,
    topic: &str,
    key: Bytes,
    value: Bytes,
    timestamp: DateTime<Utc>,
  ) -> Result<Offset>;

  /// Appends a record stamped with the current time, returning its offset.
  fn publish(&self, topic: &str, key: Bytes, value: Bytes) -> Result<Offset> {
    self.publish_at(topic, key, value, Utc::now())
  }

  /// Every record of `topic`, in publish order.
  fn history(&self, topic: &str) -> Result<Vec<Message>>;

  /// The record at `offset` of `partition`, if it exists.
  fn message_at(&self, partition: &TopicPartition, offset: Offset) -> Result<Option<Message>> {
    if partition.partition != DEFAULT_PARTITION {
      return Ok(None);
    }
    Ok(self.history(&partition.topic)?.into_iter().nth(offset as usize))
  }

  /// Offset the next published record of `partition` will get.
  fn log_end_offset(&self, partition: &TopicPartition) -> Result<Offset> {
    if partition.partition != DEFAULT_PARTITION {
      return Ok(0);
    }
    Ok(self.history(&partition.topic)?.len() as Offset)
  }

  /// Total number of records published so far, across topics.
  fn publish_count(&self) -> u64;

  /// Resolves once `publish_count()` exceeds `seen`.
  async fn wait_for_publish(&self, seen: u64);
}

/// Process-local transport backed by in-memory logs.
#[derive(Default)]
pub struct InMemoryTransport {
  logs: RwLock<HashMap<String, Vec<Message>>>,
  published: AtomicU64,
  notify: Notify,
}

impl InMemoryTransport {
  /// Creates an empty transport.
  pub fn new() -> Self {
    Self::default()
  }

  /// Names of topics that have at least one record.
  pub fn topics(&self) -> Vec<String> {
    let mut topics: Vec<String> = self
      .logs
      .read()
      .map(|logs| logs.keys().cloned().collect())
      .unwrap_or_default();
    topics.sort();
    topics
  }
}

impl fmt::Debug for InMemoryTransport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InMemoryTransport")
      .field("topics", &self.topics())
      .field("published", &self.published.load(Ordering::Relaxed))
      .finish()
  }
}

#[async_trait]
impl PartitionTransport for InMemoryTransport {
  fn publish_at(
    &self,
    topic: &str,
    key: Bytes,
    value: Bytes,
    timestamp: DateTime<Utc>,
  ) -> Result<Offset> {
    let offset = {
      let mut logs = self.logs.write()?;
      let log = logs.entry(topic.to_string()).or_default();
      log.push(Message {
        key,
        value,
        timestamp,
      });
      (log.len() - 1) as Offset
    };
    self.published.fetch_add(1, Ordering::AcqRel);
    self.notify.notify_waiters();
    trace!(topic, offset, "published record");
    Ok(offset)
  }

  fn history(&self, topic: &str) -> Result<Vec<Message>> {
    let logs = self.logs.read()?;
    Ok(logs.get(topic).cloned().unwrap_or_default())
  }

  fn message_at(&self, partition: &TopicPartition, offset: Offset) -> Result<Option<Message>> {
    if partition.partition != DEFAULT_PARTITION {
      return Ok(None);
    }
    let logs = self.logs.read()?;
    Ok(logs
      .get(&partition.topic)
      .and_then(|log| log.get(offset as usize))
      .cloned())
  }

  fn log_end_offset(&self, partition: &TopicPartition) -> Result<Offset> {
    if partition.partition != DEFAULT_PARTITION {
      return Ok(0);
    }
    let logs = self.logs.read()?;
    Ok(logs.get(&partition.topic).map_or(0, |log| log.len() as Offset))
  }

  fn publish_count(&self) -> u64 {
    self.published.load(Ordering::Acquire)
  }

  async fn wait_for_publish(&self, seen: u64) {
    loop {
      // Registered before the check so a publish in between still wakes us.
      let notified = self.notify.notified();
      if self.publish_count() > seen {
        return;
      }
      notified.await;
    }
  }
}
