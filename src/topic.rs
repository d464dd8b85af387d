//! Partition-level value types: topic partitions, offsets, watermarks and records.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};

/// Partition index of every topic in the single-partition transport contract.
pub const DEFAULT_PARTITION: u32 = 0;

/// Zero-based position of a record within a partition's log.
pub type Offset = u64;

/// A unit of ordered record delivery: a topic name plus a partition index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TopicPartition {
  /// Topic name.
  pub topic: String,
  /// Partition index within the topic.
  pub partition: u32,
}

impl TopicPartition {
  /// Creates a topic partition.
  pub fn new(topic: impl Into<String>, partition: u32) -> Self {
    Self {
      topic: topic.into(),
      partition,
    }
  }

  /// Pairs this partition with an offset.
  pub fn with_offset(self, offset: Offset) -> TopicPartitionOffset {
    TopicPartitionOffset {
      topic_partition: self,
      offset,
    }
  }
}

impl Display for TopicPartition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.topic, self.partition)
  }
}

/// A topic partition together with an offset (next offset to read, or committed).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicPartitionOffset {
  /// The partition.
  pub topic_partition: TopicPartition,
  /// The offset.
  pub offset: Offset,
}

impl TopicPartitionOffset {
  /// Creates a partition/offset pair.
  pub fn new(topic: impl Into<String>, partition: u32, offset: Offset) -> Self {
    TopicPartition::new(topic, partition).with_offset(offset)
  }

  /// Topic name.
  pub fn topic(&self) -> &str {
    &self.topic_partition.topic
  }
}

impl Display for TopicPartitionOffset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}@{}", self.topic_partition, self.offset)
  }
}

/// Bounds of the offsets currently available in a partition.
///
/// `low` is the first readable offset and `high` is one past the last one,
/// so `high - low` is the number of readable records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkOffsets {
  /// First available offset.
  pub low: Offset,
  /// One past the last available offset.
  pub high: Offset,
}

impl WatermarkOffsets {
  /// Creates watermarks.
  pub fn new(low: Offset, high: Offset) -> Self {
    Self { low, high }
  }

  /// Records between `position` and the high watermark.
  pub fn lag(&self, position: Offset) -> u64 {
    self.high.saturating_sub(position.max(self.low))
  }
}

/// A published record as stored by a partition transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
  /// Encoded key.
  pub key: Bytes,
  /// Encoded value.
  pub value: Bytes,
  /// Publish timestamp.
  pub timestamp: DateTime<Utc>,
}

/// A record handed out by the partition coordinator. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeResult {
  /// Where the record came from.
  pub topic_partition: TopicPartition,
  /// Offset of the record in its partition.
  pub offset: Offset,
  /// The record itself.
  pub message: Message,
}

impl ConsumeResult {
  /// Topic name.
  pub fn topic(&self) -> &str {
    &self.topic_partition.topic
  }

  /// Partition index.
  pub fn partition(&self) -> u32 {
    self.topic_partition.partition
  }

  /// Encoded key.
  pub fn key(&self) -> &Bytes {
    &self.message.key
  }

  /// Encoded value.
  pub fn value(&self) -> &Bytes {
    &self.message.value
  }

  /// Record timestamp.
  pub fn timestamp(&self) -> DateTime<Utc> {
    self.message.timestamp
  }

  /// Metadata describing where this record sits.
  pub fn context(&self) -> RecordContext {
    RecordContext {
      topic: self.topic_partition.topic.clone(),
      partition: self.topic_partition.partition,
      offset: self.offset,
      timestamp: self.message.timestamp,
    }
  }
}

/// Metadata of the record currently being processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
  /// Source topic.
  pub topic: String,
  /// Source partition.
  pub partition: u32,
  /// Source offset.
  pub offset: Offset,
  /// Record timestamp.
  pub timestamp: DateTime<Utc>,
}
