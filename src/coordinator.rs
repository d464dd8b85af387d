//! # Partition Coordination
//!
//! The [`PartitionCoordinator`] is a task's view of its partition transport:
//! which topics it subscribes to, which partitions it is assigned, where it
//! resumes reading, and what it has committed.
//!
//! ## Lifecycle
//!
//! ```text
//! Unsubscribed -> Subscribed -> Assigned <-> Consuming -> Revoked -> Unsubscribed
//! ```
//!
//! - `subscribe` assigns partition 0 of each new topic (starting at the stored
//!   offset, or 0) and notifies the rebalance listener before returning.
//! - `consume` returns the record at the stored offset of the first assigned
//!   partition with unread data. It does not advance the offset; the caller
//!   commits the record to move past it.
//! - `unassign` clears the assignment and hands the committed offsets to the
//!   listener's revocation callback.
//!
//! A coordinator is owned by one task and driven from one logical thread.
//!
//! ## Commit semantics
//!
//! The argument-less [`commit`](PartitionCoordinator::commit) jumps every
//! assigned partition to its log end. That only makes sense against the
//! in-memory transport; a runtime talking to a real bus commits consumed
//! records with [`commit_result`](PartitionCoordinator::commit_result).

use crate::error::{Result, StreamsError};
use crate::rebalance::RebalanceListener;
use crate::topic::{ConsumeResult, Offset, TopicPartition, TopicPartitionOffset, WatermarkOffsets};
use crate::transport::PartitionTransport;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub use crate::topic::DEFAULT_PARTITION;

/// Where a coordinator is in its subscribe/assign/consume/revoke cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
  /// No subscription and no assignment.
  Unsubscribed,
  /// Topics subscribed, nothing assigned.
  Subscribed,
  /// Partitions assigned, nothing consumed since.
  Assigned,
  /// At least one record has been handed out since the last assignment.
  Consuming,
  /// Assignment was revoked; the subscription may remain.
  Revoked,
}

/// Subscription, assignment and offset bookkeeping for one task.
pub struct PartitionCoordinator {
  member_id: String,
  transport: Arc<dyn PartitionTransport>,
  listener: Option<Arc<dyn RebalanceListener>>,
  subscription: Vec<String>,
  assignment: Vec<TopicPartition>,
  offsets: HashMap<TopicPartition, Offset>,
  state: CoordinatorState,
}

impl fmt::Debug for PartitionCoordinator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PartitionCoordinator")
      .field("member_id", &self.member_id)
      .field("subscription", &self.subscription)
      .field("assignment", &self.assignment)
      .field("offsets", &self.offsets)
      .field("state", &self.state)
      .field("listener", &self.listener.is_some())
      .finish()
  }
}

impl PartitionCoordinator {
  /// Creates an unsubscribed coordinator over `transport`.
  pub fn new(member_id: impl Into<String>, transport: Arc<dyn PartitionTransport>) -> Self {
    Self {
      member_id: member_id.into(),
      transport,
      listener: None,
      subscription: Vec::new(),
      assignment: Vec::new(),
      offsets: HashMap::new(),
      state: CoordinatorState::Unsubscribed,
    }
  }

  /// Installs the rebalance listener, replacing any previous one.
  pub fn set_rebalance_listener(&mut self, listener: Arc<dyn RebalanceListener>) {
    self.listener = Some(listener);
  }

  /// Group member identifier.
  pub fn member_id(&self) -> &str {
    &self.member_id
  }

  /// Current lifecycle state.
  pub fn state(&self) -> CoordinatorState {
    self.state
  }

  /// Subscribed topics, in subscription order.
  pub fn subscription(&self) -> &[String] {
    &self.subscription
  }

  /// Assigned partitions, in assignment order.
  pub fn assignment(&self) -> &[TopicPartition] {
    &self.assignment
  }

  fn transition(&mut self, next: CoordinatorState) {
    if self.state != next {
      debug!(member = %self.member_id, from = ?self.state, to = ?next, "coordinator state change");
      self.state = next;
    }
  }

  fn notify_assigned(&self) {
    if let Some(listener) = self.listener.clone() {
      listener.on_partitions_assigned(self, &self.assignment);
    }
  }

  fn add_assignment(&mut self, partition: TopicPartition) {
    if !self.assignment.contains(&partition) {
      self.offsets.entry(partition.clone()).or_insert(0);
      self.assignment.push(partition);
    }
  }

  /// Subscribes to `topics` and assigns partition 0 of each newly seen topic.
  ///
  /// A topic with a previously stored offset resumes from it; otherwise it
  /// starts at offset 0. The listener's assignment callback runs with the full
  /// assignment before this returns.
  pub fn subscribe<S: AsRef<str>>(&mut self, topics: &[S]) -> Result<()> {
    if topics.is_empty() {
      return Err(StreamsError::invalid_argument(
        "subscribe",
        "topics must not be empty",
      ));
    }
    if topics.iter().any(|t| t.as_ref().is_empty()) {
      return Err(StreamsError::invalid_argument(
        "subscribe",
        "topic names must not be empty",
      ));
    }

    for topic in topics {
      let topic = topic.as_ref();
      if !self.subscription.iter().any(|t| t == topic) {
        self.subscription.push(topic.to_string());
      }
      self.add_assignment(TopicPartition::new(topic, DEFAULT_PARTITION));
    }
    self.transition(CoordinatorState::Subscribed);
    debug!(member = %self.member_id, subscription = ?self.subscription, "subscribed");

    self.transition(CoordinatorState::Assigned);
    self.notify_assigned();
    Ok(())
  }

  /// Assigns partitions directly, bypassing the subscription.
  ///
  /// Already assigned partitions keep their stored offset.
  pub fn assign(&mut self, partitions: &[TopicPartition]) -> Result<()> {
    for partition in partitions {
      self.add_assignment(partition.clone());
    }
    debug!(member = %self.member_id, assignment = ?self.assignment, "assigned");
    self.transition(CoordinatorState::Assigned);
    self.notify_assigned();
    Ok(())
  }

  /// Assigns partitions starting at the given offsets.
  ///
  /// Already assigned partitions have their stored offset overwritten rather
  /// than being assigned twice.
  pub fn assign_with_offsets(&mut self, partitions: &[TopicPartitionOffset]) -> Result<()> {
    for partition in partitions {
      self
        .offsets
        .insert(partition.topic_partition.clone(), partition.offset);
      if !self.assignment.contains(&partition.topic_partition) {
        self.assignment.push(partition.topic_partition.clone());
      }
    }
    debug!(member = %self.member_id, assignment = ?self.assignment, "assigned with offsets");
    self.transition(CoordinatorState::Assigned);
    self.notify_assigned();
    Ok(())
  }

  /// Waits up to `timeout` for a record from an assigned partition.
  ///
  /// Partitions are scanned in assignment order; the first one whose stored
  /// offset is below its log end yields the record at that offset. A zero
  /// timeout returns `None` without scanning; a timeout too large to add to
  /// the current instant waits until a record arrives.
  pub async fn consume(&mut self, timeout: Duration) -> Result<Option<ConsumeResult>> {
    if self.subscription.is_empty() {
      return Err(StreamsError::illegal_state("consume", "no subscription"));
    }
    if timeout.is_zero() {
      return Ok(None);
    }

    // None when the timeout is too large to represent: wait without a deadline.
    let deadline = tokio::time::Instant::now().checked_add(timeout);
    loop {
      let seen = self.transport.publish_count();
      if let Some(result) = self.poll_assigned()? {
        self.transition(CoordinatorState::Consuming);
        return Ok(Some(result));
      }
      let wait = self.transport.wait_for_publish(seen);
      match deadline {
        Some(deadline) => {
          if tokio::time::timeout_at(deadline, wait).await.is_err() {
            return Ok(None);
          }
        }
        None => wait.await,
      }
    }
  }

  fn poll_assigned(&self) -> Result<Option<ConsumeResult>> {
    for partition in &self.assignment {
      let offset = self.offsets.get(partition).copied().unwrap_or(0);
      if let Some(message) = self.transport.message_at(partition, offset)? {
        return Ok(Some(ConsumeResult {
          topic_partition: partition.clone(),
          offset,
          message,
        }));
      }
    }
    Ok(None)
  }

  /// Moves every assigned partition to the end of its log.
  ///
  /// Returns the offsets that are now committed.
  pub fn commit(&mut self) -> Result<Vec<TopicPartitionOffset>> {
    for partition in &self.assignment {
      let end = self.transport.log_end_offset(partition)?;
      self.offsets.insert(partition.clone(), end);
    }
    let committed = self.committed();
    debug!(member = %self.member_id, committed = ?committed, "committed to log end");
    Ok(committed)
  }

  /// Stores the given offsets, overwriting any previous ones.
  ///
  /// Offsets for partitions outside the assignment are kept and used if the
  /// partition is assigned later.
  pub fn commit_offsets(&mut self, offsets: &[TopicPartitionOffset]) -> Result<()> {
    for offset in offsets {
      self
        .offsets
        .insert(offset.topic_partition.clone(), offset.offset);
    }
    debug!(member = %self.member_id, count = offsets.len(), "committed offsets");
    Ok(())
  }

  /// Commits the position right after `result`.
  pub fn commit_result(&mut self, result: &ConsumeResult) -> Result<()> {
    self.commit_offsets(&[result.topic_partition.clone().with_offset(result.offset + 1)])
  }

  /// Committed offsets of the assigned partitions, in assignment order.
  pub fn committed(&self) -> Vec<TopicPartitionOffset> {
    self
      .assignment
      .iter()
      .map(|tp| {
        let offset = self.offsets.get(tp).copied().unwrap_or(0);
        tp.clone().with_offset(offset)
      })
      .collect()
  }

  /// Next offset to read from an assigned partition.
  pub fn position(&self, partition: &TopicPartition) -> Result<Offset> {
    if !self.assignment.contains(partition) {
      return Err(StreamsError::illegal_state(
        "position",
        format!("partition {} is not assigned", partition),
      ));
    }
    Ok(self.offsets.get(partition).copied().unwrap_or(0))
  }

  /// Available offsets of a partition: `(0, log end)`. Partitions the
  /// transport does not have report `(0, 0)`.
  pub fn watermark_offsets(&self, partition: &TopicPartition) -> Result<WatermarkOffsets> {
    let high = self.transport.log_end_offset(partition)?;
    Ok(WatermarkOffsets::new(0, high))
  }

  /// Unread records across the assignment.
  pub fn lag(&self) -> Result<u64> {
    let mut lag = 0;
    for partition in &self.assignment {
      let position = self.offsets.get(partition).copied().unwrap_or(0);
      lag += self.watermark_offsets(partition)?.lag(position);
    }
    Ok(lag)
  }

  /// Clears the assignment and notifies the listener of the revoked offsets.
  ///
  /// The listener receives exactly what [`committed`](Self::committed)
  /// returned immediately before the call. Stored offsets are kept so a
  /// later assignment resumes where this one stopped.
  pub fn unassign(&mut self) -> Result<()> {
    let revoked = self.committed();
    self.assignment.clear();
    debug!(member = %self.member_id, revoked = ?revoked, "unassigned");
    self.transition(CoordinatorState::Revoked);
    if let Some(listener) = self.listener.clone() {
      listener.on_partitions_revoked(self, &revoked);
    }
    Ok(())
  }

  /// Unassigns, then clears the subscription.
  pub fn unsubscribe(&mut self) -> Result<()> {
    self.unassign()?;
    self.subscription.clear();
    self.transition(CoordinatorState::Unsubscribed);
    Ok(())
  }

  /// Drops assignment and subscription without notifying the listener.
  pub fn close(&mut self) {
    self.assignment.clear();
    self.subscription.clear();
    self.transition(CoordinatorState::Unsubscribed);
  }

  fn unsupported<T>(&self, operation: &str) -> Result<T> {
    warn!(member = %self.member_id, operation, "unsupported coordinator operation");
    Err(StreamsError::unsupported(operation))
  }

  /// Not supported: repositioning to an arbitrary offset.
  pub fn seek(&mut self, _offset: &TopicPartitionOffset) -> Result<()> {
    self.unsupported("seek")
  }

  /// Not supported: pausing partitions without unassigning them.
  pub fn pause(&mut self, _partitions: &[TopicPartition]) -> Result<()> {
    self.unsupported("pause")
  }

  /// Not supported: resuming paused partitions.
  pub fn resume(&mut self, _partitions: &[TopicPartition]) -> Result<()> {
    self.unsupported("resume")
  }

  /// Not supported: offset lookup by timestamp.
  pub fn offsets_for_times(
    &self,
    _timestamps: &[(TopicPartition, DateTime<Utc>)],
  ) -> Result<Vec<TopicPartitionOffset>> {
    self.unsupported("offsets_for_times")
  }

  /// Not supported: committed offsets for a chosen subset of partitions.
  pub fn committed_for(&self, _partitions: &[TopicPartition]) -> Result<Vec<TopicPartitionOffset>> {
    self.unsupported("committed_for")
  }
}
