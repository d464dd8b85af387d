//! Tests for the partition coordinator's subscribe/consume/commit/revoke cycle.

use crate::coordinator::{CoordinatorState, PartitionCoordinator};
use crate::rebalance::RebalanceListener;
use crate::topic::{TopicPartition, TopicPartitionOffset};
use crate::transport::{InMemoryTransport, PartitionTransport};
use bytes::Bytes;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq)]
enum Event {
  Assigned(Vec<TopicPartition>),
  Revoked(Vec<TopicPartitionOffset>),
}

#[derive(Default)]
struct RecordingListener {
  events: Mutex<Vec<Event>>,
}

impl RecordingListener {
  fn events(&self) -> Vec<Event> {
    self.events.lock().unwrap().clone()
  }
}

impl RebalanceListener for RecordingListener {
  fn on_partitions_assigned(&self, _: &PartitionCoordinator, partitions: &[TopicPartition]) {
    self
      .events
      .lock()
      .unwrap()
      .push(Event::Assigned(partitions.to_vec()));
  }

  fn on_partitions_revoked(&self, _: &PartitionCoordinator, partitions: &[TopicPartitionOffset]) {
    self
      .events
      .lock()
      .unwrap()
      .push(Event::Revoked(partitions.to_vec()));
  }
}

fn setup() -> (Arc<InMemoryTransport>, PartitionCoordinator, Arc<RecordingListener>) {
  let transport = Arc::new(InMemoryTransport::new());
  let mut coordinator = PartitionCoordinator::new("member-1", transport.clone());
  let listener = Arc::new(RecordingListener::default());
  coordinator.set_rebalance_listener(listener.clone());
  (transport, coordinator, listener)
}

fn publish(transport: &InMemoryTransport, topic: &str, value: &str) {
  transport
    .publish(topic, Bytes::from("key"), Bytes::copy_from_slice(value.as_bytes()))
    .unwrap();
}

#[tokio::test]
async fn test_consume_without_subscription_is_illegal_state() {
  let (_, mut coordinator, _) = setup();
  let err = coordinator.consume(POLL).await.unwrap_err();
  assert!(err.is_illegal_state());
  assert!(err.to_string().contains("no subscription"));
}

#[test]
fn test_subscribe_invokes_assigned_callback_before_returning() {
  let (_, mut coordinator, listener) = setup();
  coordinator.subscribe(&["orders", "payments"]).unwrap();

  let expected = vec![TopicPartition::new("orders", 0), TopicPartition::new("payments", 0)];
  assert_eq!(listener.events(), vec![Event::Assigned(expected.clone())]);
  assert_eq!(coordinator.assignment(), expected.as_slice());
  assert_eq!(coordinator.state(), CoordinatorState::Assigned);
}

#[test]
fn test_subscribe_same_topic_twice_does_not_duplicate() {
  let (_, mut coordinator, listener) = setup();
  coordinator.subscribe(&["orders"]).unwrap();
  coordinator.subscribe(&["orders"]).unwrap();
  assert_eq!(coordinator.subscription(), &["orders".to_string()]);
  assert_eq!(coordinator.assignment().len(), 1);
  assert_eq!(listener.events().len(), 2);
}

#[test]
fn test_subscribe_rejects_empty_topic() {
  let (_, mut coordinator, _) = setup();
  assert!(coordinator.subscribe(&[""]).unwrap_err().is_invalid_argument());
  let none: [&str; 0] = [];
  assert!(coordinator.subscribe(&none).unwrap_err().is_invalid_argument());
}

#[tokio::test]
async fn test_consume_in_publish_order_from_offset_zero() {
  let (transport, mut coordinator, _) = setup();
  for v in ["a", "b", "c"] {
    publish(&transport, "t", v);
  }
  coordinator.subscribe(&["t"]).unwrap();

  let mut seen = Vec::new();
  while let Some(result) = coordinator.consume(POLL).await.unwrap() {
    seen.push((result.offset, result.value().clone()));
    coordinator.commit_result(&result).unwrap();
  }
  assert_eq!(
    seen,
    vec![(0, Bytes::from("a")), (1, Bytes::from("b")), (2, Bytes::from("c"))]
  );
  assert_eq!(coordinator.state(), CoordinatorState::Consuming);
}

#[tokio::test]
async fn test_consume_does_not_advance_without_commit() {
  let (transport, mut coordinator, _) = setup();
  publish(&transport, "t", "a");
  coordinator.subscribe(&["t"]).unwrap();

  let first = coordinator.consume(POLL).await.unwrap().unwrap();
  let again = coordinator.consume(POLL).await.unwrap().unwrap();
  assert_eq!(first, again);
}

#[tokio::test]
async fn test_zero_timeout_returns_no_record() {
  let (transport, mut coordinator, _) = setup();
  publish(&transport, "t", "a");
  coordinator.subscribe(&["t"]).unwrap();
  assert!(coordinator.consume(Duration::ZERO).await.unwrap().is_none());
}

#[tokio::test]
async fn test_consume_waits_for_a_publish_within_timeout() {
  let (transport, mut coordinator, _) = setup();
  coordinator.subscribe(&["t"]).unwrap();

  let publisher = {
    let transport = transport.clone();
    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(20)).await;
      publish(&transport, "t", "late");
    })
  };
  let result = coordinator.consume(Duration::from_secs(5)).await.unwrap();
  publisher.await.unwrap();
  assert_eq!(result.unwrap().value(), &Bytes::from("late"));
}

#[tokio::test]
async fn test_commit_skips_to_log_end() {
  let (transport, mut coordinator, _) = setup();
  publish(&transport, "t", "a");
  publish(&transport, "t", "b");
  coordinator.subscribe(&["t"]).unwrap();

  let committed = coordinator.commit().unwrap();
  assert_eq!(committed, vec![TopicPartitionOffset::new("t", 0, 2)]);

  let tp = TopicPartition::new("t", 0);
  let watermarks = coordinator.watermark_offsets(&tp).unwrap();
  assert_eq!((watermarks.low, watermarks.high), (0, 2));
  assert!(coordinator.consume(POLL).await.unwrap().is_none());

  publish(&transport, "t", "c");
  let next = coordinator.consume(POLL).await.unwrap().unwrap();
  assert_eq!(next.offset, 2);
  assert_eq!(next.value(), &Bytes::from("c"));
}

#[test]
fn test_commit_offsets_overwrites_and_commit_result_adds_one() {
  let (transport, mut coordinator, _) = setup();
  publish(&transport, "t", "a");
  coordinator.subscribe(&["t"]).unwrap();
  let tp = TopicPartition::new("t", 0);

  coordinator
    .commit_offsets(&[TopicPartitionOffset::new("t", 0, 5)])
    .unwrap();
  assert_eq!(coordinator.position(&tp).unwrap(), 5);

  let result = crate::topic::ConsumeResult {
    topic_partition: tp.clone(),
    offset: 0,
    message: crate::topic::Message {
      key: Bytes::new(),
      value: Bytes::new(),
      timestamp: Utc::now(),
    },
  };
  coordinator.commit_result(&result).unwrap();
  assert_eq!(coordinator.position(&tp).unwrap(), 1);
}

#[test]
fn test_repeated_assign_updates_offset_instead_of_duplicating() {
  let (_, mut coordinator, _) = setup();
  coordinator
    .assign_with_offsets(&[TopicPartitionOffset::new("t", 0, 3)])
    .unwrap();
  coordinator
    .assign_with_offsets(&[TopicPartitionOffset::new("t", 0, 7)])
    .unwrap();
  assert_eq!(coordinator.assignment().len(), 1);
  assert_eq!(coordinator.committed(), vec![TopicPartitionOffset::new("t", 0, 7)]);

  coordinator.assign(&[TopicPartition::new("t", 0)]).unwrap();
  assert_eq!(coordinator.committed(), vec![TopicPartitionOffset::new("t", 0, 7)]);
}

#[tokio::test]
async fn test_unassign_reports_committed_offsets() {
  let (transport, mut coordinator, listener) = setup();
  publish(&transport, "a", "1");
  publish(&transport, "b", "1");
  coordinator.subscribe(&["a", "b"]).unwrap();
  let result = coordinator.consume(POLL).await.unwrap().unwrap();
  coordinator.commit_result(&result).unwrap();

  let before = coordinator.committed();
  coordinator.unassign().unwrap();

  assert!(coordinator.assignment().is_empty());
  assert_eq!(coordinator.state(), CoordinatorState::Revoked);
  assert_eq!(listener.events().last(), Some(&Event::Revoked(before)));
}

#[tokio::test]
async fn test_unsubscribe_revokes_then_clears_subscription() {
  let (_, mut coordinator, listener) = setup();
  coordinator.subscribe(&["t"]).unwrap();
  coordinator.unsubscribe().unwrap();

  assert!(coordinator.subscription().is_empty());
  assert_eq!(coordinator.state(), CoordinatorState::Unsubscribed);
  assert!(matches!(listener.events().last(), Some(Event::Revoked(_))));
  assert!(coordinator.consume(POLL).await.unwrap_err().is_illegal_state());
}

#[tokio::test]
async fn test_resubscribe_resumes_from_stored_offset() {
  let (transport, mut coordinator, _) = setup();
  publish(&transport, "t", "a");
  publish(&transport, "t", "b");
  coordinator.subscribe(&["t"]).unwrap();
  let first = coordinator.consume(POLL).await.unwrap().unwrap();
  coordinator.commit_result(&first).unwrap();
  coordinator.unsubscribe().unwrap();

  coordinator.subscribe(&["t"]).unwrap();
  let next = coordinator.consume(POLL).await.unwrap().unwrap();
  assert_eq!(next.offset, 1);
}

#[test]
fn test_lag_counts_unread_records() {
  let (transport, mut coordinator, _) = setup();
  coordinator.subscribe(&["a", "b"]).unwrap();
  publish(&transport, "a", "1");
  publish(&transport, "a", "2");
  publish(&transport, "b", "1");
  assert_eq!(coordinator.lag().unwrap(), 3);
  coordinator.commit().unwrap();
  assert_eq!(coordinator.lag().unwrap(), 0);
}

#[test]
fn test_position_of_unassigned_partition_is_illegal_state() {
  let (_, coordinator, _) = setup();
  let err = coordinator.position(&TopicPartition::new("t", 0)).unwrap_err();
  assert!(err.is_illegal_state());
}

#[test]
fn test_unmodelled_operations_are_unsupported() {
  let (_, mut coordinator, _) = setup();
  let tp = TopicPartition::new("t", 0);
  let checks = [
    coordinator.seek(&TopicPartitionOffset::new("t", 0, 1)).unwrap_err(),
    coordinator.pause(&[tp.clone()]).unwrap_err(),
    coordinator.resume(&[tp.clone()]).unwrap_err(),
    coordinator
      .offsets_for_times(&[(tp.clone(), Utc::now())])
      .unwrap_err(),
    coordinator.committed_for(&[tp]).unwrap_err(),
  ];
  let operations: Vec<String> = checks
    .into_iter()
    .map(|e| {
      assert!(e.is_unsupported());
      match e {
        crate::error::StreamsError::Unsupported { operation } => operation,
        _ => unreachable!(),
      }
    })
    .collect();
  assert_eq!(
    operations,
    vec!["seek", "pause", "resume", "offsets_for_times", "committed_for"]
  );
}

#[test]
fn test_close_skips_listener() {
  let (_, mut coordinator, listener) = setup();
  coordinator.subscribe(&["t"]).unwrap();
  coordinator.close();
  assert_eq!(listener.events().len(), 1);
  assert_eq!(coordinator.state(), CoordinatorState::Unsubscribed);
}

#[tokio::test]
async fn test_consume_with_unbounded_timeout_returns_available_record() {
  let (transport, mut coordinator, _) = setup();
  coordinator.subscribe(&["t"]).unwrap();
  publish(&transport, "t", "ready");

  let result = coordinator.consume(Duration::MAX).await.unwrap().unwrap();
  assert_eq!(result.offset, 0);
  assert_eq!(result.value(), &Bytes::from("ready"));
}

#[tokio::test]
async fn test_unbounded_timeout_waits_for_late_publish() {
  let (transport, mut coordinator, _) = setup();
  coordinator.subscribe(&["t"]).unwrap();

  let publisher = transport.clone();
  let late = tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(10)).await;
    publish(&publisher, "t", "late");
  });
  let result = coordinator.consume(Duration::MAX).await.unwrap().unwrap();
  late.await.unwrap();
  assert_eq!(result.value(), &Bytes::from("late"));
}

#[tokio::test]
async fn test_each_record_is_delivered_once_across_partitions() {
  let (transport, mut coordinator, _) = setup();
  coordinator.subscribe(&["t"]).unwrap();
  coordinator.assign(&[TopicPartition::new("t", 1)]).unwrap();
  publish(&transport, "t", "only");

  let mut deliveries = Vec::new();
  while let Some(result) = coordinator.consume(POLL).await.unwrap() {
    deliveries.push((result.partition(), result.offset));
    coordinator.commit_result(&result).unwrap();
  }
  assert_eq!(deliveries, vec![(0, 0)]);

  let other = TopicPartition::new("t", 1);
  assert_eq!(coordinator.watermark_offsets(&other).unwrap().high, 0);
  assert_eq!(coordinator.lag().unwrap(), 0);
}
