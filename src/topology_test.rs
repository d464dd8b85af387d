//! # Topology Test Suite
//!
//! Builds small topologies with the DSL and pushes records straight through a
//! [`StreamTask`](crate::topology::StreamTask), without a coordinator.

use crate::processor::Predicate;
use crate::serdes::{I64Serde, Serde, StringSerde};
use crate::state::StoreRegistry;
use crate::stream::{Consumed, KStream, Printed, StreamBuilder};
use crate::topic::{ConsumeResult, Message, TopicPartition};
use crate::topology::Topology;
use crate::transport::{InMemoryTransport, PartitionTransport};
use bytes::Bytes;
use chrono::{TimeZone, Utc};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

fn builder() -> StreamBuilder {
  StreamBuilder::new().with_default_serdes(StringSerde, StringSerde)
}

fn record(topic: &str, offset: u64, key: &str, value: &str) -> ConsumeResult {
  ConsumeResult {
    topic_partition: TopicPartition::new(topic, 0),
    offset,
    message: Message {
      key: Bytes::copy_from_slice(key.as_bytes()),
      value: Bytes::copy_from_slice(value.as_bytes()),
      timestamp: Utc.timestamp_millis_opt(1_000 + offset as i64).unwrap(),
    },
  }
}

fn run(topology: &Topology, inputs: &[(&str, &str)]) -> InMemoryTransport {
  let transport = InMemoryTransport::new();
  let stores = StoreRegistry::new();
  let mut task = topology.create_task(0).unwrap();
  for (offset, (key, value)) in inputs.iter().enumerate() {
    task
      .process(&record("input", offset as u64, key, value), &transport, &stores)
      .unwrap();
  }
  assert_eq!(task.processed(), inputs.len() as u64);
  transport
}

fn read(transport: &InMemoryTransport, topic: &str) -> Vec<(String, String)> {
  transport
    .history(topic)
    .unwrap()
    .into_iter()
    .map(|m| {
      (
        StringSerde.deserialize(&m.key).unwrap(),
        StringSerde.deserialize(&m.value).unwrap(),
      )
    })
    .collect()
}

#[test]
fn test_build_without_sources_fails() {
  let err = StreamBuilder::new().build().unwrap_err();
  assert!(err.is_illegal_state());
}

#[test]
fn test_source_and_sink_topics() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.to(&mut b, "out-a").unwrap();
  s.to(&mut b, "out-b").unwrap();
  s.to(&mut b, "out-a").unwrap();
  let topology = b.build().unwrap();

  assert_eq!(topology.source_topics(), vec!["input".to_string()]);
  assert_eq!(
    topology.sink_topics(),
    vec!["out-a".to_string(), "out-b".to_string()]
  );
  assert!(topology.store_names().is_empty());
  assert!(topology.repartition_points().is_empty());
}

#[test]
fn test_describe_indents_children() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.named("keep")
    .filter(&mut b, |_, _| true)
    .unwrap()
    .named("upper")
    .map_values(&mut b, |v| v.to_uppercase())
    .unwrap()
    .named("write")
    .to(&mut b, "output")
    .unwrap();
  s.named("swap")
    .map(&mut b, |k, v| (v.clone(), k.clone()))
    .unwrap();
  let description = b.build().unwrap().describe();

  let lines: Vec<&str> = description.lines().collect();
  assert_eq!(
    lines,
    vec![
      "KSTREAM-SOURCE-0000000000: Source (topics: [input])",
      "  keep: Processor",
      "    upper: Processor [value-changing]",
      "      write: Sink (topic: output)",
      "  swap: Processor [key-changing, value-changing]",
    ]
  );
}

#[test]
fn test_passthrough_preserves_records_and_timestamps() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.to(&mut b, "output").unwrap();
  let topology = b.build().unwrap();

  let transport = run(&topology, &[("a", "1"), ("b", "2")]);
  assert_eq!(
    read(&transport, "output"),
    vec![
      ("a".to_string(), "1".to_string()),
      ("b".to_string(), "2".to_string())
    ]
  );
  let history = transport.history("output").unwrap();
  assert_eq!(history[1].timestamp.timestamp_millis(), 1_001);
}

#[test]
fn test_records_from_unknown_topics_are_ignored() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.to(&mut b, "output").unwrap();
  let topology = b.build().unwrap();

  let transport = InMemoryTransport::new();
  let mut task = topology.create_task(0).unwrap();
  assert!(!task.reads("other"));
  task
    .process(&record("other", 0, "k", "v"), &transport, &StoreRegistry::new())
    .unwrap();
  assert!(transport.topics().is_empty());
  assert_eq!(task.processed(), 0);
}

#[test]
fn test_filter_and_filter_not_partition_the_input() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  let is_even = |_: &String, v: &String| v.parse::<i64>().map(|n| n % 2 == 0).unwrap_or(false);
  s.filter(&mut b, is_even).unwrap().to(&mut b, "even").unwrap();
  s.filter_not(&mut b, is_even)
    .unwrap()
    .to(&mut b, "odd")
    .unwrap();
  let topology = b.build().unwrap();

  let inputs: Vec<(String, String)> = (0..10).map(|i| (format!("k{}", i), i.to_string())).collect();
  let refs: Vec<(&str, &str)> = inputs.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
  let transport = run(&topology, &refs);

  let even = read(&transport, "even");
  let odd = read(&transport, "odd");
  assert_eq!(even.len() + odd.len(), inputs.len());
  assert!(even.iter().all(|e| !odd.contains(e)));
  assert_eq!(even[0], ("k0".to_string(), "0".to_string()));
  assert_eq!(odd[0], ("k1".to_string(), "1".to_string()));
}

#[test]
fn test_branch_routes_to_first_matching_predicate_only() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  let predicates: Vec<Predicate<String, String>> = vec![
    Arc::new(|_: &String, v: &String| v.starts_with('a')),
    Arc::new(|_: &String, v: &String| v.len() > 2),
  ];
  let branches = s.branch(&mut b, predicates).unwrap();
  branches[0].to(&mut b, "first").unwrap();
  branches[1].to(&mut b, "second").unwrap();
  let topology = b.build().unwrap();

  let transport = run(
    &topology,
    &[("1", "apple"), ("2", "pear"), ("3", "ok"), ("4", "ab")],
  );
  assert_eq!(
    read(&transport, "first"),
    vec![
      ("1".to_string(), "apple".to_string()),
      ("4".to_string(), "ab".to_string())
    ]
  );
  assert_eq!(
    read(&transport, "second"),
    vec![("2".to_string(), "pear".to_string())]
  );
}

#[test]
fn test_select_key_keeps_value() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.select_key(&mut b, |k, v| format!("{}:{}", k, v))
    .unwrap()
    .to(&mut b, "output")
    .unwrap();
  let topology = b.build().unwrap();

  let transport = run(&topology, &[("a", "x"), ("b", "y")]);
  assert_eq!(
    read(&transport, "output"),
    vec![
      ("a:x".to_string(), "x".to_string()),
      ("b:y".to_string(), "y".to_string())
    ]
  );
}

#[test]
fn test_flat_map_values_emits_in_order_depth_first() {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let log = seen.clone();

  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.flat_map_values(&mut b, |v| v.chars().map(|c| c.to_string()).collect::<Vec<_>>())
    .unwrap()
    .peek(&mut b, move |_, v| log.lock().unwrap().push(format!("peek {}", v)))
    .unwrap()
    .to(&mut b, "chars")
    .unwrap();
  let topology = b.build().unwrap();

  let transport = run(&topology, &[("w", "abc")]);
  assert_eq!(
    read(&transport, "chars"),
    vec![
      ("w".to_string(), "a".to_string()),
      ("w".to_string(), "b".to_string()),
      ("w".to_string(), "c".to_string())
    ]
  );
  assert_eq!(*seen.lock().unwrap(), vec!["peek a", "peek b", "peek c"]);
}

#[test]
fn test_map_with_explicit_output_serdes() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.map(&mut b, |_, v| (v.len() as i64, v.to_uppercase()))
    .unwrap()
    .to_with(
      &mut b,
      "lengths",
      crate::stream::Produced::with(I64Serde, StringSerde),
    )
    .unwrap();
  let topology = b.build().unwrap();

  let transport = run(&topology, &[("k", "hey")]);
  let history = transport.history("lengths").unwrap();
  assert_eq!(I64Serde.deserialize(&history[0].key).unwrap(), 3);
  assert_eq!(StringSerde.deserialize(&history[0].value).unwrap(), "HEY");
}

#[test]
fn test_dynamic_sink_rejects_empty_topic_at_runtime() {
  let mut b = builder();
  let s: KStream<String, String> = b.stream("input").unwrap();
  s.to_dynamic(
    &mut b,
    |_: &String, v: &String, _: &crate::topic::RecordContext| v.clone(),
    crate::stream::Produced::default(),
  )
  .unwrap();
  let topology = b.build().unwrap();

  let transport = InMemoryTransport::new();
  let mut task = topology.create_task(0).unwrap();
  let stores = StoreRegistry::new();
  task
    .process(&record("input", 0, "k", "routed"), &transport, &stores)
    .unwrap();
  assert_eq!(read(&transport, "routed").len(), 1);

  let err = task
    .process(&record("input", 1, "k", ""), &transport, &stores)
    .unwrap_err();
  assert!(err.is_invalid_argument());
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
  fn contents(&self) -> String {
    String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
  }
}

impl Write for SharedBuffer {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.0.lock().unwrap().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> io::Result<()> {
    Ok(())
  }
}

#[test]
fn test_print_writes_one_line_per_record() {
  let out = SharedBuffer::default();
  let custom = SharedBuffer::default();
  let mut b = builder();
  let s: KStream<String, String> = b
    .stream_with(&["input"], Consumed::default().named("source"))
    .unwrap();
  s.print(&mut b, Printed::to_writer(out.clone())).unwrap();
  s.named("shout")
    .print(
      &mut b,
      Printed::to_writer(custom.clone())
        .with_label("words")
        .with_key_value_mapper(|k: &String, v: &String| format!("{}={}", k, v.to_uppercase())),
    )
    .unwrap();
  let topology = b.build().unwrap();
  assert!(topology.graph().node_by_name("shout").is_some());
  assert!(topology.graph().node_by_name("KSTREAM-PRINTER-0000000000").is_some());

  run(&topology, &[("a", "x"), ("b", "y")]);
  assert_eq!(out.contents(), "[source]: \"a\", \"x\"\n[source]: \"b\", \"y\"\n");
  assert_eq!(custom.contents(), "[words]: a=X\n[words]: b=Y\n");
}
