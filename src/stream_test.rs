//! Tests for the stream DSL: node naming, change flags, serde propagation and
//! construction-time validation.

use crate::graph::NodeKind;
use crate::processor::Predicate;
use crate::serdes::{I64Serde, StringSerde};
use crate::stream::{Consumed, KStream, Produced, StreamBuilder};
use std::sync::Arc;

fn builder() -> StreamBuilder {
  StreamBuilder::new().with_default_serdes(StringSerde, StringSerde)
}

fn input(builder: &mut StreamBuilder) -> KStream<String, String> {
  builder.stream("input").unwrap()
}

fn always(result: bool) -> Predicate<String, String> {
  Arc::new(move |_: &String, _: &String| result)
}

#[test]
fn test_generated_names_use_prefix_and_shared_counter() {
  let mut b = builder();
  let s = input(&mut b);
  let f = s.filter(&mut b, |_, _| true).unwrap();
  let m = f.map_values(&mut b, |v| v.len() as i64).unwrap();

  assert_eq!(s.name(), "KSTREAM-SOURCE-0000000000");
  assert_eq!(f.name(), "KSTREAM-FILTER-0000000001");
  assert_eq!(m.name(), "KSTREAM-MAPVALUES-0000000002");
}

#[test]
fn test_named_overrides_next_node_only() {
  let mut b = builder();
  let s = input(&mut b);
  let f = s.named("only-long").filter(&mut b, |_, v| v.len() > 3).unwrap();
  let p = f.peek(&mut b, |_, _| {}).unwrap();

  assert_eq!(f.name(), "only-long");
  assert!(p.name().starts_with("KSTREAM-PEEK-"));
}

#[test]
fn test_duplicate_explicit_name_is_rejected() {
  let mut b = builder();
  let s = input(&mut b);
  s.named("step").filter(&mut b, |_, _| true).unwrap();
  let err = s.named("step").filter_not(&mut b, |_, _| true).unwrap_err();
  assert!(err.is_duplicate_name());
}

#[test]
fn test_empty_explicit_name_is_rejected() {
  let mut b = builder();
  let s = input(&mut b);
  let err = s.named("").peek(&mut b, |_, _| {}).unwrap_err();
  assert!(err.is_invalid_argument());
}

#[test]
fn test_map_and_flat_map_are_key_changing() {
  let mut b = builder();
  let s = input(&mut b);
  let m = s
    .map(&mut b, |k, v| (v.clone(), k.clone()))
    .unwrap();
  let fm = s
    .flat_map(&mut b, |k, v| vec![(k.clone(), v.clone())])
    .unwrap();

  for id in [m.node_id(), fm.node_id()] {
    let node = b.graph().node(id).unwrap();
    assert!(node.is_key_changing());
    assert!(node.is_value_changing());
  }
  assert!(m.key_serde().is_none());
  assert!(m.value_serde().is_none());
}

#[test]
fn test_map_values_and_flat_map_values_are_value_changing_only() {
  let mut b = builder();
  let s: KStream<String, String> = b
    .stream_with(&["input"], Consumed::with(StringSerde, StringSerde))
    .unwrap();
  let mv = s.map_values(&mut b, |v| v.len() as i64).unwrap();
  let fmv = s
    .flat_map_values(&mut b, |v| v.split(' ').map(str::to_string).collect::<Vec<_>>())
    .unwrap();

  for id in [mv.node_id(), fmv.node_id()] {
    let node = b.graph().node(id).unwrap();
    assert!(!node.is_key_changing());
    assert!(node.is_value_changing());
  }
  assert!(mv.key_serde().is_some());
  assert!(mv.value_serde().is_none());
  assert!(b.graph().node(mv.node_id()).unwrap().value_type().is::<i64>());
}

#[test]
fn test_select_key_changes_key_and_keeps_value_serde() {
  let mut b = builder();
  let s: KStream<String, String> = b
    .stream_with(&["input"], Consumed::with(StringSerde, StringSerde))
    .unwrap();
  let rekeyed = s.select_key(&mut b, |_, v| v.len() as i64).unwrap();

  let node = b.graph().node(rekeyed.node_id()).unwrap();
  assert!(node.is_key_changing());
  assert!(!node.is_value_changing());
  assert!(node.key_type().is::<i64>());
  assert!(rekeyed.key_serde().is_none());
  assert!(rekeyed.value_serde().is_some());
  assert!(rekeyed.name().starts_with("KSTREAM-KEY-SELECT-"));
}

#[test]
fn test_branch_returns_one_handle_per_predicate_in_order() {
  let mut b = builder();
  let s = input(&mut b);
  let branches = s
    .named("split")
    .branch(&mut b, vec![always(false), always(true), always(false)])
    .unwrap();

  let names: Vec<&str> = branches.iter().map(|h| h.name()).collect();
  assert_eq!(
    names,
    vec!["split-predicate-0", "split-predicate-1", "split-predicate-2"]
  );
  let branch = b.graph().node_by_name("split").unwrap();
  let children: Vec<usize> = branches.iter().map(|h| h.node_id()).collect();
  assert_eq!(branch.children(), children.as_slice());
}

#[test]
fn test_branch_without_predicates_is_rejected() {
  let mut b = builder();
  let s = input(&mut b);
  let err = s.branch(&mut b, Vec::new()).unwrap_err();
  assert!(err.is_invalid_argument());
  assert!(err.to_string().contains("branch"));
}

#[test]
fn test_branch_child_name_collision_is_rejected() {
  let mut b = builder();
  let s = input(&mut b);
  s.named("split-predicate-0").peek(&mut b, |_, _| {}).unwrap();
  let err = s
    .named("split")
    .branch(&mut b, vec![always(true)])
    .unwrap_err();
  assert!(err.is_duplicate_name());
}

#[test]
fn test_failed_branch_leaves_no_names_claimed() {
  let mut b = builder();
  let s = input(&mut b);
  s.named("split-predicate-1").peek(&mut b, |_, _| {}).unwrap();
  let err = s
    .named("split")
    .branch(&mut b, vec![always(true), always(false)])
    .unwrap_err();
  assert!(err.is_duplicate_name());
  assert!(b.graph().node_by_name("split").is_none());
  assert!(!b.names.contains("split-predicate-0"));

  let retried = s
    .named("split")
    .branch(&mut b, vec![always(true)])
    .unwrap();
  assert_eq!(retried[0].name(), "split-predicate-0");
}

#[test]
fn test_to_with_empty_topic_fails_before_processing() {
  let mut b = builder();
  let s = input(&mut b);
  let err = s.to(&mut b, "").unwrap_err();
  assert!(err.is_invalid_argument());
  assert!(err.to_string().contains("to"));
  assert_eq!(b.graph().len(), 1);
}

#[test]
fn test_to_adds_static_sink() {
  let mut b = builder();
  let s = input(&mut b);
  s.to_with(&mut b, "output", Produced::default().named("writer"))
    .unwrap();

  let sink = b.graph().node_by_name("writer").unwrap();
  assert_eq!(
    sink.kind(),
    &NodeKind::Sink {
      topic: Some("output".to_string())
    }
  );
}

#[test]
fn test_to_dynamic_adds_sink_without_static_topic() {
  let mut b = builder();
  let s = input(&mut b);
  s.to_dynamic(
    &mut b,
    |_: &String, v: &String, _: &crate::topic::RecordContext| format!("out-{}", v.len()),
    Produced::default(),
  )
  .unwrap();

  let sink = b.graph().nodes().last().unwrap();
  assert_eq!(sink.kind(), &NodeKind::Sink { topic: None });
}

#[test]
fn test_foreach_is_terminal_leaf() {
  let mut b = builder();
  let s = input(&mut b);
  s.foreach(&mut b, |_, _| {}).unwrap();
  let leaf = b.graph().nodes().last().unwrap();
  assert!(leaf.name().starts_with("KSTREAM-FOREACH-"));
  assert!(leaf.children().is_empty());
}

#[test]
fn test_build_fails_naming_node_without_serde() {
  let mut b = StreamBuilder::new();
  let s: KStream<String, i64> = b.stream("input").unwrap();
  s.to(&mut b, "output").unwrap();
  let err = b.build().unwrap_err();
  assert!(err.is_illegal_state());
  assert!(err.to_string().contains("KSTREAM-SOURCE-0000000000"));
}

#[test]
fn test_build_with_explicit_serdes_needs_no_defaults() {
  let mut b = StreamBuilder::new();
  let s: KStream<String, i64> = b
    .stream_with(&["input"], Consumed::with(StringSerde, I64Serde))
    .unwrap();
  s.to(&mut b, "output").unwrap();
  assert!(b.build().is_ok());
}

#[test]
fn test_stream_requires_topics() {
  let mut b = builder();
  let none: Result<KStream<String, String>, _> =
    b.stream_with(&[], Consumed::default());
  assert!(none.unwrap_err().is_invalid_argument());
  let empty: Result<KStream<String, String>, _> = b.stream("");
  assert!(empty.unwrap_err().is_invalid_argument());
}
