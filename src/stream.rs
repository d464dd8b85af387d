//! # Stream DSL
//!
//! Fluent construction of a processing graph. A [`StreamBuilder`] is the
//! explicit construction context; every [`KStream`] operation takes it by
//! mutable reference, adds one or more nodes below the stream's node and
//! returns a new handle. The original handle stays valid and can be branched
//! from again. Nothing here touches records: arguments are validated and
//! names resolved at the call, and every failure is reported right there.
//!
//! ```rust
//! use kweave::serdes::StringSerde;
//! use kweave::stream::{KStream, StreamBuilder};
//!
//! let mut builder = StreamBuilder::new().with_default_serdes(StringSerde, StringSerde);
//! let input: KStream<String, String> = builder.stream("words")?;
//! input
//!     .filter(&mut builder, |_k, v| !v.is_empty())?
//!     .map_values(&mut builder, |v| v.to_uppercase())?
//!     .to(&mut builder, "shouted")?;
//! let topology = builder.build()?;
//! assert_eq!(topology.sink_topics(), vec!["shouted".to_string()]);
//! # Ok::<(), kweave::error::StreamsError>(())
//! ```

use crate::error::{Result, StreamsError};
use crate::graph::{GraphNode, NodeId, NodeKind, StreamGraph};
use crate::grouped::{Grouped, GroupedStream};
use crate::named::{self, NameRegistry};
use crate::processor::{
  Action, BranchProcessor, Datum, ErasedFlatMapper, ErasedFlatValueMapper, ErasedMapper,
  ErasedValueMapper, FilterProcessor, FlatMapProcessor, FlatMapValuesProcessor, MapProcessor,
  MapValuesProcessor, PassThroughProcessor, PeekProcessor, Predicate, Processor,
  ProcessorSupplier, Record, SinkProcessor, SourceProcessor, StaticTopicNameExtractor,
  TopicNameExtractor,
};
use crate::serdes::{Serde, SerdeDefaults, SharedSerde, resolve_key_serde, resolve_value_serde};
use crate::topology::Topology;
use std::fmt;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Types that can flow through a stream as keys or values.
pub trait StreamData: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> StreamData for T {}

/// Wraps a processor factory that does not depend on serde defaults.
pub(crate) fn stateless<P, F>(make: F) -> ProcessorSupplier
where
  P: Processor + 'static,
  F: Fn() -> P + Send + Sync + 'static,
{
  Arc::new(move |_: &SerdeDefaults| -> Result<Box<dyn Processor>> { Ok(Box::new(make())) })
}

/// How a source decodes its topics.
pub struct Consumed<K, V> {
  pub(crate) name: Option<String>,
  pub(crate) key_serde: Option<SharedSerde<K>>,
  pub(crate) value_serde: Option<SharedSerde<V>>,
}

impl<K, V> Default for Consumed<K, V> {
  fn default() -> Self {
    Self {
      name: None,
      key_serde: None,
      value_serde: None,
    }
  }
}

impl<K, V> Consumed<K, V> {
  /// Decodes with the given key and value serdes.
  pub fn with(key: impl Serde<K> + 'static, value: impl Serde<V> + 'static) -> Self {
    Self {
      name: None,
      key_serde: Some(Arc::new(key)),
      value_serde: Some(Arc::new(value)),
    }
  }

  /// Names the source node.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }
}

/// How a sink encodes records.
pub struct Produced<K, V> {
  pub(crate) name: Option<String>,
  pub(crate) key_serde: Option<SharedSerde<K>>,
  pub(crate) value_serde: Option<SharedSerde<V>>,
}

impl<K, V> Default for Produced<K, V> {
  fn default() -> Self {
    Self {
      name: None,
      key_serde: None,
      value_serde: None,
    }
  }
}

impl<K, V> Produced<K, V> {
  /// Encodes with the given key and value serdes.
  pub fn with(key: impl Serde<K> + 'static, value: impl Serde<V> + 'static) -> Self {
    Self {
      name: None,
      key_serde: Some(Arc::new(key)),
      value_serde: Some(Arc::new(value)),
    }
  }

  /// Names the sink node.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }
}

type KeyValueFormatter<K, V> = Arc<dyn Fn(&K, &V) -> String + Send + Sync>;
type SharedWriter = Arc<Mutex<dyn Write + Send>>;

/// Where and how [`KStream::print`] writes records.
///
/// Each record becomes one line, `[<label>]: <key>, <value>`. The label
/// defaults to the name of the node being printed.
pub struct Printed<K, V> {
  name: Option<String>,
  label: Option<String>,
  formatter: Option<KeyValueFormatter<K, V>>,
  writer: Option<SharedWriter>,
}

impl<K, V> Default for Printed<K, V> {
  fn default() -> Self {
    Self {
      name: None,
      label: None,
      formatter: None,
      writer: None,
    }
  }
}

impl<K, V> Printed<K, V> {
  /// Prints through `tracing` at info level.
  pub fn to_log() -> Self {
    Self::default()
  }

  /// Prints to `writer`, one line per record.
  pub fn to_writer(writer: impl Write + Send + 'static) -> Self {
    Self {
      writer: Some(Arc::new(Mutex::new(writer))),
      ..Self::default()
    }
  }

  /// Replaces the default label.
  pub fn with_label(mut self, label: impl Into<String>) -> Self {
    self.label = Some(label.into());
    self
  }

  /// Renders the `<key>, <value>` part with `formatter` instead of `Debug`.
  pub fn with_key_value_mapper<F>(mut self, formatter: F) -> Self
  where
    F: Fn(&K, &V) -> String + Send + Sync + 'static,
  {
    self.formatter = Some(Arc::new(formatter));
    self
  }

  /// Names the print node.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }
}

/// Graph-construction context shared by every stream handle of one topology.
///
/// Not safe for concurrent mutation; callers serialize construction.
#[derive(Debug, Default)]
pub struct StreamBuilder {
  pub(crate) graph: StreamGraph,
  pub(crate) names: NameRegistry,
  pub(crate) defaults: SerdeDefaults,
}

impl StreamBuilder {
  /// Creates an empty builder.
  pub fn new() -> Self {
    Self::default()
  }

  /// Registers the serdes used wherever a key or value serde is unknown.
  pub fn with_default_serdes<K: 'static, V: 'static>(
    mut self,
    key: impl Serde<K> + 'static,
    value: impl Serde<V> + 'static,
  ) -> Self {
    self.defaults.set_key::<K>(Arc::new(key));
    self.defaults.set_value::<V>(Arc::new(value));
    self
  }

  /// Reads `topic` using the default serdes.
  pub fn stream<K: StreamData, V: StreamData>(&mut self, topic: &str) -> Result<KStream<K, V>> {
    self.stream_with(&[topic], Consumed::default())
  }

  /// Reads `topics` with explicit decoding options.
  pub fn stream_with<K: StreamData, V: StreamData>(
    &mut self,
    topics: &[&str],
    consumed: Consumed<K, V>,
  ) -> Result<KStream<K, V>> {
    if topics.is_empty() {
      return Err(StreamsError::invalid_argument(
        "stream",
        "at least one topic is required",
      ));
    }
    if topics.iter().any(|t| t.is_empty()) {
      return Err(StreamsError::invalid_argument(
        "stream",
        "topic name must not be empty",
      ));
    }
    let name = self
      .names
      .resolve(consumed.name.as_deref(), named::SOURCE_NAME)?;

    let node_name = name.clone();
    let key_serde = consumed.key_serde.clone();
    let value_serde = consumed.value_serde.clone();
    let supplier: ProcessorSupplier =
      Arc::new(move |defaults: &SerdeDefaults| -> Result<Box<dyn Processor>> {
        Ok(Box::new(SourceProcessor {
          node: node_name.clone(),
          key_serde: resolve_key_serde(&key_serde, defaults, &node_name)?,
          value_serde: resolve_value_serde(&value_serde, defaults, &node_name)?,
        }))
      });
    let kind = NodeKind::Source {
      topics: topics.iter().map(|t| t.to_string()).collect(),
    };
    let id = self
      .graph
      .add_source(GraphNode::new::<K, V>(name.clone(), kind, supplier))?;
    Ok(KStream::new(id, name, consumed.key_serde, consumed.value_serde))
  }

  /// The graph built so far.
  pub fn graph(&self) -> &StreamGraph {
    &self.graph
  }

  /// Freezes the graph into a topology.
  pub fn build(self) -> Result<Topology> {
    Topology::new(self.graph, self.defaults)
  }

  pub(crate) fn add_child(&mut self, parent: NodeId, node: GraphNode) -> Result<NodeId> {
    self.graph.add_node(parent, node)
  }
}

/// Handle on a stream of `K`/`V` records at one node of the graph.
pub struct KStream<K, V> {
  node: NodeId,
  name: String,
  key_serde: Option<SharedSerde<K>>,
  value_serde: Option<SharedSerde<V>>,
  pending_name: Option<String>,
}

impl<K, V> Clone for KStream<K, V> {
  fn clone(&self) -> Self {
    Self {
      node: self.node,
      name: self.name.clone(),
      key_serde: self.key_serde.clone(),
      value_serde: self.value_serde.clone(),
      pending_name: self.pending_name.clone(),
    }
  }
}

impl<K, V> fmt::Debug for KStream<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KStream")
      .field("node", &self.node)
      .field("name", &self.name)
      .field("key_serde", &self.key_serde.is_some())
      .field("value_serde", &self.value_serde.is_some())
      .finish()
  }
}

impl<K: StreamData, V: StreamData> KStream<K, V> {
  pub(crate) fn new(
    node: NodeId,
    name: String,
    key_serde: Option<SharedSerde<K>>,
    value_serde: Option<SharedSerde<V>>,
  ) -> Self {
    Self {
      node,
      name,
      key_serde,
      value_serde,
      pending_name: None,
    }
  }

  /// Node this handle points at.
  pub fn node_id(&self) -> NodeId {
    self.node
  }

  /// Name of that node.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Key serde, if known.
  pub fn key_serde(&self) -> Option<&SharedSerde<K>> {
    self.key_serde.as_ref()
  }

  /// Value serde, if known.
  pub fn value_serde(&self) -> Option<&SharedSerde<V>> {
    self.value_serde.as_ref()
  }

  /// Returns a handle whose next operation creates a node called `name`.
  pub fn named(&self, name: impl Into<String>) -> Self {
    let mut stream = self.clone();
    stream.pending_name = Some(name.into());
    stream
  }

  fn resolve_name(&self, builder: &mut StreamBuilder, prefix: &str) -> Result<String> {
    builder.names.resolve(self.pending_name.as_deref(), prefix)
  }

  fn derive<KR: StreamData, VR: StreamData>(
    &self,
    node: NodeId,
    name: String,
    key_serde: Option<SharedSerde<KR>>,
    value_serde: Option<SharedSerde<VR>>,
  ) -> KStream<KR, VR> {
    KStream::new(node, name, key_serde, value_serde)
  }

  fn do_filter<P>(&self, builder: &mut StreamBuilder, predicate: P, negate: bool) -> Result<Self>
  where
    P: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::FILTER_NAME)?;
    let predicate: Predicate<K, V> = Arc::new(predicate);
    let node_name = name.clone();
    let supplier = stateless(move || FilterProcessor {
      node: node_name.clone(),
      predicate: predicate.clone(),
      negate,
    });
    let id = builder.add_child(
      self.node,
      GraphNode::new::<K, V>(name.clone(), NodeKind::Processor, supplier),
    )?;
    Ok(self.derive(id, name, self.key_serde.clone(), self.value_serde.clone()))
  }

  /// Keeps records for which `predicate` holds.
  pub fn filter<P>(&self, builder: &mut StreamBuilder, predicate: P) -> Result<Self>
  where
    P: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.do_filter(builder, predicate, false)
  }

  /// Keeps records for which `predicate` does not hold.
  pub fn filter_not<P>(&self, builder: &mut StreamBuilder, predicate: P) -> Result<Self>
  where
    P: Fn(&K, &V) -> bool + Send + Sync + 'static,
  {
    self.do_filter(builder, predicate, true)
  }

  /// Replaces key and value. Both serdes become unknown.
  pub fn map<KR, VR, F>(&self, builder: &mut StreamBuilder, mapper: F) -> Result<KStream<KR, VR>>
  where
    KR: StreamData,
    VR: StreamData,
    F: Fn(&K, &V) -> (KR, VR) + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::MAP_NAME)?;
    let mapper: ErasedMapper = Arc::new(move |node: &str, record: &Record| -> Result<(Datum, Datum)> {
      let (key, value) = mapper(record.key_as::<K>(node)?, record.value_as::<V>(node)?);
      Ok((Arc::new(key) as Datum, Arc::new(value) as Datum))
    });
    let id = self.add_map_node::<KR, VR>(builder, name.clone(), mapper, true, true)?;
    Ok(self.derive(id, name, None, None))
  }

  fn add_map_node<KR: StreamData, VR: StreamData>(
    &self,
    builder: &mut StreamBuilder,
    name: String,
    mapper: ErasedMapper,
    key_changing: bool,
    value_changing: bool,
  ) -> Result<NodeId> {
    let node_name = name.clone();
    let supplier = stateless(move || MapProcessor {
      node: node_name.clone(),
      mapper: mapper.clone(),
    });
    builder.add_child(
      self.node,
      GraphNode::new::<KR, VR>(name, NodeKind::Processor, supplier)
        .with_key_changing(key_changing)
        .with_value_changing(value_changing),
    )
  }

  /// Replaces the value using only the value. The key serde is kept.
  pub fn map_values<VR, F>(&self, builder: &mut StreamBuilder, mapper: F) -> Result<KStream<K, VR>>
  where
    VR: StreamData,
    F: Fn(&V) -> VR + Send + Sync + 'static,
  {
    self.map_values_with_key(builder, move |_, v| mapper(v))
  }

  /// Replaces the value using key and value. The key serde is kept.
  pub fn map_values_with_key<VR, F>(
    &self,
    builder: &mut StreamBuilder,
    mapper: F,
  ) -> Result<KStream<K, VR>>
  where
    VR: StreamData,
    F: Fn(&K, &V) -> VR + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::MAPVALUES_NAME)?;
    let mapper: ErasedValueMapper = Arc::new(move |node: &str, record: &Record| -> Result<Datum> {
      let value = mapper(record.key_as::<K>(node)?, record.value_as::<V>(node)?);
      Ok(Arc::new(value) as Datum)
    });
    let node_name = name.clone();
    let supplier = stateless(move || MapValuesProcessor {
      node: node_name.clone(),
      mapper: mapper.clone(),
    });
    let id = builder.add_child(
      self.node,
      GraphNode::new::<K, VR>(name.clone(), NodeKind::Processor, supplier).with_value_changing(true),
    )?;
    Ok(self.derive(id, name, self.key_serde.clone(), None))
  }

  /// Expands each record into zero or more key/value pairs.
  pub fn flat_map<KR, VR, I, F>(
    &self,
    builder: &mut StreamBuilder,
    mapper: F,
  ) -> Result<KStream<KR, VR>>
  where
    KR: StreamData,
    VR: StreamData,
    I: IntoIterator<Item = (KR, VR)>,
    F: Fn(&K, &V) -> I + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::FLATMAP_NAME)?;
    let mapper: ErasedFlatMapper =
      Arc::new(move |node: &str, record: &Record| -> Result<Vec<(Datum, Datum)>> {
        Ok(
          mapper(record.key_as::<K>(node)?, record.value_as::<V>(node)?)
            .into_iter()
            .map(|(k, v)| (Arc::new(k) as Datum, Arc::new(v) as Datum))
            .collect(),
        )
      });
    let node_name = name.clone();
    let supplier = stateless(move || FlatMapProcessor {
      node: node_name.clone(),
      mapper: mapper.clone(),
    });
    let id = builder.add_child(
      self.node,
      GraphNode::new::<KR, VR>(name.clone(), NodeKind::Processor, supplier)
        .with_key_changing(true)
        .with_value_changing(true),
    )?;
    Ok(self.derive(id, name, None, None))
  }

  /// Expands each value into zero or more values under the same key.
  pub fn flat_map_values<VR, I, F>(
    &self,
    builder: &mut StreamBuilder,
    mapper: F,
  ) -> Result<KStream<K, VR>>
  where
    VR: StreamData,
    I: IntoIterator<Item = VR>,
    F: Fn(&V) -> I + Send + Sync + 'static,
  {
    self.flat_map_values_with_key(builder, move |_, v| mapper(v))
  }

  /// Expands each record into zero or more values under the same key.
  pub fn flat_map_values_with_key<VR, I, F>(
    &self,
    builder: &mut StreamBuilder,
    mapper: F,
  ) -> Result<KStream<K, VR>>
  where
    VR: StreamData,
    I: IntoIterator<Item = VR>,
    F: Fn(&K, &V) -> I + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::FLATMAPVALUES_NAME)?;
    let mapper: ErasedFlatValueMapper =
      Arc::new(move |node: &str, record: &Record| -> Result<Vec<Datum>> {
        Ok(
          mapper(record.key_as::<K>(node)?, record.value_as::<V>(node)?)
            .into_iter()
            .map(|v| Arc::new(v) as Datum)
            .collect(),
        )
      });
    let node_name = name.clone();
    let supplier = stateless(move || FlatMapValuesProcessor {
      node: node_name.clone(),
      mapper: mapper.clone(),
    });
    let id = builder.add_child(
      self.node,
      GraphNode::new::<K, VR>(name.clone(), NodeKind::Processor, supplier).with_value_changing(true),
    )?;
    Ok(self.derive(id, name, self.key_serde.clone(), None))
  }

  /// Derives a new key from each record; the value passes through untouched.
  pub fn select_key<KR, F>(&self, builder: &mut StreamBuilder, selector: F) -> Result<KStream<KR, V>>
  where
    KR: StreamData,
    F: Fn(&K, &V) -> KR + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, named::KEY_SELECT_NAME)?;
    let id = self.add_select_key_node(builder, name.clone(), selector)?;
    Ok(self.derive(id, name, None, self.value_serde.clone()))
  }

  /// Select-key as a restricted map: new key, same value datum.
  fn add_select_key_node<KR, F>(
    &self,
    builder: &mut StreamBuilder,
    name: String,
    selector: F,
  ) -> Result<NodeId>
  where
    KR: StreamData,
    F: Fn(&K, &V) -> KR + Send + Sync + 'static,
  {
    let mapper: ErasedMapper = Arc::new(move |node: &str, record: &Record| -> Result<(Datum, Datum)> {
      let key = selector(record.key_as::<K>(node)?, record.value_as::<V>(node)?);
      Ok((Arc::new(key) as Datum, record.value.clone()))
    });
    self.add_map_node::<KR, V>(builder, name, mapper, true, false)
  }

  /// Splits the stream by predicates, evaluated in order.
  ///
  /// A record goes to the branch of the first predicate it satisfies and is
  /// dropped if it satisfies none. Returns one handle per predicate, in
  /// predicate order.
  pub fn branch(
    &self,
    builder: &mut StreamBuilder,
    predicates: Vec<Predicate<K, V>>,
  ) -> Result<Vec<Self>> {
    if predicates.is_empty() {
      return Err(StreamsError::invalid_argument(
        "branch",
        "at least one predicate is required",
      ));
    }
    let count = predicates.len();
    let (branch_name, child_names) = builder.names.resolve_with(
      self.pending_name.as_deref(),
      named::BRANCH_NAME,
      |branch| (0..count).map(|i| named::branch_child_name(branch, i)).collect(),
    )?;

    let node_name = branch_name.clone();
    let supplier = stateless(move || BranchProcessor {
      node: node_name.clone(),
      predicates: predicates.clone(),
    });
    let branch_id = builder.add_child(
      self.node,
      GraphNode::new::<K, V>(branch_name, NodeKind::Processor, supplier),
    )?;

    let mut branches = Vec::with_capacity(child_names.len());
    for child in child_names {
      let id = builder.add_child(
        branch_id,
        GraphNode::new::<K, V>(
          child.clone(),
          NodeKind::Processor,
          stateless(|| PassThroughProcessor),
        ),
      )?;
      branches.push(self.derive(id, child, self.key_serde.clone(), self.value_serde.clone()));
    }
    Ok(branches)
  }

  fn add_peek_node<A>(
    &self,
    builder: &mut StreamBuilder,
    action: A,
    prefix: &str,
    forward: bool,
  ) -> Result<(NodeId, String)>
  where
    A: Fn(&K, &V) + Send + Sync + 'static,
  {
    let name = self.resolve_name(builder, prefix)?;
    let action: Action<K, V> = Arc::new(action);
    let node_name = name.clone();
    let supplier = stateless(move || PeekProcessor {
      node: node_name.clone(),
      action: action.clone(),
      forward,
    });
    let id = builder.add_child(
      self.node,
      GraphNode::new::<K, V>(name.clone(), NodeKind::Processor, supplier),
    )?;
    Ok((id, name))
  }

  /// Runs `action` on each record and forwards it unchanged.
  pub fn peek<A>(&self, builder: &mut StreamBuilder, action: A) -> Result<Self>
  where
    A: Fn(&K, &V) + Send + Sync + 'static,
  {
    let (id, name) = self.add_peek_node(builder, action, named::PEEK_NAME, true)?;
    Ok(self.derive(id, name, self.key_serde.clone(), self.value_serde.clone()))
  }

  /// Runs `action` on each record. Terminal.
  pub fn foreach<A>(&self, builder: &mut StreamBuilder, action: A) -> Result<()>
  where
    A: Fn(&K, &V) + Send + Sync + 'static,
  {
    self.add_peek_node(builder, action, named::FOREACH_NAME, false)?;
    Ok(())
  }

  /// Writes every record as a line of text. Terminal.
  pub fn print(&self, builder: &mut StreamBuilder, printed: Printed<K, V>) -> Result<()>
  where
    K: fmt::Debug,
    V: fmt::Debug,
  {
    let explicit = printed.name.as_deref().or(self.pending_name.as_deref());
    let name = builder.names.resolve(explicit, named::PRINTER_NAME)?;
    let label = printed.label.unwrap_or_else(|| self.name.clone());
    let formatter = printed.formatter;
    let writer = printed.writer;
    let action: Action<K, V> = Arc::new(move |key: &K, value: &V| {
      let line = match &formatter {
        Some(format) => format(key, value),
        None => format!("{:?}, {:?}", key, value),
      };
      let Some(writer) = &writer else {
        info!(label = %label, "{}", line);
        return;
      };
      let written = match writer.lock() {
        Ok(mut out) => writeln!(out, "[{}]: {}", label, line),
        Err(_) => {
          warn!(label = %label, "print writer lock poisoned, dropping line");
          return;
        }
      };
      if let Err(e) = written {
        warn!(label = %label, error = %e, "failed to print record");
      }
    });

    let node_name = name.clone();
    let supplier = stateless(move || PeekProcessor {
      node: node_name.clone(),
      action: action.clone(),
      forward: false,
    });
    builder.add_child(
      self.node,
      GraphNode::new::<K, V>(name, NodeKind::Processor, supplier),
    )?;
    Ok(())
  }

  /// Publishes every record to `topic` using the stream's (or default) serdes.
  pub fn to(&self, builder: &mut StreamBuilder, topic: &str) -> Result<()> {
    self.to_with(builder, topic, Produced::default())
  }

  /// Publishes every record to `topic` with explicit encoding options.
  pub fn to_with(
    &self,
    builder: &mut StreamBuilder,
    topic: &str,
    produced: Produced<K, V>,
  ) -> Result<()> {
    if topic.is_empty() {
      return Err(StreamsError::invalid_argument(
        "to",
        "topic name must not be empty",
      ));
    }
    self.add_sink(
      builder,
      Arc::new(StaticTopicNameExtractor(topic.to_string())),
      Some(topic.to_string()),
      produced,
    )
  }

  /// Publishes each record to the topic chosen by `extractor`.
  pub fn to_dynamic<E>(
    &self,
    builder: &mut StreamBuilder,
    extractor: E,
    produced: Produced<K, V>,
  ) -> Result<()>
  where
    E: TopicNameExtractor<K, V> + 'static,
  {
    self.add_sink(builder, Arc::new(extractor), None, produced)
  }

  fn add_sink(
    &self,
    builder: &mut StreamBuilder,
    extractor: Arc<dyn TopicNameExtractor<K, V>>,
    topic: Option<String>,
    produced: Produced<K, V>,
  ) -> Result<()> {
    let explicit = produced.name.as_deref().or(self.pending_name.as_deref());
    let name = builder.names.resolve(explicit, named::SINK_NAME)?;
    let key_serde = produced.key_serde.or_else(|| self.key_serde.clone());
    let value_serde = produced.value_serde.or_else(|| self.value_serde.clone());

    let node_name = name.clone();
    let supplier: ProcessorSupplier =
      Arc::new(move |defaults: &SerdeDefaults| -> Result<Box<dyn Processor>> {
        Ok(Box::new(SinkProcessor {
          node: node_name.clone(),
          extractor: extractor.clone(),
          key_serde: resolve_key_serde(&key_serde, defaults, &node_name)?,
          value_serde: resolve_value_serde(&value_serde, defaults, &node_name)?,
        }))
      });
    builder.add_child(
      self.node,
      GraphNode::new::<K, V>(name, NodeKind::Sink { topic }, supplier),
    )?;
    Ok(())
  }

  /// Re-keys the stream and groups it for aggregation.
  ///
  /// Always adds a key-changing node, so a repartition is required before the
  /// aggregation that follows.
  pub fn group_by<KR, F>(
    &self,
    builder: &mut StreamBuilder,
    selector: F,
    grouped: Grouped<KR, V>,
  ) -> Result<GroupedStream<KR, V>>
  where
    KR: StreamData,
    F: Fn(&K, &V) -> KR + Send + Sync + 'static,
  {
    let explicit = grouped.name.as_deref().or(self.pending_name.as_deref());
    let name = builder.names.resolve(explicit, named::KEY_SELECT_NAME)?;
    let id = self.add_select_key_node(builder, name.clone(), selector)?;
    let value_serde = grouped.value_serde.or_else(|| self.value_serde.clone());
    Ok(GroupedStream::new(builder, id, name, grouped.key_serde, value_serde))
  }

  /// Groups by the existing key without adding a node.
  pub fn group_by_key(
    &self,
    builder: &mut StreamBuilder,
    grouped: Grouped<K, V>,
  ) -> GroupedStream<K, V> {
    let key_serde = grouped.key_serde.or_else(|| self.key_serde.clone());
    let value_serde = grouped.value_serde.or_else(|| self.value_serde.clone());
    GroupedStream::new(builder, self.node, self.name.clone(), key_serde, value_serde)
  }
}
