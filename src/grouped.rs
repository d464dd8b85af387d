//! Grouped streams and the tables their aggregations produce.
//!
//! Grouping adds no processing of its own: it fixes the key a following
//! aggregation is keyed on and records whether that key may differ from the
//! key the source partitioned by. Every aggregation materializes a
//! timestamped key-value store, queryable by name once the topology runs.

use crate::error::{Result, StreamsError};
use crate::graph::{GraphNode, NodeId, NodeKind};
use crate::named;
use crate::processor::{
  AggregateProcessor, Aggregator, PassThroughProcessor, Processor, ProcessorSupplier,
};
use crate::serdes::{I64Serde, Serde, SerdeDefaults, SharedSerde, resolve_key_serde, resolve_value_serde};
use crate::state::{StoreShape, StoreSpec};
use crate::stream::{KStream, StreamBuilder, StreamData, stateless};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Options for a grouping: the name of the key-selecting node and codecs.
pub struct Grouped<K, V> {
  pub(crate) name: Option<String>,
  pub(crate) key_serde: Option<SharedSerde<K>>,
  pub(crate) value_serde: Option<SharedSerde<V>>,
}

impl<K, V> Default for Grouped<K, V> {
  fn default() -> Self {
    Self {
      name: None,
      key_serde: None,
      value_serde: None,
    }
  }
}

impl<K, V> Grouped<K, V> {
  /// Groups with explicit key and value codecs.
  pub fn with(key: impl Serde<K> + 'static, value: impl Serde<V> + 'static) -> Self {
    Self {
      name: None,
      key_serde: Some(Arc::new(key)),
      value_serde: Some(Arc::new(value)),
    }
  }

  /// Sets only the key codec.
  pub fn key_serde(mut self, key: impl Serde<K> + 'static) -> Self {
    self.key_serde = Some(Arc::new(key));
    self
  }

  /// Names the grouping node.
  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }
}

/// A stream grouped by key, ready for aggregation.
pub struct GroupedStream<K, V> {
  node: NodeId,
  name: String,
  key_serde: Option<SharedSerde<K>>,
  value_serde: Option<SharedSerde<V>>,
  repartition_required: bool,
}

impl<K, V> fmt::Debug for GroupedStream<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GroupedStream")
      .field("node", &self.node)
      .field("name", &self.name)
      .field("repartition_required", &self.repartition_required)
      .finish()
  }
}

impl<K: StreamData, V: StreamData> GroupedStream<K, V> {
  pub(crate) fn new(
    builder: &StreamBuilder,
    node: NodeId,
    name: String,
    key_serde: Option<SharedSerde<K>>,
    value_serde: Option<SharedSerde<V>>,
  ) -> Self {
    let repartition_required = builder.graph.has_key_changing_ancestor(node);
    debug!(node = %name, repartition_required, "grouped stream");
    Self {
      node,
      name,
      key_serde,
      value_serde,
      repartition_required,
    }
  }

  /// Node the grouping hangs off.
  pub fn node_id(&self) -> NodeId {
    self.node
  }

  /// Name of that node.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// True if the grouping key may differ from the partitioning key upstream.
  pub fn repartition_required(&self) -> bool {
    self.repartition_required
  }

  /// Counts records per key into store `store`.
  pub fn count(&self, builder: &mut StreamBuilder, store: &str) -> Result<KTable<K, i64>> {
    let aggregator: Aggregator<K, V, i64> = Arc::new(|_: &K, _: &V, old: Option<i64>| old.unwrap_or(0) + 1);
    self.materialize(
      builder,
      named::AGGREGATE_NAME,
      store,
      aggregator,
      Some(Arc::new(I64Serde) as SharedSerde<i64>),
    )
  }

  /// Combines values per key with `reducer`; the first value of a key is kept as is.
  pub fn reduce<F>(&self, builder: &mut StreamBuilder, reducer: F, store: &str) -> Result<KTable<K, V>>
  where
    V: Clone,
    F: Fn(&V, &V) -> V + Send + Sync + 'static,
  {
    let aggregator: Aggregator<K, V, V> = Arc::new(move |_: &K, value: &V, old: Option<V>| match old {
      Some(old) => reducer(&old, value),
      None => value.clone(),
    });
    self.materialize(
      builder,
      named::REDUCE_NAME,
      store,
      aggregator,
      self.value_serde.clone(),
    )
  }

  /// Folds values per key into an aggregate starting from `initializer()`.
  pub fn aggregate<VA, I, A>(
    &self,
    builder: &mut StreamBuilder,
    initializer: I,
    aggregator: A,
    store: &str,
    aggregate_serde: impl Serde<VA> + 'static,
  ) -> Result<KTable<K, VA>>
  where
    VA: StreamData,
    I: Fn() -> VA + Send + Sync + 'static,
    A: Fn(&K, &V, VA) -> VA + Send + Sync + 'static,
  {
    let aggregator: Aggregator<K, V, VA> = Arc::new(move |key: &K, value: &V, old: Option<VA>| {
      let current = old.unwrap_or_else(&initializer);
      aggregator(key, value, current)
    });
    self.materialize(
      builder,
      named::AGGREGATE_NAME,
      store,
      aggregator,
      Some(Arc::new(aggregate_serde) as SharedSerde<VA>),
    )
  }

  fn materialize<VA: StreamData>(
    &self,
    builder: &mut StreamBuilder,
    prefix: &str,
    store: &str,
    aggregator: Aggregator<K, V, VA>,
    aggregate_serde: Option<SharedSerde<VA>>,
  ) -> Result<KTable<K, VA>> {
    if store.is_empty() {
      return Err(StreamsError::invalid_argument(
        prefix.trim_end_matches('-').to_lowercase(),
        "store name must not be empty",
      ));
    }
    builder.names.claim(store)?;
    let name = builder.names.resolve(None, prefix)?;
    builder
      .graph
      .add_store(StoreSpec::new(store, StoreShape::Timestamped))?;

    let node_name = name.clone();
    let store_name = store.to_string();
    let key_serde = self.key_serde.clone();
    let value_serde = aggregate_serde.clone();
    let supplier: ProcessorSupplier =
      Arc::new(move |defaults: &SerdeDefaults| -> Result<Box<dyn Processor>> {
        Ok(Box::new(AggregateProcessor {
          node: node_name.clone(),
          store: store_name.clone(),
          key_serde: resolve_key_serde(&key_serde, defaults, &node_name)?,
          aggregate_serde: resolve_value_serde(&aggregate_serde, defaults, &node_name)?,
          aggregator: aggregator.clone(),
        }))
      });
    let kind = NodeKind::Stateful {
      store: store.to_string(),
    };
    let id = builder.add_child(self.node, GraphNode::new::<K, VA>(name.clone(), kind, supplier))?;
    Ok(KTable {
      node: id,
      name,
      store_name: store.to_string(),
      key_serde: self.key_serde.clone(),
      value_serde,
    })
  }
}

/// Changelog view of an aggregation, backed by a queryable store.
pub struct KTable<K, V> {
  node: NodeId,
  name: String,
  store_name: String,
  key_serde: Option<SharedSerde<K>>,
  value_serde: Option<SharedSerde<V>>,
}

impl<K, V> fmt::Debug for KTable<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KTable")
      .field("node", &self.node)
      .field("name", &self.name)
      .field("store", &self.store_name)
      .finish()
  }
}

impl<K: StreamData, V: StreamData> KTable<K, V> {
  /// Node that maintains the table.
  pub fn node_id(&self) -> NodeId {
    self.node
  }

  /// Name of that node.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Store to query for the table's contents.
  pub fn queryable_store_name(&self) -> &str {
    &self.store_name
  }

  /// Stream of every update applied to the table.
  pub fn to_stream(&self, builder: &mut StreamBuilder) -> Result<KStream<K, V>> {
    let name = builder.names.resolve(None, named::TOSTREAM_NAME)?;
    let id = builder.add_child(
      self.node,
      GraphNode::new::<K, V>(
        name.clone(),
        NodeKind::Processor,
        stateless(|| PassThroughProcessor),
      ),
    )?;
    Ok(KStream::new(
      id,
      name,
      self.key_serde.clone(),
      self.value_serde.clone(),
    ))
  }
}
