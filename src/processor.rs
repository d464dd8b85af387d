//! # Processors
//!
//! The processing action attached to every graph node. Records travel between
//! processors type-erased as [`Datum`]s (`Arc<dyn Any + Send + Sync>`), so a
//! value is shared rather than copied when it fans out. Each processor
//! downcasts to the types its node declared; a mismatch surfaces as
//! [`StreamsError::TypeMismatch`].
//!
//! A processor never calls its children directly. It hands records to
//! [`ProcessorContext::forward`] (all children) or
//! [`ProcessorContext::forward_to`] (one child), and the task dispatches them
//! depth-first once `process` returns.

use crate::error::{Result, StreamsError};
use crate::serdes::{SerdeDefaults, SharedSerde};
use crate::state::{StateStore, StoreRegistry, encode_timestamped, decode_timestamped};
use crate::topic::RecordContext;
use crate::transport::PartitionTransport;
use bytes::Bytes;
use std::any::Any;
use std::sync::Arc;
use tracing::trace;

/// A type-erased key or value.
pub type Datum = Arc<dyn Any + Send + Sync>;

/// Predicate over a typed record.
pub type Predicate<K, V> = Arc<dyn Fn(&K, &V) -> bool + Send + Sync>;

/// Side effect over a typed record.
pub type Action<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Builds a node's processor when a task is created, resolving unknown serdes
/// against the builder defaults.
pub type ProcessorSupplier =
  Arc<dyn Fn(&SerdeDefaults) -> Result<Box<dyn Processor>> + Send + Sync>;

pub(crate) type ErasedMapper = Arc<dyn Fn(&str, &Record) -> Result<(Datum, Datum)> + Send + Sync>;
pub(crate) type ErasedValueMapper = Arc<dyn Fn(&str, &Record) -> Result<Datum> + Send + Sync>;
pub(crate) type ErasedFlatMapper =
  Arc<dyn Fn(&str, &Record) -> Result<Vec<(Datum, Datum)>> + Send + Sync>;
pub(crate) type ErasedFlatValueMapper = Arc<dyn Fn(&str, &Record) -> Result<Vec<Datum>> + Send + Sync>;

/// A record in flight between processors.
#[derive(Clone)]
pub struct Record {
  /// Erased key.
  pub key: Datum,
  /// Erased value.
  pub value: Datum,
  /// Where the originating input record came from.
  pub context: RecordContext,
}

impl Record {
  /// Creates a record.
  pub fn new(key: Datum, value: Datum, context: RecordContext) -> Self {
    Self {
      key,
      value,
      context,
    }
  }

  /// Borrows the key as `K`, failing with a type mismatch naming `node`.
  pub fn key_as<K: 'static>(&self, node: &str) -> Result<&K> {
    self
      .key
      .downcast_ref::<K>()
      .ok_or_else(|| StreamsError::TypeMismatch {
        node: node.to_string(),
        expected: std::any::type_name::<K>(),
      })
  }

  /// Borrows the value as `V`, failing with a type mismatch naming `node`.
  pub fn value_as<V: 'static>(&self, node: &str) -> Result<&V> {
    self
      .value
      .downcast_ref::<V>()
      .ok_or_else(|| StreamsError::TypeMismatch {
        node: node.to_string(),
        expected: std::any::type_name::<V>(),
      })
  }

  /// Same context, new key and value.
  pub fn with_key_value(&self, key: Datum, value: Datum) -> Self {
    Self::new(key, value, self.context.clone())
  }
}

/// Routing of a forwarded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
  /// Every child, in attachment order.
  All,
  /// Only the child at this index.
  Child(usize),
}

/// What a processor can see and do while handling one record.
pub struct ProcessorContext<'a> {
  node: &'a str,
  partition: u32,
  transport: &'a dyn PartitionTransport,
  stores: &'a StoreRegistry,
  forwarded: Vec<(Forward, Record)>,
}

impl<'a> ProcessorContext<'a> {
  pub(crate) fn new(
    node: &'a str,
    partition: u32,
    transport: &'a dyn PartitionTransport,
    stores: &'a StoreRegistry,
  ) -> Self {
    Self {
      node,
      partition,
      transport,
      stores,
      forwarded: Vec::new(),
    }
  }

  /// Name of the node being executed.
  pub fn node_name(&self) -> &str {
    self.node
  }

  /// Partition served by the task.
  pub fn partition(&self) -> u32 {
    self.partition
  }

  /// Sends `record` to every child.
  pub fn forward(&mut self, record: Record) {
    self.forwarded.push((Forward::All, record));
  }

  /// Sends `record` to the child at `index` only.
  pub fn forward_to(&mut self, index: usize, record: Record) {
    self.forwarded.push((Forward::Child(index), record));
  }

  /// The task's instance of store `name`.
  pub fn store(&self, name: &str) -> Result<Arc<StateStore>> {
    self.stores.get(name, self.partition)
  }

  /// Transport used by sinks.
  pub fn transport(&self) -> &dyn PartitionTransport {
    self.transport
  }

  pub(crate) fn take_forwarded(&mut self) -> Vec<(Forward, Record)> {
    std::mem::take(&mut self.forwarded)
  }
}

/// A node's processing action.
pub trait Processor: Send {
  /// Handles one record, forwarding any output through `ctx`.
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()>;
}

/// Decodes raw transport bytes into typed keys and values.
pub(crate) struct SourceProcessor<K, V> {
  pub(crate) node: String,
  pub(crate) key_serde: SharedSerde<K>,
  pub(crate) value_serde: SharedSerde<V>,
}

impl<K, V> Processor for SourceProcessor<K, V>
where
  K: Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let key = self.key_serde.deserialize(record.key_as::<Bytes>(&self.node)?)?;
    let value = self
      .value_serde
      .deserialize(record.value_as::<Bytes>(&self.node)?)?;
    trace!(node = %self.node, offset = record.context.offset, "decoded source record");
    ctx.forward(record.with_key_value(Arc::new(key), Arc::new(value)));
    Ok(())
  }
}

/// Forwards records for which the predicate holds (or fails, when negated).
pub(crate) struct FilterProcessor<K, V> {
  pub(crate) node: String,
  pub(crate) predicate: Predicate<K, V>,
  pub(crate) negate: bool,
}

impl<K: 'static, V: 'static> Processor for FilterProcessor<K, V> {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let keep = (self.predicate)(record.key_as::<K>(&self.node)?, record.value_as::<V>(&self.node)?);
    if keep != self.negate {
      ctx.forward(record);
    }
    Ok(())
  }
}

/// Replaces key and value. Select-key is the restricted form that keeps the value.
pub(crate) struct MapProcessor {
  pub(crate) node: String,
  pub(crate) mapper: ErasedMapper,
}

impl Processor for MapProcessor {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let (key, value) = (self.mapper)(&self.node, &record)?;
    ctx.forward(record.with_key_value(key, value));
    Ok(())
  }
}

/// Replaces the value, keeping the key.
pub(crate) struct MapValuesProcessor {
  pub(crate) node: String,
  pub(crate) mapper: ErasedValueMapper,
}

impl Processor for MapValuesProcessor {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let value = (self.mapper)(&self.node, &record)?;
    ctx.forward(record.with_key_value(record.key.clone(), value));
    Ok(())
  }
}

/// Expands one record into zero or more key/value pairs, in order.
pub(crate) struct FlatMapProcessor {
  pub(crate) node: String,
  pub(crate) mapper: ErasedFlatMapper,
}

impl Processor for FlatMapProcessor {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    for (key, value) in (self.mapper)(&self.node, &record)? {
      ctx.forward(record.with_key_value(key, value));
    }
    Ok(())
  }
}

/// Expands one record into zero or more values under the same key, in order.
pub(crate) struct FlatMapValuesProcessor {
  pub(crate) node: String,
  pub(crate) mapper: ErasedFlatValueMapper,
}

impl Processor for FlatMapValuesProcessor {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    for value in (self.mapper)(&self.node, &record)? {
      ctx.forward(record.with_key_value(record.key.clone(), value));
    }
    Ok(())
  }
}

/// Routes each record to the child of the first matching predicate.
pub(crate) struct BranchProcessor<K, V> {
  pub(crate) node: String,
  pub(crate) predicates: Vec<Predicate<K, V>>,
}

impl<K: 'static, V: 'static> Processor for BranchProcessor<K, V> {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let key = record.key_as::<K>(&self.node)?;
    let value = record.value_as::<V>(&self.node)?;
    if let Some(index) = self.predicates.iter().position(|p| p(key, value)) {
      ctx.forward_to(index, record);
    }
    Ok(())
  }
}

/// Forwards every record unchanged.
pub(crate) struct PassThroughProcessor;

impl Processor for PassThroughProcessor {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    ctx.forward(record);
    Ok(())
  }
}

/// Runs a side effect; forwards the record unless it is terminal (foreach).
pub(crate) struct PeekProcessor<K, V> {
  pub(crate) node: String,
  pub(crate) action: Action<K, V>,
  pub(crate) forward: bool,
}

impl<K: 'static, V: 'static> Processor for PeekProcessor<K, V> {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    (self.action)(record.key_as::<K>(&self.node)?, record.value_as::<V>(&self.node)?);
    if self.forward {
      ctx.forward(record);
    }
    Ok(())
  }
}

/// Chooses the destination topic of a record.
pub trait TopicNameExtractor<K, V>: Send + Sync {
  /// Topic for this record.
  fn extract(&self, key: &K, value: &V, context: &RecordContext) -> String;
}

impl<K, V, F> TopicNameExtractor<K, V> for F
where
  F: Fn(&K, &V, &RecordContext) -> String + Send + Sync,
{
  fn extract(&self, key: &K, value: &V, context: &RecordContext) -> String {
    self(key, value, context)
  }
}

/// Routes every record to the same topic.
#[derive(Debug, Clone)]
pub struct StaticTopicNameExtractor(pub String);

impl<K, V> TopicNameExtractor<K, V> for StaticTopicNameExtractor {
  fn extract(&self, _key: &K, _value: &V, _context: &RecordContext) -> String {
    self.0.clone()
  }
}

/// Encodes records and publishes them to their destination topic.
pub(crate) struct SinkProcessor<K, V> {
  pub(crate) node: String,
  pub(crate) extractor: Arc<dyn TopicNameExtractor<K, V>>,
  pub(crate) key_serde: SharedSerde<K>,
  pub(crate) value_serde: SharedSerde<V>,
}

impl<K: 'static, V: 'static> Processor for SinkProcessor<K, V> {
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let key = record.key_as::<K>(&self.node)?;
    let value = record.value_as::<V>(&self.node)?;
    let topic = self.extractor.extract(key, value, &record.context);
    if topic.is_empty() {
      return Err(StreamsError::invalid_argument(
        self.node.clone(),
        "topic name extractor returned an empty topic",
      ));
    }
    let offset = ctx.transport().publish_at(
      &topic,
      self.key_serde.serialize(key)?,
      self.value_serde.serialize(value)?,
      record.context.timestamp,
    )?;
    trace!(node = %self.node, topic = %topic, offset, "sink published record");
    Ok(())
  }
}

/// Folds a record into the aggregate `old` (absent for a new key).
pub(crate) type Aggregator<K, V, VA> = Arc<dyn Fn(&K, &V, Option<VA>) -> VA + Send + Sync>;

/// Keyed aggregation into a timestamped store, forwarding each new aggregate.
pub(crate) struct AggregateProcessor<K, V, VA> {
  pub(crate) node: String,
  pub(crate) store: String,
  pub(crate) key_serde: SharedSerde<K>,
  pub(crate) aggregate_serde: SharedSerde<VA>,
  pub(crate) aggregator: Aggregator<K, V, VA>,
}

impl<K, V, VA> Processor for AggregateProcessor<K, V, VA>
where
  K: 'static,
  V: 'static,
  VA: Send + Sync + 'static,
{
  fn process(&mut self, ctx: &mut ProcessorContext<'_>, record: Record) -> Result<()> {
    let key = record.key_as::<K>(&self.node)?;
    let value = record.value_as::<V>(&self.node)?;
    let store = ctx.store(&self.store)?;

    let key_bytes = self.key_serde.serialize(key)?;
    let old = match store.get(&key_bytes)? {
      Some(raw) => {
        let (_, encoded) = decode_timestamped(&raw)?;
        Some(self.aggregate_serde.deserialize(encoded)?)
      }
      None => None,
    };
    let updated = (self.aggregator)(key, value, old);
    let timestamp = record.context.timestamp.timestamp_millis();
    store.put(
      key_bytes,
      encode_timestamped(timestamp, &self.aggregate_serde.serialize(&updated)?),
    )?;
    ctx.forward(record.with_key_value(record.key.clone(), Arc::new(updated)));
    Ok(())
  }
}
