//! # Topology
//!
//! A frozen [`StreamGraph`] plus the serde defaults it was built with. A
//! topology is immutable and can be instantiated any number of times: each
//! [`StreamTask`] owns a fresh processor per node and serves one partition.
//!
//! Execution is synchronous and depth-first. A record read from a source
//! topic runs through its source node; every record a processor forwards is
//! taken all the way down its subtree before the processor's next output is
//! looked at. This keeps per-partition order intact end to end.

use crate::error::{Result, StreamsError};
use crate::graph::{NodeId, NodeKind, StreamGraph};
use crate::processor::{Datum, Forward, Processor, ProcessorContext, Record};
use crate::serdes::SerdeDefaults;
use crate::state::{StoreRegistry, StoreSpec};
use crate::topic::ConsumeResult;
use crate::transport::PartitionTransport;
use std::collections::HashMap;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// Immutable processing graph ready to run.
pub struct Topology {
  graph: StreamGraph,
  defaults: SerdeDefaults,
}

impl fmt::Debug for Topology {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Topology")
      .field("nodes", &self.graph.len())
      .field("sources", &self.source_topics())
      .field("stores", &self.store_names())
      .finish()
  }
}

impl Topology {
  /// Freezes `graph`. Every node's processor is instantiated once so missing
  /// serdes and similar wiring errors surface here rather than at runtime.
  pub(crate) fn new(graph: StreamGraph, defaults: SerdeDefaults) -> Result<Self> {
    if graph.sources().next().is_none() {
      return Err(StreamsError::illegal_state(
        "build",
        "topology has no source nodes",
      ));
    }
    for node in graph.nodes() {
      (node.supplier())(&defaults)?;
    }
    let topology = Self { graph, defaults };
    for point in topology.graph.repartition_points() {
      debug!(node = point.name(), "repartition required ahead of node");
    }
    info!(
      nodes = topology.graph.len(),
      sources = ?topology.source_topics(),
      sinks = ?topology.sink_topics(),
      stores = ?topology.store_names(),
      "built topology"
    );
    Ok(topology)
  }

  /// The underlying graph.
  pub fn graph(&self) -> &StreamGraph {
    &self.graph
  }

  /// Topics read by source nodes, in order of first appearance.
  pub fn source_topics(&self) -> Vec<String> {
    let mut topics = Vec::new();
    for node in self.graph.sources() {
      if let NodeKind::Source { topics: node_topics } = node.kind() {
        for topic in node_topics {
          if !topics.contains(topic) {
            topics.push(topic.clone());
          }
        }
      }
    }
    topics
  }

  /// Static sink topics, in order of first appearance.
  pub fn sink_topics(&self) -> Vec<String> {
    let mut topics = Vec::new();
    for node in self.graph.nodes() {
      if let NodeKind::Sink { topic: Some(topic) } = node.kind() {
        if !topics.contains(topic) {
          topics.push(topic.clone());
        }
      }
    }
    topics
  }

  /// Declared state stores.
  pub fn stores(&self) -> &[StoreSpec] {
    self.graph.stores()
  }

  /// Names of the declared state stores.
  pub fn store_names(&self) -> Vec<String> {
    self.graph.stores().iter().map(|s| s.name.clone()).collect()
  }

  /// Names of nodes that need a repartition step ahead of them.
  pub fn repartition_points(&self) -> Vec<String> {
    self
      .graph
      .repartition_points()
      .into_iter()
      .map(|n| n.name().to_string())
      .collect()
  }

  /// Human-readable outline, one line per node with its change flags,
  /// children indented below their parent. A node with several parents is
  /// listed under each of them.
  pub fn describe(&self) -> String {
    let mut out = String::new();
    for source in self.graph.sources() {
      self.describe_node(source.id(), 0, &mut out);
    }
    out
  }

  fn describe_node(&self, id: NodeId, depth: usize, out: &mut String) {
    let Some(node) = self.graph.node(id) else {
      return;
    };
    let detail = match node.kind() {
      NodeKind::Source { topics } => format!("Source (topics: [{}])", topics.join(", ")),
      NodeKind::Processor => "Processor".to_string(),
      NodeKind::Sink { topic: Some(topic) } => format!("Sink (topic: {})", topic),
      NodeKind::Sink { topic: None } => "Sink (topic: <dynamic>)".to_string(),
      NodeKind::Stateful { store } => format!("Processor (stores: [{}])", store),
    };
    let mut flags = Vec::new();
    if node.is_key_changing() {
      flags.push("key-changing");
    }
    if node.is_value_changing() {
      flags.push("value-changing");
    }
    let flags = if flags.is_empty() {
      String::new()
    } else {
      format!(" [{}]", flags.join(", "))
    };
    let _ = writeln!(out, "{}{}: {}{}", "  ".repeat(depth), node.name(), detail, flags);
    for child in node.children() {
      self.describe_node(*child, depth + 1, out);
    }
  }

  /// Instantiates the processors for `partition`.
  pub fn create_task(&self, partition: u32) -> Result<StreamTask> {
    let mut processors = Vec::with_capacity(self.graph.len());
    let mut names = Vec::with_capacity(self.graph.len());
    let mut children = Vec::with_capacity(self.graph.len());
    let mut sources: HashMap<String, Vec<NodeId>> = HashMap::new();

    for node in self.graph.nodes() {
      processors.push((node.supplier())(&self.defaults)?);
      names.push(node.name().to_string());
      children.push(node.children().to_vec());
      if let NodeKind::Source { topics } = node.kind() {
        for topic in topics {
          sources.entry(topic.clone()).or_default().push(node.id());
        }
      }
    }
    debug!(partition, nodes = processors.len(), "created stream task");
    Ok(StreamTask {
      partition,
      processors,
      names,
      children,
      sources,
      processed: 0,
    })
  }
}

/// One instantiation of a topology, serving one partition.
pub struct StreamTask {
  partition: u32,
  processors: Vec<Box<dyn Processor>>,
  names: Vec<String>,
  children: Vec<Vec<NodeId>>,
  sources: HashMap<String, Vec<NodeId>>,
  processed: u64,
}

impl fmt::Debug for StreamTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StreamTask")
      .field("partition", &self.partition)
      .field("nodes", &self.names)
      .field("processed", &self.processed)
      .finish()
  }
}

impl StreamTask {
  /// Partition served.
  pub fn partition(&self) -> u32 {
    self.partition
  }

  /// Input records processed so far.
  pub fn processed(&self) -> u64 {
    self.processed
  }

  /// True if some source node reads `topic`.
  pub fn reads(&self, topic: &str) -> bool {
    self.sources.contains_key(topic)
  }

  /// Runs one consumed record through every source reading its topic.
  ///
  /// Records from topics no source reads are ignored.
  pub fn process(
    &mut self,
    input: &ConsumeResult,
    transport: &dyn PartitionTransport,
    stores: &StoreRegistry,
  ) -> Result<()> {
    let Some(sources) = self.sources.get(input.topic()).cloned() else {
      trace!(topic = input.topic(), "no source reads topic");
      return Ok(());
    };
    let record = Record::new(
      Arc::new(input.key().clone()) as Datum,
      Arc::new(input.value().clone()) as Datum,
      input.context(),
    );
    for source in sources {
      self.dispatch(source, record.clone(), transport, stores)?;
    }
    self.processed += 1;
    Ok(())
  }

  fn dispatch(
    &mut self,
    node: NodeId,
    record: Record,
    transport: &dyn PartitionTransport,
    stores: &StoreRegistry,
  ) -> Result<()> {
    let forwarded = {
      let mut ctx = ProcessorContext::new(&self.names[node], self.partition, transport, stores);
      self.processors[node].process(&mut ctx, record)?;
      ctx.take_forwarded()
    };
    for (route, record) in forwarded {
      match route {
        Forward::All => {
          for i in 0..self.children[node].len() {
            let child = self.children[node][i];
            self.dispatch(child, record.clone(), transport, stores)?;
          }
        }
        Forward::Child(index) => {
          if let Some(&child) = self.children[node].get(index) {
            self.dispatch(child, record, transport, stores)?;
          }
        }
      }
    }
    Ok(())
  }
}
