//! # Processing Graph
//!
//! The logical graph a [`StreamBuilder`](crate::stream::StreamBuilder) assembles
//! before it is frozen into a [`Topology`](crate::topology::Topology).
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. A node is only
//! ever added below parents that already exist, so the graph is acyclic by
//! construction. Each node records:
//!
//! - its unique name and [`NodeKind`],
//! - the key and value types it emits ([`TypeTag`]),
//! - whether it changes the record key and/or value,
//! - the supplier of its processing action, invoked when a task is created.
//!
//! The key-changing flag is what later decides whether a repartition step is
//! structurally required ahead of a node that needs key colocation.

use crate::error::{Result, StreamsError};
use crate::processor::ProcessorSupplier;
use crate::state::StoreSpec;
use std::any::TypeId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use tracing::debug;

/// Index of a node inside its [`StreamGraph`].
pub type NodeId = usize;

/// Runtime identity of a key or value type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
  id: TypeId,
  name: &'static str,
}

impl TypeTag {
  /// Tag for `T`.
  pub fn of<T: 'static>() -> Self {
    Self {
      id: TypeId::of::<T>(),
      name: std::any::type_name::<T>(),
    }
  }

  /// Fully qualified type name.
  pub fn name(&self) -> &'static str {
    self.name
  }

  /// True if this tag denotes `T`.
  pub fn is<T: 'static>(&self) -> bool {
    self.id == TypeId::of::<T>()
  }
}

impl fmt::Debug for TypeTag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name)
  }
}

/// Structural role of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
  /// Reads and decodes records from the given topics.
  Source {
    /// Subscribed topics.
    topics: Vec<String>,
  },
  /// Stateless transformation or side effect.
  Processor,
  /// Encodes and publishes records. `topic` is `None` for per-record routing.
  Sink {
    /// Static destination, if any.
    topic: Option<String>,
  },
  /// Keyed operation backed by a state store; requires key colocation.
  Stateful {
    /// Store the node writes to.
    store: String,
  },
}

/// One transformation step in the graph.
#[derive(Clone)]
pub struct GraphNode {
  id: NodeId,
  name: String,
  kind: NodeKind,
  parents: Vec<NodeId>,
  children: Vec<NodeId>,
  key_changing: bool,
  value_changing: bool,
  key_type: TypeTag,
  value_type: TypeTag,
  supplier: ProcessorSupplier,
}

impl GraphNode {
  /// Creates a detached node emitting records of types `K` and `V`.
  pub fn new<K: 'static, V: 'static>(
    name: impl Into<String>,
    kind: NodeKind,
    supplier: ProcessorSupplier,
  ) -> Self {
    Self {
      id: 0,
      name: name.into(),
      kind,
      parents: Vec::new(),
      children: Vec::new(),
      key_changing: false,
      value_changing: false,
      key_type: TypeTag::of::<K>(),
      value_type: TypeTag::of::<V>(),
      supplier,
    }
  }

  /// Marks the node as changing the record key.
  pub fn with_key_changing(mut self, changing: bool) -> Self {
    self.key_changing = changing;
    self
  }

  /// Marks the node as changing the record value.
  pub fn with_value_changing(mut self, changing: bool) -> Self {
    self.value_changing = changing;
    self
  }

  /// Arena index.
  pub fn id(&self) -> NodeId {
    self.id
  }

  /// Unique node name.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Structural role.
  pub fn kind(&self) -> &NodeKind {
    &self.kind
  }

  /// Upstream nodes.
  pub fn parents(&self) -> &[NodeId] {
    &self.parents
  }

  /// Downstream nodes, in the order they were attached.
  pub fn children(&self) -> &[NodeId] {
    &self.children
  }

  /// True if this node may emit a different key than it received.
  pub fn is_key_changing(&self) -> bool {
    self.key_changing
  }

  /// True if this node may emit a different value than it received.
  pub fn is_value_changing(&self) -> bool {
    self.value_changing
  }

  /// Emitted key type.
  pub fn key_type(&self) -> TypeTag {
    self.key_type
  }

  /// Emitted value type.
  pub fn value_type(&self) -> TypeTag {
    self.value_type
  }

  /// True for source nodes.
  pub fn is_source(&self) -> bool {
    matches!(self.kind, NodeKind::Source { .. })
  }

  /// True if the node needs records co-located by key.
  pub fn requires_colocation(&self) -> bool {
    matches!(self.kind, NodeKind::Stateful { .. })
  }

  pub(crate) fn supplier(&self) -> &ProcessorSupplier {
    &self.supplier
  }
}

impl fmt::Debug for GraphNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GraphNode")
      .field("id", &self.id)
      .field("name", &self.name)
      .field("kind", &self.kind)
      .field("parents", &self.parents)
      .field("children", &self.children)
      .field("key_changing", &self.key_changing)
      .field("value_changing", &self.value_changing)
      .field("key_type", &self.key_type)
      .field("value_type", &self.value_type)
      .finish()
  }
}

/// Arena of [`GraphNode`]s plus the state stores they declare.
#[derive(Debug, Clone, Default)]
pub struct StreamGraph {
  nodes: Vec<GraphNode>,
  by_name: HashMap<String, NodeId>,
  stores: Vec<StoreSpec>,
}

impl StreamGraph {
  /// Creates an empty graph.
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a root node. Only source nodes may be roots.
  pub fn add_source(&mut self, node: GraphNode) -> Result<NodeId> {
    if !node.is_source() {
      return Err(StreamsError::illegal_state(
        "add_source",
        format!("node '{}' is not a source and needs a parent", node.name),
      ));
    }
    self.insert(node, &[])
  }

  /// Adds `node` as a child of `parent`.
  pub fn add_node(&mut self, parent: NodeId, node: GraphNode) -> Result<NodeId> {
    self.insert(node, &[parent])
  }

  fn insert(&mut self, mut node: GraphNode, parents: &[NodeId]) -> Result<NodeId> {
    if self.by_name.contains_key(&node.name) {
      return Err(StreamsError::DuplicateName(node.name));
    }
    if let Some(missing) = parents.iter().find(|p| **p >= self.nodes.len()) {
      return Err(StreamsError::illegal_state(
        "add_node",
        format!("parent node {} of '{}' does not exist", missing, node.name),
      ));
    }

    let id = self.nodes.len();
    node.id = id;
    node.parents = parents.to_vec();
    node.children.clear();
    for parent in parents {
      self.nodes[*parent].children.push(id);
    }
    debug!(
      node = %node.name,
      id,
      key_changing = node.key_changing,
      value_changing = node.value_changing,
      "registered graph node"
    );
    self.by_name.insert(node.name.clone(), id);
    self.nodes.push(node);
    Ok(id)
  }

  /// Declares a state store.
  pub fn add_store(&mut self, spec: StoreSpec) -> Result<()> {
    if self.stores.iter().any(|s| s.name == spec.name) {
      return Err(StreamsError::DuplicateName(spec.name));
    }
    self.stores.push(spec);
    Ok(())
  }

  /// Node by id.
  pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
    self.nodes.get(id)
  }

  /// Node by name.
  pub fn node_by_name(&self, name: &str) -> Option<&GraphNode> {
    self.by_name.get(name).and_then(|id| self.nodes.get(*id))
  }

  /// All nodes in insertion order (parents always precede children).
  pub fn nodes(&self) -> &[GraphNode] {
    &self.nodes
  }

  /// Declared state stores.
  pub fn stores(&self) -> &[StoreSpec] {
    &self.stores
  }

  /// Number of nodes.
  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  /// True if the graph has no nodes.
  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Source node ids.
  pub fn sources(&self) -> impl Iterator<Item = &GraphNode> {
    self.nodes.iter().filter(|n| n.is_source())
  }

  /// True if `id` or any node above it (up to the sources) changes the key.
  pub fn has_key_changing_ancestor(&self, id: NodeId) -> bool {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([id]);
    while let Some(current) = queue.pop_front() {
      if !seen.insert(current) {
        continue;
      }
      let Some(node) = self.nodes.get(current) else {
        continue;
      };
      if node.key_changing {
        return true;
      }
      queue.extend(node.parents.iter().copied());
    }
    false
  }

  /// Nodes requiring key colocation whose input may carry changed keys,
  /// i.e. the places where a repartition step has to be inserted.
  pub fn repartition_points(&self) -> Vec<&GraphNode> {
    self
      .nodes
      .iter()
      .filter(|n| n.requires_colocation())
      .filter(|n| n.parents.iter().any(|p| self.has_key_changing_ancestor(*p)))
      .collect()
  }
}
