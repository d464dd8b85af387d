//! # kweave
//!
//! Keyed stream processing in pure Rust: a fluent DSL that builds a typed
//! processing graph, a partition coordinator that drives consumption and
//! offset commits against a transport, and queryable per-partition state.
//!
//! ## Key Features
//!
//! - **Explicit construction context**: every DSL call takes the
//!   [`StreamBuilder`](stream::StreamBuilder) by reference, so a graph can be
//!   built and inspected without hidden global state
//! - **Repartition awareness**: nodes record whether they change the key or
//!   only the value, and the topology reports where a repartition is needed
//! - **Synchronous rebalance callbacks**: assignment and revocation reach the
//!   single registered listener before the coordinator call returns
//! - **Queryable state**: a read-only facade spans every partition's instance
//!   of a store and can be queried while the task keeps writing
//!
//! ## Quick Start
//!
//! ```rust
//! use kweave::processor::Predicate;
//! use kweave::serdes::StringSerde;
//! use kweave::stream::{KStream, StreamBuilder};
//! use std::sync::Arc;
//!
//! let mut builder = StreamBuilder::new().with_default_serdes(StringSerde, StringSerde);
//! let orders: KStream<String, String> = builder.stream("orders")?;
//! let predicates: Vec<Predicate<String, String>> = vec![
//!     Arc::new(|_k: &String, v: &String| v.starts_with("eu")),
//!     Arc::new(|_k: &String, _v: &String| true),
//! ];
//! let branches = orders.named("by-region").branch(&mut builder, predicates)?;
//! branches[0].to(&mut builder, "orders-eu")?;
//! branches[1].to(&mut builder, "orders-other")?;
//!
//! let topology = builder.build()?;
//! assert!(topology.graph().node_by_name("by-region-predicate-1").is_some());
//! # Ok::<(), kweave::error::StreamsError>(())
//! ```

#![deny(missing_docs)]

/// Runtime configuration of a stream application.
pub mod config;
/// Partition assignment, consumption and offset commits.
pub mod coordinator;
/// In-process runner for exercising a topology.
pub mod driver;
/// Error type shared by every layer.
pub mod error;
/// Logical processing graph built by the DSL.
pub mod graph;
/// Grouped streams, aggregations and tables.
pub mod grouped;
/// Node name generation and uniqueness.
pub mod named;
/// Processing actions attached to graph nodes.
pub mod processor;
/// Queryable store shapes and the composite read-only facade.
pub mod query;
/// Rebalance listener capability and store binding.
pub mod rebalance;
/// Key and value codecs.
pub mod serdes;
/// State stores, backends and the store registry.
pub mod state;
/// Fluent stream DSL.
pub mod stream;
/// Topics, partitions, offsets and consumed records.
pub mod topic;
/// Frozen topologies and the tasks that execute them.
pub mod topology;
/// Partition transport capability and the in-memory transport.
pub mod transport;

#[cfg(test)]
mod coordinator_test;
#[cfg(test)]
mod serdes_test;
#[cfg(test)]
mod stream_test;
#[cfg(test)]
mod topology_test;

pub use config::StreamConfig;
pub use coordinator::{CoordinatorState, PartitionCoordinator};
pub use driver::{TestInputTopic, TestOutputTopic, TopologyTestDriver};
pub use error::{Result, StreamsError};
pub use grouped::{Grouped, GroupedStream, KTable};
pub use query::{QueryableStoreTypes, ReadOnlyKeyValueStore};
pub use rebalance::{RebalanceListener, StoreBindingListener};
pub use stream::{Consumed, KStream, Printed, Produced, StreamBuilder};
pub use topology::Topology;
pub use transport::{InMemoryTransport, PartitionTransport};
