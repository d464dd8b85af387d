//! Rebalance notifications from the partition coordinator to the task runtime.
//!
//! A coordinator holds at most one [`RebalanceListener`] and calls it inline,
//! on the caller's thread, before `subscribe`/`assign`/`unassign` return. The
//! listener only receives a shared reference to the coordinator, so it can
//! inspect assignment and committed offsets but cannot re-enter the
//! operations that triggered it.

use crate::coordinator::PartitionCoordinator;
use crate::state::{InMemoryKeyValueBackend, KeyValueBackend, StateStore, StoreRegistry, StoreSpec};
use crate::topic::{TopicPartition, TopicPartitionOffset};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Callbacks invoked when partitions are assigned to or revoked from a task.
pub trait RebalanceListener: Send + Sync {
  /// Called with the full assignment after it changes.
  fn on_partitions_assigned(&self, coordinator: &PartitionCoordinator, partitions: &[TopicPartition]);

  /// Called with the offsets committed at the moment of revocation.
  fn on_partitions_revoked(
    &self,
    coordinator: &PartitionCoordinator,
    partitions: &[TopicPartitionOffset],
  );
}

/// Creates the storage backend of a store instance.
pub type BackendFactory = Arc<dyn Fn(&StoreSpec, u32) -> Arc<dyn KeyValueBackend> + Send + Sync>;

/// Listener that opens a topology's state stores for each assigned partition
/// and closes them on revocation.
///
/// Store instances are keyed by partition index: every topic's partition `p`
/// feeds the same set of stores for `p`.
pub struct StoreBindingListener {
  registry: Arc<StoreRegistry>,
  stores: Vec<StoreSpec>,
  backend_factory: BackendFactory,
}

impl StoreBindingListener {
  /// Creates a listener binding `stores` into `registry` with in-memory backends.
  pub fn new(registry: Arc<StoreRegistry>, stores: Vec<StoreSpec>) -> Self {
    Self {
      registry,
      stores,
      backend_factory: Arc::new(|_: &StoreSpec, _: u32| -> Arc<dyn KeyValueBackend> {
        Arc::new(InMemoryKeyValueBackend::new())
      }),
    }
  }

  /// Uses `factory` to create each instance's backend.
  pub fn with_backend_factory(mut self, factory: BackendFactory) -> Self {
    self.backend_factory = factory;
    self
  }

  /// The registry instances are bound into.
  pub fn registry(&self) -> &Arc<StoreRegistry> {
    &self.registry
  }
}

fn partition_indexes<'a>(partitions: impl Iterator<Item = &'a TopicPartition>) -> BTreeSet<u32> {
  partitions.map(|tp| tp.partition).collect()
}

impl RebalanceListener for StoreBindingListener {
  fn on_partitions_assigned(&self, coordinator: &PartitionCoordinator, partitions: &[TopicPartition]) {
    debug!(
      member = coordinator.member_id(),
      count = partitions.len(),
      "partitions assigned"
    );
    for partition in partition_indexes(partitions.iter()) {
      for spec in &self.stores {
        if self.registry.get(&spec.name, partition).is_ok() {
          continue;
        }
        let backend = (self.backend_factory)(spec, partition);
        let store = StateStore::new(spec.name.clone(), partition, spec.shape, backend);
        if let Err(e) = self.registry.register(Arc::new(store)) {
          warn!(store = %spec.name, partition, error = %e, "failed to open state store");
        }
      }
    }
  }

  fn on_partitions_revoked(
    &self,
    coordinator: &PartitionCoordinator,
    partitions: &[TopicPartitionOffset],
  ) {
    debug!(
      member = coordinator.member_id(),
      count = partitions.len(),
      "partitions revoked"
    );
    for partition in partition_indexes(partitions.iter().map(|p| &p.topic_partition)) {
      if let Err(e) = self.registry.release_partition(partition) {
        warn!(partition, error = %e, "failed to release state stores");
      }
    }
  }
}
