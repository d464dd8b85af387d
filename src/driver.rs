//! # Topology Test Driver
//!
//! Runs a [`Topology`] in-process against an [`InMemoryTransport`], one task
//! on partition 0, so a topology can be exercised without any broker.
//!
//! The driver wires the pieces the way a task runtime would: a
//! [`PartitionCoordinator`] subscribed to the topology's source topics, a
//! [`StoreBindingListener`] opening the topology's stores on assignment, and
//! a [`StreamTask`] fed from `consume`. Every piped record is processed to
//! completion before `pipe_input` returns. A record that fails processing is
//! skipped: its offset is committed before the error is returned, so records
//! piped after it are still processed.
//!
//! ```rust
//! use kweave::config::StreamConfig;
//! use kweave::driver::TopologyTestDriver;
//! use kweave::serdes::StringSerde;
//! use kweave::stream::{KStream, StreamBuilder};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), kweave::error::StreamsError> {
//! let mut builder = StreamBuilder::new().with_default_serdes(StringSerde, StringSerde);
//! let words: KStream<String, String> = builder.stream("in")?;
//! words.to(&mut builder, "out")?;
//!
//! let mut driver = TopologyTestDriver::new(builder.build()?, StreamConfig::new("demo"))?;
//! let input = driver.create_input_topic("in", StringSerde, StringSerde);
//! let mut output = driver.create_output_topic("out", StringSerde, StringSerde);
//! input.pipe_input(&mut driver, "k".to_string(), "v".to_string()).await?;
//! assert_eq!(
//!     output.read_key_values_to_list(&driver)?,
//!     vec![("k".to_string(), "v".to_string())]
//! );
//! # Ok(())
//! # }
//! ```

use crate::config::StreamConfig;
use crate::coordinator::{CoordinatorState, DEFAULT_PARTITION, PartitionCoordinator};
use crate::error::Result;
use crate::query::{QueryableStoreType, query_store};
use crate::rebalance::StoreBindingListener;
use crate::serdes::{Serde, SharedSerde};
use crate::state::{StateStoreProvider, StoreRegistry};
use crate::topic::{Offset, TopicPartition};
use crate::topology::{StreamTask, Topology};
use crate::transport::{InMemoryTransport, PartitionTransport};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// In-process runner for one topology.
pub struct TopologyTestDriver {
  topology: Topology,
  config: StreamConfig,
  transport: Arc<InMemoryTransport>,
  stores: Arc<StoreRegistry>,
  coordinator: PartitionCoordinator,
  task: StreamTask,
}

impl fmt::Debug for TopologyTestDriver {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TopologyTestDriver")
      .field("application_id", &self.config.application_id)
      .field("topology", &self.topology)
      .field("task", &self.task)
      .finish()
  }
}

impl TopologyTestDriver {
  /// Starts a driver: subscribes to every source topic and opens the stores.
  pub fn new(topology: Topology, config: StreamConfig) -> Result<Self> {
    config.validate()?;
    let transport = Arc::new(InMemoryTransport::new());
    let stores = Arc::new(StoreRegistry::new());

    let mut coordinator = PartitionCoordinator::new(
      config.effective_client_id(),
      transport.clone() as Arc<dyn PartitionTransport>,
    );
    coordinator.set_rebalance_listener(Arc::new(StoreBindingListener::new(
      stores.clone(),
      topology.stores().to_vec(),
    )));
    coordinator.subscribe(&topology.source_topics())?;
    let task = topology.create_task(DEFAULT_PARTITION)?;

    info!(
      application_id = %config.application_id,
      sources = ?topology.source_topics(),
      "started topology test driver"
    );
    Ok(Self {
      topology,
      config,
      transport,
      stores,
      coordinator,
      task,
    })
  }

  /// Topology being run.
  pub fn topology(&self) -> &Topology {
    &self.topology
  }

  /// Underlying transport.
  pub fn transport(&self) -> &Arc<InMemoryTransport> {
    &self.transport
  }

  /// Coordinator of the driver's task.
  pub fn coordinator(&self) -> &PartitionCoordinator {
    &self.coordinator
  }

  /// Input handle for `topic`.
  pub fn create_input_topic<K, V>(
    &self,
    topic: &str,
    key: impl Serde<K> + 'static,
    value: impl Serde<V> + 'static,
  ) -> TestInputTopic<K, V> {
    TestInputTopic {
      topic: topic.to_string(),
      key_serde: Arc::new(key),
      value_serde: Arc::new(value),
    }
  }

  /// Output handle for `topic`, reading from its first record.
  pub fn create_output_topic<K, V>(
    &self,
    topic: &str,
    key: impl Serde<K> + 'static,
    value: impl Serde<V> + 'static,
  ) -> TestOutputTopic<K, V> {
    TestOutputTopic {
      topic: topic.to_string(),
      key_serde: Arc::new(key),
      value_serde: Arc::new(value),
      position: 0,
    }
  }

  /// Processes records published to a source topic and not yet consumed, at
  /// most `max_poll_records` of them.
  ///
  /// Returns the number of records processed. A record whose processing fails
  /// is committed anyway, then its error is returned: the next drain starts
  /// after it rather than failing on it again. Output it published before
  /// failing stays published.
  pub async fn drain(&mut self) -> Result<usize> {
    let mut processed = 0;
    while self.coordinator.lag()? > 0 {
      let Some(input) = self.coordinator.consume(self.config.poll_timeout()).await? else {
        break;
      };
      let outcome = self
        .task
        .process(&input, self.transport.as_ref(), &self.stores);
      self.coordinator.commit_result(&input)?;
      if let Err(e) = outcome {
        warn!(
          topic = input.topic(),
          offset = input.offset,
          error = %e,
          "skipping record that failed processing"
        );
        return Err(e);
      }
      processed += 1;
      if processed >= self.config.max_poll_records {
        warn!(
          processed,
          lag = self.coordinator.lag()?,
          "max_poll_records reached, leaving remaining records for the next drain"
        );
        break;
      }
    }
    if processed > 0 {
      debug!(processed, "drained source topics");
    }
    Ok(processed)
  }

  /// Queryable view of store `store_name`.
  pub fn store<T: QueryableStoreType>(&self, store_name: &str, store_type: &T) -> Result<T::Store> {
    query_store(
      self.stores.clone() as Arc<dyn StateStoreProvider>,
      store_name,
      store_type,
    )
  }

  /// Revokes the task's partitions, closing its stores. Dropping the driver
  /// does the same.
  pub fn close(&mut self) -> Result<()> {
    self.coordinator.unsubscribe()?;
    info!(
      application_id = %self.config.application_id,
      processed = self.task.processed(),
      "closed topology test driver"
    );
    Ok(())
  }
}

impl Drop for TopologyTestDriver {
  fn drop(&mut self) {
    if self.coordinator.state() == CoordinatorState::Unsubscribed {
      return;
    }
    if let Err(e) = self.coordinator.unsubscribe() {
      warn!(error = %e, "failed to unsubscribe topology test driver on drop");
    }
  }
}

/// Typed producer into one topic of a driver.
pub struct TestInputTopic<K, V> {
  topic: String,
  key_serde: SharedSerde<K>,
  value_serde: SharedSerde<V>,
}

impl<K, V> TestInputTopic<K, V> {
  /// Topic written to.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Publishes one record stamped now and processes it.
  pub async fn pipe_input(&self, driver: &mut TopologyTestDriver, key: K, value: V) -> Result<()> {
    self.pipe_input_at(driver, key, value, Utc::now()).await
  }

  /// Publishes one record with an explicit timestamp and processes it.
  pub async fn pipe_input_at(
    &self,
    driver: &mut TopologyTestDriver,
    key: K,
    value: V,
    timestamp: DateTime<Utc>,
  ) -> Result<()> {
    self.publish(driver, &key, &value, timestamp)?;
    driver.drain().await?;
    Ok(())
  }

  /// Publishes every pair in order, then processes them.
  pub async fn pipe_key_value_list(
    &self,
    driver: &mut TopologyTestDriver,
    records: impl IntoIterator<Item = (K, V)>,
  ) -> Result<()> {
    for (key, value) in records {
      self.publish(driver, &key, &value, Utc::now())?;
    }
    driver.drain().await?;
    Ok(())
  }

  fn publish(
    &self,
    driver: &TopologyTestDriver,
    key: &K,
    value: &V,
    timestamp: DateTime<Utc>,
  ) -> Result<Offset> {
    driver.transport.publish_at(
      &self.topic,
      self.key_serde.serialize(key)?,
      self.value_serde.serialize(value)?,
      timestamp,
    )
  }
}

/// Typed reader of one topic of a driver. Each record is read once.
pub struct TestOutputTopic<K, V> {
  topic: String,
  key_serde: SharedSerde<K>,
  value_serde: SharedSerde<V>,
  position: Offset,
}

impl<K, V> TestOutputTopic<K, V> {
  /// Topic read from.
  pub fn topic(&self) -> &str {
    &self.topic
  }

  fn partition(&self) -> TopicPartition {
    TopicPartition::new(self.topic.clone(), DEFAULT_PARTITION)
  }

  /// Records published but not read yet.
  pub fn queue_size(&self, driver: &TopologyTestDriver) -> Result<u64> {
    let end = driver.transport.log_end_offset(&self.partition())?;
    Ok(end.saturating_sub(self.position))
  }

  /// True if there is nothing left to read.
  pub fn is_empty(&self, driver: &TopologyTestDriver) -> Result<bool> {
    Ok(self.queue_size(driver)? == 0)
  }

  /// Next unread record.
  pub fn read_key_value(&mut self, driver: &TopologyTestDriver) -> Result<Option<(K, V)>> {
    let Some(message) = driver.transport.message_at(&self.partition(), self.position)? else {
      return Ok(None);
    };
    self.position += 1;
    Ok(Some((
      self.key_serde.deserialize(&message.key)?,
      self.value_serde.deserialize(&message.value)?,
    )))
  }

  /// Every unread record, in publish order.
  pub fn read_key_values_to_list(&mut self, driver: &TopologyTestDriver) -> Result<Vec<(K, V)>> {
    let mut records = Vec::new();
    while let Some(record) = self.read_key_value(driver)? {
      records.push(record);
    }
    Ok(records)
  }
}
