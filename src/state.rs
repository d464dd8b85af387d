//! Keyed state: storage backends, per-partition store instances and the
//! registry that binds store names to live instances.
//!
//! A [`StateStore`] is one physical instance of a logical store, owned by the
//! task serving a partition. Its bytes live in a [`KeyValueBackend`]. Every
//! backend must make single-key writes atomically visible: a concurrent reader
//! sees either the old or the new value, never a mix.
//!
//! The [`StoreRegistry`] is the task-side [`StateStoreProvider`]: instances are
//! registered when a partition is assigned and closed then removed when it is
//! revoked.

use crate::error::{Result, StreamsError};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Physical layout of a store's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreShape {
    /// Values are the encoded value bytes.
    Plain,
    /// Values are an 8-byte big-endian timestamp followed by the encoded value.
    Timestamped,
}

/// Declaration of a store a topology needs, one instance per partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// Logical store name.
    pub name: String,
    /// Value layout.
    pub shape: StoreShape,
}

impl StoreSpec {
    /// Creates a store declaration.
    pub fn new(name: impl Into<String>, shape: StoreShape) -> Self {
        Self {
            name: name.into(),
            shape,
        }
    }
}

/// A value paired with the timestamp of the record that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueAndTimestamp<V> {
    /// The value.
    pub value: V,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl<V> ValueAndTimestamp<V> {
    /// Pairs a value with a timestamp.
    pub fn make(value: V, timestamp: i64) -> Self {
        Self { value, timestamp }
    }
}

/// Encodes a timestamped value: `timestamp (i64 BE) ++ value`.
pub fn encode_timestamped(timestamp: i64, value: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(8 + value.len());
    buf.put_i64(timestamp);
    buf.put_slice(value);
    buf.freeze()
}

/// Splits a timestamped value into its timestamp and value bytes.
pub fn decode_timestamped(raw: &[u8]) -> Result<(i64, &[u8])> {
    if raw.len() < 8 {
        return Err(StreamsError::Serialization(format!(
            "timestamped value needs at least 8 bytes, got {}",
            raw.len()
        )));
    }
    let (ts, value) = raw.split_at(8);
    let mut stamp = [0u8; 8];
    stamp.copy_from_slice(ts);
    Ok((i64::from_be_bytes(stamp), value))
}

/// Keyed storage backend capability.
///
/// Keys are ordered by their byte representation. `range` is inclusive on both
/// ends and returns nothing when `from > to`.
pub trait KeyValueBackend: Send + Sync + fmt::Debug {
    /// Value stored for `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn put(&self, key: Bytes, value: Bytes) -> Result<()>;

    /// Removes `key`, returning the previous value.
    fn delete(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Entries with `from <= key <= to`, in key order.
    fn range(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;

    /// Every entry, in key order.
    fn all(&self) -> Result<Vec<(Bytes, Bytes)>>;

    /// Makes buffered writes durable.
    fn flush(&self) -> Result<()>;

    /// Approximate number of entries.
    fn approximate_size(&self) -> u64;
}

/// Ordered in-memory backend.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueBackend {
    entries: RwLock<BTreeMap<Bytes, Bytes>>,
}

impl InMemoryKeyValueBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueBackend for InMemoryKeyValueBackend {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let entries = self.entries.read()?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        let mut entries = self.entries.write()?;
        entries.insert(key, value);
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<Bytes>> {
        let mut entries = self.entries.write()?;
        Ok(entries.remove(key))
    }

    fn range(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        if from > to {
            return Ok(Vec::new());
        }
        let entries = self.entries.read()?;
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(from), Bound::Included(to));
        Ok(entries
            .range::<[u8], _>(bounds)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn all(&self) -> Result<Vec<(Bytes, Bytes)>> {
        let entries = self.entries.read()?;
        Ok(entries.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn approximate_size(&self) -> u64 {
        self.entries.read().map(|e| e.len() as u64).unwrap_or(0)
    }
}

/// One physical instance of a named store, serving a single partition.
#[derive(Debug)]
pub struct StateStore {
    name: String,
    partition: u32,
    shape: StoreShape,
    backend: Arc<dyn KeyValueBackend>,
    open: AtomicBool,
}

impl StateStore {
    /// Creates an open store instance over `backend`.
    pub fn new(
        name: impl Into<String>,
        partition: u32,
        shape: StoreShape,
        backend: Arc<dyn KeyValueBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            partition,
            shape,
            backend,
            open: AtomicBool::new(true),
        }
    }

    /// Creates an open in-memory instance.
    pub fn in_memory(name: impl Into<String>, partition: u32, shape: StoreShape) -> Self {
        Self::new(name, partition, shape, Arc::new(InMemoryKeyValueBackend::new()))
    }

    /// Logical store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Partition this instance serves.
    pub fn partition(&self) -> u32 {
        self.partition
    }

    /// Value layout.
    pub fn shape(&self) -> StoreShape {
        self.shape
    }

    /// False once the owning task has released the instance.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StreamsError::StoreNotFound(self.name.clone()))
        }
    }

    /// Raw value for `key`.
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        self.backend.get(key)
    }

    /// Stores a raw value.
    pub fn put(&self, key: Bytes, value: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.backend.put(key, value)
    }

    /// Removes a key.
    pub fn delete(&self, key: &[u8]) -> Result<Option<Bytes>> {
        self.ensure_open()?;
        self.backend.delete(key)
    }

    /// Raw entries with `from <= key <= to`.
    pub fn range(&self, from: &[u8], to: &[u8]) -> Result<Vec<(Bytes, Bytes)>> {
        self.ensure_open()?;
        self.backend.range(from, to)
    }

    /// Every raw entry.
    pub fn all(&self) -> Result<Vec<(Bytes, Bytes)>> {
        self.ensure_open()?;
        self.backend.all()
    }

    /// Approximate number of entries.
    pub fn approximate_size(&self) -> u64 {
        self.backend.approximate_size()
    }

    /// Flushes the backend.
    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Flushes and marks the instance closed. Later reads fail with `StoreNotFound`.
    pub fn close(&self) -> Result<()> {
        let flushed = self.backend.flush();
        self.open.store(false, Ordering::Release);
        flushed
    }
}

/// Looks up the live physical instances of a store by name.
pub trait StateStoreProvider: Send + Sync {
    /// Instances named `store_name`, in partition-assignment order.
    fn stores(&self, store_name: &str) -> Vec<Arc<StateStore>>;
}

/// Task-side binding of store names to per-partition instances.
///
/// Instances are kept in registration order, which follows partition
/// assignment order.
#[derive(Debug, Default)]
pub struct StoreRegistry {
    stores: RwLock<Vec<Arc<StateStore>>>,
}

impl StoreRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an instance. Fails if the same store already serves that partition.
    pub fn register(&self, store: Arc<StateStore>) -> Result<()> {
        let mut stores = self.stores.write()?;
        if stores
            .iter()
            .any(|s| s.name() == store.name() && s.partition() == store.partition())
        {
            return Err(StreamsError::DuplicateName(format!(
                "{}@{}",
                store.name(),
                store.partition()
            )));
        }
        info!(store = store.name(), partition = store.partition(), "opened state store");
        stores.push(store);
        Ok(())
    }

    /// Instance of `name` serving `partition`.
    pub fn get(&self, name: &str, partition: u32) -> Result<Arc<StateStore>> {
        let stores = self.stores.read()?;
        stores
            .iter()
            .find(|s| s.name() == name && s.partition() == partition)
            .cloned()
            .ok_or_else(|| StreamsError::StoreNotFound(name.to_string()))
    }

    /// True if any instance serves `partition`.
    pub fn has_partition(&self, partition: u32) -> bool {
        self.stores
            .read()
            .map(|s| s.iter().any(|store| store.partition() == partition))
            .unwrap_or(false)
    }

    /// Closes and removes every instance serving `partition`.
    ///
    /// Each instance is closed before it leaves the registry, so a query that
    /// already holds it fails instead of reading a released store.
    pub fn release_partition(&self, partition: u32) -> Result<Vec<Arc<StateStore>>> {
        let mut stores = self.stores.write()?;
        let (released, kept): (Vec<_>, Vec<_>) =
            stores.drain(..).partition(|s| s.partition() == partition);
        for store in &released {
            if let Err(e) = store.close() {
                warn!(store = store.name(), partition, error = %e, "flush on close failed");
            }
            info!(store = store.name(), partition, "closed state store");
        }
        *stores = kept;
        Ok(released)
    }

    /// Number of registered instances.
    pub fn len(&self) -> usize {
        self.stores.read().map(|s| s.len()).unwrap_or(0)
    }

    /// True if no instance is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StateStoreProvider for StoreRegistry {
    fn stores(&self, store_name: &str) -> Vec<Arc<StateStore>> {
        self.stores
            .read()
            .map(|stores| {
                stores
                    .iter()
                    .filter(|s| s.name() == store_name)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}
