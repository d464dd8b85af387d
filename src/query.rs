//! # Queryable State
//!
//! Read-only access to keyed state from outside the task that owns it.
//!
//! A [`QueryableStoreType`] states which physical [`StoreShape`]s satisfy a
//! query shape and how to decode their values. [`query_store`] checks that at
//! least one live instance of the store exists and has an acceptable shape,
//! then returns a [`CompositeReadOnlyKeyValueStore`] spanning every matching
//! per-partition instance.
//!
//! The facade holds no locks and caches nothing: each call looks the
//! instances up again and reads them as of that moment. Point lookups stop at
//! the first partition holding the key; scans concatenate partitions in
//! assignment order without re-sorting.
//!
//! Revocation closes an instance before it is dropped from the provider.
//! A query that reaches a closed instance fails with
//! [`StreamsError::StoreNotFound`] instead of returning its contents.

use crate::error::{Result, StreamsError};
use crate::serdes::{Serde, SharedSerde};
use crate::state::{StateStore, StateStoreProvider, StoreShape, ValueAndTimestamp, decode_timestamped};
use bytes::Bytes;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::trace;

/// Decodes a raw stored value according to the instance's shape.
pub type ValueDecoder<V> = Arc<dyn Fn(StoreShape, &[u8]) -> Result<V> + Send + Sync>;

/// A query shape: which physical shapes satisfy it and how values decode.
pub trait QueryableStoreType: Send + Sync {
  /// Facade handed to the caller.
  type Store;

  /// Physical shapes this query shape accepts.
  fn accepted_shapes(&self) -> &[StoreShape];

  /// True if `store` has one of the accepted shapes.
  fn accepts(&self, store: &StateStore) -> bool {
    self.accepted_shapes().contains(&store.shape())
  }

  /// Builds the facade over every accepted instance named `store_name`.
  fn create(&self, provider: Arc<dyn StateStoreProvider>, store_name: &str) -> Self::Store;
}

/// Read access to keyed state.
pub trait ReadOnlyKeyValueStore<K, V>: Send + Sync {
  /// Value for `key`, if present in any instance.
  fn get(&self, key: &K) -> Result<Option<V>>;

  /// Entries with `from <= key <= to` by encoded key order, instance by instance.
  fn range(&self, from: &K, to: &K) -> Result<Vec<(K, V)>>;

  /// Every entry, instance by instance.
  fn all(&self) -> Result<Vec<(K, V)>>;

  /// Sum of the instances' approximate sizes.
  fn approximate_num_entries(&self) -> Result<u64>;
}

/// Factory for the built-in query shapes.
pub struct QueryableStoreTypes;

impl QueryableStoreTypes {
  /// Plain key-value reads. Timestamped instances also qualify; their
  /// timestamps are stripped.
  pub fn key_value_store<K, V>(
    key: impl Serde<K> + 'static,
    value: impl Serde<V> + 'static,
  ) -> KeyValueStoreType<K, V>
  where
    K: 'static,
    V: 'static,
  {
    let value_serde: SharedSerde<V> = Arc::new(value);
    KeyValueStoreType {
      key_serde: Arc::new(key),
      decoder: Arc::new(move |shape: StoreShape, raw: &[u8]| -> Result<V> {
        match shape {
          StoreShape::Plain => value_serde.deserialize(raw),
          StoreShape::Timestamped => {
            let (_, encoded) = decode_timestamped(raw)?;
            value_serde.deserialize(encoded)
          }
        }
      }),
      shapes: vec![StoreShape::Plain, StoreShape::Timestamped],
      _key: PhantomData,
    }
  }

  /// Reads of value and timestamp. Only timestamped instances qualify.
  pub fn timestamped_key_value_store<K, V>(
    key: impl Serde<K> + 'static,
    value: impl Serde<V> + 'static,
  ) -> KeyValueStoreType<K, ValueAndTimestamp<V>>
  where
    K: 'static,
    V: 'static,
  {
    let value_serde: SharedSerde<V> = Arc::new(value);
    KeyValueStoreType {
      key_serde: Arc::new(key),
      decoder: Arc::new(
        move |_: StoreShape, raw: &[u8]| -> Result<ValueAndTimestamp<V>> {
          let (timestamp, encoded) = decode_timestamped(raw)?;
          Ok(ValueAndTimestamp::make(value_serde.deserialize(encoded)?, timestamp))
        },
      ),
      shapes: vec![StoreShape::Timestamped],
      _key: PhantomData,
    }
  }
}

/// Key-value query shape produced by [`QueryableStoreTypes`].
pub struct KeyValueStoreType<K, V> {
  key_serde: SharedSerde<K>,
  decoder: ValueDecoder<V>,
  shapes: Vec<StoreShape>,
  _key: PhantomData<fn() -> K>,
}

impl<K, V> fmt::Debug for KeyValueStoreType<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyValueStoreType")
      .field("shapes", &self.shapes)
      .finish()
  }
}

impl<K: 'static, V: 'static> QueryableStoreType for KeyValueStoreType<K, V> {
  type Store = CompositeReadOnlyKeyValueStore<K, V>;

  fn accepted_shapes(&self) -> &[StoreShape] {
    &self.shapes
  }

  fn create(&self, provider: Arc<dyn StateStoreProvider>, store_name: &str) -> Self::Store {
    CompositeReadOnlyKeyValueStore {
      provider,
      store_name: store_name.to_string(),
      key_serde: self.key_serde.clone(),
      decoder: self.decoder.clone(),
      shapes: self.shapes.clone(),
    }
  }
}

/// Resolves `store_name` through `provider` for the given query shape.
///
/// Fails with `StoreNotFound` when no instance of that name is live and with
/// `InvalidStoreType` when instances exist but none has an accepted shape.
pub fn query_store<T: QueryableStoreType>(
  provider: Arc<dyn StateStoreProvider>,
  store_name: &str,
  store_type: &T,
) -> Result<T::Store> {
  let instances = provider.stores(store_name);
  if instances.is_empty() {
    return Err(StreamsError::StoreNotFound(store_name.to_string()));
  }
  if !instances.iter().any(|s| store_type.accepts(s)) {
    return Err(StreamsError::InvalidStoreType {
      store: store_name.to_string(),
      expected: format!("{:?}", store_type.accepted_shapes()),
    });
  }
  Ok(store_type.create(provider, store_name))
}

/// Read-only facade over every per-partition instance of one store.
pub struct CompositeReadOnlyKeyValueStore<K, V> {
  provider: Arc<dyn StateStoreProvider>,
  store_name: String,
  key_serde: SharedSerde<K>,
  decoder: ValueDecoder<V>,
  shapes: Vec<StoreShape>,
}

impl<K, V> fmt::Debug for CompositeReadOnlyKeyValueStore<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompositeReadOnlyKeyValueStore")
      .field("store", &self.store_name)
      .field("shapes", &self.shapes)
      .finish()
  }
}

impl<K, V> CompositeReadOnlyKeyValueStore<K, V> {
  /// Store name this facade reads.
  pub fn store_name(&self) -> &str {
    &self.store_name
  }

  fn instances(&self) -> Result<Vec<Arc<StateStore>>> {
    let all = self.provider.stores(&self.store_name);
    if all.is_empty() {
      return Err(StreamsError::StoreNotFound(self.store_name.clone()));
    }
    let matching: Vec<_> = all
      .into_iter()
      .filter(|s| self.shapes.contains(&s.shape()))
      .collect();
    if matching.is_empty() {
      return Err(StreamsError::InvalidStoreType {
        store: self.store_name.clone(),
        expected: format!("{:?}", self.shapes),
      });
    }
    Ok(matching)
  }

  /// Fails if `store` was closed while it was being read.
  fn ensure_live(&self, store: &StateStore) -> Result<()> {
    if store.is_open() {
      Ok(())
    } else {
      Err(StreamsError::StoreNotFound(self.store_name.clone()))
    }
  }

  fn decode_entries(&self, store: &StateStore, raw: Vec<(Bytes, Bytes)>) -> Result<Vec<(K, V)>> {
    raw
      .into_iter()
      .map(|(k, v)| Ok((self.key_serde.deserialize(&k)?, (self.decoder)(store.shape(), &v)?)))
      .collect()
  }
}

impl<K, V> ReadOnlyKeyValueStore<K, V> for CompositeReadOnlyKeyValueStore<K, V>
where
  K: 'static,
  V: 'static,
{
  fn get(&self, key: &K) -> Result<Option<V>> {
    let encoded = self.key_serde.serialize(key)?;
    for store in self.instances()? {
      let raw = store.get(&encoded)?;
      self.ensure_live(&store)?;
      if let Some(raw) = raw {
        trace!(store = %self.store_name, partition = store.partition(), "point lookup hit");
        return Ok(Some((self.decoder)(store.shape(), &raw)?));
      }
    }
    Ok(None)
  }

  fn range(&self, from: &K, to: &K) -> Result<Vec<(K, V)>> {
    let from = self.key_serde.serialize(from)?;
    let to = self.key_serde.serialize(to)?;
    let mut entries = Vec::new();
    for store in self.instances()? {
      let raw = store.range(&from, &to)?;
      self.ensure_live(&store)?;
      entries.extend(self.decode_entries(&store, raw)?);
    }
    Ok(entries)
  }

  fn all(&self) -> Result<Vec<(K, V)>> {
    let mut entries = Vec::new();
    for store in self.instances()? {
      let raw = store.all()?;
      self.ensure_live(&store)?;
      entries.extend(self.decode_entries(&store, raw)?);
    }
    Ok(entries)
  }

  fn approximate_num_entries(&self) -> Result<u64> {
    Ok(self.instances()?.iter().map(|s| s.approximate_size()).sum())
  }
}
