//! Pluggable byte codecs for record keys and values.
//!
//! The engine itself never interprets payload bytes; every conversion between a
//! typed key/value and its wire form goes through a [`Serde`].

use crate::error::{Result, StreamsError};
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Encodes and decodes values of type `T`.
pub trait Serde<T>: Send + Sync {
  /// Encodes `data`.
  fn serialize(&self, data: &T) -> Result<Bytes>;

  /// Decodes `data`.
  fn deserialize(&self, data: &[u8]) -> Result<T>;
}

/// Shared handle to a codec.
pub type SharedSerde<T> = Arc<dyn Serde<T>>;

/// UTF-8 string codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringSerde;

impl Serde<String> for StringSerde {
  fn serialize(&self, data: &String) -> Result<Bytes> {
    Ok(Bytes::copy_from_slice(data.as_bytes()))
  }

  fn deserialize(&self, data: &[u8]) -> Result<String> {
    String::from_utf8(data.to_vec()).map_err(|e| StreamsError::Serialization(e.to_string()))
  }
}

/// Identity codec for raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerde;

impl Serde<Bytes> for BytesSerde {
  fn serialize(&self, data: &Bytes) -> Result<Bytes> {
    Ok(data.clone())
  }

  fn deserialize(&self, data: &[u8]) -> Result<Bytes> {
    Ok(Bytes::copy_from_slice(data))
  }
}

/// Big-endian 8-byte signed integer codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct I64Serde;

impl Serde<i64> for I64Serde {
  fn serialize(&self, data: &i64) -> Result<Bytes> {
    Ok(Bytes::copy_from_slice(&data.to_be_bytes()))
  }

  fn deserialize(&self, data: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = data.try_into().map_err(|_| {
      StreamsError::Serialization(format!("expected 8 bytes for i64, got {}", data.len()))
    })?;
    Ok(i64::from_be_bytes(raw))
  }
}

/// JSON codec for any serde-compatible type.
pub struct JsonSerde<T> {
  _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerde<T> {
  /// Creates a JSON codec.
  pub fn new() -> Self {
    Self {
      _marker: PhantomData,
    }
  }
}

impl<T> Default for JsonSerde<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T> Clone for JsonSerde<T> {
  fn clone(&self) -> Self {
    Self::new()
  }
}

impl<T> fmt::Debug for JsonSerde<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "JsonSerde<{}>", std::any::type_name::<T>())
  }
}

impl<T: Serialize + DeserializeOwned> Serde<T> for JsonSerde<T> {
  fn serialize(&self, data: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(data)?))
  }

  fn deserialize(&self, data: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(data)?)
  }
}

/// Builder-level default codecs, used for any key or value whose codec is
/// unknown when the topology is built.
///
/// Defaults are stored type-erased and recovered by exact type; a default of a
/// different type than the one requested is treated as absent.
#[derive(Clone, Default)]
pub struct SerdeDefaults {
  key: Option<Arc<dyn Any + Send + Sync>>,
  value: Option<Arc<dyn Any + Send + Sync>>,
}

impl SerdeDefaults {
  /// Registers the default key codec.
  pub fn set_key<K: 'static>(&mut self, serde: SharedSerde<K>) {
    self.key = Some(Arc::new(serde));
  }

  /// Registers the default value codec.
  pub fn set_value<V: 'static>(&mut self, serde: SharedSerde<V>) {
    self.value = Some(Arc::new(serde));
  }

  /// Default key codec for `K`, if one of that type was registered.
  pub fn key<K: 'static>(&self) -> Option<SharedSerde<K>> {
    self
      .key
      .as_ref()
      .and_then(|any| any.downcast_ref::<SharedSerde<K>>())
      .cloned()
  }

  /// Default value codec for `V`, if one of that type was registered.
  pub fn value<V: 'static>(&self) -> Option<SharedSerde<V>> {
    self
      .value
      .as_ref()
      .and_then(|any| any.downcast_ref::<SharedSerde<V>>())
      .cloned()
  }
}

impl fmt::Debug for SerdeDefaults {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SerdeDefaults")
      .field("key", &self.key.is_some())
      .field("value", &self.value.is_some())
      .finish()
  }
}

/// Picks the explicit codec, else the default key codec, else fails naming `node`.
pub(crate) fn resolve_key_serde<K: 'static>(
  explicit: &Option<SharedSerde<K>>,
  defaults: &SerdeDefaults,
  node: &str,
) -> Result<SharedSerde<K>> {
  explicit.clone().or_else(|| defaults.key::<K>()).ok_or_else(|| {
    StreamsError::illegal_state(
      node,
      format!("no key serde for type {}", std::any::type_name::<K>()),
    )
  })
}

/// Picks the explicit codec, else the default value codec, else fails naming `node`.
pub(crate) fn resolve_value_serde<V: 'static>(
  explicit: &Option<SharedSerde<V>>,
  defaults: &SerdeDefaults,
  node: &str,
) -> Result<SharedSerde<V>> {
  explicit.clone().or_else(|| defaults.value::<V>()).ok_or_else(|| {
    StreamsError::illegal_state(
      node,
      format!("no value serde for type {}", std::any::type_name::<V>()),
    )
  })
}
