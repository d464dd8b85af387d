use crate::serdes::{BytesSerde, I64Serde, JsonSerde, Serde, SerdeDefaults, SharedSerde, StringSerde};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
  id: u32,
  amount: f64,
}

#[test]
fn test_string_serde_rejects_invalid_utf8() {
  let err = StringSerde.deserialize(&[0xff, 0xfe]).unwrap_err();
  assert!(err.to_string().contains("serialization"));
}

#[test]
fn test_i64_serde_is_big_endian() {
  let bytes = I64Serde.serialize(&1).unwrap();
  assert_eq!(bytes.as_ref(), &[0, 0, 0, 0, 0, 0, 0, 1]);
  assert_eq!(I64Serde.deserialize(&bytes).unwrap(), 1);
}

#[test]
fn test_i64_serde_rejects_wrong_length() {
  assert!(I64Serde.deserialize(&[1, 2, 3]).is_err());
}

#[test]
fn test_bytes_serde_is_identity() {
  let data = Bytes::from_static(b"raw");
  assert_eq!(BytesSerde.serialize(&data).unwrap(), data);
}

#[test]
fn test_json_serde_struct() {
  let serde = JsonSerde::<Order>::new();
  let order = Order { id: 7, amount: 12.5 };
  let bytes = serde.serialize(&order).unwrap();
  assert_eq!(serde.deserialize(&bytes).unwrap(), order);
  assert!(serde.deserialize(b"[]").is_err());
}

#[test]
fn test_defaults_are_recovered_by_exact_type() {
  let mut defaults = SerdeDefaults::default();
  defaults.set_key::<String>(Arc::new(StringSerde));
  defaults.set_value::<i64>(Arc::new(I64Serde));

  assert!(defaults.key::<String>().is_some());
  assert!(defaults.key::<i64>().is_none());
  assert!(defaults.value::<i64>().is_some());
  assert!(defaults.value::<String>().is_none());

  let key: SharedSerde<String> = defaults.key::<String>().unwrap();
  assert_eq!(key.serialize(&"k".to_string()).unwrap().as_ref(), b"k");
}
