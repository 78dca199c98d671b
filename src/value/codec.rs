use super::Value;
use crate::error::Result;

/// Encode a value to its MessagePack-compatible wire representation.
///
/// Record encoding (via [`crate::schema::StructValue::encode`]) emits fields
/// in schema column order by encoding a `Value::Struct` whose `BTreeMap` has
/// already been built in that order upstream; slice encoding emits the
/// array-header-plus-elements shape the manual `Serialize` impl in
/// `serde_impl` writes for `Value::Slice`.
pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(value)?)
}

/// Decode a value previously produced by [`encode_value`].
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let encoded = encode_value(&v).unwrap();
        let decoded = decode_value(&encoded).unwrap();
        assert_eq!(v, decoded);
    }

    #[test]
    fn round_trips_every_kind() {
        roundtrip(Value::Nil);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-7));
        roundtrip(Value::Uint(7));
        roundtrip(Value::Float64(1.5));
        roundtrip(Value::String("hello".to_string()));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::Time(1_700_000_000));
        roundtrip(Value::Slice(vec![Value::Int(1), Value::Int(2)]));
    }
}
