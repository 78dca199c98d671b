use super::{encode_value, Value};

/// A stable, process-independent 32-bit hash of a value's kind tag and
/// canonical byte representation. Used by the SLC to select a cache-store
/// shard when no explicit shard key is configured; deliberately not
/// `std::hash::Hash` (whose `SipHash` default is seeded per-process and
/// would not be stable across restarts or instances).
pub fn stable_hash(value: &Value) -> u32 {
    let bytes = encode_value(value).unwrap_or_default();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_calls() {
        let v = Value::String("shard-me".to_string());
        assert_eq!(stable_hash(&v), stable_hash(&v));
    }

    #[test]
    fn distinguishes_distinct_values() {
        let a = Value::Int(1);
        let b = Value::Int(2);
        assert_ne!(stable_hash(&a), stable_hash(&b));
    }
}
