// src/utils/serialization.rs
//! Serialization utilities for ledger payloads and stored records.

use crate::error::{DidError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

/// Serializes a value to its JSON byte encoding.
///
/// # Arguments
/// * `data` - The value to serialize (must implement `Serialize`)
///
/// # Returns
/// - `Ok(Vec<u8>)` with the compact JSON encoding on success
/// - `Err(DidError::Registration)` if serialization fails
pub fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(data).map_err(|e| DidError::registration_with("payload encoding failed", e))
}

/// Reconstructs a typed value from raw ledger state.
///
/// # Arguments
/// * `value` - JSON value as returned by a state query
///
/// # Returns
/// - `Ok(T)` on success
/// - `Err(DidError::Registration)` if the stored value has an unexpected shape
pub fn decode_state<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| DidError::registration_with("unexpected on-chain record shape", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_state_reports_shape_errors() {
        let ok: Vec<u32> = decode_state(json!([1, 2])).unwrap();
        assert_eq!(ok, vec![1, 2]);

        let err = decode_state::<Vec<u32>>(json!({"not": "a list"})).unwrap_err();
        assert_eq!(err.kind(), "did_registration_error");
    }

    #[test]
    fn test_encode_is_compact() {
        assert_eq!(encode(&json!({"a": 1})).unwrap(), br#"{"a":1}"#.to_vec());
    }
}
