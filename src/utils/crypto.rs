// src/utils/crypto.rs
//! Hashing and key-encoding utilities.
//!
//! - BLAKE2b (via `blake2b_simd`) for SS58 checksums and transaction hashes
//! - Multicodec-prefixed, multibase (base58btc) public keys as used by
//!   `publicKeyMultibase` and `did:key`

use crate::error::{DidError, Result};
use ethers_core::utils::hex;
use multibase::Base;

/// Computes a 32-byte BLAKE2b hash of the input data.
///
/// # Arguments
/// * `data` - Binary data to hash
///
/// # Returns
/// Fixed-size 32-byte array, the hash used for ledger transaction and block ids.
pub fn blake2_256(data: &[u8]) -> [u8; 32] {
    let hash = blake2b_simd::Params::new().hash_length(32).hash(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(hash.as_bytes());
    out
}

/// Computes a 64-byte BLAKE2b hash over the concatenation of `parts`.
pub fn blake2_512(parts: &[&[u8]]) -> [u8; 64] {
    let mut state = blake2b_simd::Params::new().hash_length(64).to_state();
    for part in parts {
        state.update(part);
    }
    let mut out = [0u8; 64];
    out.copy_from_slice(state.finalize().as_bytes());
    out
}

/// Lowercase hex with a `0x` prefix.
pub fn to_hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Public key types that can appear behind a multicodec prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCodec {
    Ed25519,
    Secp256k1,
    X25519,
    Sr25519,
    P256,
}

impl KeyCodec {
    /// Unsigned-varint encoded multicodec prefix.
    pub fn prefix(&self) -> [u8; 2] {
        match self {
            KeyCodec::Ed25519 => [0xed, 0x01],
            KeyCodec::Secp256k1 => [0xe7, 0x01],
            KeyCodec::X25519 => [0xec, 0x01],
            KeyCodec::Sr25519 => [0xef, 0x01],
            KeyCodec::P256 => [0x80, 0x24],
        }
    }

    /// Length of the raw public key (compressed for the EC curves).
    pub fn key_length(&self) -> usize {
        match self {
            KeyCodec::Ed25519 | KeyCodec::X25519 | KeyCodec::Sr25519 => 32,
            KeyCodec::Secp256k1 | KeyCodec::P256 => 33,
        }
    }

    fn from_prefix(prefix: [u8; 2]) -> Option<Self> {
        [
            KeyCodec::Ed25519,
            KeyCodec::Secp256k1,
            KeyCodec::X25519,
            KeyCodec::Sr25519,
            KeyCodec::P256,
        ]
        .into_iter()
        .find(|codec| codec.prefix() == prefix)
    }
}

/// Encodes a raw public key as multibase base58btc with its multicodec prefix.
pub fn encode_multikey(codec: KeyCodec, key: &[u8]) -> String {
    let mut bytes = Vec::with_capacity(2 + key.len());
    bytes.extend_from_slice(&codec.prefix());
    bytes.extend_from_slice(key);
    multibase::encode(Base::Base58Btc, bytes)
}

/// Decodes a multibase multicodec public key.
///
/// # Errors
/// `Validation` if the value is not base58btc multibase, carries an unknown
/// codec, or the key length does not match the codec.
pub fn decode_multikey(value: &str) -> Result<(KeyCodec, Vec<u8>)> {
    if !value.starts_with('z') {
        return Err(DidError::validation(format!(
            "'{value}' is not a base58btc multibase value"
        )));
    }
    let (_, bytes) = multibase::decode(value)
        .map_err(|e| DidError::validation(format!("invalid multibase '{value}': {e}")))?;
    if bytes.len() < 2 {
        return Err(DidError::validation("multikey too short"));
    }
    let codec = KeyCodec::from_prefix([bytes[0], bytes[1]])
        .ok_or_else(|| DidError::validation(format!("unsupported multicodec in '{value}'")))?;
    let key = bytes[2..].to_vec();
    if key.len() != codec.key_length() {
        return Err(DidError::validation(format!(
            "{codec:?} key must be {} bytes, got {}",
            codec.key_length(),
            key.len()
        )));
    }
    Ok((codec, key))
}
