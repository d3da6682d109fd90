// src/utils/address.rs
//! Address grammars of the supported ledgers and method detection.
//!
//! Two grammars matter for detection:
//! - EVM addresses: `0x` followed by exactly 40 hex digits
//! - SS58 addresses: base-58 with a network prefix, a 32-byte account id and
//!   a BLAKE2b checksum over `"SS58PRE" || prefix || account`

use crate::error::{DidError, Result};
use crate::models::identifier::DidMethod;
use crate::utils::crypto::blake2_512;
use ethers_core::types::Address;
use ethers_core::utils::to_checksum;
use std::str::FromStr;

const SS58_CONTEXT: &[u8] = b"SS58PRE";
const ACCOUNT_ID_LENGTH: usize = 32;
const CHECKSUM_LENGTH: usize = 2;

/// Returns `true` for `0x` + 40 hex digits, in any letter case.
pub fn is_evm_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Parses an EVM address.
///
/// # Errors
/// `Validation` if `address` is not `0x` + 40 hex digits.
pub fn parse_evm_address(address: &str) -> Result<Address> {
    if !is_evm_address(address) {
        return Err(DidError::validation(format!(
            "'{address}' is not a 0x-prefixed 40 hex digit address"
        )));
    }
    Address::from_str(address)
        .map_err(|e| DidError::validation(format!("invalid EVM address '{address}': {e}")))
}

/// EIP-55 mixed-case form of an EVM address.
pub fn checksum_evm_address(address: &str) -> Result<String> {
    let parsed = parse_evm_address(address)?;
    Ok(to_checksum(&parsed, None))
}

/// A decoded SS58 address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ss58Address {
    /// Network identifier (42 for generic substrate, 38 for KILT)
    pub prefix: u16,
    pub account_id: [u8; 32],
}

/// Decodes and checksum-verifies an SS58 address.
///
/// # Errors
/// `Validation` if the address is not base-58, has an unexpected length, or
/// its checksum does not match.
pub fn decode_ss58(address: &str) -> Result<Ss58Address> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| DidError::validation(format!("'{address}' is not base-58: {e}")))?;

    let (prefix, prefix_length) = match bytes.first() {
        Some(&first) if first < 64 => (u16::from(first), 1),
        Some(&first) if first < 128 => {
            let second = *bytes
                .get(1)
                .ok_or_else(|| DidError::validation("truncated SS58 prefix"))?;
            let lower = (first << 2) | (second >> 6);
            let upper = second & 0b0011_1111;
            (u16::from(lower) | (u16::from(upper) << 8), 2)
        }
        _ => return Err(DidError::validation(format!("'{address}' has no valid SS58 prefix"))),
    };

    if bytes.len() != prefix_length + ACCOUNT_ID_LENGTH + CHECKSUM_LENGTH {
        return Err(DidError::validation(format!(
            "'{address}' does not encode a 32-byte account"
        )));
    }

    let body_end = prefix_length + ACCOUNT_ID_LENGTH;
    let checksum = blake2_512(&[SS58_CONTEXT, &bytes[..body_end]]);
    if checksum[..CHECKSUM_LENGTH] != bytes[body_end..] {
        return Err(DidError::validation(format!(
            "'{address}' has an invalid SS58 checksum"
        )));
    }

    let mut account_id = [0u8; ACCOUNT_ID_LENGTH];
    account_id.copy_from_slice(&bytes[prefix_length..body_end]);
    Ok(Ss58Address { prefix, account_id })
}

/// Encodes an account id as an SS58 address for the given network prefix.
pub fn encode_ss58(prefix: u16, account_id: &[u8; 32]) -> String {
    let mut bytes = Vec::with_capacity(2 + ACCOUNT_ID_LENGTH + CHECKSUM_LENGTH);
    if prefix < 64 {
        bytes.push(prefix as u8);
    } else {
        let first = ((prefix & 0b1111_1100) >> 2) as u8 | 0b0100_0000;
        let second = ((prefix >> 8) as u8) | (((prefix & 0b0000_0011) as u8) << 6);
        bytes.push(first);
        bytes.push(second);
    }
    bytes.extend_from_slice(account_id);
    let checksum = blake2_512(&[SS58_CONTEXT, &bytes]);
    bytes.extend_from_slice(&checksum[..CHECKSUM_LENGTH]);
    bs58::encode(bytes).into_string()
}

pub fn is_ss58_address(address: &str) -> bool {
    decode_ss58(address).is_ok()
}

/// Detects the DID method from the address grammar.
///
/// # Rules
/// 1. `0x` + 40 hex digits → `ethr`
/// 2. checksum-valid SS58 → `kilt` (the registry-backed method)
/// 3. anything else → `key`, the most permissive method
///
/// EVM-compatible parachain addresses are indistinguishable from Ethereum
/// ones, so `moonbeam` is only ever selected explicitly.
///
/// # Errors
/// `Validation` for empty or whitespace-only input. Any other input yields a
/// method; the chosen provider validates the address afterwards.
pub fn detect_method(address: &str) -> Result<DidMethod> {
    if address.trim().is_empty() {
        return Err(DidError::validation("address must not be empty"));
    }
    if is_evm_address(address) {
        Ok(DidMethod::Ethr)
    } else if is_ss58_address(address) {
        Ok(DidMethod::Kilt)
    } else {
        Ok(DidMethod::Key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers_core::utils::hex;

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const ALICE_PUBLIC: &str = "d43593c715fdd31c61141abd04a99fd6822c8558854ccde39a5684e7a56da27d";

    #[test]
    fn test_decode_alice() {
        let decoded = decode_ss58(ALICE).unwrap();
        assert_eq!(decoded.prefix, 42);
        assert_eq!(hex::encode(decoded.account_id), ALICE_PUBLIC);
        assert_eq!(encode_ss58(42, &decoded.account_id), ALICE);
    }

    #[test]
    fn test_two_byte_prefix_round_trip() {
        let account = [7u8; 32];
        let encoded = encode_ss58(1284, &account);
        let decoded = decode_ss58(&encoded).unwrap();
        assert_eq!(decoded.prefix, 1284);
        assert_eq!(decoded.account_id, account);
    }

    #[test]
    fn test_checksum_mismatch_is_rejected() {
        let mut tampered = ALICE.to_string();
        tampered.replace_range(10..11, "x");
        assert!(decode_ss58(&tampered).is_err());
    }

    #[test]
    fn test_detect_method() {
        assert_eq!(
            detect_method("0xb9c5714089478a327f09197987f16f9e5d936e8a").unwrap(),
            DidMethod::Ethr
        );
        assert_eq!(detect_method(ALICE).unwrap(), DidMethod::Kilt);
        assert_eq!(
            detect_method("z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK").unwrap(),
            DidMethod::Key
        );
        assert_eq!(detect_method("anything-else").unwrap(), DidMethod::Key);
        // 39 hex digits is not an EVM address
        assert_eq!(
            detect_method("0xb9c5714089478a327f09197987f16f9e5d936e8").unwrap(),
            DidMethod::Key
        );
        assert!(detect_method("").is_err());
        assert!(detect_method("   ").is_err());
    }

    #[test]
    fn test_checksum_evm_address() {
        assert_eq!(
            checksum_evm_address("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap(),
            "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed"
        );
        assert!(checksum_evm_address("0x123").is_err());
    }
}
