// src/wallet/key_agreement.rs
//! X25519 key agreement keys.
//!
//! Generates the public half of a fresh X25519 key pair for the
//! `keyAgreement` relationship of a DID Document. The secret scalar comes
//! from the operating system RNG and is discarded once the public key is
//! derived; this crate does not manage private keys.

use crate::models::did::{KeyMaterial, VerificationMethod, VerificationMethodType};
use crate::utils::crypto::{encode_multikey, KeyCodec};
use curve25519_dalek::MontgomeryPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Fragment under which a generated key is attached to a document.
pub const KEY_AGREEMENT_FRAGMENT: &str = "key-agreement";

/// Public key usable for encryption key agreement.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyAgreementKey {
    /// Always `X25519KeyAgreementKey2020`
    #[serde(rename = "type")]
    pub type_: VerificationMethodType,
    /// Multibase base58btc of the `x25519-pub` multicodec key
    pub public_key_multibase: String,
}

impl KeyAgreementKey {
    /// Verification method entry for `did`, with id `<did>#key-agreement`.
    pub fn to_verification_method(&self, did: &str) -> VerificationMethod {
        VerificationMethod::new(
            format!("{did}#{KEY_AGREEMENT_FRAGMENT}"),
            self.type_,
            did,
            KeyMaterial::PublicKeyMultibase(self.public_key_multibase.clone()),
        )
    }
}

/// Generates a fresh X25519 public key.
///
/// Every call draws new randomness, so two keys are never equal in practice.
pub fn generate_key_agreement_key() -> KeyAgreementKey {
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    let public = MontgomeryPoint::mul_base_clamped(secret);

    KeyAgreementKey {
        type_: VerificationMethodType::X25519KeyAgreementKey2020,
        public_key_multibase: encode_multikey(KeyCodec::X25519, public.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::decode_multikey;

    #[test]
    fn test_generated_key_is_x25519_multikey() {
        let key = generate_key_agreement_key();
        assert!(key.public_key_multibase.starts_with("z6LS"));
        let (codec, bytes) = decode_multikey(&key.public_key_multibase).unwrap();
        assert_eq!(codec, KeyCodec::X25519);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn test_keys_are_fresh() {
        let first = generate_key_agreement_key();
        let second = generate_key_agreement_key();
        assert_ne!(first.public_key_multibase, second.public_key_multibase);
    }

    #[test]
    fn test_verification_method_entry() {
        let key = generate_key_agreement_key();
        let method = key.to_verification_method("did:key:z6Mk");
        assert_eq!(method.id, "did:key:z6Mk#key-agreement");
        assert_eq!(method.controller, "did:key:z6Mk");
        assert!(method.validate().is_ok());
    }
}
