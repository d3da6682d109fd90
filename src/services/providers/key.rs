// src/services/providers/key.rs
//! `did:key`, DIDs that are their own public key.
//!
//! The address is a multibase base58btc multicodec public key and the DID is
//! `did:key:<that value>`. Curve points are checked on construction so a
//! document never carries a key that cannot be used.

use super::DidProvider;
use crate::error::{DidError, Result};
use crate::models::did::{DIDDocument, KeyMaterial, VerificationMethod, VerificationMethodType};
use crate::models::identifier::{Did, DidMethod};
use crate::utils::crypto::{decode_multikey, KeyCodec};
use async_trait::async_trait;
use curve25519_dalek::edwards::CompressedEdwardsY;
use curve25519_dalek::ristretto::CompressedRistretto;

#[derive(Debug, Clone, Copy, Default)]
pub struct KeyProvider;

impl KeyProvider {
    pub fn new() -> Self {
        KeyProvider
    }

    /// Decodes the multikey and checks it is a valid point of its curve.
    fn validate_key(&self, multibase: &str) -> Result<KeyCodec> {
        let (codec, key) = decode_multikey(multibase)?;
        let valid = match codec {
            KeyCodec::Secp256k1 => k256::PublicKey::from_sec1_bytes(&key).is_ok(),
            KeyCodec::Ed25519 => CompressedEdwardsY::from_slice(&key)
                .ok()
                .and_then(|point| point.decompress())
                .is_some(),
            KeyCodec::Sr25519 => CompressedRistretto::from_slice(&key)
                .ok()
                .and_then(|point| point.decompress())
                .is_some(),
            // every 32-byte string is a Montgomery u-coordinate
            KeyCodec::X25519 => true,
            KeyCodec::P256 => matches!(key.first(), Some(0x02 | 0x03)),
        };
        if !valid {
            return Err(DidError::validation(format!(
                "'{multibase}' is not a valid {codec:?} public key"
            )));
        }
        Ok(codec)
    }
}

#[async_trait]
impl DidProvider for KeyProvider {
    fn method(&self) -> DidMethod {
        DidMethod::Key
    }

    fn create_did(&self, address: &str) -> Result<String> {
        self.validate_key(address)?;
        Ok(Did::new(DidMethod::Key, address).to_string())
    }

    fn document_for(&self, did: &Did) -> Result<DIDDocument> {
        self.ensure_method(did)?;
        let multibase = did.method_specific_id();
        let codec = self.validate_key(multibase)?;
        let id = did.to_string();

        let type_ = match codec {
            KeyCodec::Ed25519 => VerificationMethodType::Ed25519VerificationKey2020,
            KeyCodec::Secp256k1 => VerificationMethodType::EcdsaSecp256k1VerificationKey2019,
            KeyCodec::X25519 => VerificationMethodType::X25519KeyAgreementKey2020,
            KeyCodec::Sr25519 => VerificationMethodType::Sr25519VerificationKey2020,
            KeyCodec::P256 => VerificationMethodType::Multikey,
        };
        let method = VerificationMethod::new(
            format!("{id}#{multibase}"),
            type_,
            id.as_str(),
            KeyMaterial::PublicKeyMultibase(multibase.to_string()),
        );

        let mut document = DIDDocument::new(id.as_str());
        if codec == KeyCodec::X25519 {
            // encryption keys cannot authenticate
            document.add_key_agreement(method)?;
        } else {
            document.add_verification_method(method, true)?;
        }
        Ok(document)
    }

    fn extract_address(&self, did: &Did) -> Result<String> {
        self.ensure_method(did)?;
        self.validate_key(did.method_specific_id())?;
        Ok(did.method_specific_id().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::did::{ED25519_CONTEXT, X25519_CONTEXT};
    use crate::utils::crypto::encode_multikey;
    use k256::elliptic_curve::sec1::ToEncodedPoint;

    const ED25519_KEY: &str = "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    #[test]
    fn test_ed25519_document() {
        let provider = KeyProvider::new();
        let document = provider.create_did_document(ED25519_KEY).unwrap();
        let did = format!("did:key:{ED25519_KEY}");
        assert_eq!(document.id, did);
        assert!(document.context.iter().any(|c| c == ED25519_CONTEXT));
        assert_eq!(document.authentication, vec![format!("{did}#{ED25519_KEY}")]);
        assert_eq!(
            document.verification_method[0].type_,
            VerificationMethodType::Ed25519VerificationKey2020
        );
    }

    #[test]
    fn test_secp256k1_point_validation() {
        let secret = k256::SecretKey::from_slice(&[7u8; 32]).unwrap();
        let point = secret.public_key().to_encoded_point(true);
        let valid = encode_multikey(KeyCodec::Secp256k1, point.as_bytes());

        let provider = KeyProvider::new();
        let document = provider.create_did_document(&valid).unwrap();
        assert_eq!(
            document.verification_method[0].type_,
            VerificationMethodType::EcdsaSecp256k1VerificationKey2019
        );

        let mut bogus = [0u8; 33];
        bogus[0] = 0x05;
        let invalid = encode_multikey(KeyCodec::Secp256k1, &bogus);
        assert!(matches!(provider.create_did(&invalid), Err(DidError::Validation(_))));
    }

    #[test]
    fn test_x25519_key_is_key_agreement_only() {
        let key = encode_multikey(KeyCodec::X25519, &[9u8; 32]);
        let document = KeyProvider::new().create_did_document(&key).unwrap();
        assert!(document.authentication.is_empty());
        assert_eq!(document.key_agreement.len(), 1);
        assert!(document.context.iter().any(|c| c == X25519_CONTEXT));
        assert!(document.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_multikeys() {
        let provider = KeyProvider::new();
        assert!(provider.create_did("hello").is_err());
        assert!(provider.create_did("z1111").is_err());
    }

    #[test]
    fn test_extract_round_trip() {
        let provider = KeyProvider::new();
        let did = Did::parse(&provider.create_did(ED25519_KEY).unwrap()).unwrap();
        assert_eq!(provider.extract_address(&did).unwrap(), ED25519_KEY);
    }
}
