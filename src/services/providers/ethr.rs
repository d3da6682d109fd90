// src/services/providers/ethr.rs
//! `did:ethr`, Ethereum-style accounts.

use super::evm::EvmMethod;
use super::DidProvider;
use crate::config::EvmSettings;
use crate::error::Result;
use crate::models::did::DIDDocument;
use crate::models::identifier::{Did, DidMethod};
use async_trait::async_trait;

/// Provider for `did:ethr:[<network>:]0x…`.
#[derive(Debug, Clone)]
pub struct EthrProvider {
    inner: EvmMethod,
}

impl EthrProvider {
    pub fn new(settings: EvmSettings) -> Self {
        EthrProvider {
            inner: EvmMethod::new(DidMethod::Ethr, settings),
        }
    }
}

impl Default for EthrProvider {
    fn default() -> Self {
        EthrProvider::new(EvmSettings::default())
    }
}

#[async_trait]
impl DidProvider for EthrProvider {
    fn method(&self) -> DidMethod {
        DidMethod::Ethr
    }

    fn create_did(&self, address: &str) -> Result<String> {
        self.inner.create_did(address)
    }

    fn document_for(&self, did: &Did) -> Result<DIDDocument> {
        self.ensure_method(did)?;
        self.inner.document_for(did)
    }

    fn extract_address(&self, did: &Did) -> Result<String> {
        self.ensure_method(did)?;
        self.inner.extract_address(did)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DidError;
    use crate::models::did::{KeyMaterial, SECP256K1_RECOVERY_CONTEXT};

    const ADDRESS: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";

    #[test]
    fn test_document_uses_checksummed_account() {
        let provider = EthrProvider::default();
        let did = provider.create_did(ADDRESS).unwrap();
        assert_eq!(did, format!("did:ethr:{ADDRESS}"));

        let document = provider.create_did_document(ADDRESS).unwrap();
        assert_eq!(document.id, did);
        assert!(document.context.iter().any(|c| c == SECP256K1_RECOVERY_CONTEXT));
        assert_eq!(document.authentication, vec![format!("{did}#controller")]);
        assert_eq!(
            document.verification_method[0].key,
            KeyMaterial::BlockchainAccountId(
                "eip155:1:0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed".into()
            )
        );
    }

    #[test]
    fn test_network_segment() {
        let provider = EthrProvider::new(EvmSettings {
            network: Some("sepolia".into()),
            chain_id: 11_155_111,
        });
        let did = provider.create_did(ADDRESS).unwrap();
        assert_eq!(did, format!("did:ethr:sepolia:{ADDRESS}"));

        let parsed = Did::parse(&did).unwrap();
        assert_eq!(provider.extract_address(&parsed).unwrap(), ADDRESS);
        let document = provider.document_for(&parsed).unwrap();
        assert!(matches!(
            &document.verification_method[0].key,
            KeyMaterial::BlockchainAccountId(id) if id.starts_with("eip155:11155111:")
        ));
    }

    #[test]
    fn test_rejects_bad_addresses() {
        let provider = EthrProvider::default();
        assert!(matches!(provider.create_did("0x1234"), Err(DidError::Validation(_))));
        let parsed = Did::parse("did:ethr:mars:0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();
        assert!(provider.document_for(&parsed).is_err());
        let moonbeam = Did::parse(&format!("did:moonbeam:{ADDRESS}")).unwrap();
        assert!(provider.extract_address(&moonbeam).is_err());
    }
}
