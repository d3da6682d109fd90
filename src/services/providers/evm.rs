// src/services/providers/evm.rs
//! Document construction shared by the EVM-style methods.

use crate::config::EvmSettings;
use crate::error::{DidError, Result};
use crate::models::did::{DIDDocument, KeyMaterial, VerificationMethod, VerificationMethodType};
use crate::models::identifier::{Did, DidMethod};
use crate::utils::address::{checksum_evm_address, parse_evm_address};

/// Well-known network names and their EIP-155 chain ids.
const KNOWN_NETWORKS: [(&str, u64); 6] = [
    ("mainnet", 1),
    ("goerli", 5),
    ("sepolia", 11_155_111),
    ("polygon", 137),
    ("moonbeam", 1284),
    ("moonriver", 1285),
];

/// `did:<method>[:<network>]:<0x address>` handling for one EVM method.
#[derive(Debug, Clone)]
pub(crate) struct EvmMethod {
    method: DidMethod,
    settings: EvmSettings,
}

impl EvmMethod {
    pub(crate) fn new(method: DidMethod, settings: EvmSettings) -> Self {
        EvmMethod { method, settings }
    }

    /// The address is kept exactly as given; only `blockchainAccountId` is checksummed.
    pub(crate) fn create_did(&self, address: &str) -> Result<String> {
        parse_evm_address(address)?;
        let did = match &self.settings.network {
            Some(network) => Did::new(self.method, format!("{network}:{address}")),
            None => Did::new(self.method, address),
        };
        Ok(did.to_string())
    }

    /// Splits the method-specific id into an optional network and the address.
    fn split<'a>(&self, did: &'a Did) -> Result<(Option<&'a str>, &'a str)> {
        let id = did.method_specific_id();
        let (network, address) = match id.rsplit_once(':') {
            Some((network, address)) => (Some(network), address),
            None => (None, id),
        };
        parse_evm_address(address)?;
        Ok((network, address))
    }

    pub(crate) fn extract_address(&self, did: &Did) -> Result<String> {
        self.split(did).map(|(_, address)| address.to_string())
    }

    /// Chain id for a network segment.
    ///
    /// The configured network maps to the configured chain id; other
    /// segments must be a well-known name or a `0x` hex chain id.
    fn chain_id(&self, network: Option<&str>) -> Result<u64> {
        let Some(network) = network else {
            return Ok(self.settings.chain_id);
        };
        if self.settings.network.as_deref() == Some(network) {
            return Ok(self.settings.chain_id);
        }
        if let Some(hex) = network.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16)
                .map_err(|_| DidError::validation(format!("invalid chain id '{network}'")));
        }
        KNOWN_NETWORKS
            .iter()
            .find(|(name, _)| *name == network)
            .map(|(_, id)| *id)
            .ok_or_else(|| {
                DidError::validation(format!("unknown did:{} network '{network}'", self.method))
            })
    }

    pub(crate) fn document_for(&self, did: &Did) -> Result<DIDDocument> {
        let (network, address) = self.split(did)?;
        let chain_id = self.chain_id(network)?;
        let did = did.to_string();

        let mut document = DIDDocument::new(did.as_str());
        document.add_verification_method(
            VerificationMethod::new(
                format!("{did}#controller"),
                VerificationMethodType::EcdsaSecp256k1RecoveryMethod2020,
                did.as_str(),
                KeyMaterial::BlockchainAccountId(format!(
                    "eip155:{chain_id}:{}",
                    checksum_evm_address(address)?
                )),
            ),
            true,
        )?;
        Ok(document)
    }
}
