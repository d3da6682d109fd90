// src/services/providers/moonbeam.rs
//! `did:moonbeam`, accounts of the EVM-compatible parachain.
//!
//! Addresses look exactly like Ethereum ones, so this method is never
//! detected and must be requested explicitly.

use super::evm::EvmMethod;
use super::DidProvider;
use crate::config::EvmSettings;
use crate::error::Result;
use crate::models::did::DIDDocument;
use crate::models::identifier::{Did, DidMethod};
use async_trait::async_trait;

pub const MOONBEAM_CHAIN_ID: u64 = 1284;

#[derive(Debug, Clone)]
pub struct MoonbeamProvider {
    inner: EvmMethod,
}

impl MoonbeamProvider {
    pub fn new(settings: EvmSettings) -> Self {
        MoonbeamProvider {
            inner: EvmMethod::new(DidMethod::Moonbeam, settings),
        }
    }
}

impl Default for MoonbeamProvider {
    fn default() -> Self {
        MoonbeamProvider::new(EvmSettings {
            network: None,
            chain_id: MOONBEAM_CHAIN_ID,
        })
    }
}

#[async_trait]
impl DidProvider for MoonbeamProvider {
    fn method(&self) -> DidMethod {
        DidMethod::Moonbeam
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
