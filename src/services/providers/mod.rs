// src/services/providers/mod.rs
//! DID method providers.
//!
//! Each supported method is one [`DidProvider`]: it owns the method's address
//! grammar and its deterministic document construction. The registry-backed
//! method additionally exposes its on-chain operations through
//! [`DidProvider::registry`].

pub mod ethr;
mod evm;
pub mod key;
pub mod kilt;
pub mod moonbeam;

use crate::error::{DidError, Result};
use crate::models::did::DIDDocument;
use crate::models::identifier::{Did, DidMethod};
use async_trait::async_trait;

pub use ethr::EthrProvider;
pub use key::KeyProvider;
pub use kilt::KiltProvider;
pub use moonbeam::MoonbeamProvider;

/// Capability contract shared by all DID methods.
#[async_trait]
pub trait DidProvider: Send + Sync {
    fn method(&self) -> DidMethod;

    /// Builds the DID for `address`.
    ///
    /// # Errors
    /// `Validation` if `address` does not follow the method's grammar.
    fn create_did(&self, address: &str) -> Result<String>;

    /// Deterministic document for an already parsed DID of this method.
    fn document_for(&self, did: &Did) -> Result<DIDDocument>;

    /// Address `did` was derived from.
    fn extract_address(&self, did: &Did) -> Result<String>;

    /// Deterministic off-chain document for `address`. Pure, no ledger access.
    fn create_did_document(&self, address: &str) -> Result<DIDDocument> {
        let did = Did::parse(&self.create_did(address)?)?;
        self.document_for(&did)
    }

    /// Current document of `did`.
    ///
    /// Off-chain methods recompute it from the DID.
    async fn resolve(&self, did: &Did) -> Result<DIDDocument> {
        self.ensure_method(did)?;
        self.document_for(did)
    }

    /// Whether the ledger holds a record for `did`. Always `false` without a registry.
    async fn did_exists(&self, did: &Did) -> Result<bool> {
        self.ensure_method(did)?;
        Ok(false)
    }

    /// On-chain operations, for the registry-backed method only.
    fn registry(&self) -> Option<&KiltProvider> {
        None
    }

    /// # Errors
    /// `Validation` if `did` belongs to another method.
    fn ensure_method(&self, did: &Did) -> Result<()> {
        if did.method() == self.method() {
            Ok(())
        } else {
            Err(DidError::validation(format!(
                "{did} is not a did:{} identifier",
                self.method()
            )))
        }
    }
}
