// src/services/factory.rs
//! Method dispatcher.
//!
//! [`DidFactory`] is the entry point of the library: it detects or accepts
//! a method tag, hands the call to that method's provider and normalizes the
//! result. Resolution never falls back to a different method than the one
//! the DID names.

use crate::blockchain::adapter::ChainAdapter;
use crate::blockchain::nonce::AccountLocks;
use crate::config::Settings;
use crate::error::{DidError, Result};
use crate::models::did::{DIDDocument, Service, VerificationMethod};
use crate::models::identifier::{Did, DidMethod};
use crate::models::transaction::{
    CreatedDid, CreationRequest, RegistrationOutcome, TransactionResult,
};
use crate::services::providers::kilt::PreparedRegistration;
use crate::services::providers::{
    DidProvider, EthrProvider, KeyProvider, KiltProvider, MoonbeamProvider,
};
use crate::utils::address::detect_method;
use crate::wallet::key_agreement::{generate_key_agreement_key, KeyAgreementKey};
use futures::future::join_all;
use log::{debug, warn};
use std::sync::Arc;

/// Options of [`DidFactory::create_did`].
#[derive(Clone, Default)]
pub struct CreateDidOptions {
    /// Explicit method; detected from the address grammar when absent
    pub method: Option<DidMethod>,
    /// Registry adapter to use instead of the factory's for this call
    pub adapter: Option<Arc<dyn ChainAdapter>>,
    /// Register the DID in the method's registry
    pub on_chain: bool,
    /// Signer and fee payer of an on-chain registration, the address itself by default
    pub signer: Option<String>,
    /// Return the off-chain document as well
    pub include_document: bool,
    /// Attach a freshly generated X25519 key as `#key-agreement`
    pub key_agreement: bool,
}

impl CreateDidOptions {
    pub fn method(mut self, method: DidMethod) -> Self {
        self.method = Some(method);
        self
    }

    pub fn on_chain(mut self) -> Self {
        self.on_chain = true;
        self
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_signer(mut self, signer: impl Into<String>) -> Self {
        self.signer = Some(signer.into());
        self
    }

    pub fn with_document(mut self) -> Self {
        self.include_document = true;
        self
    }

    pub fn with_key_agreement(mut self) -> Self {
        self.key_agreement = true;
        self
    }
}

pub struct DidFactory {
    ethr: EthrProvider,
    key: KeyProvider,
    kilt: KiltProvider,
    moonbeam: MoonbeamProvider,
    locks: AccountLocks,
    settings: Settings,
}

impl DidFactory {
    /// # Arguments
    /// * `settings` - Method and pipeline settings
    /// * `registry` - Adapter of the identity ledger backing `did:kilt`
    pub fn new(settings: Settings, registry: Arc<dyn ChainAdapter>) -> Self {
        let locks = AccountLocks::new();
        DidFactory {
            ethr: EthrProvider::new(settings.ethr.clone()),
            key: KeyProvider::new(),
            kilt: KiltProvider::from_settings(registry, locks.clone(), &settings),
            moonbeam: MoonbeamProvider::new(settings.moonbeam.clone()),
            locks,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Provider of `method`.
    pub fn provider(&self, method: DidMethod) -> &dyn DidProvider {
        match method {
            DidMethod::Ethr => &self.ethr,
            DidMethod::Key => &self.key,
            DidMethod::Kilt => &self.kilt,
            DidMethod::Moonbeam => &self.moonbeam,
        }
    }

    /// Closes the identity ledger session. Registry operations fail afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        self.kilt.disconnect().await
    }

    fn registry_for(&self, did: &Did) -> Result<&KiltProvider> {
        self.provider(did.method()).registry().ok_or_else(|| {
            DidError::validation(format!("did:{} has no on-chain registry", did.method()))
        })
    }

    fn resolve_method(address: &str, method: Option<DidMethod>) -> Result<DidMethod> {
        match method {
            Some(method) => Ok(method),
            None => detect_method(address),
        }
    }

    /// Creates the DID for `address`, optionally registering it.
    ///
    /// # Returns
    /// `{did, method, document?}`. The document is always present after an
    /// on-chain registration; off-chain only when requested.
    ///
    /// # Errors
    /// - `Validation` for an empty or malformed address
    /// - `Validation` for `on_chain` on a method without registry when strict mode is on
    /// - any registration error for on-chain creation
    pub async fn create_did(&self, address: &str, options: CreateDidOptions) -> Result<CreatedDid> {
        let method = Self::resolve_method(address, options.method)?;
        let provider = self.provider(method);
        let did = provider.create_did(address)?;
        let key_agreement = options.key_agreement.then(generate_key_agreement_key);

        if options.on_chain {
            if method.has_registry() {
                let mut request = CreationRequest::new(address);
                if let Some(key) = &key_agreement {
                    request = request.with_verification_method(key.to_verification_method(&did));
                }
                let signer = options.signer.as_deref().unwrap_or(address);
                let outcome = match options.adapter {
                    Some(adapter) => {
                        KiltProvider::from_settings(adapter, self.locks.clone(), &self.settings)
                            .register_did_onchain(&request, signer)
                            .await?
                    }
                    None => self.kilt.register_did_onchain(&request, signer).await?,
                };
                return Ok(CreatedDid {
                    did: outcome.did,
                    method,
                    document: Some(outcome.did_document),
                });
            }
            if self.settings.strict_on_chain {
                return Err(DidError::validation(format!(
                    "did:{method} has no on-chain registry"
                )));
            }
            warn!("did:{method} has no on-chain registry, creating {did} off-chain");
        }

        let document = if options.include_document || key_agreement.is_some() {
            let mut document = provider.create_did_document(address)?;
            if let Some(key) = &key_agreement {
                document.add_key_agreement(key.to_verification_method(&did))?;
            }
            Some(document)
        } else {
            None
        };
        debug!("created {did}");
        Ok(CreatedDid {
            did,
            method,
            document,
        })
    }

    /// Deterministic off-chain document for `address`.
    pub fn create_did_document(
        &self,
        address: &str,
        method: Option<DidMethod>,
    ) -> Result<DIDDocument> {
        let method = Self::resolve_method(address, method)?;
        self.provider(method).create_did_document(address)
    }

    /// Resolves `did` with the provider of the method it names.
    ///
    /// # Errors
    /// `Validation` for malformed DIDs or unsupported methods.
    pub async fn resolve_did(&self, did: &str) -> Result<DIDDocument> {
        let parsed = Did::parse(did)?;
        let document = self.provider(parsed.method()).resolve(&parsed).await?;
        if document.id != did {
            return Err(DidError::registration(format!(
                "resolved document id '{}' does not match {did}",
                document.id
            )));
        }
        Ok(document)
    }

    /// Resolves every DID concurrently; one result per input, in input order.
    pub async fn resolve_many(&self, dids: &[String]) -> Vec<Result<DIDDocument>> {
        join_all(dids.iter().map(|did| self.resolve_did(did))).await
    }

    /// `false` for methods without a registry.
    pub async fn check_did_exists(&self, did: &str) -> Result<bool> {
        let parsed = Did::parse(did)?;
        self.provider(parsed.method()).did_exists(&parsed).await
    }

    pub fn extract_address(&self, did: &str) -> Result<String> {
        let parsed = Did::parse(did)?;
        self.provider(parsed.method()).extract_address(&parsed)
    }

    pub fn generate_key_agreement_key(&self) -> KeyAgreementKey {
        generate_key_agreement_key()
    }

    /// First phase of [`DidFactory::register_did_onchain`], exposing the fee.
    pub async fn prepare_registration(
        &self,
        request: &CreationRequest,
        signer: &str,
    ) -> Result<PreparedRegistration> {
        self.kilt.prepare_registration(request, signer).await
    }

    pub async fn register_did_onchain(
        &self,
        request: &CreationRequest,
        signer: &str,
    ) -> Result<RegistrationOutcome> {
        self.kilt.register_did_onchain(request, signer).await
    }

    pub async fn add_verification_method(
        &self,
        did: &str,
        method: VerificationMethod,
        signer: &str,
    ) -> Result<TransactionResult> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?
            .add_verification_method(&parsed, method, signer)
            .await
    }

    pub async fn remove_verification_method(
        &self,
        did: &str,
        method_id: &str,
    ) -> Result<TransactionResult> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?
            .remove_verification_method(&parsed, method_id)
            .await
    }

    pub async fn add_service(
        &self,
        did: &str,
        service: Service,
        signer: &str,
    ) -> Result<TransactionResult> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?
            .add_service(&parsed, service, signer)
            .await
    }

    pub async fn remove_service(&self, did: &str, service_id: &str) -> Result<TransactionResult> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?
            .remove_service(&parsed, service_id)
            .await
    }

    pub async fn update_did_document(
        &self,
        did: &str,
        document: &DIDDocument,
        signer: &str,
    ) -> Result<TransactionResult> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?
            .update_did_document(&parsed, document, signer)
            .await
    }

    /// Stored document of a registry DID, `None` if not registered.
    pub async fn query_did_document(&self, did: &str) -> Result<Option<DIDDocument>> {
        let parsed = Did::parse(did)?;
        self.registry_for(&parsed)?.query_did_document(&parsed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::local_ledger::LocalLedger;

    const EVM: &str = "0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed";
    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
    const ED25519_KEY: &str = "z6MkhaXgBZDvotDkL5257faiztiGiC2QtKLGpbnnEGta2doK";

    fn factory(settings: Settings) -> DidFactory {
        let ledger = LocalLedger::from_settings(&settings.local_ledger, 8);
        DidFactory::new(settings, Arc::new(ledger))
    }

    #[tokio::test]
    async fn test_detects_method_from_grammar() {
        let factory = factory(Settings::default());
        for (address, method) in [
            (EVM, DidMethod::Ethr),
            (ALICE, DidMethod::Kilt),
            (ED25519_KEY, DidMethod::Key),
        ] {
            let created = factory.create_did(address, CreateDidOptions::default()).await.unwrap();
            assert_eq!(created.method, method);
            assert_eq!(created.did, format!("did:{method}:{address}"));
            assert!(created.document.is_none());
        }
        assert!(matches!(
            factory.create_did("   ", CreateDidOptions::default()).await,
            Err(DidError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_moonbeam_only_when_explicit() {
        let factory = factory(Settings::default());
        let created = factory
            .create_did(EVM, CreateDidOptions::default().method(DidMethod::Moonbeam))
            .await
            .unwrap();
        assert_eq!(created.did, format!("did:moonbeam:{EVM}"));
    }

    #[tokio::test]
    async fn test_on_chain_without_registry() {
        let lenient = factory(Settings::default());
        let created = lenient
            .create_did(EVM, CreateDidOptions::default().on_chain())
            .await
            .unwrap();
        assert_eq!(created.method, DidMethod::Ethr);

        let strict = factory(Settings {
            strict_on_chain: true,
            ..Default::default()
        });
        assert!(matches!(
            strict.create_did(EVM, CreateDidOptions::default().on_chain()).await,
            Err(DidError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_key_agreement_option() {
        let factory = factory(Settings::default());
        let created = factory
            .create_did(EVM, CreateDidOptions::default().with_key_agreement())
            .await
            .unwrap();
        let document = created.document.unwrap();
        assert_eq!(document.key_agreement, vec![format!("{}#key-agreement", created.did)]);
        assert!(document.validate().is_ok());
    }

    #[tokio::test]
    async fn test_registry_operations_need_registry_method() {
        let factory = factory(Settings::default());
        let error = factory
            .remove_service(&format!("did:ethr:{EVM}"), "#hub")
            .await
            .unwrap_err();
        assert!(matches!(error, DidError::Validation(_)));
        assert!(!factory.check_did_exists(&format!("did:ethr:{EVM}")).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolve_many_keeps_order() {
        let factory = factory(Settings::default());
        let dids = vec![
            format!("did:key:{ED25519_KEY}"),
            "did:invalid:address".to_string(),
            format!("did:ethr:{EVM}"),
        ];
        let results = factory.resolve_many(&dids).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().id, dids[0]);
        assert!(matches!(results[1], Err(DidError::Validation(_))));
        assert_eq!(results[2].as_ref().unwrap().id, dids[2]);
    }

    #[tokio::test]
    async fn test_disconnect_closes_registry_session() {
        let mut settings = Settings::default();
        settings.local_ledger.block_time_ms = 5;
        let factory = factory(settings);
        // never connected, nothing to release
        factory.disconnect().await.unwrap();

        let did = format!("did:kilt:{ALICE}");
        assert!(!factory.check_did_exists(&did).await.unwrap());
        factory.disconnect().await.unwrap();
        let error = factory.check_did_exists(&did).await.unwrap_err();
        assert_eq!(error.kind(), "did_registration_error");
    }
}
