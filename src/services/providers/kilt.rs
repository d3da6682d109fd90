// src/services/providers/kilt.rs
//! `did:kilt`, the registry-backed method.
//!
//! Addresses are SS58 accounts; the DID is `did:kilt:<address>` and its
//! authentication key is the account's sr25519 public key. Besides the
//! deterministic document this provider anchors DIDs in the ledger's
//! identity pallet and mutates them there, always through the
//! [`RegistrationPipeline`].

use super::DidProvider;
use crate::blockchain::adapter::{ChainAdapter, ChainInfo};
use crate::blockchain::nonce::AccountLocks;
use crate::blockchain::retry::RetryPolicy;
use crate::config::Settings;
use crate::contracts::did_registry::{did_record_key, DidRecord, Relationship, RuntimeCall};
use crate::contracts::monitor::PipelineState;
use crate::contracts::registration::{PreparedTransaction, RegistrationPipeline};
use crate::error::{DidError, Result};
use crate::models::did::{
    absolute_id, DIDDocument, KeyMaterial, Service, VerificationMethod, VerificationMethodType,
};
use crate::models::identifier::{Did, DidMethod};
use crate::models::transaction::{
    CreationRequest, DidStatus, Fee, RegistrationOutcome, TransactionResult,
};
use crate::utils::address::decode_ss58;
use crate::utils::crypto::{encode_multikey, KeyCodec};
use crate::utils::serialization::decode_state;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

pub const AUTHENTICATION_FRAGMENT: &str = "authentication";

pub struct KiltProvider {
    pipeline: RegistrationPipeline,
    retry: RetryPolicy,
    chain: OnceCell<ChainInfo>,
}

impl KiltProvider {
    /// # Arguments
    /// * `adapter` - Session with the identity ledger
    /// * `locks` - Fee-payer locks shared with every other user of `adapter`
    /// * `retry` - Backoff for connecting and pre-submission queries
    /// * `confirmation_timeout` - Budget for finality of each transaction
    pub fn new(
        adapter: Arc<dyn ChainAdapter>,
        locks: AccountLocks,
        retry: RetryPolicy,
        confirmation_timeout: Duration,
    ) -> Self {
        KiltProvider {
            pipeline: RegistrationPipeline::new(adapter, locks, retry, confirmation_timeout),
            retry,
            chain: OnceCell::new(),
        }
    }

    pub fn from_settings(
        adapter: Arc<dyn ChainAdapter>,
        locks: AccountLocks,
        settings: &Settings,
    ) -> Self {
        KiltProvider::new(
            adapter,
            locks,
            settings.retry_policy(),
            settings.confirmation_timeout(),
        )
    }

    /// Metadata of the ledger, connecting on first use.
    pub async fn chain_info(&self) -> Result<&ChainInfo> {
        self.chain
            .get_or_try_init(|| async {
                let adapter = self.pipeline.adapter();
                let info = self
                    .retry
                    .run("connect", || adapter.connect())
                    .await
                    .map_err(DidError::from_chain)?;
                info!(
                    "identity ledger {} connected at block #{} (ss58 prefix {})",
                    info.name, info.best_block, info.ss58_prefix
                );
                Ok::<_, DidError>(info)
            })
            .await
    }

    /// Releases the ledger session if one was opened.
    pub async fn disconnect(&self) -> Result<()> {
        if let Some(info) = self.chain.get() {
            self.pipeline
                .adapter()
                .disconnect()
                .await
                .map_err(DidError::from_chain)?;
            info!("identity ledger {} disconnected", info.name);
        }
        Ok(())
    }

    fn authentication_key(did: &Did, account_id: &[u8; 32]) -> VerificationMethod {
        VerificationMethod::new(
            did.with_fragment(AUTHENTICATION_FRAGMENT),
            VerificationMethodType::Sr25519VerificationKey2020,
            did.to_string(),
            KeyMaterial::PublicKeyMultibase(encode_multikey(KeyCodec::Sr25519, account_id)),
        )
    }

    /// Relationship a method joins when added without an explicit one.
    fn default_relationship(method: &VerificationMethod) -> Relationship {
        match method.type_ {
            VerificationMethodType::X25519KeyAgreementKey2020 => Relationship::KeyAgreement,
            _ => Relationship::Authentication,
        }
    }

    /// Checks that `did` is a well-formed `did:kilt` identifier and returns its account.
    fn subject_address(&self, did: &Did) -> Result<String> {
        self.ensure_method(did)?;
        decode_ss58(did.method_specific_id())?;
        Ok(did.method_specific_id().to_string())
    }

    fn validate_account(role: &str, account: &str) -> Result<()> {
        decode_ss58(account)
            .map(|_| ())
            .map_err(|e| DidError::validation(format!("invalid {role} account: {e}")))
    }

    /// Makes `method` absolute against `did` and checks it belongs there.
    fn owned_method(did: &str, mut method: VerificationMethod) -> Result<VerificationMethod> {
        method.id = absolute_id(did, &method.id);
        if !method.id.starts_with(&format!("{did}#")) {
            return Err(DidError::validation(format!(
                "verification method '{}' does not belong to {did}",
                method.id
            )));
        }
        method.validate()?;
        Ok(method)
    }

    fn owned_service(did: &str, mut service: Service) -> Result<Service> {
        service.id = absolute_id(did, &service.id);
        if !service.id.starts_with(&format!("{did}#")) {
            return Err(DidError::validation(format!(
                "service '{}' does not belong to {did}",
                service.id
            )));
        }
        service.validate()?;
        Ok(service)
    }

    /// Validates a creation request and builds the document and payload.
    ///
    /// No ledger access happens here.
    fn build_registration(
        &self,
        request: &CreationRequest,
    ) -> Result<(String, DIDDocument, RuntimeCall)> {
        let account = decode_ss58(&request.address)?;
        let subject = Did::new(DidMethod::Kilt, request.address.as_str());
        let did = subject.to_string();

        let controller = request.controller.clone().unwrap_or_else(|| did.clone());
        if controller.trim().is_empty() {
            return Err(DidError::validation("controller must not be empty"));
        }

        let authentication_key = Self::authentication_key(&subject, &account.account_id);
        let mut document = DIDDocument::new(did.as_str());
        document.controller = controller.clone();
        document.add_verification_method(authentication_key.clone(), true)?;

        let mut calls = vec![RuntimeCall::Create {
            did: did.clone(),
            controller,
            authentication_key,
        }];
        for method in &request.verification_methods {
            let method = Self::owned_method(&did, method.clone())?;
            let relationship = Self::default_relationship(&method);
            match relationship {
                Relationship::KeyAgreement => document.add_key_agreement(method.clone())?,
                _ => document.add_verification_method(method.clone(), true)?,
            }
            calls.push(RuntimeCall::AddVerificationMethod {
                did: did.clone(),
                method,
                relationship,
            });
        }
        for service in &request.services {
            let service = Self::owned_service(&did, service.clone())?;
            document.add_service(service.clone())?;
            calls.push(RuntimeCall::AddService {
                did: did.clone(),
                service,
            });
        }
        if !request.metadata.is_empty() {
            calls.push(RuntimeCall::SetMetadata {
                did: did.clone(),
                metadata: request.metadata.clone(),
            });
        }
        document.validate()?;

        Ok((did, document, RuntimeCall::batch(calls)))
    }

    /// Phase one of a registration: validation, duplicate and balance
    /// pre-flight checks, and fee estimation.
    ///
    /// # Arguments
    /// * `request` - What to register
    /// * `signer` - Account authorizing the creation; pays unless the request names a fee payer
    ///
    /// # Errors
    /// - `Validation` for a malformed request, before any ledger contact
    /// - `DuplicateDid` if the DID is already registered
    /// - `InsufficientBalance` if the fee payer cannot cover the estimate
    /// - `Network` if the ledger stays unreachable
    pub async fn prepare_registration(
        &self,
        request: &CreationRequest,
        signer: &str,
    ) -> Result<PreparedRegistration> {
        let (did, document, call) = self.build_registration(request)?;
        Self::validate_account("signer", signer)?;
        let fee_payer = request.fee_payer.as_deref().unwrap_or(signer);
        Self::validate_account("fee payer", fee_payer)?;

        self.chain_info().await?;
        if self.record_exists(&did).await? {
            warn!("refusing to register {did}: already on chain");
            return Err(DidError::DuplicateDid(did));
        }

        let transaction = self.pipeline.prepare(&did, call, signer, fee_payer).await?;
        Ok(PreparedRegistration {
            did,
            document,
            transaction,
        })
    }

    /// Registers a DID with its initial keys, services and metadata in one
    /// atomic transaction.
    ///
    /// See [`KiltProvider::prepare_registration`] and
    /// [`PreparedTransaction::submit`] for the possible errors.
    pub async fn register_did_onchain(
        &self,
        request: &CreationRequest,
        signer: &str,
    ) -> Result<RegistrationOutcome> {
        self.prepare_registration(request, signer).await?.submit().await
    }

    async fn submit_mutation(
        &self,
        did: &str,
        call: RuntimeCall,
        signer: &str,
    ) -> Result<TransactionResult> {
        Self::validate_account("signer", signer)?;
        self.chain_info().await?;
        self.pipeline
            .prepare(did, call, signer, signer)
            .await?
            .submit()
            .await
    }

    pub async fn add_verification_method(
        &self,
        did: &Did,
        method: VerificationMethod,
        signer: &str,
    ) -> Result<TransactionResult> {
        self.subject_address(did)?;
        let did = did.to_string();
        let method = Self::owned_method(&did, method)?;
        let relationship = Self::default_relationship(&method);
        let call = RuntimeCall::AddVerificationMethod {
            did: did.clone(),
            method,
            relationship,
        };
        self.submit_mutation(&did, call, signer).await
    }

    /// Removes a verification method, signed by the DID subject.
    ///
    /// `method_id` may be relative (`#key-2`) or a full DID URL.
    pub async fn remove_verification_method(
        &self,
        did: &Did,
        method_id: &str,
    ) -> Result<TransactionResult> {
        let signer = self.subject_address(did)?;
        let did = did.to_string();
        let method_id = absolute_id(&did, method_id);
        if !method_id.starts_with(&format!("{did}#")) {
            return Err(DidError::validation(format!(
                "'{method_id}' is not a verification method of {did}"
            )));
        }
        let call = RuntimeCall::RemoveVerificationMethod {
            did: did.clone(),
            method_id,
        };
        self.submit_mutation(&did, call, &signer).await
    }

    pub async fn add_service(
        &self,
        did: &Did,
        service: Service,
        signer: &str,
    ) -> Result<TransactionResult> {
        self.subject_address(did)?;
        let did = did.to_string();
        let service = Self::owned_service(&did, service)?;
        let call = RuntimeCall::AddService {
            did: did.clone(),
            service,
        };
        self.submit_mutation(&did, call, signer).await
    }

    /// Removes a service, signed by the DID subject.
    pub async fn remove_service(&self, did: &Did, service_id: &str) -> Result<TransactionResult> {
        let signer = self.subject_address(did)?;
        let did = did.to_string();
        let service_id = absolute_id(&did, service_id);
        if !service_id.starts_with(&format!("{did}#")) {
            return Err(DidError::validation(format!(
                "'{service_id}' is not a service of {did}"
            )));
        }
        let call = RuntimeCall::RemoveService {
            did: did.clone(),
            service_id,
        };
        self.submit_mutation(&did, call, &signer).await
    }

    /// Brings the on-chain document in line with `desired`.
    ///
    /// Computes the difference to the stored record and submits every
    /// removal, then every addition, as one atomic batch. Methods or services
    /// whose content changed are removed and re-added.
    ///
    /// # Errors
    /// `Validation` if `desired` is invalid, describes another DID, the DID
    /// is not registered, or there is nothing to change.
    pub async fn update_did_document(
        &self,
        did: &Did,
        desired: &DIDDocument,
        signer: &str,
    ) -> Result<TransactionResult> {
        self.subject_address(did)?;
        let did_string = did.to_string();
        if desired.id != did_string {
            return Err(DidError::validation(format!(
                "document id '{}' does not match {did_string}",
                desired.id
            )));
        }
        desired.validate()?;
        Self::validate_account("signer", signer)?;

        let current = self.query_did_document(did).await?.ok_or_else(|| {
            DidError::validation(format!("{did_string} is not registered, nothing to update"))
        })?;

        let calls = document_diff(&did_string, &current, desired);
        if calls.is_empty() {
            return Err(DidError::validation(format!(
                "{did_string} already matches the requested document"
            )));
        }
        debug!("updating {did_string} with {} call(s)", calls.len());
        self.submit_mutation(&did_string, RuntimeCall::batch(calls), signer)
            .await
    }

    async fn raw_record(&self, did: &str) -> Result<Option<DidRecord>> {
        self.chain_info().await?;
        let adapter = self.pipeline.adapter();
        let key = did_record_key(did);
        let stored = self
            .retry
            .run("record query", || adapter.query_storage(&key))
            .await
            .map_err(DidError::from_chain)?;
        match stored {
            Some(value) => {
                let record: DidRecord = decode_state(value)?;
                Ok((!record.is_empty()).then_some(record))
            }
            None => Ok(None),
        }
    }

    async fn record_exists(&self, did: &str) -> Result<bool> {
        Ok(self.raw_record(did).await?.is_some())
    }

    /// On-chain document of `did`, `None` if nothing is registered.
    pub async fn query_did_document(&self, did: &Did) -> Result<Option<DIDDocument>> {
        self.subject_address(did)?;
        let did = did.to_string();
        let document = self.raw_record(&did).await?.map(|record| record.to_document(&did));
        debug!("queried {did}: {}", if document.is_some() { "found" } else { "absent" });
        Ok(document)
    }
}

/// Calls turning `current` into `desired`, removals first.
fn document_diff(did: &str, current: &DIDDocument, desired: &DIDDocument) -> Vec<RuntimeCall> {
    let relationship = |document: &DIDDocument, id: &str| {
        if document.authentication.iter().any(|r| r == id) {
            Relationship::Authentication
        } else if document.key_agreement.iter().any(|r| r == id) {
            Relationship::KeyAgreement
        } else {
            Relationship::None
        }
    };
    let same_method = |method: &VerificationMethod, other: Option<&VerificationMethod>| {
        other.is_some_and(|other| {
            other == method && relationship(current, &method.id) == relationship(desired, &method.id)
        })
    };

    let mut removals = Vec::new();
    let mut additions = Vec::new();

    for method in &current.verification_method {
        if !same_method(method, desired.verification_method(&method.id)) {
            removals.push(RuntimeCall::RemoveVerificationMethod {
                did: did.to_string(),
                method_id: method.id.clone(),
            });
        }
    }
    for method in &desired.verification_method {
        if !same_method(method, current.verification_method(&method.id)) {
            additions.push(RuntimeCall::AddVerificationMethod {
                did: did.to_string(),
                method: method.clone(),
                relationship: relationship(desired, &method.id),
            });
        }
    }
    for service in &current.service {
        if desired.service(&service.id) != Some(service) {
            removals.push(RuntimeCall::RemoveService {
                did: did.to_string(),
                service_id: service.id.clone(),
            });
        }
    }
    for service in &desired.service {
        if current.service(&service.id) != Some(service) {
            additions.push(RuntimeCall::AddService {
                did: did.to_string(),
                service: service.clone(),
            });
        }
    }
    if current.controller != desired.controller {
        additions.push(RuntimeCall::SetController {
            did: did.to_string(),
            controller: desired.controller.clone(),
        });
    }

    removals.extend(additions);
    removals
}

/// A registration whose fee is known and which has not been submitted yet.
///
/// Dropping it abandons the registration without touching the ledger.
pub struct PreparedRegistration {
    did: String,
    document: DIDDocument,
    transaction: PreparedTransaction,
}

impl PreparedRegistration {
    pub fn did(&self) -> &str {
        &self.did
    }

    /// Document that will be live once the registration is finalized.
    pub fn document(&self) -> &DIDDocument {
        &self.document
    }

    pub fn fee(&self) -> &Fee {
        self.transaction.fee()
    }

    pub fn state(&self) -> PipelineState {
        self.transaction.state()
    }

    /// Number of registry mutations in the atomic payload.
    pub fn mutation_count(&self) -> usize {
        self.transaction.call().mutation_count()
    }

    /// Submits the registration and waits for finality.
    pub async fn submit(self) -> Result<RegistrationOutcome> {
        let PreparedRegistration {
            did,
            document,
            transaction,
        } = self;
        let transaction_result = transaction.submit().await?;
        info!(
            "{did} registered in block #{}",
            transaction_result.block_number
        );
        Ok(RegistrationOutcome {
            did,
            did_document: document,
            transaction_result,
            status: DidStatus::Active,
        })
    }
}

#[async_trait]
impl DidProvider for KiltProvider {
    fn method(&self) -> DidMethod {
        DidMethod::Kilt
    }

    fn create_did(&self, address: &str) -> Result<String> {
        decode_ss58(address)?;
        Ok(Did::new(DidMethod::Kilt, address).to_string())
    }

    fn document_for(&self, did: &Did) -> Result<DIDDocument> {
        self.ensure_method(did)?;
        let account = decode_ss58(did.method_specific_id())?;
        let mut document = DIDDocument::new(did.to_string());
        document.add_verification_method(Self::authentication_key(did, &account.account_id), true)?;
        Ok(document)
    }

    fn extract_address(&self, did: &Did) -> Result<String> {
        self.subject_address(did)
    }

    /// On-chain document when registered, the derived document otherwise.
    async fn resolve(&self, did: &Did) -> Result<DIDDocument> {
        match self.query_did_document(did).await? {
            Some(document) => Ok(document),
            None => {
                debug!("{did} not on chain, resolving to its derived document");
                self.document_for(did)
            }
        }
    }

    async fn did_exists(&self, did: &Did) -> Result<bool> {
        self.subject_address(did)?;
        self.record_exists(&did.to_string()).await
    }

    fn registry(&self) -> Option<&KiltProvider> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::local_ledger::LocalLedger;
    use crate::config::LocalLedgerSettings;
    use crate::models::did::{ServiceEndpoint, ServiceType};

    const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    fn provider() -> (KiltProvider, LocalLedger) {
        let ledger = LocalLedger::from_settings(
            &LocalLedgerSettings {
                block_time_ms: 5,
                ..Default::default()
            },
            8,
        );
        let provider = KiltProvider::new(
            Arc::new(ledger.clone()),
            AccountLocks::new(),
            RetryPolicy::none(),
            Duration::from_secs(5),
        );
        (provider, ledger)
    }

    fn service(id: &str) -> Service {
        Service::new(
            id,
            ServiceType::LinkedDomains,
            ServiceEndpoint::Uri("https://alice.example".into()),
        )
    }

    #[test]
    fn test_alice_document() {
        let (provider, _) = provider();
        let document = provider.create_did_document(ALICE).unwrap();
        assert_eq!(document.id, format!("did:kilt:{ALICE}"));
        assert_eq!(document.verification_method.len(), 1);
        let method = &document.verification_method[0];
        assert_eq!(method.controller, document.id);
        assert_eq!(method.id, format!("did:kilt:{ALICE}#authentication"));
        assert!(matches!(&method.key, KeyMaterial::PublicKeyMultibase(mb) if mb.starts_with('z')));
    }

    #[test]
    fn test_build_registration_batches_extras() {
        let (provider, _) = provider();
        let request = CreationRequest::new(ALICE)
            .with_service(service("#hub"))
            .with_metadata("name", serde_json::json!("alice"));
        let (did, document, call) = provider.build_registration(&request).unwrap();
        assert_eq!(call.name(), "batchAll");
        assert_eq!(call.mutation_count(), 3);
        assert_eq!(document.service[0].id, format!("{did}#hub"));
    }

    #[test]
    fn test_build_registration_rejects_foreign_ids() {
        let (provider, _) = provider();
        let request = CreationRequest::new(ALICE).with_service(service("did:kilt:other#hub"));
        assert!(matches!(
            provider.build_registration(&request),
            Err(DidError::Validation(_))
        ));
        let duplicate = CreationRequest::new(ALICE)
            .with_service(service("#hub"))
            .with_service(service("#hub"));
        assert!(provider.build_registration(&duplicate).is_err());
    }

    #[tokio::test]
    async fn test_resolve_falls_back_until_registered() {
        let (provider, _) = provider();
        let did = Did::parse(&format!("did:kilt:{ALICE}")).unwrap();
        assert!(provider.query_did_document(&did).await.unwrap().is_none());
        let derived = provider.resolve(&did).await.unwrap();
        assert_eq!(derived, provider.document_for(&did).unwrap());

        let outcome = provider
            .register_did_onchain(
                &CreationRequest::new(ALICE).with_service(service("#hub")),
                ALICE,
            )
            .await
            .unwrap();
        assert!(provider.did_exists(&did).await.unwrap());
        let resolved = provider.resolve(&did).await.unwrap();
        assert_eq!(resolved, outcome.did_document);
    }

    #[tokio::test]
    async fn test_update_document_diff() {
        let (provider, ledger) = provider();
        provider
            .register_did_onchain(&CreationRequest::new(ALICE), ALICE)
            .await
            .unwrap();
        let did = Did::parse(&format!("did:kilt:{ALICE}")).unwrap();

        let mut desired = provider.query_did_document(&did).await.unwrap().unwrap();
        assert!(matches!(
            provider.update_did_document(&did, &desired, ALICE).await,
            Err(DidError::Validation(_))
        ));

        desired
            .add_service(service(&format!("{did}#hub")))
            .unwrap();
        let result = provider.update_did_document(&did, &desired, ALICE).await.unwrap();
        assert!(result.success);
        assert_eq!(ledger.record(&did.to_string()).unwrap().services.len(), 1);
        assert_eq!(provider.query_did_document(&did).await.unwrap().unwrap(), desired);
    }
}
