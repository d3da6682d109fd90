// src/contracts/did_registry.rs
//! Identity registry interface.
//!
//! Describes the on-chain side of the registry-backed DID method: the calls
//! the identity pallet accepts, the shape of a stored DID record, the events
//! it emits and the dispatch errors it can report. The registration pipeline
//! builds [`Extrinsic`]s from these and adapters execute them.

use crate::blockchain::adapter::StorageKey;
use crate::models::did::{DIDDocument, Service, VerificationMethod};
use crate::models::transaction::ChainEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Pallet holding DID records.
pub const DID_PALLET: &str = "did";
/// Pallet providing atomic call batches.
pub const UTILITY_PALLET: &str = "utility";
pub const SYSTEM_PALLET: &str = "system";
pub const PAYMENT_PALLET: &str = "transactionPayment";
pub const BALANCES_PALLET: &str = "balances";

pub mod events {
    pub const DID_CREATED: &str = "DidCreated";
    pub const DID_UPDATED: &str = "DidUpdated";
    pub const BATCH_COMPLETED: &str = "BatchCompleted";
    pub const EXTRINSIC_SUCCESS: &str = "ExtrinsicSuccess";
    pub const EXTRINSIC_FAILED: &str = "ExtrinsicFailed";
    pub const TRANSACTION_FEE_PAID: &str = "TransactionFeePaid";
}

pub mod errors {
    pub const ALREADY_EXISTS: &str = "AlreadyExists";
    pub const NOT_FOUND: &str = "NotFound";
    pub const VERIFICATION_METHOD_EXISTS: &str = "VerificationMethodAlreadyExists";
    pub const VERIFICATION_METHOD_NOT_FOUND: &str = "VerificationMethodNotFound";
    pub const SERVICE_EXISTS: &str = "ServiceAlreadyExists";
    pub const SERVICE_NOT_FOUND: &str = "ServiceNotFound";
    pub const BAD_ORIGIN: &str = "BadOrigin";
    pub const INVALID_RECORD: &str = "InvalidRecord";
    pub const INSUFFICIENT_BALANCE: &str = "InsufficientBalance";
}

/// Which verification relationship a newly added method joins.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Relationship {
    Authentication,
    KeyAgreement,
    /// Listed under `verificationMethod` only
    None,
}

/// A call accepted by the identity registry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "call", content = "args", rename_all = "camelCase")]
pub enum RuntimeCall {
    #[serde(rename_all = "camelCase")]
    Create {
        did: String,
        controller: String,
        authentication_key: VerificationMethod,
    },
    #[serde(rename_all = "camelCase")]
    AddVerificationMethod {
        did: String,
        method: VerificationMethod,
        relationship: Relationship,
    },
    #[serde(rename_all = "camelCase")]
    RemoveVerificationMethod { did: String, method_id: String },
    #[serde(rename_all = "camelCase")]
    AddService { did: String, service: Service },
    #[serde(rename_all = "camelCase")]
    RemoveService { did: String, service_id: String },
    #[serde(rename_all = "camelCase")]
    SetMetadata { did: String, metadata: Map<String, Value> },
    #[serde(rename_all = "camelCase")]
    SetController { did: String, controller: String },
    /// Applies every call or none of them
    BatchAll { calls: Vec<RuntimeCall> },
}

impl RuntimeCall {
    /// Pallet the call is dispatched to.
    pub fn section(&self) -> &'static str {
        match self {
            RuntimeCall::BatchAll { .. } => UTILITY_PALLET,
            _ => DID_PALLET,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RuntimeCall::Create { .. } => "create",
            RuntimeCall::AddVerificationMethod { .. } => "addVerificationMethod",
            RuntimeCall::RemoveVerificationMethod { .. } => "removeVerificationMethod",
            RuntimeCall::AddService { .. } => "addService",
            RuntimeCall::RemoveService { .. } => "removeService",
            RuntimeCall::SetMetadata { .. } => "setMetadata",
            RuntimeCall::SetController { .. } => "setController",
            RuntimeCall::BatchAll { .. } => "batchAll",
        }
    }

    /// Wraps `calls` into one atomic batch, unless there is just one.
    pub fn batch(mut calls: Vec<RuntimeCall>) -> RuntimeCall {
        if calls.len() == 1 {
            calls.remove(0)
        } else {
            RuntimeCall::BatchAll { calls }
        }
    }

    /// Number of registry mutations the call performs.
    pub fn mutation_count(&self) -> usize {
        match self {
            RuntimeCall::BatchAll { calls } => calls.iter().map(RuntimeCall::mutation_count).sum(),
            _ => 1,
        }
    }
}

/// A signed-to-be transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Extrinsic {
    /// Account authorizing the call
    pub signer: String,
    /// Account debited for the fee; its nonce orders the transaction
    pub fee_payer: String,
    pub nonce: u64,
    pub call: RuntimeCall,
}

/// Module error reported in a `system.ExtrinsicFailed` event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DispatchError {
    pub module: String,
    pub error: String,
}

impl DispatchError {
    pub fn did(error: &str) -> Self {
        DispatchError {
            module: DID_PALLET.to_string(),
            error: error.to_string(),
        }
    }

    pub fn is(&self, module: &str, error: &str) -> bool {
        self.module == module && self.error == error
    }
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.error)
    }
}

impl std::error::Error for DispatchError {}

/// Builds the `system.ExtrinsicFailed` event for a dispatch error.
pub fn extrinsic_failed(error: &DispatchError) -> ChainEvent {
    ChainEvent::new(
        SYSTEM_PALLET,
        events::EXTRINSIC_FAILED,
        json!({ "dispatchError": error }),
    )
}

/// Storage key of the record for a registry identifier.
pub fn did_record_key(identifier: &str) -> StorageKey {
    StorageKey::new(DID_PALLET, "did", identifier)
}

/// A DID record as stored by the identity pallet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DidRecord {
    pub controller: String,
    #[serde(default)]
    pub verification_methods: Vec<VerificationMethod>,
    #[serde(default)]
    pub authentication: Vec<String>,
    #[serde(default)]
    pub key_agreement: Vec<String>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Block the record was created in
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl DidRecord {
    /// Reconstructs the DID Document for `did` from the stored record.
    pub fn to_document(&self, did: &str) -> DIDDocument {
        let mut document = DIDDocument::new(did);
        document.controller = self.controller.clone();
        for method in &self.verification_methods {
            if let Some(context) = method.type_.context() {
                document.push_context(context);
            }
        }
        document.verification_method = self.verification_methods.clone();
        document.authentication = self.authentication.clone();
        document.key_agreement = self.key_agreement.clone();
        document.service = self.services.clone();
        document
    }

    /// Whether a stored value is an actual record rather than a tombstone.
    pub fn is_empty(&self) -> bool {
        self.controller.is_empty() && self.verification_methods.is_empty()
    }
}
