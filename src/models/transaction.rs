// src/models/transaction.rs
//! Request and result types of DID lifecycle operations.
//!
//! [`TransactionResult`] values are only ever assembled by the registration
//! pipeline once finality has been observed; failures never produce one.

use crate::models::did::{DIDDocument, Service, VerificationMethod};
use crate::models::identifier::DidMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An event emitted by the ledger while executing a transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChainEvent {
    /// Emitting module, e.g. `did` or `system`
    pub section: String,
    /// Event name, e.g. `DidCreated`
    pub method: String,
    pub data: Value,
}

impl ChainEvent {
    pub fn new(section: impl Into<String>, method: impl Into<String>, data: Value) -> Self {
        ChainEvent {
            section: section.into(),
            method: method.into(),
            data,
        }
    }

    pub fn is(&self, section: &str, method: &str) -> bool {
        self.section == section && self.method == method
    }
}

/// Amount charged for a transaction, in the smallest unit of `currency`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Fee {
    pub amount: u128,
    pub currency: String,
}

impl Fee {
    pub fn new(amount: u128, currency: impl Into<String>) -> Self {
        Fee {
            amount,
            currency: currency.into(),
        }
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

/// Outcome of a finalized on-chain mutation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    /// Always `true`: failed transactions surface as errors instead
    pub success: bool,
    pub transaction_hash: String,
    pub block_number: u64,
    pub block_hash: String,
    pub events: Vec<ChainEvent>,
    /// Realized fee
    pub fee: Fee,
    pub timestamp: DateTime<Utc>,
}

/// Lifecycle status of a registered DID.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DidStatus {
    Active,
}

/// Result of a successful on-chain registration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub did: String,
    /// Document re-derived from the creation request
    pub did_document: DIDDocument,
    pub transaction_result: TransactionResult,
    pub status: DidStatus,
}

/// Input to an on-chain registration.
///
/// # Defaults
/// - `controller` falls back to the DID itself
/// - `fee_payer` falls back to the signer
///
/// The authentication key derived from `address` is always included; the
/// methods and services listed here are registered in addition to it, in
/// the same atomic transaction.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CreationRequest {
    pub address: String,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(default)]
    pub verification_methods: Vec<VerificationMethod>,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub fee_payer: Option<String>,
}

impl CreationRequest {
    pub fn new(address: impl Into<String>) -> Self {
        CreationRequest {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    pub fn with_verification_method(mut self, method: VerificationMethod) -> Self {
        self.verification_methods.push(method);
        self
    }

    pub fn with_service(mut self, service: Service) -> Self {
        self.services.push(service);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_fee_payer(mut self, fee_payer: impl Into<String>) -> Self {
        self.fee_payer = Some(fee_payer.into());
        self
    }
}

/// Normalized result of `create_did` across methods.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CreatedDid {
    pub did: String,
    pub method: DidMethod,
    /// Present after on-chain registration, or when explicitly requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<DIDDocument>,
}
