// src/models/did.rs
//! Decentralized Identifier (DID) Document data model.
//!
//! Defines the structure shared by every DID method, following the
//! [DID Core Specification](https://www.w3.org/TR/did-core/). Documents are
//! produced by the method providers and by the on-chain registry, and are
//! serialized with the W3C JSON property names (`@context`,
//! `verificationMethod`, `serviceEndpoint`, ...).

use crate::error::{DidError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Base JSON-LD context every document starts with.
pub const DID_CONTEXT_V1: &str = "https://www.w3.org/ns/did/v1";
/// Multikey suite context, part of the base context list.
pub const MULTIKEY_CONTEXT_V1: &str = "https://w3id.org/security/multikey/v1";
pub const SECP256K1_RECOVERY_CONTEXT: &str =
    "https://w3id.org/security/suites/secp256k1recovery-2020/v2";
pub const SECP256K1_CONTEXT: &str = "https://w3id.org/security/suites/secp256k1-2019/v1";
pub const ED25519_CONTEXT: &str = "https://w3id.org/security/suites/ed25519-2020/v1";
pub const SR25519_CONTEXT: &str = "https://w3id.org/security/suites/sr25519-2020/v1";
pub const X25519_CONTEXT: &str = "https://w3id.org/security/suites/x25519-2020/v1";

/// Contexts every document carries, in order.
pub const BASE_CONTEXT: [&str; 2] = [DID_CONTEXT_V1, MULTIKEY_CONTEXT_V1];

/// A DID Document representing the resolved state of a DID.
///
/// # Invariants
/// - every `authentication` and `keyAgreement` entry references the id of an
///   entry in `verificationMethod`
/// - verification method ids and service ids are unique within the document
///
/// [`DIDDocument::validate`] checks both.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DIDDocument {
    /// Ordered set of JSON-LD context URIs
    #[serde(rename = "@context")]
    pub context: Vec<String>,

    /// The DID this document describes
    pub id: String,

    /// DID of the controlling entity, the subject itself by default
    pub controller: String,

    #[serde(default)]
    pub verification_method: Vec<VerificationMethod>,

    /// References into `verification_method`
    #[serde(default)]
    pub authentication: Vec<String>,

    /// References into `verification_method` usable for key agreement
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_agreement: Vec<String>,

    #[serde(default)]
    pub service: Vec<Service>,
}

impl DIDDocument {
    /// Creates an empty document with the base context, controlled by itself.
    pub fn new(did: impl Into<String>) -> Self {
        let id = did.into();
        DIDDocument {
            context: BASE_CONTEXT.iter().map(|c| c.to_string()).collect(),
            controller: id.clone(),
            id,
            verification_method: Vec::new(),
            authentication: Vec::new(),
            key_agreement: Vec::new(),
            service: Vec::new(),
        }
    }

    /// Appends a context URI unless it is already present.
    pub fn push_context(&mut self, uri: &str) {
        if !self.context.iter().any(|c| c == uri) {
            self.context.push(uri.to_string());
        }
    }

    pub fn verification_method(&self, id: &str) -> Option<&VerificationMethod> {
        self.verification_method.iter().find(|vm| vm.id == id)
    }

    pub fn service(&self, id: &str) -> Option<&Service> {
        self.service.iter().find(|s| s.id == id)
    }

    /// Adds a verification method, referencing it from `authentication` when asked.
    ///
    /// # Errors
    /// `Validation` if a method with the same id already exists.
    pub fn add_verification_method(
        &mut self,
        method: VerificationMethod,
        authentication: bool,
    ) -> Result<()> {
        if self.verification_method(&method.id).is_some() {
            return Err(DidError::validation(format!(
                "verification method '{}' already present",
                method.id
            )));
        }
        if let Some(context) = method.type_.context() {
            self.push_context(context);
        }
        if authentication {
            self.authentication.push(method.id.clone());
        }
        self.verification_method.push(method);
        Ok(())
    }

    /// Adds a verification method referenced from `keyAgreement`.
    pub fn add_key_agreement(&mut self, method: VerificationMethod) -> Result<()> {
        let id = method.id.clone();
        self.add_verification_method(method, false)?;
        self.key_agreement.push(id);
        Ok(())
    }

    /// Removes a verification method and every reference to it.
    ///
    /// # Returns
    /// The removed method, or `None` if no method had that id.
    pub fn remove_verification_method(&mut self, id: &str) -> Option<VerificationMethod> {
        let position = self.verification_method.iter().position(|vm| vm.id == id)?;
        self.authentication.retain(|r| r != id);
        self.key_agreement.retain(|r| r != id);
        Some(self.verification_method.remove(position))
    }

    /// # Errors
    /// `Validation` if a service with the same id already exists.
    pub fn add_service(&mut self, service: Service) -> Result<()> {
        if self.service(&service.id).is_some() {
            return Err(DidError::validation(format!(
                "service '{}' already present",
                service.id
            )));
        }
        self.service.push(service);
        Ok(())
    }

    pub fn remove_service(&mut self, id: &str) -> Option<Service> {
        let position = self.service.iter().position(|s| s.id == id)?;
        Some(self.service.remove(position))
    }

    /// Checks the document invariants.
    ///
    /// # Errors
    /// `Validation` describing the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        if self.controller.trim().is_empty() {
            return Err(DidError::validation("document controller must not be empty"));
        }

        let mut ids = HashSet::new();
        for vm in &self.verification_method {
            if !ids.insert(vm.id.as_str()) {
                return Err(DidError::validation(format!(
                    "duplicate verification method '{}'",
                    vm.id
                )));
            }
            vm.validate()?;
        }

        for reference in self.authentication.iter().chain(&self.key_agreement) {
            if !ids.contains(reference.as_str()) {
                return Err(DidError::validation(format!(
                    "relationship references unknown verification method '{reference}'"
                )));
            }
        }

        let mut service_ids = HashSet::new();
        for service in &self.service {
            if !service_ids.insert(service.id.as_str()) {
                return Err(DidError::validation(format!(
                    "duplicate service '{}'",
                    service.id
                )));
            }
            service.validate()?;
        }

        Ok(())
    }
}

/// Signature suite of a verification method.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationMethodType {
    EcdsaSecp256k1RecoveryMethod2020,
    EcdsaSecp256k1VerificationKey2019,
    Ed25519VerificationKey2020,
    Sr25519VerificationKey2020,
    X25519KeyAgreementKey2020,
    Multikey,
}

impl VerificationMethodType {
    /// Suite context URI that has to accompany this type, if any beyond the base set.
    pub fn context(&self) -> Option<&'static str> {
        match self {
            VerificationMethodType::EcdsaSecp256k1RecoveryMethod2020 => {
                Some(SECP256K1_RECOVERY_CONTEXT)
            }
            VerificationMethodType::EcdsaSecp256k1VerificationKey2019 => Some(SECP256K1_CONTEXT),
            VerificationMethodType::Ed25519VerificationKey2020 => Some(ED25519_CONTEXT),
            VerificationMethodType::Sr25519VerificationKey2020 => Some(SR25519_CONTEXT),
            VerificationMethodType::X25519KeyAgreementKey2020 => Some(X25519_CONTEXT),
            VerificationMethodType::Multikey => None,
        }
    }
}

/// The single key encoding of a verification method.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum KeyMaterial {
    /// Multibase-encoded public key
    PublicKeyMultibase(String),
    /// Chain account reference for blockchain-native keys, e.g. `eip155:1:0x…`
    BlockchainAccountId(String),
}

/// One authentication key bound to a DID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct VerificationMethod {
    /// DID URL: the DID plus a fragment
    pub id: String,

    #[serde(rename = "type")]
    pub type_: VerificationMethodType,

    /// DID of the key controller
    pub controller: String,

    #[serde(flatten)]
    pub key: KeyMaterial,
}

impl VerificationMethod {
    pub fn new(
        id: impl Into<String>,
        type_: VerificationMethodType,
        controller: impl Into<String>,
        key: KeyMaterial,
    ) -> Self {
        VerificationMethod {
            id: id.into(),
            type_,
            controller: controller.into(),
            key,
        }
    }

    /// Fragment part of the id, without the leading `#`.
    pub fn fragment(&self) -> Option<&str> {
        self.id.split_once('#').map(|(_, fragment)| fragment)
    }

    pub fn validate(&self) -> Result<()> {
        match self.fragment() {
            Some(fragment) if !fragment.is_empty() => {}
            _ => {
                return Err(DidError::validation(format!(
                    "verification method id '{}' must be a DID URL with a fragment",
                    self.id
                )))
            }
        }
        if self.controller.trim().is_empty() {
            return Err(DidError::validation(format!(
                "verification method '{}' has no controller",
                self.id
            )));
        }
        let encoded = match &self.key {
            KeyMaterial::PublicKeyMultibase(value) | KeyMaterial::BlockchainAccountId(value) => {
                value
            }
        };
        if encoded.trim().is_empty() {
            return Err(DidError::validation(format!(
                "verification method '{}' has empty key material",
                self.id
            )));
        }
        Ok(())
    }
}

/// Enumerated service tag.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub enum ServiceType {
    LinkedDomains,
    DIDCommMessaging,
    CredentialRegistry,
    KiltPublishedCredentialCollectionV1,
    /// Any other registered service type
    Other(String),
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::LinkedDomains => f.write_str("LinkedDomains"),
            ServiceType::DIDCommMessaging => f.write_str("DIDCommMessaging"),
            ServiceType::CredentialRegistry => f.write_str("CredentialRegistry"),
            ServiceType::KiltPublishedCredentialCollectionV1 => {
                f.write_str("KiltPublishedCredentialCollectionV1")
            }
            ServiceType::Other(other) => f.write_str(other),
        }
    }
}

impl FromStr for ServiceType {
    type Err = DidError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "LinkedDomains" => ServiceType::LinkedDomains,
            "DIDCommMessaging" => ServiceType::DIDCommMessaging,
            "CredentialRegistry" => ServiceType::CredentialRegistry,
            "KiltPublishedCredentialCollectionV1" => {
                ServiceType::KiltPublishedCredentialCollectionV1
            }
            "" => return Err(DidError::validation("service type must not be empty")),
            other => ServiceType::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for ServiceType {
    type Error = DidError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ServiceType> for String {
    fn from(value: ServiceType) -> Self {
        value.to_string()
    }
}

/// Where a service can be reached.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ServiceEndpoint {
    Uri(String),
    /// Structured endpoint configuration
    Structured(Map<String, Value>),
}

/// Endpoint descriptor attached to a DID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,

    #[serde(rename = "type")]
    pub type_: ServiceType,

    pub service_endpoint: ServiceEndpoint,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Service {
    pub fn new(id: impl Into<String>, type_: ServiceType, endpoint: ServiceEndpoint) -> Self {
        Service {
            id: id.into(),
            type_,
            service_endpoint: endpoint,
            metadata: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.id.contains('#') {
            return Err(DidError::validation(format!(
                "service id '{}' must be a DID URL with a fragment",
                self.id
            )));
        }
        match &self.service_endpoint {
            ServiceEndpoint::Uri(uri) if !has_uri_scheme(uri) => Err(DidError::validation(
                format!("service '{}' endpoint '{uri}' is not a URI", self.id),
            )),
            ServiceEndpoint::Structured(map) if map.is_empty() => Err(DidError::validation(
                format!("service '{}' has an empty endpoint", self.id),
            )),
            _ => Ok(()),
        }
    }
}

/// RFC 3986 scheme check: `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." ) ":"` followed by something.
fn has_uri_scheme(uri: &str) -> bool {
    let Some((scheme, rest)) = uri.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        && !rest.is_empty()
}

/// Makes a possibly relative id (`#key-1`) absolute against `did`.
pub fn absolute_id(did: &str, id: &str) -> String {
    if id.starts_with('#') {
        format!("{did}{id}")
    } else {
        id.to_string()
    }
}
