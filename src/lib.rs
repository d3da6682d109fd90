// src/lib.rs
//! # DID Lifecycle Engine
//!
//! Obtains chain-appropriate Decentralized Identifiers for wallet addresses,
//! anchors them in an identity registry when the method has one, and
//! resolves DIDs back to their documents.
//!
//! ## Architecture Overview
//! 1. **Models**: DIDs, DID Documents, requests and transaction results
//! 2. **Blockchain Layer**: the `ChainAdapter` boundary, per-account locks,
//!    retry policy and an in-process ledger
//! 3. **Contracts Layer**: identity registry calls, the registration
//!    pipeline and confirmation monitoring
//! 4. **Services Layer**: one provider per DID method, the `DidFactory`
//!    dispatcher and the HTTP API
//!
//! ## Supported methods
//! - `did:ethr` and `did:moonbeam` for EVM accounts
//! - `did:key` for multibase multicodec public keys
//! - `did:kilt` for SS58 accounts, the only registry-backed method

pub mod blockchain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;
pub mod wallet;

pub use blockchain::adapter::ChainAdapter;
pub use blockchain::local_ledger::LocalLedger;
pub use config::Settings;
pub use error::{ChainError, DidError, Result};
pub use models::did::DIDDocument;
pub use models::identifier::{Did, DidMethod};
pub use models::transaction::{CreatedDid, CreationRequest, RegistrationOutcome, TransactionResult};
pub use services::factory::{CreateDidOptions, DidFactory};
