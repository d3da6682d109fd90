// src/blockchain/adapter.rs
//! Chain adapter boundary.
//!
//! A [`ChainAdapter`] is the per-ledger connection object this engine
//! consumes: chain metadata, account and storage queries, fee estimation and
//! transaction submission with a status stream. Signing happens behind the
//! adapter (it wraps the wallet/keyring collaborator); the engine only names
//! the signer account.
//!
//! Adapters are shared as `Arc<dyn ChainAdapter>` and must allow concurrent
//! reads. Serializing submissions per fee-payer is the caller's job, see
//! [`AccountLocks`](crate::blockchain::nonce::AccountLocks).

use crate::contracts::did_registry::Extrinsic;
use crate::error::ChainError;
use crate::models::transaction::{ChainEvent, Fee};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Metadata of the connected ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    pub name: String,
    pub genesis_hash: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// SS58 network prefix of the ledger's addresses
    pub ss58_prefix: u16,
    pub best_block: u64,
}

/// Account state relevant for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    /// Next nonce to use, including transactions already in the pool
    pub nonce: u64,
    /// Spendable balance in the smallest token unit
    pub free: u128,
}

/// Storage path of a state query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageKey {
    pub pallet: String,
    pub item: String,
    pub key: String,
}

impl StorageKey {
    pub fn new(pallet: &str, item: &str, key: impl Into<String>) -> Self {
        StorageKey {
            pallet: pallet.to_string(),
            item: item.to_string(),
            key: key.into(),
        }
    }
}

/// Block reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: String,
}

/// Status update of a submitted transaction.
///
/// The valid progression is `Ready → Broadcast → InBlock → Finalized`, with
/// `Failed` possible at any point.
#[derive(Debug, Clone, PartialEq)]
pub enum TxStatus {
    /// Accepted into the local pool
    Ready,
    /// Gossiped to peers
    Broadcast,
    /// Included in a block that is not final yet
    InBlock(BlockRef),
    /// Included in a finalized block, with the events the transaction emitted
    Finalized { block: BlockRef, events: Vec<ChainEvent> },
    /// Dropped, invalid, or otherwise rejected after submission
    Failed(String),
}

impl TxStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TxStatus::Ready => "ready",
            TxStatus::Broadcast => "broadcast",
            TxStatus::InBlock(_) => "inBlock",
            TxStatus::Finalized { .. } => "finalized",
            TxStatus::Failed(_) => "failed",
        }
    }
}

/// Handle of a submitted transaction.
///
/// Dropping `statuses` unsubscribes from further updates; it does not
/// withdraw the transaction.
#[derive(Debug)]
pub struct Submission {
    /// Known immediately, before confirmation
    pub transaction_hash: String,
    pub statuses: mpsc::Receiver<TxStatus>,
}

/// Per-ledger connection consumed by the engine.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Establishes the session and returns chain metadata.
    async fn connect(&self) -> Result<ChainInfo, ChainError>;

    async fn disconnect(&self) -> Result<(), ChainError>;

    /// Nonce and balance of an account. Unknown accounts report zeros.
    async fn account(&self, address: &str) -> Result<AccountInfo, ChainError>;

    /// Fee the ledger would charge for `extrinsic`, debited from its fee payer.
    async fn estimate_fee(&self, extrinsic: &Extrinsic) -> Result<Fee, ChainError>;

    /// Signs `extrinsic` for its signer and hands it to the ledger.
    async fn submit(&self, extrinsic: Extrinsic) -> Result<Submission, ChainError>;

    /// Raw state at `key`, `None` when nothing is stored there.
    async fn query_storage(&self, key: &StorageKey) -> Result<Option<Value>, ChainError>;
}
