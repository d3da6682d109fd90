// src/error.rs
//! Error taxonomy for the DID lifecycle engine.
//!
//! Every public operation either returns a complete value or exactly one
//! [`DidError`]. Errors raised by a [`ChainAdapter`](crate::blockchain::adapter::ChainAdapter)
//! are [`ChainError`]s and never cross the engine boundary unwrapped: the
//! pipeline and the providers translate them with [`DidError::from_chain`].

use std::time::Duration;
use thiserror::Error;

/// Boxed error kept as the diagnostic cause of a registration failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DidError>;

/// Typed failure of a DID operation.
#[derive(Debug, Error)]
pub enum DidError {
    /// Malformed DID, address or request. Raised before any ledger contact.
    #[error("validation error: {0}")]
    Validation(String),

    /// Adapter connection or query failure. Safe to retry.
    #[error("network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// The fee-payer cannot cover the transaction cost.
    #[error("insufficient balance for {account}: required {required}, available {available}")]
    InsufficientBalance {
        account: String,
        required: u128,
        available: u128,
    },

    /// The identity registry already holds this identifier.
    #[error("DID already registered: {0}")]
    DuplicateDid(String),

    /// Submission succeeded but finality was not observed in time.
    ///
    /// The transaction may still land; `transaction_hash` lets the caller
    /// reconcile later.
    #[error("transaction {transaction_hash} not finalized within {timeout:?}")]
    ConfirmationTimeout {
        transaction_hash: String,
        timeout: Duration,
    },

    /// Ledger-side rejection or any unclassified failure.
    #[error("DID registration failed: {message}")]
    Registration {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl DidError {
    pub fn validation(message: impl Into<String>) -> Self {
        DidError::Validation(message.into())
    }

    pub fn registration(message: impl Into<String>) -> Self {
        DidError::Registration {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error as a [`DidError::Registration`], keeping it as the source.
    pub fn registration_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        DidError::Registration {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Translates an adapter error into the engine taxonomy.
    ///
    /// # Arguments
    /// * `error` - Error reported by the chain adapter
    ///
    /// # Returns
    /// - `Network` for connection and transport failures
    /// - `InsufficientBalance` for payment rejections
    /// - `Registration` for everything else, with the adapter error as source
    pub fn from_chain(error: ChainError) -> Self {
        match error {
            transient @ (ChainError::Connection(_) | ChainError::Query(_)) => DidError::Network {
                message: transient.to_string(),
                source: Some(Box::new(transient)),
            },
            ChainError::Payment {
                account,
                required,
                available,
            } => DidError::InsufficientBalance {
                account,
                required,
                available,
            },
            other => DidError::Registration {
                message: other.to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Whether the failed step may be retried as is.
    ///
    /// Only network errors qualify. Everything else needs the caller to
    /// change something first (funding, input) or is unsafe to repeat.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DidError::Network { .. })
    }

    /// Stable machine-readable tag of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            DidError::Validation(_) => "validation_error",
            DidError::Network { .. } => "network_error",
            DidError::InsufficientBalance { .. } => "insufficient_balance",
            DidError::DuplicateDid(_) => "duplicate_did",
            DidError::ConfirmationTimeout { .. } => "confirmation_timeout",
            DidError::Registration { .. } => "did_registration_error",
        }
    }

    /// Transaction hash carried by the error, if the transaction was submitted.
    pub fn transaction_hash(&self) -> Option<&str> {
        match self {
            DidError::ConfirmationTimeout {
                transaction_hash, ..
            } => Some(transaction_hash),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DidError {
    fn from(error: serde_json::Error) -> Self {
        DidError::registration_with("malformed ledger payload", error)
    }
}

/// Error reported by a chain adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The session could not be established or was lost.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A read query failed in transport.
    #[error("query failed: {0}")]
    Query(String),

    /// The ledger refused the payment for the transaction.
    #[error("inability to pay fees: {account} has {available}, needs {required}")]
    Payment {
        account: String,
        required: u128,
        available: u128,
    },

    /// The transaction pool rejected the submission.
    #[error("transaction rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The adapter is not connected.
    #[error("adapter is not connected")]
    NotConnected,
}

impl ChainError {
    /// Whether this error is transient on the transport level.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Connection(_) | ChainError::Query(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_errors_map_into_taxonomy() {
        let network = DidError::from_chain(ChainError::Connection("refused".into()));
        assert!(matches!(network, DidError::Network { .. }));
        assert!(network.is_retryable());

        let payment = DidError::from_chain(ChainError::Payment {
            account: "alice".into(),
            required: 10,
            available: 1,
        });
        assert!(matches!(
            payment,
            DidError::InsufficientBalance { required: 10, available: 1, .. }
        ));
        assert!(!payment.is_retryable());

        let rejected = DidError::from_chain(ChainError::Rejected {
            code: "Stale".into(),
            message: "nonce too low".into(),
        });
        assert_eq!(rejected.kind(), "did_registration_error");
        assert!(std::error::Error::source(&rejected).is_some());
    }

    #[test]
    fn test_timeout_carries_hash() {
        let error = DidError::ConfirmationTimeout {
            transaction_hash: "0xabc".into(),
            timeout: Duration::from_secs(30),
        };
        assert_eq!(error.transaction_hash(), Some("0xabc"));
        assert!(error.to_string().contains("0xabc"));
    }
}
