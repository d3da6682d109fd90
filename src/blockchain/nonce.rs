// src/blockchain/nonce.rs
//! Per-account submission serialization.
//!
//! Reading the next nonce and submitting must happen atomically with respect
//! to other submissions paid by the same account, otherwise two in-flight
//! transactions can pick the same nonce. Each fee-payer gets its own async
//! mutex; different accounts never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;

type LockMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Default, Clone)]
pub struct AccountLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Waits for exclusive submission rights for `account`.
    ///
    /// The guard must be held from the nonce read until the ledger has
    /// accepted the submission.
    pub async fn acquire(&self, account: &str) -> AccountGuard {
        let lock = self
            .map()
            .entry(account.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        AccountGuard {
            guard: lock.lock_owned().await,
            account: account.to_string(),
            locks: self.clone(),
        }
    }
}

/// Exclusive submission rights for one account.
///
/// Dropping it releases the account. The account's entry is pruned when
/// nobody else is waiting for it.
#[derive(Debug)]
pub struct AccountGuard {
    guard: OwnedMutexGuard<()>,
    account: String,
    locks: AccountLocks,
}

impl Drop for AccountGuard {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // one reference in the map, one in this guard
        let idle = map.get(&self.account).is_some_and(|lock| {
            Arc::strong_count(lock) == 2 && Arc::ptr_eq(lock, OwnedMutexGuard::mutex(&self.guard))
        });
        if idle {
            map.remove(&self.account);
        }
    }
}
