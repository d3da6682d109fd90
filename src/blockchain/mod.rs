// src/blockchain/mod.rs
//! Ledger access: the adapter boundary and what surrounds a submission.

pub mod adapter;
pub mod local_ledger;
pub mod nonce;
pub mod retry;
