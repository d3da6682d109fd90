// src/wallet/mod.rs
//! Key material generation.

pub mod key_agreement;
