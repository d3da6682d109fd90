// src/utils/mod.rs
//! Helper functions.

pub mod address;
pub mod crypto;
pub mod serialization;
