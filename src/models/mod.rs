// src/models/mod.rs
//! Data structures shared by every DID method.

pub mod did;
pub mod identifier;
pub mod transaction;
