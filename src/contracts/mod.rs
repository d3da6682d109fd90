// src/contracts/mod.rs
//! Identity registry calls and their submission pipeline.

pub mod did_registry;
pub mod monitor;
pub mod registration;
