// src/services/mod.rs
//! Method providers, the dispatcher in front of them and the HTTP API.

pub mod api_server;
pub mod factory;
pub mod providers;
