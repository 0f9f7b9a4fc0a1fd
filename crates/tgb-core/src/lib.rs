//! Core domain + application logic for the Telegram backup relay.
//!
//! This crate is framework-agnostic. The Bot API client and the CLI live in
//! adapter crates and plug in through the ports in `transport` and `store`.

pub mod chunker;
pub mod config;
pub mod deletion;
pub mod delivery;
pub mod domain;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod relay;
pub mod resolver;
pub mod retrieval;
pub mod store;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
