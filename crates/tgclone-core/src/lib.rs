//! Core logic for cloning a Telegram channel's history into another channel.
//!
//! Framework-agnostic: the messaging provider and the progress observer sit
//! behind ports implemented in adapter crates.

pub mod backoff;
pub mod cancel;
pub mod checkpoint;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod ledger;
pub mod lock;
pub mod logging;
pub mod orchestrator;
pub mod ports;
pub mod progress;
pub mod security;
pub mod source;
pub mod supervisor;
pub mod transfer;
pub mod utils;

pub use errors::{Error, Result};
