//! # Pub/Sub Sample
//!
//! A runnable host for the pub/sub framework: a small actor runtime, the
//! hello demo actor and a system orchestrator that can crash, restart and
//! migrate actors. Exposed as a library for the integration tests.

pub mod clients;
pub mod error;
pub mod hello_actor;
pub mod host;
pub mod lifecycle;
