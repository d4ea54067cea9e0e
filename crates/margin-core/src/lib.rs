//! margin-core - Offline sync engine for Margin
//!
//! This crate keeps a locally writable replica of server-owned notes: drafts,
//! notes created while disconnected, a durable mutation queue drained against
//! the backend, and a time-bounded cache of authoritative reads.

pub mod backend;
pub mod cache;
pub mod config;
pub mod db;
pub mod drafts;
pub mod engine;
pub mod error;
pub mod merge;
pub mod models;
pub mod network;
pub mod services;
pub mod sync;
pub mod util;

#[cfg(test)]
mod testing;

pub use backend::{Backend, HttpBackend};
pub use config::EngineConfig;
pub use engine::{QueryOutcome, SyncEngine, WriteOutcome};
pub use error::{BackendError, Error, Result};
pub use models::{Note, NoteId};
