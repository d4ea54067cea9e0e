//! Async service handles shared across engine components

mod local_store;

pub use local_store::LocalStore;
