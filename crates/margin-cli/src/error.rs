use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] margin_core::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No note content provided")]
    EmptyContent,
    #[error("Sync queue item not found: {0}")]
    QueueItemNotFound(i64),
    #[error("Sync queue item {0} has not exhausted its retries")]
    NotTerminal(i64),
    #[error("Draft not found: {0}")]
    DraftNotFound(String),
    #[error("Backend unreachable at {0}; queued changes stay local until it is back")]
    BackendUnreachable(String),
}
