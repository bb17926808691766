// Error types shared across the crate
//
// Only setup-phase problems surface as `Err` from an ingestion call. Anything
// that goes wrong inside a worker is recorded in the stats error list instead
// and can be re-raised through `Ingestion::into_result`.

use thiserror::Error;

use crate::stats::ErrorList;

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cell offsets are 32-bit; larger inputs are refused before any worker starts.
    #[error("input of {len} bytes exceeds the 4 GiB limit")]
    InputTooLarge { len: usize },

    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    /// A cell did not fit into a single arena block.
    #[error("cell of {len} bytes exceeds arena block size {block_size}")]
    BlockSizeExceeded { len: usize, block_size: usize },

    #[error("invalid config value for '{key}': {value:?}")]
    InvalidConfig { key: String, value: String },

    #[error("failed to serialize stats: {0}")]
    Json(#[from] serde_json::Error),

    /// One or more workers reported a failure.
    #[error("ingestion finished with errors: {0}")]
    WorkerFailures(ErrorList),
}

/// Failure raised by a cell handler. Stops only the tokenizer that owns the handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

pub type Result<T> = std::result::Result<T, Error>;
