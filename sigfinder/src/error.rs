use thiserror::Error;

use crate::scanner::PatternError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pattern for signature {key:?}: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: PatternError,
    },

    #[error("unable to read {size:#x} bytes at {address:#010x} (error code {code})")]
    MemoryRead { address: u32, size: u32, code: i32 },

    #[error("failed to query memory region at {address:#010x}: {message}")]
    Enumeration { address: u32, message: String },

    #[error("duplicate signature key {0:?}")]
    DuplicateSignature(String),

    #[error("a resolution pass is already running")]
    PassInProgress,

    #[error("resolution pass ended without a result")]
    PassAborted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
