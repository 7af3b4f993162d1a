use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode operation: {0}")]
    Encode(String),

    #[error("Failed to decode record at offset {offset}: {reason}")]
    Decode { offset: u64, reason: String },

    #[error("Truncated record at offset {offset}")]
    TruncatedRecord { offset: u64 },

    #[error("Malformed record at offset {offset}: {reason}")]
    MalformedRecord { offset: u64, reason: String },

    #[error("Checksum mismatch at offset {offset}: stored {stored:08x}, computed {computed:08x}")]
    ChecksumMismatch { offset: u64, stored: u32, computed: u32 },

    #[error("Unrecognized operation: {0}")]
    UnrecognizedOperation(String),

    #[error("Invalid parameters for {key}: {reason}")]
    InvalidParams { key: String, reason: String },

    #[error("Handler error: {0}")]
    Handler(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Log is unusable until reopened: {0}")]
    Poisoned(String),
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// True for errors that mean the on-disk log can no longer be trusted
    /// from the reported offset onwards.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Decode { .. }
                | Error::TruncatedRecord { .. }
                | Error::MalformedRecord { .. }
                | Error::ChecksumMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
