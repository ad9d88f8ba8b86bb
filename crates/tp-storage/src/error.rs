//! Storage errors.

use thiserror::Error;

/// Errors from storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(
        "store full: {records} records / {bytes} bytes (limits {max_records} records / {max_bytes} bytes)"
    )]
    Full {
        records: usize,
        bytes: u64,
        max_records: usize,
        max_bytes: u64,
    },

    #[error("corrupt record {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: DecodeError,
    },

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl StorageError {
    /// Error code for structured error reporting.
    pub fn code(&self) -> u32 {
        match self {
            StorageError::Io(_) => 40,
            StorageError::Json(_) => 41,
            StorageError::Full { .. } => 42,
            StorageError::Corrupt { .. } => 43,
            StorageError::InvalidPath(_) => 44,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, StorageError::Full { .. })
    }
}

impl From<StorageError> for tp_common::Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Io(e) => tp_common::Error::Io(e),
            other => tp_common::Error::Storage(other.to_string()),
        }
    }
}

/// Reasons a stored record cannot be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("missing header line")]
    MissingHeader,

    #[error("invalid header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),

    #[error("payload length mismatch: header says {expected}, found {actual}")]
    LengthMismatch { expected: u64, actual: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            StorageError::Io(std::io::Error::other("x")),
            StorageError::Full {
                records: 1,
                bytes: 1,
                max_records: 1,
                max_bytes: 1,
            },
            StorageError::Corrupt {
                key: "k".into(),
                source: DecodeError::MissingHeader,
            },
            StorageError::InvalidPath("p".into()),
        ];
        let mut codes: Vec<u32> = errors.iter().map(|e| e.code()).collect();
        codes.dedup();
        assert_eq!(codes.len(), 4);
    }

    #[test]
    fn test_into_common_error() {
        let err: tp_common::Error = StorageError::Full {
            records: 5000,
            bytes: 10,
            max_records: 5000,
            max_bytes: 100,
        }
        .into();
        assert_eq!(err.category(), tp_common::ErrorCategory::Storage);
    }
}
