//! Error taxonomy for storage, codec, and view failures.
//!
//! ERROR HANDLING
//! ==============
//! Persistence is best-effort: storage and codec failures raised while a
//! store reads or writes its slot are logged and recovered locally, never
//! returned to the caller. The error types below surface only where the
//! caller asked for something that cannot be done (mutating a stale view,
//! walking a missing path) or when driving a backend directly.

#[cfg(test)]
#[path = "error_test.rs"]
mod error_test;

/// Stable machine-readable code for an error, e.g. for UI diagnostics.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// The write would exceed the area's capacity.
    #[error("storage quota exceeded writing '{key}'")]
    QuotaExceeded { key: String },
    /// Storage is disabled or blocked (private mode, security settings, no window).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Any other backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl ErrorCode for StorageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "E_STORAGE_QUOTA",
            Self::Unavailable(_) => "E_STORAGE_UNAVAILABLE",
            Self::Backend(_) => "E_STORAGE_BACKEND",
        }
    }
}

/// Failure converting between a value and its stored text.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(String),
    #[error("failed to decode stored text: {0}")]
    Decode(String),
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorCode for CodecError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "E_CODEC_ENCODE",
            Self::Decode(_) => "E_CODEC_DECODE",
            Self::Json(e) if e.is_data() || e.is_syntax() || e.is_eof() => "E_CODEC_DECODE",
            Self::Json(_) => "E_CODEC_JSON",
        }
    }
}

/// Error returned by store and view operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The view was issued for a value that has since been replaced wholesale.
    #[error("stale view for '{key}': issued at generation {issued}, store is at {current}")]
    StaleView { key: String, issued: u64, current: u64 },
    /// A JSON pointer did not resolve against the current value.
    #[error("path not found in '{key}': {path}")]
    PathNotFound { key: String, path: String },
    /// A JSON pointer resolved to a scalar where a composite was required.
    #[error("value at '{path}' is not an object or array")]
    NotComposite { path: String },
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Storage(e) => e.error_code(),
            Self::Codec(e) => e.error_code(),
            Self::StaleView { .. } => "E_STALE_VIEW",
            Self::PathNotFound { .. } => "E_PATH_NOT_FOUND",
            Self::NotComposite { .. } => "E_NOT_COMPOSITE",
        }
    }

    fn retryable(&self) -> bool {
        // A fresh view of the current generation can redo the operation.
        matches!(self, Self::StaleView { .. })
    }
}
