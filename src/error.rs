//! The closed error taxonomy for the decoder pipeline.

use thiserror::Error;

/// Every way a decode operation can fail.
///
/// The chunk-level policy is deliberately more tolerant than this type
/// suggests: unrecognized chunks, unknown `ref_simple` values, and
/// unresolvable column indices are skipped silently rather than
/// surfaced here (the format is under-documented; see `row.rs`).
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to open '{0}'")]
    Open(String),

    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    #[error("seek error: {0}")]
    Seek(String),

    #[error("bad magic signature")]
    BadMagic,

    #[error("bad sector index {index} (file has {available} sectors)")]
    BadSector { index: u64, available: u64 },

    #[error("inconsistent sector count: expected file size {expected}, got {actual}")]
    BadSectorCount { expected: u64, actual: u64 },

    #[error("allocation failure: {0}")]
    Malloc(String),

    #[error("unsupported character set: {0}")]
    UnsupportedCharset(String),

    #[error("in-memory open is not supported for files this large")]
    NoInMemoryOpenSupport,

    #[error("traversal aborted by caller")]
    UserAborted,
}

pub type Result<T> = std::result::Result<T, Error>;
