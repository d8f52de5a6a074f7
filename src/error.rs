use std::path::PathBuf;
use thiserror::Error;


/// Errors of the metadata scanning layers.
///
/// `AllocationFailure` and `InvalidArgument` abort a scan. Everything else is
/// recorded against the line or field it concerns and the scan moves on.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to allocate a {len}-byte buffer")]
    AllocationFailure { len: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("line {line}: no usable die in the stripe")]
    NoUsableDie { line: u32 },

    #[error("device read failed at {addr}: status {status:#x}, result {result:#x}")]
    DeviceRead { addr: String, status: u64, result: u32 },

    #[error("truncated buffer: {needed} bytes needed, {available} available")]
    TruncatedBuffer { needed: usize, available: usize },

    #[error("bad-block table unavailable for {addr}: {reason}")]
    BadBlockTable { addr: String, reason: String },

    #[error("{}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("{}: malformed manifest: {source}", path.display())]
    Manifest { path: PathBuf, source: serde_json::Error },

    #[error("codec: {0}")]
    Codec(#[from] bincode::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
