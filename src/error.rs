//! Top-level error type for archive operations.
//!
//! Codec stages report their own failures through [`crate::codec::CodecError`]
//! and get folded into [`ArchiveError::Algorithm`] once they cross the block
//! pipeline boundary; everything else maps directly to one of the variants
//! below.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("format error: {0}")]
    Format(String),

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("algorithm error: {0}")]
    Algorithm(String),

    #[error("file is encrypted and no key was supplied")]
    EncryptionRequired,
}

impl From<crate::codec::CodecError> for ArchiveError {
    fn from(e: crate::codec::CodecError) -> Self {
        ArchiveError::Algorithm(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
