//! Streaming checksums over the original plaintext of a file.
//!
//! One of CRC-32, SHA-1, or SHA-256 is selected by flag bits 13/14/15 on a
//! file node (§3). The trailer is the ASCII hex rendering of the digest,
//! `0x`-prefixed for CRC-32 only.

use crc32fast::Hasher as Crc32Hasher;
use sha1::{Digest, Sha1};
use sha2::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumKind {
    Crc32,
    Sha1,
    Sha256,
}

impl ChecksumKind {
    /// Decode from file flag bits 13 (SHA-256), 14 (CRC-32), 15 (SHA-1).
    /// At most one bit is expected to be set; callers enforce that via
    /// `crate::tree::flags`.
    pub fn from_flags(flags: u16) -> Option<Self> {
        if flags & (1 << 13) != 0 {
            Some(ChecksumKind::Sha256)
        } else if flags & (1 << 14) != 0 {
            Some(ChecksumKind::Crc32)
        } else if flags & (1 << 15) != 0 {
            Some(ChecksumKind::Sha1)
        } else {
            None
        }
    }

    pub fn flag_bit(self) -> u16 {
        match self {
            ChecksumKind::Sha256 => 1 << 13,
            ChecksumKind::Crc32 => 1 << 14,
            ChecksumKind::Sha1 => 1 << 15,
        }
    }

    /// Byte length of the ASCII trailer, as laid out in §3/§6.
    pub fn trailer_len(self) -> usize {
        match self {
            ChecksumKind::Sha256 => 64,
            ChecksumKind::Crc32 => 10,
            ChecksumKind::Sha1 => 40,
        }
    }
}

pub enum StreamingChecksum {
    Crc32(Crc32Hasher),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl StreamingChecksum {
    pub fn new(kind: ChecksumKind) -> Self {
        match kind {
            ChecksumKind::Crc32 => StreamingChecksum::Crc32(Crc32Hasher::new()),
            ChecksumKind::Sha1 => StreamingChecksum::Sha1(Sha1::new()),
            ChecksumKind::Sha256 => StreamingChecksum::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            StreamingChecksum::Crc32(h) => h.update(data),
            StreamingChecksum::Sha1(h) => h.update(data),
            StreamingChecksum::Sha256(h) => h.update(data),
        }
    }

    /// Render the final digest as the ASCII trailer described in §3/§6.
    pub fn finish_ascii(self) -> String {
        match self {
            StreamingChecksum::Crc32(h) => format!("0x{:08x}", h.finalize()),
            StreamingChecksum::Sha1(h) => hex::encode(h.finalize()),
            StreamingChecksum::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Convenience one-shot over an in-memory buffer.
pub fn checksum_ascii(kind: ChecksumKind, data: &[u8]) -> String {
    let mut h = StreamingChecksum::new(kind);
    h.update(data);
    h.finish_ascii()
}
