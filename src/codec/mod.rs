//! The fixed in-house transform pipeline selected by a file's flag bits.
//!
//! Stages apply in a fixed order on encode — BWT, MTF, RLE-v2, AC-order0,
//! AC-order1, rANS — each only if its flag bit is set, and invert in the
//! exact reverse order on decode. Every stage lives in its own submodule;
//! this module only wires flag bits to stage functions.

pub mod ac;
pub mod bwt;
pub mod dc3;
pub mod model;
pub mod mtf;
pub mod rans;
pub mod rle;

use crate::error::ArchiveError;
use thiserror::Error;

/// Flag bit positions from §3 that select a pipeline stage.
pub mod flag_bits {
    pub const BWT: u16 = 0;
    pub const MTF: u16 = 1;
    pub const RLE: u16 = 2;
    pub const AC_ORDER0: u16 = 3;
    pub const AC_ORDER1: u16 = 4;
    pub const RANS: u16 = 5;
    pub const ENCRYPTED: u16 = 6;
    pub const SHA256: u16 = 13;
    pub const CRC32: u16 = 14;
    pub const SHA1: u16 = 15;
}

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed codec stage payload: {0}")]
    Malformed(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl From<ArchiveError> for CodecError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::Cancelled => CodecError::Cancelled,
            other => CodecError::Malformed(other.to_string()),
        }
    }
}

fn bit_set(flags: u16, bit: u16) -> bool {
    flags & (1 << bit) != 0
}

/// Applies the stages selected by `flags`, in the fixed forward order.
pub fn apply_pipeline(flags: u16, block: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = block.to_vec();
    if bit_set(flags, flag_bits::BWT) {
        buf = bwt::bwt_forward(&buf, cancel)?;
    }
    if bit_set(flags, flag_bits::MTF) {
        buf = mtf::mtf_forward(&buf);
    }
    if bit_set(flags, flag_bits::RLE) {
        buf = rle::rle_forward(&buf);
    }
    if bit_set(flags, flag_bits::AC_ORDER0) {
        buf = ac::ac0_forward(&buf, cancel)?;
    }
    if bit_set(flags, flag_bits::AC_ORDER1) {
        buf = ac::ac1_forward(&buf, cancel)?;
    }
    if bit_set(flags, flag_bits::RANS) {
        buf = rans::rans_forward(&buf, cancel)?;
    }
    Ok(buf)
}

/// Inverts the stages selected by `flags`, in the exact reverse order.
pub fn invert_pipeline(flags: u16, block: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut buf = block.to_vec();
    if bit_set(flags, flag_bits::RANS) {
        buf = rans::rans_inverse(&buf)?;
    }
    if bit_set(flags, flag_bits::AC_ORDER1) {
        buf = ac::ac1_inverse(&buf)?;
    }
    if bit_set(flags, flag_bits::AC_ORDER0) {
        buf = ac::ac0_inverse(&buf)?;
    }
    if bit_set(flags, flag_bits::RLE) {
        buf = rle::rle_inverse(&buf)?;
    }
    if bit_set(flags, flag_bits::MTF) {
        buf = mtf::mtf_inverse(&buf)?;
    }
    if bit_set(flags, flag_bits::BWT) {
        buf = bwt::bwt_inverse(&buf)?;
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> bool {
        false
    }

    fn roundtrip(flags: u16, data: &[u8]) {
        let encoded = apply_pipeline(flags, data, &no_cancel).unwrap();
        let decoded = invert_pipeline(flags, &encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn bwt_mtf_rle_roundtrips_aaaaa() {
        let flags = (1 << flag_bits::BWT) | (1 << flag_bits::MTF) | (1 << flag_bits::RLE);
        roundtrip(flags, b"aaaaa");
    }

    #[test]
    fn bwt_only_roundtrips_banana() {
        roundtrip(1 << flag_bits::BWT, b"banana");
    }

    #[test]
    fn full_pipeline_roundtrips_mixed_text() {
        let flags = (1 << flag_bits::BWT)
            | (1 << flag_bits::MTF)
            | (1 << flag_bits::RLE)
            | (1 << flag_bits::AC_ORDER0);
        roundtrip(flags, b"the quick brown fox jumps over the lazy dog");
    }

    #[test]
    fn no_flags_is_identity() {
        roundtrip(0, b"passthrough");
    }

    #[test]
    fn rans_alone_roundtrips() {
        roundtrip(1 << flag_bits::RANS, b"mississippi river");
    }
}
