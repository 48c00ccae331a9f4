//! Arithmetic coding, order-0 and order-1, over a 32-bit range coder.
//!
//! The coder keeps `low`/`high` state words such that `low <= state < high`
//! and `low < high <= whole`; renormalization (the half/quarter rules
//! below) restores `high - low > quarter` after every symbol. All
//! intermediate products use 128-bit arithmetic, wider than the 32-bit
//! state, per the numeric invariants in §4.5.
//!
//! The denominator used here (`AC_DENOM`, `2^32 - 1`) is one less than the
//! abstract `WHOLE` constant in [`super::model`]: a symbol that owns the
//! entire input would otherwise need a frequency of exactly `2^32`, which
//! cannot round-trip through this format's 4-byte frequency fields. See
//! DESIGN.md for this Open Question resolution.

use super::model;
use crate::bitio::{BitReader, BitWriter};
use crate::error::ArchiveError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

const AC_DENOM: u64 = (1u64 << 32) - 1;
const TOP: u64 = 1u64 << 32;
const HALF: u64 = 1u64 << 31;
const QUARTER: u64 = 1u64 << 30;
const THREE_QUARTER: u64 = 3 * QUARTER;
const MASK: u64 = TOP - 1;

struct RangeEncoder {
    low: u64,
    high: u64,
    pending: u64,
    writer: BitWriter,
}

impl RangeEncoder {
    fn new() -> Self {
        Self { low: 0, high: MASK, pending: 0, writer: BitWriter::new() }
    }

    fn output_bit(&mut self, bit: bool) {
        self.writer.push_bit(bit);
        for _ in 0..self.pending {
            self.writer.push_bit(!bit);
        }
        self.pending = 0;
    }

    fn encode(&mut self, cum_lo: u64, cum_hi: u64, total: u64) {
        let range = self.high - self.low + 1;
        self.high = self.low + ((range as u128 * cum_hi as u128) / total as u128) as u64 - 1;
        self.low = self.low + ((range as u128 * cum_lo as u128) / total as u128) as u64;

        loop {
            if self.high < HALF {
                self.output_bit(false);
            } else if self.low >= HALF {
                self.output_bit(true);
                self.low -= HALF;
                self.high -= HALF;
            } else if self.low >= QUARTER && self.high < THREE_QUARTER {
                self.pending += 1;
                self.low -= QUARTER;
                self.high -= QUARTER;
            } else {
                break;
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
        }
    }

    fn finish(mut self) -> Vec<u8> {
        self.pending += 1;
        if self.low < QUARTER {
            self.output_bit(false);
        } else {
            self.output_bit(true);
        }
        self.writer.finish()
    }
}

struct RangeDecoder<'a> {
    low: u64,
    high: u64,
    code: u64,
    reader: BitReader<'a>,
}

impl<'a> RangeDecoder<'a> {
    fn new(data: &'a [u8], bit_len: u64) -> Self {
        let mut reader = BitReader::new(data, bit_len);
        let mut code = 0u64;
        for _ in 0..32 {
            let bit = if reader.bits_remaining() > 0 { reader.get_bit() } else { false };
            code = (code << 1) | (bit as u64);
        }
        Self { low: 0, high: MASK, code, reader }
    }

    fn next_bit(&mut self) -> u64 {
        let bit = if self.reader.bits_remaining() > 0 { self.reader.get_bit() } else { false };
        bit as u64
    }

    fn decode_value(&self, total: u64) -> u64 {
        let range = self.high - self.low + 1;
        (((self.code - self.low + 1) as u128 * total as u128 - 1) / range as u128) as u64
    }

    fn consume(&mut self, cum_lo: u64, cum_hi: u64, total: u64) {
        let range = self.high - self.low + 1;
        self.high = self.low + ((range as u128 * cum_hi as u128) / total as u128) as u64 - 1;
        self.low = self.low + ((range as u128 * cum_lo as u128) / total as u128) as u64;

        loop {
            if self.high < HALF {
                // bit already consumed implicitly by initial window
            } else if self.low >= HALF {
                self.low -= HALF;
                self.high -= HALF;
                self.code -= HALF;
            } else if self.low >= QUARTER && self.high < THREE_QUARTER {
                self.low -= QUARTER;
                self.high -= QUARTER;
                self.code -= QUARTER;
            } else {
                break;
            }
            self.low <<= 1;
            self.high = (self.high << 1) | 1;
            self.code = ((self.code << 1) | self.next_bit()) & MASK;
        }
    }
}

fn write_freq_table(out: &mut Vec<u8>, freq: &[u64]) {
    for &f in freq {
        out.write_u32::<LittleEndian>(f as u32).unwrap();
    }
}

fn read_freq_table(cursor: &mut &[u8]) -> Result<Vec<u64>, ArchiveError> {
    let mut freq = Vec::with_capacity(256);
    for _ in 0..256 {
        freq.push(cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as u64);
    }
    Ok(freq)
}

pub fn ac0_forward(data: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u8>, ArchiveError> {
    let counts = model::order0_counts(data);
    let freq = model::normalize_frequencies(&counts, AC_DENOM);
    let cmf = model::cumulative(&freq);
    let total = AC_DENOM;

    let mut out = Vec::new();
    if data.is_empty() {
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        write_freq_table(&mut out, &freq);
        return Ok(out);
    }

    let mut enc = RangeEncoder::new();
    for (i, &b) in data.iter().enumerate() {
        if i % 4096 == 0 && cancel() {
            return Err(ArchiveError::Cancelled);
        }
        enc.encode(cmf[b as usize], cmf[b as usize + 1], total);
    }
    let payload = enc.finish();
    let bit_len = payload.len() as u64 * 8;

    out.write_u32::<LittleEndian>(bit_len as u32).unwrap();
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    write_freq_table(&mut out, &freq);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn ac0_inverse(encoded: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut cursor = encoded;
    let bit_len = cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as u64;
    let original_size = cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as usize;
    let freq = read_freq_table(&mut cursor)?;
    let cmf = model::cumulative(&freq);
    let total = AC_DENOM;

    if original_size == 0 {
        return Ok(Vec::new());
    }

    let mut dec = RangeDecoder::new(cursor, bit_len);
    let mut out = Vec::with_capacity(original_size);
    for _ in 0..original_size {
        let value = dec.decode_value(total);
        let sym = model::symbol_for_cumulative(&cmf, value);
        out.push(sym as u8);
        dec.consume(cmf[sym], cmf[sym + 1], total);
    }
    Ok(out)
}

pub fn ac1_forward(data: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    if data.is_empty() {
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.push(0);
        for _ in 0..256 {
            write_freq_table(&mut out, &[0u64; 256]);
        }
        return Ok(out);
    }

    let raw_counts = model::order1_counts(data);
    let tables: Vec<Vec<u64>> =
        raw_counts.iter().map(|row| model::normalize_frequencies(row, AC_DENOM)).collect();
    let cmfs: Vec<Vec<u64>> = tables.iter().map(|t| model::cumulative(t)).collect();
    let total = AC_DENOM;

    let mut enc = RangeEncoder::new();
    let mut context = data[0];
    for (i, &b) in data[1..].iter().enumerate() {
        if i % 4096 == 0 && cancel() {
            return Err(ArchiveError::Cancelled);
        }
        let cmf = &cmfs[context as usize];
        enc.encode(cmf[b as usize], cmf[b as usize + 1], total);
        context = b;
    }
    let payload = enc.finish();
    let bit_len = payload.len() as u64 * 8;

    out.write_u32::<LittleEndian>(bit_len as u32).unwrap();
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    out.push(data[0]);
    for t in &tables {
        write_freq_table(&mut out, t);
    }
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn ac1_inverse(encoded: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut cursor = encoded;
    let bit_len = cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as u64;
    let original_size = cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as usize;
    if original_size == 0 {
        return Ok(Vec::new());
    }
    let first_byte = cursor.read_u8().map_err(|e| ArchiveError::Format(e.to_string()))?;

    let mut tables = Vec::with_capacity(256);
    for _ in 0..256 {
        tables.push(read_freq_table(&mut cursor)?);
    }
    let cmfs: Vec<Vec<u64>> = tables.iter().map(|t| model::cumulative(t)).collect();
    let total = AC_DENOM;

    let mut out = Vec::with_capacity(original_size);
    out.push(first_byte);
    if original_size == 1 {
        return Ok(out);
    }

    let mut dec = RangeDecoder::new(cursor, bit_len);
    let mut context = first_byte;
    for _ in 1..original_size {
        let cmf = &cmfs[context as usize];
        let value = dec.decode_value(total);
        let sym = model::symbol_for_cumulative(cmf, value);
        out.push(sym as u8);
        dec.consume(cmf[sym], cmf[sym + 1], total);
        context = sym as u8;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> bool {
        false
    }

    #[test]
    fn order0_roundtrips_mixed_text() {
        let data = b"the quick brown fox jumps over the lazy dog";
        let encoded = ac0_forward(data, &no_cancel).unwrap();
        let decoded = ac0_inverse(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn order0_roundtrips_single_symbol_block() {
        let data = vec![b'z'; 500];
        let encoded = ac0_forward(&data, &no_cancel).unwrap();
        let decoded = ac0_inverse(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn order0_roundtrips_empty() {
        let encoded = ac0_forward(b"", &no_cancel).unwrap();
        let decoded = ac0_inverse(&encoded).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn order1_roundtrips_mixed_text() {
        let data = b"mississippi river mississippi river";
        let encoded = ac1_forward(data, &no_cancel).unwrap();
        let decoded = ac1_inverse(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn order1_roundtrips_single_byte() {
        let data = b"x";
        let encoded = ac1_forward(data, &no_cancel).unwrap();
        let decoded = ac1_inverse(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn order1_roundtrips_empty() {
        let encoded = ac1_forward(b"", &no_cancel).unwrap();
        let decoded = ac1_inverse(&encoded).unwrap();
        assert!(decoded.is_empty());
    }
}
