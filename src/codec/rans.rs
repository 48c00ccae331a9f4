//! Order-0 rANS (range Asymmetric Numeral Systems).
//!
//! A LIFO streaming entropy coder: the encoder walks the input right to
//! left, folding each symbol into a 64-bit state word and occasionally
//! shedding a 32-bit renormalization word onto the output stack; the
//! decoder restores the final state from the last two stack words and
//! unwinds symbols in the same (and therefore forward) order, pulling
//! words back off the stack whenever the state underflows its working
//! range.
//!
//! Per-symbol counts serialize into 3-byte fields (§4.5/§6), so the
//! normalization denominator here is `2^24 - 1` rather than the `2^32`
//! used by the abstract model in [`super::model`] — see DESIGN.md for
//! this Open Question resolution. Because `2^24 - 1` is not a power of
//! two, the encode/decode steps below use real division and modulo
//! instead of the bit-shift shortcuts a power-of-two total would allow;
//! correctness does not depend on that shortcut.

use super::model;
use crate::error::ArchiveError;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

const RANS_TOTAL: u64 = (1u64 << 24) - 1;
const RANS_L: u64 = RANS_TOTAL * (1u64 << 16);

pub fn rans_forward(data: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u8>, ArchiveError> {
    let mut out = Vec::new();
    out.write_u32::<LittleEndian>(data.len() as u32).unwrap();

    if data.is_empty() {
        out.extend_from_slice(&[0u8; 32]);
        return Ok(out);
    }

    let counts = model::order0_counts(data);
    let freq = model::normalize_frequencies(&counts, RANS_TOTAL);
    let cmf = model::cumulative(&freq);

    let mut bitmap = [0u8; 32];
    for sym in 0..256usize {
        if freq[sym] > 0 {
            bitmap[sym >> 3] |= 0x80 >> (sym & 7);
        }
    }
    out.extend_from_slice(&bitmap);
    for sym in 0..256usize {
        if freq[sym] > 0 {
            let count = freq[sym] as u32;
            out.push((count & 0xFF) as u8);
            out.push(((count >> 8) & 0xFF) as u8);
            out.push(((count >> 16) & 0xFF) as u8);
        }
    }

    let mut state: u64 = RANS_L;
    let mut words: Vec<u32> = Vec::new();

    for (i, &b) in data.iter().enumerate().rev() {
        if i % 4096 == 0 && cancel() {
            return Err(ArchiveError::Cancelled);
        }
        let sym = b as usize;
        let f = freq[sym];
        let c = cmf[sym];

        let x_max = (RANS_L / RANS_TOTAL) * (1u64 << 32) * f;
        while state >= x_max {
            words.push((state & 0xFFFF_FFFF) as u32);
            state >>= 32;
        }
        state = (state / f) * RANS_TOTAL + (state % f) + c;
    }

    words.push((state & 0xFFFF_FFFF) as u32);
    words.push((state >> 32) as u32);

    for w in words {
        out.write_u32::<LittleEndian>(w).unwrap();
    }
    Ok(out)
}

pub fn rans_inverse(encoded: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut cursor = encoded;
    let original_size =
        cursor.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))? as usize;

    if original_size == 0 {
        return Ok(Vec::new());
    }

    if cursor.len() < 32 {
        return Err(ArchiveError::Format("rANS block missing the used-symbol bitmap".into()));
    }
    let bitmap = &cursor[..32];
    cursor = &cursor[32..];

    let mut freq = [0u64; 256];
    for sym in 0..256usize {
        if bitmap[sym >> 3] & (0x80 >> (sym & 7)) != 0 {
            if cursor.len() < 3 {
                return Err(ArchiveError::Format("rANS block truncated in the count table".into()));
            }
            let count = cursor[0] as u64 | ((cursor[1] as u64) << 8) | ((cursor[2] as u64) << 16);
            cursor = &cursor[3..];
            freq[sym] = count;
        }
    }
    let cmf = model::cumulative(&freq);

    let word_count = cursor.len() / 4;
    let mut words = Vec::with_capacity(word_count);
    let mut c = cursor;
    for _ in 0..word_count {
        words.push(c.read_u32::<LittleEndian>().map_err(|e| ArchiveError::Format(e.to_string()))?);
    }

    fn pop(words: &[u32], pos: &mut usize) -> Result<u32, ArchiveError> {
        if *pos == 0 {
            return Err(ArchiveError::Format("rANS stack underflow".into()));
        }
        *pos -= 1;
        Ok(words[*pos])
    }

    let mut pos = words.len();
    let low = pop(&words, &mut pos)?;
    let high = pop(&words, &mut pos)?;
    let mut state: u64 = ((high as u64) << 32) | (low as u64);

    let mut out = Vec::with_capacity(original_size);
    for _ in 0..original_size {
        let value = state % RANS_TOTAL;
        let sym = model::symbol_for_cumulative(&cmf, value);
        let f = freq[sym];
        let cl = cmf[sym];
        out.push(sym as u8);
        state = f * (state / RANS_TOTAL) + (value - cl);

        while state < RANS_L {
            let w = pop(&words, &mut pos)?;
            state = (state << 32) | (w as u64);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> bool {
        false
    }

    fn roundtrip(data: &[u8]) {
        let encoded = rans_forward(data, &no_cancel).unwrap();
        let decoded = rans_inverse(&encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn empty_input_roundtrips() {
        roundtrip(b"");
    }

    #[test]
    fn single_byte_roundtrips() {
        roundtrip(b"x");
    }

    #[test]
    fn single_symbol_block_roundtrips() {
        roundtrip(&vec![b'a'; 300]);
    }

    #[test]
    fn mixed_text_roundtrips() {
        roundtrip(b"the quick brown fox jumps over the lazy dog, repeatedly");
    }

    #[test]
    fn full_byte_range_roundtrips() {
        let data: Vec<u8> = (0..=255).cycle().take(2000).collect();
        roundtrip(&data);
    }
}
