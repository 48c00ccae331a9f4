//! Burrows-Wheeler Transform built on the DC3 suffix array.
//!
//! Forward: append a sentinel lower than any byte, take the suffix array of
//! the extended sequence, emit the last column with the sentinel's row
//! filled by an arbitrary in-range byte (any value works — the primary
//! index alone recovers the mapping, per the Open Question decision in
//! DESIGN.md), then a 4-byte little-endian primary index.
//!
//! Inverse: rebuild the LF-mapping from the last column, treating the
//! primary index's row as the (unique, globally smallest) sentinel rather
//! than trusting its substituted byte value, then chase the mapping once
//! around the cycle to recover the original text.

use super::dc3;
use crate::error::ArchiveError;

pub fn bwt_forward(text: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u8>, ArchiveError> {
    let n = text.len();
    let sa = dc3::suffix_array_with_sentinel(text, cancel)?;
    let m = sa.len(); // n + 1

    let mut primary_index: u32 = 0;
    let mut last_column = Vec::with_capacity(m);
    for (i, &s) in sa.iter().enumerate() {
        if s == 0 {
            primary_index = i as u32;
            last_column.push(0u8); // substitute; real sentinel recovered via primary_index
        } else {
            last_column.push(text[(s as usize) - 1]);
        }
    }

    let mut out = Vec::with_capacity(n + 5);
    out.extend_from_slice(&last_column);
    out.extend_from_slice(&primary_index.to_le_bytes());
    Ok(out)
}

pub fn bwt_inverse(encoded: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    if encoded.len() < 4 {
        return Err(ArchiveError::Format("BWT block shorter than the primary index".into()));
    }
    let split = encoded.len() - 4;
    let last_column = &encoded[..split];
    let primary_index = u32::from_le_bytes(encoded[split..].try_into().unwrap()) as usize;
    let m = last_column.len();
    if m == 0 {
        return Ok(Vec::new());
    }
    if primary_index >= m {
        return Err(ArchiveError::Format("BWT primary index out of range".into()));
    }

    let mut count = [0u64; 256];
    for (i, &b) in last_column.iter().enumerate() {
        if i != primary_index {
            count[b as usize] += 1;
        }
    }
    let mut base = [0u64; 256];
    let mut acc = 1u64; // row 0 of F is reserved for the sentinel
    for c in 0..256 {
        base[c] = acc;
        acc += count[c];
    }

    let mut running = [0u64; 256];
    let mut lf = vec![0usize; m];
    for (i, &b) in last_column.iter().enumerate() {
        if i == primary_index {
            continue;
        }
        let c = b as usize;
        lf[i] = (base[c] + running[c]) as usize;
        running[c] += 1;
    }
    lf[primary_index] = 0;

    let mut out = Vec::with_capacity(m);
    let mut row = primary_index;
    for _ in 0..m {
        out.push(last_column[row]);
        row = lf[row];
    }
    out.reverse();
    out.truncate(m - 1);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> bool {
        false
    }

    fn roundtrip(text: &[u8]) {
        let encoded = bwt_forward(text, &no_cancel).unwrap();
        assert_eq!(encoded.len(), text.len() + 5);
        let decoded = bwt_inverse(&encoded).unwrap();
        assert_eq!(decoded, text);
    }

    #[test]
    fn banana_roundtrips() {
        roundtrip(b"banana");
    }

    #[test]
    fn all_equal_bytes_roundtrip() {
        roundtrip(&[b'z'; 64]);
    }

    #[test]
    fn single_byte_roundtrips() {
        roundtrip(b"x");
    }

    #[test]
    fn empty_input_roundtrips() {
        roundtrip(b"");
    }

    #[test]
    fn mixed_text_roundtrips() {
        roundtrip(b"the quick brown fox jumps over the lazy dog");
    }
}
