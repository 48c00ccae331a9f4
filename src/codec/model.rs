//! Order-0 and order-1 symbol-frequency tables, normalized to a fixed
//! denominator so range coders can use fixed-point arithmetic.
//!
//! The normalization step scales raw counts so they sum to exactly
//! `denominator`, then repairs the rounding residual by walking the table
//! and nudging nonzero entries — see the Open Question decision in
//! DESIGN.md for why this replaces the original's ambiguous unsigned-loop
//! termination.

pub const WHOLE: u64 = 1u64 << 32;

/// Raw (unnormalized) symbol counts over `data`.
pub fn order0_counts(data: &[u8]) -> [u64; 256] {
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    counts
}

/// Raw conditional counts keyed by the previous byte; `counts[ctx][sym]`.
/// The first byte of `data` has no predecessor and is excluded.
pub fn order1_counts(data: &[u8]) -> Vec<[u64; 256]> {
    let mut counts = vec![[0u64; 256]; 256];
    for w in data.windows(2) {
        counts[w[0] as usize][w[1] as usize] += 1;
    }
    counts
}

/// Scale `freq` so the nonzero entries sum to exactly `denominator`, never
/// zeroing out an entry that started nonzero. Entries that start at zero
/// stay zero.
pub fn normalize_frequencies(freq: &[u64], denominator: u64) -> Vec<u64> {
    let sum: u64 = freq.iter().sum();
    if sum == 0 {
        return vec![0; freq.len()];
    }

    let mut scaled: Vec<u64> = freq
        .iter()
        .map(|&f| {
            if f == 0 {
                0
            } else {
                let v = (f as u128 * denominator as u128) / sum as u128;
                v.max(1) as u64
            }
        })
        .collect();

    let mut total: u64 = scaled.iter().sum();

    while total > denominator {
        let max_idx = scaled
            .iter()
            .enumerate()
            .filter(|&(_, &v)| v > 1)
            .max_by_key(|&(_, &v)| v)
            .map(|(i, _)| i);
        match max_idx {
            Some(i) => {
                scaled[i] -= 1;
                total -= 1;
            }
            None => break,
        }
    }

    if total < denominator {
        let mut residual = denominator - total;
        let mut i = 0usize;
        let n = scaled.len();
        while residual > 0 {
            if scaled[i % n] > 0 {
                scaled[i % n] += 1;
                residual -= 1;
            }
            i += 1;
        }
    }

    scaled
}

/// Cumulative frequency table: `cmf[i]` is the sum of `freq[0..i]`.
/// `cmf[256]` equals the denominator the table was normalized to.
pub fn cumulative(freq: &[u64]) -> Vec<u64> {
    let mut cmf = Vec::with_capacity(freq.len() + 1);
    let mut acc = 0u64;
    cmf.push(0);
    for &f in freq {
        acc += f;
        cmf.push(acc);
    }
    cmf
}

/// Finds the symbol whose cumulative range `[cmf[sym], cmf[sym+1])`
/// contains `target`, via binary search over the cumulative table. Robust
/// to zero-frequency symbols, which produce repeated `cmf` entries.
pub fn symbol_for_cumulative(cmf: &[u64], target: u64) -> usize {
    cmf.partition_point(|&x| x <= target) - 1
}
