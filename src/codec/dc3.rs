//! Difference Cover modulo 3 (DC3) linear-time suffix array construction.
//!
//! This is the classic Kärkkäinen–Sanders algorithm: split suffixes into
//! the `i mod 3 == 0` group and the `i mod 3 ∈ {1,2}` group, recursively
//! rank the latter by renaming triples to dense integers, then merge the
//! two groups with a constant-time comparator. Counting sort (`radix_pass`
//! below) is used throughout; the base case is a group of size ≤ 1.
//!
//! The input alphabet is remapped to dense integers at every recursion
//! level via the `k` (alphabet size) parameter passed to `radix_pass`.

use crate::error::ArchiveError;

/// Stable counting sort of `a` by the key function, writing into `b`.
/// `k` is the number of distinct key values (keys are in `0..=k`).
fn radix_pass(a: &[i64], b: &mut [i64], key: impl Fn(i64) -> i64, n: usize, k: usize) {
    let mut count = vec![0usize; k + 2];
    for i in 0..n {
        count[key(a[i]) as usize + 1] += 1;
    }
    for i in 1..count.len() {
        count[i] += count[i - 1];
    }
    for i in 0..n {
        let idx = key(a[i]) as usize;
        b[count[idx]] = a[i];
        count[idx] += 1;
    }
}

fn leq2(a1: i64, a2: i64, b1: i64, b2: i64) -> bool {
    a1 < b1 || (a1 == b1 && a2 <= b2)
}

fn leq3(a1: i64, a2: i64, a3: i64, b1: i64, b2: i64, b3: i64) -> bool {
    a1 < b1 || (a1 == b1 && leq2(a2, a3, b2, b3))
}

/// `s` must have length `n + 3`, the last three entries padded with 0.
/// Values of `s[0..n]` lie in `1..=k` (0 is reserved as the sentinel).
/// Writes the suffix array for `s[0..n]` into `sa` (length `n`).
fn suffix_array_rec(
    s: &[i64],
    sa: &mut [i64],
    n: usize,
    k: usize,
    cancel: &(dyn Fn() -> bool + Sync),
) -> Result<(), ArchiveError> {
    if cancel() {
        return Err(ArchiveError::Cancelled);
    }
    if n == 0 {
        return Ok(());
    }
    if n == 1 {
        sa[0] = 0;
        return Ok(());
    }

    let n0 = (n + 2) / 3;
    let n1 = (n + 1) / 3;
    let n2 = n / 3;
    let n02 = n0 + n2;

    let mut s12 = vec![0i64; n02 + 3];
    let mut sa12 = vec![0i64; n02 + 3];
    let n0c = n0.max(1);
    let mut s0 = vec![0i64; n0c];
    let mut sa0 = vec![0i64; n0c];

    {
        let mut j = 0usize;
        let mut i = 0usize;
        while i < n + (n0 - n1) {
            if i % 3 != 0 {
                s12[j] = i as i64;
                j += 1;
            }
            i += 1;
        }
    }

    radix_pass(&s12[..n02], &mut sa12[..n02], |x| s[x as usize + 2], n02, k);
    radix_pass(&sa12[..n02], &mut s12[..n02], |x| s[x as usize + 1], n02, k);
    radix_pass(&s12[..n02], &mut sa12[..n02], |x| s[x as usize], n02, k);

    let mut name: i64 = 0;
    let (mut c0, mut c1, mut c2) = (-1i64, -1i64, -1i64);
    for i in 0..n02 {
        let p = sa12[i] as usize;
        if s[p] != c0 || s[p + 1] != c1 || s[p + 2] != c2 {
            name += 1;
            c0 = s[p];
            c1 = s[p + 1];
            c2 = s[p + 2];
        }
        if sa12[i] % 3 == 1 {
            s12[sa12[i] as usize / 3] = name;
        } else {
            s12[sa12[i] as usize / 3 + n0] = name;
        }
    }

    if (name as usize) < n02 {
        let sub_s: Vec<i64> = s12[..n02 + 3].to_vec();
        let mut sub_sa = vec![0i64; n02];
        suffix_array_rec(&sub_s, &mut sub_sa, n02, name as usize, cancel)?;
        for i in 0..n02 {
            s12[sub_sa[i] as usize] = (i + 1) as i64;
        }
        sa12[..n02].copy_from_slice(&sub_sa);
    } else {
        for i in 0..n02 {
            sa12[(s12[i] - 1) as usize] = i as i64;
        }
    }

    {
        let mut j = 0usize;
        for i in 0..n02 {
            if sa12[i] < n0 as i64 {
                s0[j] = 3 * sa12[i];
                j += 1;
            }
        }
    }
    radix_pass(&s0[..n0], &mut sa0[..n0], |x| s[x as usize], n0, k);

    let get_i = |sa12: &[i64], t: usize| -> i64 {
        if sa12[t] < n0 as i64 {
            sa12[t] * 3 + 1
        } else {
            (sa12[t] - n0 as i64) * 3 + 2
        }
    };

    let mut p = 0usize;
    let mut t = n0 - n1;
    let mut kk = 0usize;
    while kk < n {
        if cancel() {
            return Err(ArchiveError::Cancelled);
        }
        let i = get_i(&sa12, t);
        let j = sa0[p];
        let take_12 = if sa12[t] < n0 as i64 {
            leq2(s[i as usize], s12[sa12[t] as usize + n0], s[j as usize], s12[j as usize / 3])
        } else {
            leq3(
                s[i as usize],
                s[i as usize + 1],
                s12[sa12[t] as usize - n0 + 1],
                s[j as usize],
                s[j as usize + 1],
                s12[j as usize / 3 + n0],
            )
        };
        if take_12 {
            sa[kk] = i;
            t += 1;
            kk += 1;
            if t == n02 {
                while p < n0 {
                    sa[kk] = sa0[p];
                    p += 1;
                    kk += 1;
                }
                break;
            }
        } else {
            sa[kk] = j;
            p += 1;
            kk += 1;
            if p == n0 {
                while t < n02 {
                    sa[kk] = get_i(&sa12, t);
                    t += 1;
                    kk += 1;
                }
                break;
            }
        }
    }

    Ok(())
}

/// Builds the suffix array of `text` (no implicit sentinel). Byte values
/// are remapped to `1..=256` so zero is free to act as the DC3 end marker.
pub fn suffix_array(text: &[u8], cancel: &(dyn Fn() -> bool + Sync)) -> Result<Vec<u32>, ArchiveError> {
    let n = text.len();
    let mut s = vec![0i64; n + 3];
    for (i, &b) in text.iter().enumerate() {
        s[i] = b as i64 + 1;
    }
    let mut sa = vec![0i64; n.max(1)];
    suffix_array_rec(&s, &mut sa[..n], n, 257, cancel)?;
    Ok(sa[..n].iter().map(|&x| x as u32).collect())
}

/// Builds the suffix array of `text` with an explicit sentinel appended
/// (value `0`, smaller than any remapped byte `1..=256`), producing an
/// array of length `text.len() + 1`. This is what BWT construction needs:
/// the sentinel's row is a real entry in the returned array.
pub fn suffix_array_with_sentinel(
    text: &[u8],
    cancel: &(dyn Fn() -> bool + Sync),
) -> Result<Vec<u32>, ArchiveError> {
    let n = text.len();
    let total = n + 1;
    let mut s = vec![0i64; total + 3];
    for (i, &b) in text.iter().enumerate() {
        s[i] = b as i64 + 1;
    }
    s[n] = 0;
    let mut sa = vec![0i64; total];
    suffix_array_rec(&s, &mut sa, total, 257, cancel)?;
    Ok(sa.iter().map(|&x| x as u32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_cancel() -> bool {
        false
    }

    fn naive_suffix_array(text: &[u8]) -> Vec<u32> {
        let n = text.len();
        let mut idx: Vec<u32> = (0..n as u32).collect();
        idx.sort_by(|&a, &b| text[a as usize..].cmp(&text[b as usize..]));
        idx
    }

    #[test]
    fn matches_naive_on_banana() {
        let text = b"banana";
        let sa = suffix_array(text, &no_cancel).unwrap();
        assert_eq!(sa, naive_suffix_array(text));
    }

    #[test]
    fn matches_naive_on_repeated_bytes() {
        let text = b"aaaaaaaaaa";
        let sa = suffix_array(text, &no_cancel).unwrap();
        assert_eq!(sa, naive_suffix_array(text));
    }

    #[test]
    fn matches_naive_on_mixed_text() {
        let text = b"the quick brown fox jumps over the lazy dog";
        let sa = suffix_array(text, &no_cancel).unwrap();
        assert_eq!(sa, naive_suffix_array(text));
    }

    #[test]
    fn sentinel_array_places_sentinel_row_first() {
        let text = b"banana";
        let sa = suffix_array_with_sentinel(text, &no_cancel).unwrap();
        assert_eq!(sa.len(), text.len() + 1);
        // The sentinel is the globally smallest symbol, so its suffix
        // (the whole string) sorts first.
        assert_eq!(sa[0], text.len() as u32);
    }

    #[test]
    fn empty_and_single_byte() {
        assert_eq!(suffix_array(b"", &no_cancel).unwrap(), Vec::<u32>::new());
        assert_eq!(suffix_array(b"x", &no_cancel).unwrap(), vec![0]);
    }

    #[test]
    fn cancellation_is_observed() {
        let text = vec![0u8; 10_000];
        let result = suffix_array(&text, &|| true);
        assert!(matches!(result, Err(ArchiveError::Cancelled)));
    }
}
