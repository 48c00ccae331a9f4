//! Move-to-Front encoding.
//!
//! Maintains the observed alphabet as an ordered list; each input byte is
//! replaced by its current position in that list, then moved to the
//! front. A trailing 32-byte bitmap records which byte values were ever
//! seen (most-significant-bit-first within each byte), letting the
//! decoder rebuild the same starting alphabet order without scanning the
//! ciphertext twice.

use crate::error::ArchiveError;

fn bitmap_set(bitmap: &mut [u8; 32], byte: u8) {
    bitmap[(byte >> 3) as usize] |= 0x80 >> (byte & 7);
}

fn bitmap_get(bitmap: &[u8; 32], byte: u8) -> bool {
    bitmap[(byte >> 3) as usize] & (0x80 >> (byte & 7)) != 0
}

pub fn mtf_forward(data: &[u8]) -> Vec<u8> {
    let mut bitmap = [0u8; 32];
    for &b in data {
        bitmap_set(&mut bitmap, b);
    }

    let mut alphabet: Vec<u8> = (0u16..256).filter(|&b| bitmap_get(&bitmap, b as u8)).map(|b| b as u8).collect();

    let mut out = Vec::with_capacity(data.len() + 32);
    for &b in data {
        let pos = alphabet.iter().position(|&x| x == b).expect("byte present in its own alphabet");
        out.push(pos as u8);
        alphabet.remove(pos);
        alphabet.insert(0, b);
    }
    out.extend_from_slice(&bitmap);
    out
}

pub fn mtf_inverse(encoded: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    if encoded.len() < 32 {
        return Err(ArchiveError::Format("MTF block shorter than the alphabet bitmap".into()));
    }
    let split = encoded.len() - 32;
    let codes = &encoded[..split];
    let bitmap: [u8; 32] = encoded[split..].try_into().unwrap();

    let mut alphabet: Vec<u8> = (0u16..256).filter(|&b| bitmap_get(&bitmap, b as u8)).map(|b| b as u8).collect();

    let mut out = Vec::with_capacity(codes.len());
    for &code in codes {
        let pos = code as usize;
        if pos >= alphabet.len() {
            return Err(ArchiveError::Format("MTF code outside the reconstructed alphabet".into()));
        }
        let b = alphabet.remove(pos);
        out.push(b);
        alphabet.insert(0, b);
    }
    Ok(out)
}
