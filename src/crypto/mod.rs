//! AES-128-CTR encryption and PBKDF2-HMAC-SHA256 key derivation.
//!
//! This is the external encryption interface bit 6 of a file's flags points
//! at (§6): the core pipeline never calls into this module on its own, it
//! only reserves the flag bit and the 88-byte metadata prefix layout. A
//! caller that wants encrypted blocks derives a key here, encrypts the
//! already-encoded block stream, and prepends the metadata this module
//! produces; the reverse on read.
//!
//! Metadata prefix layout (88 bytes, all integers little-endian):
//! ```text
//! offset 0:   magic       4 bytes  = b"TKKX"
//! offset 4:   iterations  4 bytes  PBKDF2 round count
//! offset 8:   salt        16 bytes
//! offset 24:  iv          16 bytes CTR initial counter block
//! offset 40:  reserved    48 bytes (zero)
//! ```

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use thiserror::Error;
use aes::Aes128;
use aes::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

pub const METADATA_LEN: usize = 88;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 16;
const MAGIC: &[u8; 4] = b"TKKX";
const DEFAULT_ITERATIONS: u32 = 210_000;

type Aes128Ctr = Ctr128BE<Aes128>;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("encryption metadata is shorter than {METADATA_LEN} bytes")]
    TruncatedMetadata,
    #[error("encryption metadata magic does not match")]
    BadMagic,
}

/// A 16-byte key that overwrites its bytes with zero when dropped.
pub struct Key(pub [u8; 16]);

impl Drop for Key {
    fn drop(&mut self) {
        for b in self.0.iter_mut() {
            *b = 0;
        }
    }
}

/// Derive a 128-bit key from `password` and `salt` via PBKDF2-HMAC-SHA256.
pub fn derive_key(password: &str, salt: &[u8; SALT_LEN], iterations: u32) -> Key {
    let mut key = [0u8; 16];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut key);
    Key(key)
}

/// Build the 88-byte metadata prefix for a freshly derived salt/iv pair.
pub fn build_metadata(salt: &[u8; SALT_LEN], iv: &[u8; IV_LEN], iterations: u32) -> [u8; METADATA_LEN] {
    let mut out = [0u8; METADATA_LEN];
    out[0..4].copy_from_slice(MAGIC);
    out[4..8].copy_from_slice(&iterations.to_le_bytes());
    out[8..24].copy_from_slice(salt);
    out[24..40].copy_from_slice(iv);
    out
}

pub fn parse_metadata(data: &[u8]) -> Result<([u8; SALT_LEN], [u8; IV_LEN], u32), CryptoError> {
    if data.len() < METADATA_LEN {
        return Err(CryptoError::TruncatedMetadata);
    }
    if &data[0..4] != MAGIC {
        return Err(CryptoError::BadMagic);
    }
    let iterations = u32::from_le_bytes(data[4..8].try_into().unwrap());
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&data[8..24]);
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&data[24..40]);
    Ok((salt, iv, iterations))
}

/// Encrypt `block_stream` in place under AES-128-CTR, returning the 88-byte
/// metadata prefix followed by the ciphertext.
pub fn encrypt(password: &str, salt: [u8; SALT_LEN], iv: [u8; IV_LEN], block_stream: &[u8]) -> Vec<u8> {
    let key = derive_key(password, &salt, DEFAULT_ITERATIONS);
    let mut cipher = Aes128Ctr::new(&key.0.into(), &iv.into());
    let mut ciphertext = block_stream.to_vec();
    cipher.apply_keystream(&mut ciphertext);

    let metadata = build_metadata(&salt, &iv, DEFAULT_ITERATIONS);
    let mut out = Vec::with_capacity(METADATA_LEN + ciphertext.len());
    out.extend_from_slice(&metadata);
    out.extend_from_slice(&ciphertext);
    out
}

/// Decrypt a payload produced by [`encrypt`].
pub fn decrypt(password: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let (salt, iv, iterations) = parse_metadata(data)?;
    let key = derive_key(password, &salt, iterations);
    let mut cipher = Aes128Ctr::new(&key.0.into(), &iv.into());
    let mut plaintext = data[METADATA_LEN..].to_vec();
    cipher.apply_keystream(&mut plaintext);
    Ok(plaintext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_encrypt_decrypt() {
        let salt = [7u8; SALT_LEN];
        let iv = [9u8; IV_LEN];
        let plaintext = b"block stream payload, already BWT/AC encoded upstream";
        let encrypted = encrypt("hunter2", salt, iv, plaintext);
        let decrypted = decrypt("hunter2", &encrypted).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_password_does_not_recover_plaintext() {
        let salt = [3u8; SALT_LEN];
        let iv = [5u8; IV_LEN];
        let plaintext = b"secret block bytes";
        let encrypted = encrypt("correct horse", salt, iv, plaintext);
        let decrypted = decrypt("wrong password", &encrypted).unwrap();
        assert_ne!(decrypted, plaintext);
    }

    #[test]
    fn truncated_metadata_is_rejected() {
        let err = decrypt("x", &[0u8; 10]).unwrap_err();
        assert!(matches!(err, CryptoError::TruncatedMetadata));
    }
}
