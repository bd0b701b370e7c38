//! Symmetric primitives shared by the frame codec, the manifest and the
//! hybrid seal.
//!
//! AEAD wire format (record frames and `gcm_seal`):
//!   [ nonce (12 bytes) | ciphertext + tag (16 bytes) ]

use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use crate::error::{Result, StoreError};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const BLOCK_LEN: usize = 16;

/// The 32-byte key that encrypts record contents. Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop, PartialEq, Eq)]
pub struct MasterKey([u8; KEY_LEN]);

impl MasterKey {
    pub fn generate() -> Self {
        Self(random_array())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }

    /// Seal under a fresh random nonce; returns `nonce || ciphertext`.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        seal_with(&self.cipher(), plaintext)
    }

    /// Open `nonce || ciphertext`.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        open_with(&self.cipher(), data)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(..)")
    }
}

/// AES-256-GCM with a caller supplied key; returns `nonce || ciphertext`.
pub fn gcm_seal(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    seal_with(&gcm_cipher(key)?, plaintext)
}

/// Inverse of [`gcm_seal`].
pub fn gcm_open(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    open_with(&gcm_cipher(key)?, data)
}

fn gcm_cipher(key: &[u8]) -> Result<Aes256Gcm> {
    if key.len() != KEY_LEN {
        return Err(StoreError::InvalidKey(format!(
            "key must be {KEY_LEN} bytes, got {}",
            key.len()
        )));
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| StoreError::InvalidKey(e.to_string()))
}

fn seal_with(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<Vec<u8>> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| StoreError::Corrupt("AEAD encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_with(cipher: &Aes256Gcm, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < NONCE_LEN + TAG_LEN {
        return Err(StoreError::DecryptionFailed);
    }
    let (nonce, ciphertext) = data.split_at(NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| StoreError::DecryptionFailed)
}

pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

pub fn random_key() -> Zeroizing<[u8; KEY_LEN]> {
    Zeroizing::new(random_array())
}

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// PKCS#7 pad to `block_size`. Always appends at least one byte.
pub fn pad(data: &[u8], block_size: usize) -> Vec<u8> {
    let padding = block_size - data.len() % block_size;
    let mut out = Vec::with_capacity(data.len() + padding);
    out.extend_from_slice(data);
    out.resize(data.len() + padding, padding as u8);
    out
}

/// Strip PKCS#7 padding; `None` if the trailer is not a valid padding.
pub fn unpad(data: &[u8]) -> Option<&[u8]> {
    let padding = *data.last()? as usize;
    if padding == 0 || padding > data.len() || padding > BLOCK_LEN {
        return None;
    }
    let (body, trailer) = data.split_at(data.len() - padding);
    trailer
        .iter()
        .all(|&b| b as usize == padding)
        .then_some(body)
}
