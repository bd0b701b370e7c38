//! Password key derivation (Argon2id).
//!
//! Parameters are fixed: existing manifests were produced with exactly these
//! values and a change would invalidate every registered password.

use argon2::{Algorithm, Argon2, Params, Version};
use zeroize::ZeroizeOnDrop;

use crate::crypto::{self, KEY_LEN};
use crate::error::{Result, StoreError};

pub const KDF_MEMORY_COST: u32 = 64 * 1024; // 64 MiB
pub const KDF_TIME_COST: u32 = 3;
pub const KDF_PARALLELISM: u32 = 4;
pub const SALT_LEN: usize = 32;

/// Key derived from a password. Wraps the master key; never stored.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey(pub [u8; KEY_LEN]);

impl DerivedKey {
    /// Public fingerprint used to find a manifest entry without trial decryption.
    pub fn fingerprint(&self) -> String {
        hex::encode(crypto::sha256(&self.0))
    }
}

fn argon2_params() -> Params {
    Params::new(
        KDF_MEMORY_COST,
        KDF_TIME_COST,
        KDF_PARALLELISM,
        Some(KEY_LEN),
    )
    .expect("Static Argon2 params are always valid")
}

/// Derive the wrapping key for `password`. Deterministic per (password, salt).
pub fn derive_key(password: &str, salt: &[u8]) -> Result<DerivedKey> {
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params());
    let mut output = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut output)
        .map_err(|e| StoreError::KeyDerivation(e.to_string()))?;
    Ok(DerivedKey(output))
}

pub fn generate_salt() -> [u8; SALT_LEN] {
    crypto::random_array()
}
