//! RSA-OAEP + AES-GCM sealing.
//!
//! Layout: `[ OAEP(key) (modulus bytes) | nonce (12) | GCM(PKCS#7(plaintext)) ]`.
//! The inner padding is redundant under GCM but is what existing peers
//! produce and expect.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::crypto::{self, BLOCK_LEN, KEY_LEN};
use crate::error::{Result, StoreError};

pub fn seal(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let key = crypto::random_key();
    let sealed = crypto::gcm_seal(&key[..], &crypto::pad(plaintext, BLOCK_LEN))?;
    let wrapped = public
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), &key[..])
        .map_err(|e| StoreError::InvalidKey(e.to_string()))?;

    let mut out = Vec::with_capacity(wrapped.len() + sealed.len());
    out.extend_from_slice(&wrapped);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Inverse of [`seal`]. Every failure is reported as `DecryptionFailed`.
pub fn unseal(private: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>> {
    let wrapped_len = private.size();
    if data.len() < wrapped_len {
        return Err(StoreError::DecryptionFailed);
    }
    let (wrapped, sealed) = data.split_at(wrapped_len);
    let key = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped)
            .map_err(|_| StoreError::DecryptionFailed)?,
    );
    if key.len() != KEY_LEN {
        return Err(StoreError::DecryptionFailed);
    }
    let padded = crypto::gcm_open(&key, sealed).map_err(|_| StoreError::DecryptionFailed)?;
    crypto::unpad(&padded)
        .map(<[u8]>::to_vec)
        .ok_or(StoreError::DecryptionFailed)
}

/// Seal to a peer given its base64 (unpadded) PKCS#1 DER public key.
pub fn seal_for(public_key_b64: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
    let der = STANDARD_NO_PAD.decode(public_key_b64.trim())?;
    let public =
        RsaPublicKey::from_pkcs1_der(&der).map_err(|e| StoreError::InvalidKey(e.to_string()))?;
    seal(&public, plaintext)
}
