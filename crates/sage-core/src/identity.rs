//! Long-term RSA identity.
//!
//! The private key is stored PKCS#8 DER as the managed file `sage2.id`, so it
//! is encrypted whenever record encryption is enabled. The public identifier
//! is the unpadded base64 of the PKCS#1 DER public key.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rsa::pkcs1::EncodeRsaPublicKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::info;
use zeroize::Zeroizing;

use crate::error::{Result, StoreError};
use crate::file_manager::FileManager;
use crate::hybrid;
use crate::migrations::MigrationChain;
use crate::paths;

/// Leading bytes every signature request must carry.
pub const SIGN_REQUEST_HEADER: [u8; 2] = [0x00, 0x01];

#[derive(Clone)]
pub struct Identity {
    private: RsaPrivateKey,
    signer: BlindedSigningKey<Sha256>,
    id: String,
}

impl Identity {
    pub fn generate(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| StoreError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private)
    }

    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self> {
        let der = private
            .to_public_key()
            .to_pkcs1_der()
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        let id = STANDARD_NO_PAD.encode(der.as_bytes());
        let signer = BlindedSigningKey::<Sha256>::new(private.clone());
        Ok(Self {
            private,
            signer,
            id,
        })
    }

    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Self::from_private_key(private)
    }

    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Load the stored identity, importing the legacy file if that is all
    /// there is, or generate and persist a new one.
    pub fn load(fm: &FileManager) -> Result<Self> {
        if let Some(der) = MigrationChain::identity(fm).load(fm)? {
            let der = Zeroizing::new(der);
            return Self::from_pkcs8_der(&der);
        }
        let bits = fm.options().identity_key_bits;
        info!(bits, "generating new identity");
        let identity = Self::generate(bits)?;
        identity.save(fm)?;
        Ok(identity)
    }

    pub fn save(&self, fm: &FileManager) -> Result<()> {
        let der = self.to_pkcs8_der()?;
        fm.write_file(&paths::identity_path(fm.data_dir()), &der, false)
    }

    /// Stable public identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> RsaPublicKey {
        self.private.to_public_key()
    }

    /// RSA-PSS / SHA-256 signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signer
            .sign_with_rng(&mut OsRng, message)
            .to_vec()
    }

    /// Sign only messages framed as signature requests.
    pub fn sign_request(&self, message: &[u8]) -> Result<Vec<u8>> {
        if !message.starts_with(&SIGN_REQUEST_HEADER) {
            return Err(StoreError::InvalidSignRequest);
        }
        Ok(self.sign(message))
    }

    pub fn verify(public: &RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<()> {
        let signature =
            Signature::try_from(signature).map_err(|_| StoreError::SignatureVerification)?;
        VerifyingKey::<Sha256>::new(public.clone())
            .verify(message, &signature)
            .map_err(|_| StoreError::SignatureVerification)
    }

    pub fn seal(&self, data: &[u8]) -> Result<Vec<u8>> {
        hybrid::seal(&self.public_key(), data)
    }

    pub fn unseal(&self, data: &[u8]) -> Result<Vec<u8>> {
        hybrid::unseal(&self.private, data)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity").field("id", &self.id).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreOptions;
    use std::fs;
    use tempfile::tempdir;

    const BITS: usize = 2048;

    fn open(dir: &std::path::Path) -> FileManager {
        FileManager::open(StoreOptions::new(dir).with_identity_key_bits(BITS)).unwrap()
    }

    #[test]
    fn sign_and_verify() {
        let identity = Identity::generate(BITS).unwrap();
        let signature = identity.sign(b"message");
        assert_eq!(signature.len(), BITS / 8);
        Identity::verify(&identity.public_key(), b"message", &signature).unwrap();
        assert!(matches!(
            Identity::verify(&identity.public_key(), b"other", &signature),
            Err(StoreError::SignatureVerification)
        ));
    }

    #[test]
    fn clones_and_reloads_sign_for_the_same_key() {
        let identity = Identity::generate(BITS).unwrap();
        let cloned = identity.clone();
        let restored = Identity::from_pkcs8_der(&identity.to_pkcs8_der().unwrap()).unwrap();
        for signer in [&identity, &cloned, &restored] {
            let signature = signer.sign(b"repeat");
            Identity::verify(&identity.public_key(), b"repeat", &signature).unwrap();
        }
        assert_ne!(identity.sign(b"repeat"), identity.sign(b"repeat"));
    }

    #[test]
    fn sign_request_checks_header() {
        let identity = Identity::generate(BITS).unwrap();
        assert!(matches!(identity.sign_request(b"plain"), Err(StoreError::InvalidSignRequest)));
        assert!(matches!(identity.sign_request(&[0x00]), Err(StoreError::InvalidSignRequest)));
        let request = [0x00, 0x01, b'h', b'i'];
        let signature = identity.sign_request(&request).unwrap();
        Identity::verify(&identity.public_key(), &request, &signature).unwrap();
    }

    #[test]
    fn id_is_stable_through_pkcs8() {
        let identity = Identity::generate(BITS).unwrap();
        let restored = Identity::from_pkcs8_der(&identity.to_pkcs8_der().unwrap()).unwrap();
        assert_eq!(identity.id(), restored.id());
        assert!(!identity.id().ends_with('='));
        let der = STANDARD_NO_PAD.decode(identity.id()).unwrap();
        assert_eq!(der, identity.public_key().to_pkcs1_der().unwrap().as_bytes());
    }

    #[test]
    fn seal_roundtrip_through_identity() {
        let identity = Identity::generate(BITS).unwrap();
        let sealed = identity.seal(b"opaque").unwrap();
        assert_eq!(identity.unseal(&sealed).unwrap(), b"opaque");
    }

    #[test]
    fn load_generates_then_reuses() {
        let dir = tempdir().unwrap();
        let fm = open(dir.path());
        let first = Identity::load(&fm).unwrap();
        assert!(paths::identity_path(dir.path()).exists());
        let second = Identity::load(&fm).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn load_imports_legacy_file() {
        let dir = tempdir().unwrap();
        let legacy = Identity::generate(BITS).unwrap();
        fs::write(
            paths::legacy_identity_path(dir.path()),
            legacy.to_pkcs8_der().unwrap().as_slice(),
        )
        .unwrap();

        let fm = open(dir.path());
        let loaded = Identity::load(&fm).unwrap();
        assert_eq!(loaded.id(), legacy.id());
        assert!(!paths::legacy_identity_path(dir.path()).exists());
        assert!(paths::identity_path(dir.path()).exists());
    }

    #[test]
    fn garbage_key_is_rejected() {
        assert!(matches!(
            Identity::from_pkcs8_der(b"not a key"),
            Err(StoreError::InvalidKey(_))
        ));
    }
}
