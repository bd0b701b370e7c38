//! Encryption manifest: per-password wrapped copies of one master key.
//!
//! On-disk form (plaintext JSON, never encrypted):
//!   `{"version":1,"salt":"<hex>","keys":[{"hash":"<hex>","secret":"<hex>"}]}`
//!
//! `hash` is SHA-256 of the password-derived key. `secret` is the master key
//! encrypted as two independent AES-256 blocks under the derived key. The wrap
//! carries no authentication of its own; the layout is kept as-is so that
//! existing manifests stay readable.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::crypto::{MasterKey, BLOCK_LEN, KEY_LEN};
use crate::durable;
use crate::error::{Result, StoreError};
use crate::kdf::{self, DerivedKey};

pub const MANIFEST_VERSION: i32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub hash: String,
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionManifest {
    pub version: i32,
    pub salt: String,
    pub keys: Vec<KeyEntry>,
}

impl EncryptionManifest {
    /// Fresh salt and master key, one entry per password.
    pub fn create<S: AsRef<str>>(passwords: &[S]) -> Result<(Self, MasterKey)> {
        if passwords.is_empty() {
            return Err(StoreError::InvalidKey(
                "at least one password is required".into(),
            ));
        }
        let salt = kdf::generate_salt();
        let master = MasterKey::generate();
        let keys = passwords
            .iter()
            .map(|password| {
                let derived = kdf::derive_key(password.as_ref(), &salt)?;
                Ok(KeyEntry {
                    hash: derived.fingerprint(),
                    secret: hex::encode(wrap_master(&derived, &master)),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let manifest = Self {
            version: MANIFEST_VERSION,
            salt: hex::encode(salt),
            keys,
        };
        Ok((manifest, master))
    }

    /// Recover the master key with `password`.
    pub fn unlock(&self, password: &str) -> Result<MasterKey> {
        let salt = hex::decode(&self.salt)?;
        let derived = kdf::derive_key(password, &salt)?;
        let fingerprint = derived.fingerprint();
        // Fingerprints are public; a plain comparison is fine.
        let entry = self
            .keys
            .iter()
            .find(|entry| entry.hash == fingerprint)
            .ok_or(StoreError::InvalidPassword)?;
        let secret = hex::decode(&entry.secret)?;
        let secret: [u8; KEY_LEN] = secret
            .try_into()
            .map_err(|_| StoreError::Corrupt("wrapped master key has wrong length".into()))?;
        Ok(unwrap_master(&derived, &secret))
    }

    /// Load the manifest at `path`; `Ok(None)` when none exists.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match durable::read(path) {
            Ok((bytes, _)) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let manifest: Self = serde_json::from_slice(&bytes)?;
        if manifest.version != MANIFEST_VERSION {
            warn!(version = manifest.version, "unsupported manifest version");
            return Err(StoreError::UnsupportedManifestVersion(manifest.version));
        }
        info!(path = %path.display(), keys = manifest.keys.len(), "loaded encryption manifest");
        Ok(Some(manifest))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        durable::write(path, &json)?;
        debug!(path = %path.display(), "saved encryption manifest");
        Ok(())
    }
}

fn block_cipher(key: &DerivedKey) -> Aes256 {
    Aes256::new(GenericArray::from_slice(&key.0))
}

fn wrap_master(key: &DerivedKey, master: &MasterKey) -> [u8; KEY_LEN] {
    let cipher = block_cipher(key);
    let mut out = *master.as_bytes();
    for chunk in out.chunks_exact_mut(BLOCK_LEN) {
        cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
    }
    out
}

fn unwrap_master(key: &DerivedKey, wrapped: &[u8; KEY_LEN]) -> MasterKey {
    let cipher = block_cipher(key);
    let mut out = *wrapped;
    for chunk in out.chunks_exact_mut(BLOCK_LEN) {
        cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
    }
    MasterKey::from_bytes(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn every_password_unwraps_the_same_master() {
        let (manifest, master) = EncryptionManifest::create(&["a", "b"]).unwrap();
        assert_eq!(manifest.keys.len(), 2);
        assert_ne!(manifest.keys[0].hash, manifest.keys[1].hash);
        assert_eq!(manifest.unlock("a").unwrap(), master);
        assert_eq!(manifest.unlock("b").unwrap(), master);
    }

    #[test]
    fn wrong_password_is_rejected() {
        let (manifest, _) = EncryptionManifest::create(&["right"]).unwrap();
        assert!(matches!(
            manifest.unlock("wrong"),
            Err(StoreError::InvalidPassword)
        ));
    }

    #[test]
    fn wrap_is_two_independent_blocks() {
        let key = DerivedKey([3u8; KEY_LEN]);
        let master = MasterKey::from_bytes([9u8; KEY_LEN]);
        let wrapped = wrap_master(&key, &master);
        // identical plaintext halves give identical ciphertext halves
        assert_eq!(wrapped[..BLOCK_LEN], wrapped[BLOCK_LEN..]);
        assert_eq!(unwrap_master(&key, &wrapped), master);
    }

    #[test]
    fn json_layout_and_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let (manifest, _) = EncryptionManifest::create(&["pw"]).unwrap();
        manifest.save(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["version"], 1);
        assert_eq!(value["salt"].as_str().unwrap().len(), 64);
        assert_eq!(value["keys"][0]["secret"].as_str().unwrap().len(), 64);
        assert_eq!(value["keys"][0]["hash"].as_str().unwrap().len(), 64);

        assert_eq!(EncryptionManifest::load(&path).unwrap(), Some(manifest));
    }

    #[test]
    fn missing_manifest_loads_as_none() {
        let dir = tempdir().unwrap();
        assert_eq!(
            EncryptionManifest::load(&dir.path().join("manifest.json")).unwrap(),
            None
        );
    }

    #[test]
    fn unknown_version_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, br#"{"version":2,"salt":"00","keys":[]}"#).unwrap();
        assert!(matches!(
            EncryptionManifest::load(&path),
            Err(StoreError::UnsupportedManifestVersion(2))
        ));
    }

    #[test]
    fn empty_password_list_is_refused() {
        let none: [&str; 0] = [];
        assert!(EncryptionManifest::create(&none).is_err());
    }
}
