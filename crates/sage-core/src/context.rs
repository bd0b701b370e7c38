use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io::ErrorKind;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::file_manager::{EncryptionStatus, FileManager};
use crate::hybrid;
use crate::identity::Identity;
use crate::migrations::MigrationChain;
use crate::paths;

/// Handle the host application owns for one storage root.
///
/// Independent contexts over different directories can coexist in one
/// process. A context is `Send + Sync`; share it behind an `Arc`.
///
/// Record, identity and key operations hold `toggle` shared; enabling and
/// disabling encryption hold it exclusively.
pub struct StorageContext {
    fm: FileManager,
    identity: Mutex<Option<Arc<Identity>>>,
    toggle: RwLock<()>,
}

impl StorageContext {
    pub fn open(options: StoreOptions) -> Result<Self> {
        Ok(Self {
            fm: FileManager::open(options)?,
            identity: Mutex::new(None),
            toggle: RwLock::new(()),
        })
    }

    pub fn file_manager(&self) -> &FileManager {
        &self.fm
    }

    // ── Records ─────────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Result<String> {
        let bytes = self.get_bytes(key)?;
        String::from_utf8(bytes)
            .map_err(|_| StoreError::Corrupt(format!("record {key:?} is not valid UTF-8")))
    }

    pub fn get_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let _toggle = self.toggle.read();
        MigrationChain::record(&self.fm, key)?
            .load(&self.fm)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.set_bytes(key, value.as_bytes())
    }

    pub fn set_bytes(&self, key: &str, value: &[u8]) -> Result<()> {
        let _toggle = self.toggle.read();
        self.fm.write_record(key, value)
    }

    /// Remove a record, including any copy left in the pre-`data/` layout.
    pub fn delete(&self, key: &str) -> Result<bool> {
        let _toggle = self.toggle.read();
        let mut removed = self.fm.delete_record(key)?;
        match fs::remove_file(paths::legacy_record_path(self.fm.data_dir(), key)) {
            Ok(()) => removed = true,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(removed)
    }

    // ── Encryption ──────────────────────────────────────────────────────────

    pub fn encryption_status(&self) -> EncryptionStatus {
        self.fm.status()
    }

    pub fn encryption_unlock(&self, password: &str) -> Result<()> {
        let _toggle = self.toggle.read();
        self.fm.try_unlock(password)
    }

    pub fn encryption_lock(&self) {
        let _toggle = self.toggle.read();
        self.fm.lock()
    }

    /// Encrypt everything under a new master key reachable from `passwords`.
    ///
    /// When a manifest already exists it must be unlocked. Records are first
    /// decrypted under the old key; if that pass fails they are encrypted
    /// under the old key again, the old manifest stays in force and nothing
    /// is re-keyed.
    pub fn encryption_enable<S: AsRef<str>>(&self, passwords: &[S]) -> Result<()> {
        let _toggle = self.toggle.write();
        if self.fm.has_manifest() {
            if !self.fm.is_unlocked() {
                return Err(StoreError::Locked);
            }
            let failures = self.fm.reencrypt_all(true);
            if !failures.is_empty() {
                let restored = self.fm.reencrypt_all(false);
                warn!(
                    failed = failures.len(),
                    restore_failed = restored.len(),
                    "rotation aborted, previous key kept"
                );
                return Err(StoreError::incomplete(&failures));
            }
        }
        self.fm.create_key(passwords)?;
        let failures = self.fm.reencrypt_all(false);
        if !failures.is_empty() {
            return Err(StoreError::incomplete(&failures));
        }
        info!("encryption enabled");
        Ok(())
    }

    /// Decrypt everything and drop the manifest.
    ///
    /// The manifest is only removed once every file was rewritten in the
    /// clear; otherwise files are encrypted again and the manifest is kept.
    pub fn encryption_disable(&self) -> Result<()> {
        let _toggle = self.toggle.write();
        if !self.fm.has_manifest() {
            return Ok(());
        }
        if !self.fm.is_unlocked() {
            return Err(StoreError::Locked);
        }
        let failures = self.fm.reencrypt_all(true);
        if !failures.is_empty() {
            let restored = self.fm.reencrypt_all(false);
            warn!(
                failed = failures.len(),
                restore_failed = restored.len(),
                "manifest kept, decryption incomplete"
            );
            return Err(StoreError::incomplete(&failures));
        }
        self.fm.remove_manifest()?;
        info!("encryption disabled");
        Ok(())
    }

    // ── Identity ────────────────────────────────────────────────────────────

    /// The identity for this storage root, loaded once and then cached.
    pub fn identity(&self) -> Result<Arc<Identity>> {
        let _toggle = self.toggle.read();
        let mut cached = self.identity.lock();
        if let Some(identity) = cached.as_ref() {
            return Ok(Arc::clone(identity));
        }
        let identity = Arc::new(Identity::load(&self.fm)?);
        info!(id = %identity.id(), "identity loaded");
        *cached = Some(Arc::clone(&identity));
        Ok(identity)
    }

    /// Persist `identity` and make it the cached one.
    pub fn replace_identity(&self, identity: Identity) -> Result<Arc<Identity>> {
        let _toggle = self.toggle.read();
        let mut cached = self.identity.lock();
        identity.save(&self.fm)?;
        let identity = Arc::new(identity);
        *cached = Some(Arc::clone(&identity));
        info!(id = %identity.id(), "identity replaced");
        Ok(identity)
    }

    /// Hybrid-seal `data` to a peer's base64 PKCS#1 public key.
    pub fn seal_for(&self, public_key_b64: &str, data: &[u8]) -> Result<Vec<u8>> {
        hybrid::seal_for(public_key_b64, data)
    }
}
