use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::config::StoreOptions;
use crate::crypto::MasterKey;
use crate::durable;
use crate::error::{Result, StoreError};
use crate::frame::{self, Unpacked};
use crate::manifest::EncryptionManifest;
use crate::paths::{self, BACKUP_SUFFIX, IDENTITY_EXTENSION, STAGING_PREFIX, STAGING_SUFFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionStatus {
    pub enabled: bool,
    pub locked: bool,
}

/// Owns the manifest, the unlocked master key and every physical write
/// under the data directory.
pub struct FileManager {
    options: StoreOptions,
    manifest: RwLock<Option<EncryptionManifest>>,
    cipher: RwLock<Option<MasterKey>>,
    write_lock: Mutex<()>,
}

impl FileManager {
    pub fn open(options: StoreOptions) -> Result<Self> {
        let records = paths::records_dir(&options.data_dir);
        fs::create_dir_all(&records)?;
        durable::cleanup_staging(&options.data_dir);
        durable::cleanup_staging(&records);

        let manifest = EncryptionManifest::load(&paths::manifest_path(&options.data_dir))?;
        info!(
            data_dir = %options.data_dir.display(),
            encrypted = manifest.is_some(),
            "file manager opened"
        );
        Ok(Self {
            options,
            manifest: RwLock::new(manifest),
            cipher: RwLock::new(None),
            write_lock: Mutex::new(()),
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn data_dir(&self) -> &Path {
        &self.options.data_dir
    }

    pub fn status(&self) -> EncryptionStatus {
        let enabled = self.manifest.read().is_some();
        EncryptionStatus {
            enabled,
            locked: enabled && self.cipher.read().is_none(),
        }
    }

    pub fn has_manifest(&self) -> bool {
        self.manifest.read().is_some()
    }

    pub fn is_unlocked(&self) -> bool {
        self.cipher.read().is_some()
    }

    // ── Keys ────────────────────────────────────────────────────────────────

    /// Create and persist a fresh manifest, replacing any existing one, and
    /// switch to its master key.
    pub fn create_key<S: AsRef<str>>(&self, passwords: &[S]) -> Result<()> {
        let (manifest, key) = EncryptionManifest::create(passwords)?;
        let _guard = self.write_lock.lock();
        manifest.save(&paths::manifest_path(self.data_dir()))?;
        *self.manifest.write() = Some(manifest);
        *self.cipher.write() = Some(key);
        info!(passwords = passwords.len(), "encryption key created");
        Ok(())
    }

    /// Unlock with `password`. State is untouched on failure.
    pub fn try_unlock(&self, password: &str) -> Result<()> {
        let key = {
            let manifest = self.manifest.read();
            let manifest = manifest.as_ref().ok_or(StoreError::NoManifest)?;
            manifest.unlock(password)
        };
        match key {
            Ok(key) => {
                *self.cipher.write() = Some(key);
                info!("storage unlocked");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "unlock failed");
                Err(e)
            }
        }
    }

    pub fn lock(&self) {
        if self.cipher.write().take().is_some() {
            info!("storage locked");
        }
    }

    /// Delete the manifest and forget the master key.
    pub fn remove_manifest(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        durable::remove(&paths::manifest_path(self.data_dir()))?;
        *self.manifest.write() = None;
        *self.cipher.write() = None;
        info!("encryption manifest removed");
        Ok(())
    }

    // ── Files ───────────────────────────────────────────────────────────────

    /// Read and decode `path`, recovering from `.bkp`/`.tmp` if needed.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(self.read_frame(path)?.data)
    }

    /// Like [`read_file`](Self::read_file) but reports whether a legacy
    /// padded layer was decoded.
    pub fn read_frame(&self, path: &Path) -> Result<Unpacked> {
        let bytes = self.read_raw(path)?;
        let key = self.cipher.read().clone();
        frame::unpack(&bytes, key.as_ref())
    }

    fn read_raw(&self, path: &Path) -> Result<Vec<u8>> {
        if let Ok(bytes) = fs::read(path) {
            if !bytes.is_empty() {
                return Ok(bytes);
            }
        }
        // Recovery renames files, so it runs with writers excluded.
        let _guard = self.write_lock.lock();
        let (bytes, source) = durable::read(path)?;
        debug!(path = %path.display(), ?source, "read");
        Ok(bytes)
    }

    /// Pack `data` and write it through the staging protocol.
    ///
    /// With `ignore_cipher` the record is written unencrypted even when a key
    /// is unlocked. Writing an encrypted corpus while locked is refused.
    pub fn write_file(&self, path: &Path, data: &[u8], ignore_cipher: bool) -> Result<()> {
        let _guard = self.write_lock.lock();
        let key = if ignore_cipher {
            None
        } else {
            let key = self.cipher.read().clone();
            if key.is_none() && self.has_manifest() {
                return Err(StoreError::Locked);
            }
            key
        };
        let packed = frame::pack(data, key.as_ref(), !self.options.no_compress)?;
        durable::write(path, &packed).map_err(|e| not_found(path, e))?;
        debug!(path = %path.display(), bytes = packed.len(), encrypted = key.is_some(), "wrote");
        Ok(())
    }

    /// Remove `path` and its siblings. Returns whether anything existed.
    pub fn remove_file(&self, path: &Path) -> Result<bool> {
        let _guard = self.write_lock.lock();
        durable::remove(path)
    }

    // ── Records ─────────────────────────────────────────────────────────────

    pub fn record_path(&self, key: &str) -> Result<PathBuf> {
        paths::validate_record_key(key)?;
        Ok(paths::record_path(self.data_dir(), key))
    }

    pub fn read_record(&self, key: &str) -> Result<Vec<u8>> {
        self.read_file(&self.record_path(key)?)
    }

    pub fn write_record(&self, key: &str, data: &[u8]) -> Result<()> {
        self.write_file(&self.record_path(key)?, data, false)
    }

    pub fn delete_record(&self, key: &str) -> Result<bool> {
        self.remove_file(&self.record_path(key)?)
    }

    // ── Re-encryption ───────────────────────────────────────────────────────

    /// Every managed file: records under `data/` and `*.id` files at the root.
    ///
    /// Names are reported by their primary path even when only a `.bkp` or
    /// `.tmp` sibling is left on disk.
    pub fn managed_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = BTreeSet::new();
        collect_primaries(&paths::records_dir(self.data_dir()), &mut files, |_| true)?;
        let legacy_identity = paths::legacy_identity_path(self.data_dir());
        collect_primaries(self.data_dir(), &mut files, |p| {
            p != legacy_identity
                && p.extension().and_then(|e| e.to_str()) == Some(IDENTITY_EXTENSION)
        })?;
        Ok(files.into_iter().collect())
    }

    /// Read every managed file and write it back under the current cipher
    /// state. Per-file failures are collected, never short-circuited.
    pub fn reencrypt_all(&self, ignore_cipher: bool) -> Vec<(PathBuf, StoreError)> {
        let files = match self.managed_files() {
            Ok(files) => files,
            Err(e) => return vec![(self.data_dir().to_path_buf(), e)],
        };
        let mut failures = Vec::new();
        for path in files {
            let result = self
                .read_file(&path)
                .and_then(|data| self.write_file(&path, &data, ignore_cipher));
            if let Err(e) = result {
                error!(path = %path.display(), error = %e, "re-encryption failed");
                failures.push((path, e));
            }
        }
        info!(failed = failures.len(), ignore_cipher, "re-encryption pass finished");
        failures
    }
}

fn not_found(path: &Path, e: StoreError) -> StoreError {
    match e {
        StoreError::Io(io) if io.kind() == ErrorKind::NotFound => {
            StoreError::NotFound(path.display().to_string())
        }
        other => other,
    }
}

fn collect_primaries(
    dir: &Path,
    out: &mut BTreeSet<PathBuf>,
    keep: impl Fn(&Path) -> bool,
) -> Result<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGING_PREFIX) {
            continue;
        }
        let primary = name
            .strip_suffix(BACKUP_SUFFIX)
            .or_else(|| name.strip_suffix(STAGING_SUFFIX))
            .unwrap_or(&name);
        let path = dir.join(primary);
        if keep(&path) {
            out.insert(path);
        }
    }
    Ok(())
}
