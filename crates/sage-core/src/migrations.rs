//! Ordered load chains that carry older on-disk layouts forward.
//!
//! A chain tries each step in turn. A step answers `Ok(None)` when it has
//! nothing to offer and the next step is tried; any error stops the chain so
//! that a damaged or locked current record is never masked by an older copy.

use flate2::read::DeflateDecoder;
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::file_manager::FileManager;
use crate::paths;

pub trait MigrationStep {
    fn name(&self) -> &'static str;

    /// Produce the current plaintext, or `None` if this step has none.
    fn load(&self, fm: &FileManager) -> Result<Option<Vec<u8>>>;
}

pub struct MigrationChain {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationChain {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn then(mut self, step: impl MigrationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Steps that a record named `key` goes through on read.
    pub fn record(fm: &FileManager, key: &str) -> Result<Self> {
        let target = fm.record_path(key)?;
        Ok(Self::new()
            .then(ManagedFile::new(&target))
            .then(LegacyFile::deflated(
                paths::legacy_record_path(fm.data_dir(), key),
                target,
            )))
    }

    /// Steps that the identity key goes through on load.
    pub fn identity(fm: &FileManager) -> Self {
        let target = paths::identity_path(fm.data_dir());
        Self::new()
            .then(ManagedFile::new(&target))
            .then(LegacyFile::plain(paths::legacy_identity_path(fm.data_dir()), target))
    }

    pub fn load(&self, fm: &FileManager) -> Result<Option<Vec<u8>>> {
        for step in &self.steps {
            if let Some(data) = step.load(fm)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

impl Default for MigrationChain {
    fn default() -> Self {
        Self::new()
    }
}

/// A file already written through the file manager.
///
/// Frames that still carry the legacy padded encryption layer are rewritten
/// in the current format when a key is unlocked.
pub struct ManagedFile {
    path: PathBuf,
}

impl ManagedFile {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl MigrationStep for ManagedFile {
    fn name(&self) -> &'static str {
        "managed"
    }

    fn load(&self, fm: &FileManager) -> Result<Option<Vec<u8>>> {
        let unpacked = match fm.read_frame(&self.path) {
            Ok(unpacked) => unpacked,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if unpacked.legacy {
            match fm.write_file(&self.path, &unpacked.data, false) {
                Ok(()) => info!(path = %self.path.display(), "upgraded legacy padded frame"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "legacy frame upgrade failed"),
            }
        }
        Ok(Some(unpacked.data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LegacyEncoding {
    /// Raw DEFLATE stream with no frame header.
    Deflate,
    /// Bytes stored as-is.
    Plain,
}

/// An unmanaged file from an older layout, imported into `target`.
///
/// The legacy file is deleted only after the managed write succeeds. If the
/// write fails the data is still returned and the import is retried on the
/// next load.
pub struct LegacyFile {
    path: PathBuf,
    target: PathBuf,
    encoding: LegacyEncoding,
}

impl LegacyFile {
    pub fn deflated(path: PathBuf, target: PathBuf) -> Self {
        Self {
            path,
            target,
            encoding: LegacyEncoding::Deflate,
        }
    }

    pub fn plain(path: PathBuf, target: PathBuf) -> Self {
        Self {
            path,
            target,
            encoding: LegacyEncoding::Plain,
        }
    }

    fn decode(&self, raw: Vec<u8>) -> Result<Vec<u8>> {
        match self.encoding {
            LegacyEncoding::Plain => Ok(raw),
            LegacyEncoding::Deflate => {
                let mut out = Vec::new();
                DeflateDecoder::new(raw.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| StoreError::Corrupt(format!("legacy record: {e}")))?;
                Ok(out)
            }
        }
    }
}

impl MigrationStep for LegacyFile {
    fn name(&self) -> &'static str {
        match self.encoding {
            LegacyEncoding::Deflate => "legacy-deflate",
            LegacyEncoding::Plain => "legacy-plain",
        }
    }

    fn load(&self, fm: &FileManager) -> Result<Option<Vec<u8>>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let data = self.decode(raw)?;
        match fm.write_file(&self.target, &data, false) {
            Ok(()) => {
                if let Err(e) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %e, "could not remove migrated file");
                }
                info!(
                    step = self.name(),
                    from = %self.path.display(),
                    to = %self.target.display(),
                    "migrated legacy file"
                );
            }
            Err(e) => {
                warn!(step = self.name(), path = %self.path.display(), error = %e, "migration write failed");
            }
        }
        Ok(Some(data))
    }
}
