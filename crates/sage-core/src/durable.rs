//! Crash-safe single-file writes and recovering reads.
//!
//! Write protocol for a target `P`:
//!  1. bytes go to a uniquely named `.staging-*` file in `P`'s directory,
//!     fsynced, then renamed to `P.tmp` (so `P.tmp` is always complete)
//!  2. `P` → `P.bkp`
//!  3. `P.tmp` → `P`, directory fsynced
//!  4. `P.bkp` removed
//!
//! At every instant one of `P`, `P.bkp`, `P.tmp` holds a complete version.
//! Callers serialise writes to a directory; nothing here takes a lock.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::paths::{backup_path, staging_path, STAGING_PREFIX};

/// Which file a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Primary,
    Backup,
    Staging,
}

/// Write `bytes` to `path` through the staging protocol.
pub fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    stage(path, bytes)?;
    commit(path)
}

/// Step 1 only: leave a complete `path.tmp` without touching `path`.
pub fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    let staged = staging_path(path);
    let mut file = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempfile_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(&staged).map_err(|e| StoreError::Io(e.error))?;
    Ok(staged)
}

/// Steps 2-4: promote an already staged `path.tmp`.
pub fn commit(path: &Path) -> Result<()> {
    let staged = staging_path(path);
    let backup = backup_path(path);
    match fs::rename(path, &backup) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    fs::rename(&staged, path)?;
    fsync_dir(parent_dir(path))?;
    remove_if_exists(&backup)?;
    debug!(path = %path.display(), "committed");
    Ok(())
}

/// Read `path`, falling back to `path.bkp` then `path.tmp`.
///
/// A fallback that is found is renamed back to `path`. Empty files, primary
/// included, are treated as absent.
pub fn read(path: &Path) -> Result<(Vec<u8>, Source)> {
    let primary_err = match fs::read(path) {
        Ok(bytes) if !bytes.is_empty() => return Ok((bytes, Source::Primary)),
        Ok(_) => None,
        Err(e) => Some(e),
    };
    for (candidate, source) in [
        (backup_path(path), Source::Backup),
        (staging_path(path), Source::Staging),
    ] {
        let bytes = match fs::read(&candidate) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => continue,
        };
        warn!(
            path = %path.display(),
            from = %candidate.display(),
            error = %primary_err.as_ref().map_or_else(|| "empty file".to_string(), |e| e.to_string()),
            "primary unreadable, recovering"
        );
        if let Err(e) = fs::rename(&candidate, path) {
            warn!(path = %path.display(), error = %e, "could not promote recovered file");
        }
        return Ok((bytes, source));
    }
    match primary_err {
        None => Err(StoreError::Corrupt(format!("{} is empty", path.display()))),
        Some(e) if e.kind() == ErrorKind::NotFound => {
            Err(StoreError::NotFound(path.display().to_string()))
        }
        Some(e) => Err(e.into()),
    }
}

/// Remove `path` and its siblings. Returns whether anything was removed.
pub fn remove(path: &Path) -> Result<bool> {
    let mut removed = false;
    for p in [path.to_path_buf(), backup_path(path), staging_path(path)] {
        removed |= remove_if_exists(&p)?;
    }
    Ok(removed)
}

/// Remove leftover `.staging-*` files from a previous crash.
pub fn cleanup_staging(dir: &Path) {
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(STAGING_PREFIX) {
                warn!(path = %entry.path().display(), "removing orphaned staging file");
                let _ = fs::remove_file(entry.path());
            }
        }
    }
}

fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

fn fsync_dir(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        let dir = fs::OpenOptions::new().read(true).open(path)?;
        dir.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
