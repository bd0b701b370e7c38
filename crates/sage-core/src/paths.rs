use directories::BaseDirs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

pub const APP_NAME: &str = "sage";
pub const DATA_DIR_ENV: &str = "SAGE_DATA_DIR";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const RECORDS_DIR: &str = "data";
pub const RECORD_EXTENSION: &str = "dat";
pub const IDENTITY_FILE: &str = "sage2.id";
pub const IDENTITY_EXTENSION: &str = "id";
/// Unmanaged PKCS#8 identity written by builds that predate the file manager.
pub const LEGACY_IDENTITY_FILE: &str = "sage.id";

pub const BACKUP_SUFFIX: &str = ".bkp";
pub const STAGING_SUFFIX: &str = ".tmp";
pub const STAGING_PREFIX: &str = ".staging-";

/// Default storage root: `<config dir>/sage`, overridable with `SAGE_DATA_DIR`.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        if !override_path.is_empty() {
            return Ok(PathBuf::from(override_path));
        }
    }
    let dirs = BaseDirs::new().ok_or_else(|| {
        StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "cannot determine config directory",
        ))
    })?;
    Ok(dirs.config_dir().join(APP_NAME))
}

pub fn manifest_path(data_dir: &Path) -> PathBuf {
    data_dir.join(MANIFEST_FILE)
}

pub fn records_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(RECORDS_DIR)
}

pub fn record_path(data_dir: &Path, key: &str) -> PathBuf {
    records_dir(data_dir).join(format!("{key}.{RECORD_EXTENSION}"))
}

/// Location of a record before records moved under `data/`.
pub fn legacy_record_path(data_dir: &Path, key: &str) -> PathBuf {
    data_dir.join(format!("{key}.{RECORD_EXTENSION}"))
}

pub fn identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join(IDENTITY_FILE)
}

pub fn legacy_identity_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LEGACY_IDENTITY_FILE)
}

pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, BACKUP_SUFFIX)
}

pub fn staging_path(path: &Path) -> PathBuf {
    with_suffix(path, STAGING_SUFFIX)
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Reject record keys that would escape the records directory.
pub fn validate_record_key(key: &str) -> Result<()> {
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.contains(&['/', '\\', '\0'][..])
        || key.starts_with(STAGING_PREFIX);
    if invalid {
        return Err(StoreError::InvalidRecordName(key.to_string()));
    }
    Ok(())
}
