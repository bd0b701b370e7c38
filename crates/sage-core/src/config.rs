use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;
use crate::paths;

pub const NO_COMPRESS_ENV: &str = "SAGE_NO_COMPRESS";
pub const DEFAULT_IDENTITY_KEY_BITS: usize = 4096;

/// Storage configuration supplied by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Storage root; records live in `<data_dir>/data`.
    pub data_dir: PathBuf,
    /// Skip both compression attempts when packing.
    #[serde(default)]
    pub no_compress: bool,
    /// RSA modulus size used when a fresh identity has to be generated.
    #[serde(default = "default_identity_key_bits")]
    pub identity_key_bits: usize,
}

impl StoreOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            no_compress: false,
            identity_key_bits: DEFAULT_IDENTITY_KEY_BITS,
        }
    }

    /// Defaults plus `SAGE_DATA_DIR` / `SAGE_NO_COMPRESS` overrides.
    pub fn from_env() -> Result<Self> {
        let mut options = Self::new(paths::default_data_dir()?);
        if let Ok(value) = std::env::var(NO_COMPRESS_ENV) {
            options.no_compress = matches!(value.trim(), "1" | "true" | "TRUE" | "yes");
        }
        Ok(options)
    }

    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.no_compress = !enabled;
        self
    }

    pub fn with_identity_key_bits(mut self, bits: usize) -> Self {
        self.identity_key_bits = bits;
        self
    }
}

fn default_identity_key_bits() -> usize {
    DEFAULT_IDENTITY_KEY_BITS
}
