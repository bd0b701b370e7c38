use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage is locked, unlock with a password first")]
    Locked,

    #[error("Invalid password")]
    InvalidPassword,

    #[error("Encryption is not enabled (no manifest)")]
    NoManifest,

    #[error("Unsupported manifest version: {0}")]
    UnsupportedManifestVersion(i32),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Unknown frame header: {0:#04x}")]
    UnknownHeader(u8),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Invalid record name: {0:?}")]
    InvalidRecordName(String),

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid sign request")]
    InvalidSignRequest,

    #[error("Signature verification failed")]
    SignatureVerification,

    #[error("Re-encryption incomplete: {failed} file(s) failed, first error: {first}")]
    ReencryptionIncomplete { failed: usize, first: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("Hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl StoreError {
    /// Collapse a list of per-file failures into a single error.
    pub fn incomplete(errors: &[(std::path::PathBuf, StoreError)]) -> Self {
        let first = errors
            .first()
            .map(|(path, e)| format!("{}: {e}", path.display()))
            .unwrap_or_default();
        StoreError::ReencryptionIncomplete {
            failed: errors.len(),
            first,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
