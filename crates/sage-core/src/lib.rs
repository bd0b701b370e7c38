//! sage-core: encrypted, compressed, crash-safe local record storage
//!
//! # Design principles
//! - One master key encrypts every record; each password only wraps it.
//! - Every write goes through a staging file so a crash never loses the
//!   last committed version.
//! - No global state: the host owns a [`StorageContext`] per storage root.
//!
//! # Module layout
//! - `context`       `StorageContext`, the surface the host application calls
//! - `file_manager`  manifest + unlocked key + serialised writes, re-encryption
//! - `frame`         tagged record framing (raw / deflate / AES-GCM)
//! - `manifest`      multi-password master-key manifest
//! - `kdf`           Argon2id password derivation
//! - `crypto`        AES-256-GCM helpers, PKCS#7 padding, randomness
//! - `durable`       staging / backup write protocol and recovering reads
//! - `migrations`    ordered load chains for older on-disk layouts
//! - `identity`      RSA identity: signing, id, self-sealing
//! - `hybrid`        RSA-OAEP + AES-GCM seal/unseal
//! - `config`        `StoreOptions`
//! - `paths`         on-disk layout
//! - `error`         unified error type

pub mod config;
pub mod context;
pub mod crypto;
pub mod durable;
pub mod error;
pub mod file_manager;
pub mod frame;
pub mod hybrid;
pub mod identity;
pub mod kdf;
pub mod manifest;
pub mod migrations;
pub mod paths;

pub use config::StoreOptions;
pub use context::StorageContext;
pub use error::{Result, StoreError};
pub use file_manager::{EncryptionStatus, FileManager};
pub use identity::Identity;
