//! Identity lifecycle through a storage context.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use sage_core::{paths, Identity, StorageContext, StoreError, StoreOptions};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

const BITS: usize = 2048;

fn open(dir: &Path) -> StorageContext {
    StorageContext::open(StoreOptions::new(dir).with_identity_key_bits(BITS)).unwrap()
}

#[test]
fn test_id_is_stable_across_restarts() {
    let dir = tempdir().unwrap();
    let first = open(dir.path()).identity().unwrap().id().to_string();
    let second = open(dir.path()).identity().unwrap().id().to_string();
    assert_eq!(first, second);
}

#[test]
fn test_identity_is_cached_per_context() {
    let dir = tempdir().unwrap();
    let ctx = open(dir.path());
    assert!(Arc::ptr_eq(&ctx.identity().unwrap(), &ctx.identity().unwrap()));
}

#[test]
fn test_legacy_identity_migrates_once() {
    let dir = tempdir().unwrap();
    let legacy = Identity::generate(BITS).unwrap();
    let legacy_path = paths::legacy_identity_path(dir.path());
    fs::write(&legacy_path, legacy.to_pkcs8_der().unwrap().as_slice()).unwrap();

    let ctx = open(dir.path());
    assert_eq!(ctx.identity().unwrap().id(), legacy.id());
    assert!(!legacy_path.exists());
    assert_eq!(open(dir.path()).identity().unwrap().id(), legacy.id());
}

#[test]
fn test_identity_follows_encryption() {
    let dir = tempdir().unwrap();
    let id = {
        let ctx = open(dir.path());
        ctx.encryption_enable(&["p"]).unwrap();
        ctx.identity().unwrap().id().to_string()
    };
    let stored = fs::read(paths::identity_path(dir.path())).unwrap();
    assert_eq!(stored[0], sage_core::frame::FrameTag::EncryptedNoPad as u8);

    let ctx = open(dir.path());
    assert!(matches!(ctx.identity(), Err(StoreError::Locked)));
    ctx.encryption_unlock("p").unwrap();
    assert_eq!(ctx.identity().unwrap().id(), id);
}

#[test]
fn test_sign_seal_and_peer_seal() {
    let dir = tempdir().unwrap();
    let ctx = open(dir.path());
    let identity = ctx.identity().unwrap();

    let signature = identity.sign(b"login challenge");
    Identity::verify(&identity.public_key(), b"login challenge", &signature).unwrap();

    let sealed = identity.seal(b"opaque blob").unwrap();
    assert_eq!(identity.unseal(&sealed).unwrap(), b"opaque blob");

    let to_self = ctx.seal_for(identity.id(), b"from a peer").unwrap();
    assert_eq!(to_self.len() - (BITS / 8), 12 + 16 + 16);
    assert_eq!(identity.unseal(&to_self).unwrap(), b"from a peer");
}

#[test]
fn test_sign_request_header() {
    let dir = tempdir().unwrap();
    let identity = open(dir.path()).identity().unwrap();
    let request = STANDARD_NO_PAD.decode("AAFoZWxsbw").unwrap();
    assert_eq!(&request[..2], &[0x00, 0x01]);
    let signature = identity.sign_request(&request).unwrap();
    Identity::verify(&identity.public_key(), &request, &signature).unwrap();
    assert!(matches!(
        identity.sign_request(b"hello"),
        Err(StoreError::InvalidSignRequest)
    ));
}
