//! Record framing.
//!
//! Byte 0 of every frame selects how the rest is decoded:
//!
//! | tag    | kind             | payload                                   |
//! |--------|------------------|-------------------------------------------|
//! | `0x00` | `Raw`            | plaintext                                 |
//! | `0x01` | `Encrypted`      | nonce ‖ AES-GCM(PKCS#7(inner frame)), legacy |
//! | `0x02` | `Compressed`     | DEFLATE(inner frame)                      |
//! | `0x03` | `EncryptedNoPad` | nonce ‖ AES-GCM(inner frame)              |
//!
//! [`unpack`] unwinds tags until it reaches `Raw`, so compression and
//! encryption compose in any order. [`pack`] always produces
//! `Raw` → maybe `Compressed` → maybe `EncryptedNoPad` → maybe `Compressed`.

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::crypto::{self, MasterKey};
use crate::error::{Result, StoreError};

/// Nesting beyond this is never produced by [`pack`].
const MAX_DEPTH: usize = 8;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    Raw = 0x00,
    Encrypted = 0x01,
    Compressed = 0x02,
    EncryptedNoPad = 0x03,
}

impl TryFrom<u8> for FrameTag {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(FrameTag::Raw),
            0x01 => Ok(FrameTag::Encrypted),
            0x02 => Ok(FrameTag::Compressed),
            0x03 => Ok(FrameTag::EncryptedNoPad),
            other => Err(StoreError::UnknownHeader(other)),
        }
    }
}

/// Result of [`unpack`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unpacked {
    pub data: Vec<u8>,
    /// A legacy padded `Encrypted` layer was decoded on the way.
    pub legacy: bool,
}

/// Frame `data`; encrypt when `key` is given.
pub fn pack(data: &[u8], key: Option<&MasterKey>, compress: bool) -> Result<Vec<u8>> {
    let mut framed = Vec::with_capacity(data.len() + 1);
    framed.push(FrameTag::Raw as u8);
    framed.extend_from_slice(data);

    let mut framed = maybe_compress(framed, compress)?;
    if let Some(key) = key {
        let sealed = key.seal(&framed)?;
        framed = Vec::with_capacity(sealed.len() + 1);
        framed.push(FrameTag::EncryptedNoPad as u8);
        framed.extend_from_slice(&sealed);
    }
    maybe_compress(framed, compress)
}

/// Decode a frame back to plaintext.
pub fn unpack(data: &[u8], key: Option<&MasterKey>) -> Result<Unpacked> {
    let mut legacy = false;
    let data = unpack_layer(data, key, 0, &mut legacy)?;
    Ok(Unpacked { data, legacy })
}

fn unpack_layer(
    data: &[u8],
    key: Option<&MasterKey>,
    depth: usize,
    legacy: &mut bool,
) -> Result<Vec<u8>> {
    if depth > MAX_DEPTH {
        return Err(StoreError::Corrupt("frame nesting too deep".into()));
    }
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| StoreError::Corrupt("empty frame".into()))?;
    match FrameTag::try_from(tag)? {
        FrameTag::Raw => Ok(payload.to_vec()),
        FrameTag::Compressed => {
            let inner = inflate(payload)?;
            unpack_layer(&inner, key, depth + 1, legacy)
        }
        FrameTag::EncryptedNoPad => {
            let key = key.ok_or(StoreError::Locked)?;
            let inner = key.open(payload)?;
            unpack_layer(&inner, Some(key), depth + 1, legacy)
        }
        FrameTag::Encrypted => {
            let key = key.ok_or(StoreError::Locked)?;
            let padded = key.open(payload)?;
            let inner = crypto::unpad(&padded)
                .ok_or_else(|| StoreError::Corrupt("invalid legacy padding".into()))?;
            *legacy = true;
            unpack_layer(inner, Some(key), depth + 1, legacy)
        }
    }
}

/// Keep the compressed form only if it is strictly smaller.
fn maybe_compress(framed: Vec<u8>, compress: bool) -> Result<Vec<u8>> {
    if !compress {
        return Ok(framed);
    }
    let mut encoder = DeflateEncoder::new(vec![FrameTag::Compressed as u8], Compression::best());
    encoder.write_all(&framed)?;
    let compressed = encoder.finish()?;
    if compressed.len() < framed.len() {
        Ok(compressed)
    } else {
        Ok(framed)
    }
}

fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(payload)
        .read_to_end(&mut out)
        .map_err(|e| StoreError::Corrupt(format!("inflate failed: {e}")))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn deflate_layer(frame: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(vec![FrameTag::Compressed as u8], Compression::fast());
        encoder.write_all(frame).unwrap();
        encoder.finish().unwrap()
    }

    fn legacy_frame(key: &MasterKey, inner: &[u8]) -> Vec<u8> {
        let mut out = vec![FrameTag::Encrypted as u8];
        out.extend_from_slice(&key.seal(&crypto::pad(inner, crypto::BLOCK_LEN)).unwrap());
        out
    }

    #[test]
    fn small_plaintext_stays_raw() {
        let packed = pack(b"hi", None, true).unwrap();
        assert_eq!(packed, vec![0x00, b'h', b'i']);
    }

    #[test]
    fn repetitive_plaintext_is_compressed() {
        let data = vec![b'a'; 4096];
        let packed = pack(&data, None, true).unwrap();
        assert_eq!(packed[0], FrameTag::Compressed as u8);
        assert!(packed.len() < 100);
        assert_eq!(unpack(&packed, None).unwrap().data, data);
    }

    #[test]
    fn compression_can_be_disabled() {
        let data = vec![b'a'; 4096];
        let packed = pack(&data, None, false).unwrap();
        assert_eq!(packed[0], FrameTag::Raw as u8);
        assert_eq!(packed.len(), 4097);
    }

    #[test]
    fn encrypted_frames_use_no_pad_tag() {
        let key = MasterKey::generate();
        let packed = pack(b"secret", Some(&key), true).unwrap();
        assert_eq!(packed[0], FrameTag::EncryptedNoPad as u8);
        assert!(!packed.windows(6).any(|w| w == b"secret"));
        let unpacked = unpack(&packed, Some(&key)).unwrap();
        assert_eq!(unpacked.data, b"secret");
        assert!(!unpacked.legacy);
    }

    #[test]
    fn encrypted_frame_without_key_is_locked() {
        let key = MasterKey::generate();
        let packed = pack(b"secret", Some(&key), false).unwrap();
        assert!(matches!(unpack(&packed, None), Err(StoreError::Locked)));
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let packed = pack(b"secret", Some(&MasterKey::generate()), false).unwrap();
        assert!(matches!(
            unpack(&packed, Some(&MasterKey::generate())),
            Err(StoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn legacy_padded_frames_still_decode() {
        let key = MasterKey::generate();
        let frame = legacy_frame(&key, &[0x00, b'o', b'l', b'd']);
        let unpacked = unpack(&frame, Some(&key)).unwrap();
        assert_eq!(unpacked.data, b"old");
        assert!(unpacked.legacy);
    }

    #[test]
    fn legacy_frame_inside_compression_is_flagged() {
        let key = MasterKey::generate();
        let outer = deflate_layer(&legacy_frame(&key, &[0x00; 64]));
        assert_eq!(outer[0], FrameTag::Compressed as u8);
        let unpacked = unpack(&outer, Some(&key)).unwrap();
        assert!(unpacked.legacy);
        assert_eq!(unpacked.data, vec![0u8; 63]);
    }

    #[test]
    fn malformed_frames() {
        assert!(matches!(unpack(&[], None), Err(StoreError::Corrupt(_))));
        assert!(matches!(unpack(&[0x7f, 1], None), Err(StoreError::UnknownHeader(0x7f))));
        assert!(matches!(unpack(&[0x02, 0xff, 0xff], None), Err(StoreError::Corrupt(_))));
        let key = MasterKey::generate();
        assert!(matches!(
            unpack(&[0x03, 1, 2, 3], Some(&key)),
            Err(StoreError::DecryptionFailed)
        ));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let mut frame = vec![FrameTag::Raw as u8];
        for _ in 0..=MAX_DEPTH {
            frame = deflate_layer(&frame);
        }
        assert!(matches!(unpack(&frame, None), Err(StoreError::Corrupt(_))));
    }

    proptest! {
        #[test]
        fn pack_unpack_roundtrip(
            data in proptest::collection::vec(any::<u8>(), 0..2048),
            encrypt in any::<bool>(),
            compress in any::<bool>(),
        ) {
            let key = MasterKey::generate();
            let key = encrypt.then_some(&key);
            let packed = pack(&data, key, compress).unwrap();
            prop_assert_eq!(unpack(&packed, key).unwrap().data, data);
        }
    }
}
