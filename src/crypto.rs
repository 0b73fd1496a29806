//! Tuya discovery key and AES-128-ECB payload crypto (spec §4.B).
//!
//! Only ECB is implemented: protocol 3.4's HMAC/GCM envelope is out of
//! scope (spec §1 non-goals). PKCS#7 padding is applied on encrypt and
//! stripped on decrypt, with a NUL appended after stripping so the result
//! can be handed straight to a JSON parser expecting a C string (spec §4.B).

use aes::Aes128;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit};
use ecb::{Decryptor, Encryptor};
use md5::{Digest, Md5};
use std::sync::OnceLock;

/// The ASCII literal Tuya broadcasts are keyed with on UDP port 6667.
const DISCOVERY_PASSWORD: &[u8] = b"yGAdlopoPVldABfn";

static DISCOVERY_KEY: OnceLock<[u8; 16]> = OnceLock::new();

/// MD5 digest of the discovery password, computed once and cached for the
/// life of the process (spec §4.B).
pub fn discovery_key() -> &'static [u8; 16] {
    DISCOVERY_KEY.get_or_init(|| {
        let mut hasher = Md5::new();
        hasher.update(DISCOVERY_PASSWORD);
        let digest = hasher.finalize();
        let mut key = [0u8; 16];
        key.copy_from_slice(&digest);
        key
    })
}

/// Encrypt `data` with AES-128-ECB under `key`, applying PKCS#7 padding.
pub fn encrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    let mut encryptor = Encryptor::<Aes128>::new(key.into());

    let pad_len = 16 - (data.len() % 16);
    let mut buf = data.to_vec();
    buf.resize(data.len() + pad_len, pad_len as u8);

    for chunk in buf.chunks_mut(16) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        encryptor.encrypt_block_mut(block);
    }
    buf
}

/// Decrypt `data` with AES-128-ECB under `key`, strip PKCS#7 padding, and
/// append a trailing NUL for convenient downstream JSON parsing (spec
/// §4.B). Returns an empty vector if `data` is not a multiple of the block
/// size — initialization/finalization failures are non-fatal; the caller
/// discards the message (spec §4.B).
pub fn decrypt(key: &[u8; 16], data: &[u8]) -> Vec<u8> {
    if data.is_empty() || !data.len().is_multiple_of(16) {
        return Vec::new();
    }

    let mut decryptor = Decryptor::<Aes128>::new(key.into());
    let mut buf = data.to_vec();
    for chunk in buf.chunks_mut(16) {
        let block = cipher::generic_array::GenericArray::from_mut_slice(chunk);
        decryptor.decrypt_block_mut(block);
    }

    // Mirrors the original decoder (housetuya_decrypt): only trim the
    // trailer when it looks like plausible PKCS#7 padding, else treat the
    // block as unpadded rather than failing outright. The original's bound
    // is strictly less than 16 — a full padding block is deliberately left
    // untrimmed, not stripped.
    let pad_len = *buf.last().unwrap_or(&0) as usize;
    if pad_len > 0 && pad_len < 16 && pad_len <= buf.len() {
        buf.truncate(buf.len() - pad_len);
    }
    buf.push(0);
    buf
}
