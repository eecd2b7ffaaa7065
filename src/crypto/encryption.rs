//! Stream ciphers protecting MDict index sections.
//!
//! Two schemes are in use:
//! - The key-block-info block is XOR-scrambled with a key derived from the block's
//!   own checksum field, so no secret is needed to read it.
//! - Registered archives additionally encrypt the 40-byte key-block-info summary
//!   with Salsa20/8 under a key obtained from the user's registration code.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::crypto::encryption::{decrypt_block_payload, derive_block_key};
//!
//! let key = derive_block_key(&[0x12, 0x34, 0x56, 0x78]);
//! let mut payload = vec![0u8; 8];
//! decrypt_block_payload(&mut payload, &key);
//! assert_eq!(payload.len(), 8);
//! ```

use std::fs;
use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use super::digest::{ripemd_digest, DIGEST_LEN};
use super::salsa20::Salsa20;
use crate::{MdictError, Result};

/// Salt appended to the frame checksum before hashing, `0x3695` little-endian.
const BLOCK_KEY_SALT: [u8; 4] = [0x95, 0x36, 0x00, 0x00];

/// Seed value of the XOR chain.
const CHAIN_SEED: u8 = 0x36;

#[inline]
fn swap_nibbles(b: u8) -> u8 {
    b.rotate_left(4)
}

/// Derives the XOR key of a framed block from its 4 checksum bytes.
pub fn derive_block_key(checksum: &[u8; 4]) -> [u8; DIGEST_LEN] {
    let mut seed = [0u8; 8];
    seed[0..4].copy_from_slice(checksum);
    seed[4..8].copy_from_slice(&BLOCK_KEY_SALT);
    ripemd_digest(&seed)
}

/// Reverses the nibble-swap XOR scrambling in place.
///
/// Each output byte depends on the previous *ciphertext* byte, so the buffer is
/// walked front to back keeping the last raw byte.
pub fn decrypt_block_payload(data: &mut [u8], key: &[u8]) {
    let key_len = key.len();
    let mut previous = CHAIN_SEED;
    for (i, byte) in data.iter_mut().enumerate() {
        let raw = *byte;
        *byte = swap_nibbles(raw) ^ previous ^ (i as u8) ^ key[i % key_len];
        previous = raw;
    }
}

/// Decrypts `data` with Salsa20/8 under `key` and an all-zero nonce.
pub fn decrypt_salsa20(data: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let mut cipher = Salsa20::new(key, &[0u8; 8])
        .ok_or_else(|| MdictError::decryption_failed(format!("unusable Salsa20 key of {} bytes", key.len())))?;
    let mut output = data.to_vec();
    cipher.apply_keystream(&mut output);
    Ok(output)
}

/// Registration data for archives whose key-block-info summary is encrypted.
///
/// `reg_code` is the hex string distributed with the dictionary (usually the first
/// line of a `.key` file). When `user_id` (the registered e-mail or device id) is
/// given, the code is itself Salsa20-encrypted under RIPEMD-128(`user_id`);
/// otherwise the first 16 decoded bytes are used directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationKey {
    pub reg_code: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl RegistrationKey {
    pub fn new<S: Into<String>>(reg_code: S) -> Self {
        Self { reg_code: reg_code.into(), user_id: None }
    }

    pub fn with_user_id<S: Into<String>>(mut self, user_id: S) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Reads the registration code stored next to an archive.
    ///
    /// A `.key` file holds the hex code on its first line; only the first 32
    /// characters are used. A missing or unreadable file yields `None`.
    pub fn from_key_file<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                debug!("No registration key at {}: {}", path.display(), e);
                return None;
            }
        };
        let code: String = text.lines().next()?.trim().chars().take(DIGEST_LEN * 2).collect();
        if code.is_empty() {
            debug!("Registration key file {} is empty", path.display());
            return None;
        }
        debug!("Using registration key from {}", path.display());
        Some(Self::new(code))
    }

    /// Resolves the 16-byte Salsa20 key.
    pub fn derive_key(&self) -> Result<[u8; DIGEST_LEN]> {
        let code = hex::decode(self.reg_code.trim())?;
        if code.len() < DIGEST_LEN {
            return Err(MdictError::invalid_parameter(format!(
                "registration code must hold at least {} bytes, got {}", DIGEST_LEN, code.len()
            )));
        }
        let key_bytes = match &self.user_id {
            Some(user_id) => decrypt_salsa20(&code, &ripemd_digest(user_id.as_bytes()))?,
            None => code,
        };
        let mut key = [0u8; DIGEST_LEN];
        key.copy_from_slice(&key_bytes[..DIGEST_LEN]);
        Ok(key)
    }
}
