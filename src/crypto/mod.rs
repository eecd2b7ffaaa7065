// Cryptographic primitives used by MDict archives
//
// This module provides the digest and the two stream ciphers the format relies on:
// the nibble-swap XOR scheme protecting key-block-info blocks and Salsa20/8
// protecting the key-block-info summary of registered archives.

pub mod digest;
pub mod encryption;
pub mod salsa20;

pub use digest::ripemd_digest;
pub use encryption::{decrypt_block_payload, derive_block_key, decrypt_salsa20, RegistrationKey};
