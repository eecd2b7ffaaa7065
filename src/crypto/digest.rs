//! Hash digest used to derive per-block and registration keys.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::crypto::digest::ripemd_digest;
//!
//! let digest = ripemd_digest(b"");
//! assert_eq!(digest.len(), 16);
//! ```

use ripemd128::{Digest, Ripemd128};

/// Size in bytes of every digest produced by [`ripemd_digest`].
pub const DIGEST_LEN: usize = 16;

/// Computes a RIPEMD-128 hash digest of the input data.
pub fn ripemd_digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    let mut ripemd = Ripemd128::new();
    ripemd.input(data);
    let mut output = [0u8; DIGEST_LEN];
    output.copy_from_slice(ripemd.result().as_slice());
    output
}
