//! Salsa20/8 stream cipher.
//!
//! Registered MDict archives encrypt the key-block-info summary with Salsa20 reduced
//! to 8 rounds, a 128-bit key and an all-zero nonce. Keys of 32 bytes are accepted
//! as well. Encryption and decryption are the same keystream XOR.

const TAU: &[u8; 16] = b"expand 16-byte k";
const SIGMA: &[u8; 16] = b"expand 32-byte k";
const DOUBLE_ROUNDS: usize = 4;
const BLOCK_LEN: usize = 64;

#[inline]
fn le_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline]
fn quarter_round(x: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
    x[b] ^= x[a].wrapping_add(x[d]).rotate_left(7);
    x[c] ^= x[b].wrapping_add(x[a]).rotate_left(9);
    x[d] ^= x[c].wrapping_add(x[b]).rotate_left(13);
    x[a] ^= x[d].wrapping_add(x[c]).rotate_left(18);
}

/// Keystream generator state.
#[derive(Clone)]
pub struct Salsa20 {
    state: [u32; 16],
    keystream: [u8; BLOCK_LEN],
    used: usize,
}

impl Salsa20 {
    /// Sets up the cipher. `key` must be 16 or 32 bytes and `nonce` at least 8 bytes;
    /// other key sizes are rejected with `None`.
    pub fn new(key: &[u8], nonce: &[u8]) -> Option<Self> {
        let (constants, tail) = match key.len() {
            16 => (TAU, &key[0..16]),
            32 => (SIGMA, &key[16..32]),
            _ => return None,
        };
        if nonce.len() < 8 {
            return None;
        }
        let mut state = [0u32; 16];
        state[0] = le_word(&constants[0..4]);
        state[5] = le_word(&constants[4..8]);
        state[10] = le_word(&constants[8..12]);
        state[15] = le_word(&constants[12..16]);
        for i in 0..4 {
            state[1 + i] = le_word(&key[i * 4..i * 4 + 4]);
            state[11 + i] = le_word(&tail[i * 4..i * 4 + 4]);
        }
        state[6] = le_word(&nonce[0..4]);
        state[7] = le_word(&nonce[4..8]);
        Some(Self { state, keystream: [0; BLOCK_LEN], used: BLOCK_LEN })
    }

    fn refill(&mut self) {
        let mut x = self.state;
        for _ in 0..DOUBLE_ROUNDS {
            // column round
            quarter_round(&mut x, 0, 4, 8, 12);
            quarter_round(&mut x, 5, 9, 13, 1);
            quarter_round(&mut x, 10, 14, 2, 6);
            quarter_round(&mut x, 15, 3, 7, 11);
            // row round
            quarter_round(&mut x, 0, 1, 2, 3);
            quarter_round(&mut x, 5, 6, 7, 4);
            quarter_round(&mut x, 10, 11, 8, 9);
            quarter_round(&mut x, 15, 12, 13, 14);
        }
        for (i, word) in x.iter().enumerate() {
            let out = word.wrapping_add(self.state[i]);
            self.keystream[i * 4..i * 4 + 4].copy_from_slice(&out.to_le_bytes());
        }
        self.state[8] = self.state[8].wrapping_add(1);
        if self.state[8] == 0 {
            self.state[9] = self.state[9].wrapping_add(1);
        }
        self.used = 0;
    }

    /// XORs the keystream into `data` in place.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            if self.used == BLOCK_LEN {
                self.refill();
            }
            *byte ^= self.keystream[self.used];
            self.used += 1;
        }
    }
}
