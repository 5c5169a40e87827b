//! The 16-bit tag PRNG and nonce helpers.
//!
//! Card nonces are not random: the tag generates them with a 16-bit LFSR
//! (polynomial x^16 + x^14 + x^13 + x^11 + 1) that free-runs while the tag
//! is powered, and transmits 32 bits of its output as the nonce. The
//! successor function below steps that generator on a 32-bit window of its
//! stream; knowing any 16 bits of the window determines everything after,
//! which is why the generator matters so much to attacks.

use byteorder::{ByteOrder, LittleEndian};

use crate::bits::{bit, even_parity32};

/// Advances a 32-bit window of the nonce generator `n` steps.
///
/// The stream is viewed byte-swapped internally: the argument and result
/// are in wire byte order (most significant byte first on the card), while
/// the shift operates on the swapped word with feedback from bits 16, 18,
/// 19 and 21 entering at bit 31.
pub fn successor(x: u32, n: u32) -> u32 {
    let mut x = x.swap_bytes();
    match n {
        // The two counts every authentication hits.
        1 => x = step(x),
        16 => {
            for _ in 0..16 {
                x = step(x);
            }
        }
        n => {
            for _ in 0..n {
                x = step(x);
            }
        }
    }
    x.swap_bytes()
}

#[inline]
fn step(x: u32) -> u32 {
    x >> 1 | (x >> 16 ^ x >> 18 ^ x >> 19 ^ x >> 21) << 31
}

/// Advances a 4-byte generator state in place by `clocks` steps, 32 at a
/// time; residual clocks short of a full 32 are not applied. The bytes are
/// in wire order, matching [`successor`] on the same view.
///
/// Each 32-step chunk runs the shift in three strides (11, 11, 10),
/// folding the 6-bit feedback pattern of the polynomial down to the new
/// top bits in two XORs per stride.
pub fn advance_bytes(state: &mut [u8; 4], mut clocks: u32) {
    // A little-endian load of wire-order bytes is already the swapped view
    // `successor` shifts in.
    let mut x = LittleEndian::read_u32(state);
    while clocks >= 32 {
        for &stride in &[11u32, 11, 10] {
            let mut fed = x >> 16 & 0xFFFF;
            fed ^= fed >> 3;
            fed ^= fed >> 2;
            x = x >> stride | fed << (32 - stride);
        }
        clocks -= 32;
    }
    LittleEndian::write_u32(state, x);
}

/// Lazily enumerates card nonces consistent with a captured parity-leak
/// pattern.
///
/// A nested authentication leaks one parity bit per nonce byte. Each leaked
/// bit constrains the generator: bit `j` of `pattern` (checked from bit
/// `width - 1` down) must equal the even parity of the generator window
/// masked with `0xFF01`, where the window advances 48 steps after the first
/// check and 8 after each subsequent one. For every 16-bit seed that
/// satisfies all `width` checks, the iterator yields the nonce the tag
/// would actually emit, `successor(seed, 16)`.
///
/// The iterator is restartable by constructing it again and cheap to drop
/// early; it holds no state beyond the next seed to try.
#[derive(Clone, Debug)]
pub struct ValidNonces {
    pattern: u32,
    width: u32,
    next_seed: u32,
}

impl ValidNonces {
    /// Creates an enumerator for the given leak pattern and bit width.
    pub fn new(pattern: u32, width: u32) -> ValidNonces {
        ValidNonces {
            pattern,
            width,
            next_seed: 0,
        }
    }

    fn matches(&self, seed: u32) -> bool {
        let mut window = seed;
        for j in (0..self.width).rev() {
            if bit(self.pattern, j) != even_parity32(window & 0xFF01) {
                return false;
            }
            if j > 0 {
                window = successor(window, if j == self.width - 1 { 48 } else { 8 });
            }
        }
        true
    }
}

impl Iterator for ValidNonces {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        while self.next_seed < 1 << 16 {
            let seed = self.next_seed;
            self.next_seed += 1;
            if self.matches(seed) {
                return Some(successor(seed, 16));
            }
        }
        None
    }
}
