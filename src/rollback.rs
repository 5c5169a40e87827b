//! Inverse LFSR clocks.
//!
//! Offline key recovery works by capturing an authentication, reproducing
//! the cipher state at some point in the trace, and then running the
//! register *backwards* past every absorbed nonce until only the key
//! remains. These functions are the exact inverses of the forward clocks in
//! [`crate::cipher`]: given the same `input` and feedback flag, rolling
//! back re-emits the same filter outputs the forward direction produced and
//! restores the prior state.
//!
//! One bit per step needs care. The forward clock shifts the register, and
//! the bit that falls off the top is not stored anywhere a 24-bit state
//! can keep it. It is recoverable anyway: the feedback bit that was shifted
//! in is a parity over the taps of *both* halves, the lost bit sits on a
//! tapped position (bit 23 of the even half), and every other term of that
//! parity is known -- so the equation has exactly one unknown and rollback
//! solves for it. This works for chains of any length, which is exactly
//! what recovery tools need when they unwind 96 bits of authentication.
//! (The forward clock also parks shifted-out bits above position 23 of the
//! state words; rollback consumes them when present, but never needs them.)

use crate::bits::{bebit, even_parity32};
use crate::cipher::{Crypto1, LF_POLY_EVEN, LF_POLY_ODD};
use crate::filter::filter;

/// Rolls the register back one clock, undoing a forward [`Crypto1::bit`]
/// with the same `input` and `encrypted` arguments. Returns the filter
/// output the forward clock emitted.
pub fn rollback_bit(s: &mut Crypto1, input: u8, encrypted: bool) -> u8 {
    s.odd &= 0xFF_FFFF;
    std::mem::swap(&mut s.odd, &mut s.even);

    // The bit at the bottom of the shifted half is the feedback parity the
    // forward clock inserted. Accumulate every known term of that parity;
    // what remains is the lost top bit of the restored even half.
    let mut fed = s.even & 1;
    s.even >>= 1;
    fed ^= LF_POLY_EVEN & s.even;
    fed ^= LF_POLY_ODD & s.odd;
    fed ^= u32::from(input & 1);
    let out = filter(s.odd);
    fed ^= out & encrypted as u32;
    s.even |= even_parity32(fed) << 23;

    out as u8
}

/// Rolls back 8 clocks, undoing a forward [`Crypto1::byte`]. Bits unwind
/// in reverse wire order (bit 7 first); the returned byte matches the
/// forward output.
pub fn rollback_byte(s: &mut Crypto1, input: u8, encrypted: bool) -> u8 {
    let mut out = 0;
    for i in (0..8).rev() {
        out |= rollback_bit(s, input >> i & 1, encrypted) << i;
    }
    out
}

/// Rolls back 32 clocks, undoing a forward [`Crypto1::word`]. Bits unwind
/// in reverse MIFARE word order; the returned word matches the forward
/// output.
pub fn rollback_word(s: &mut Crypto1, input: u32, encrypted: bool) -> u32 {
    let mut out = 0;
    for i in (0..32u32).rev() {
        out |= u32::from(rollback_bit(s, bebit(input, i) as u8, encrypted)) << ((24 ^ i) & 31);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_state(rng: &mut StdRng) -> Crypto1 {
        Crypto1::from_halves(rng.gen::<u32>() & 0xFF_FFFF, rng.gen::<u32>() & 0xFF_FFFF)
    }

    #[test]
    fn bit_rollback_inverts_bit_clock() {
        let mut rng = StdRng::seed_from_u64(10);
        for _ in 0..2000 {
            let start = random_state(&mut rng);
            for &input in &[0u8, 1] {
                for &enc in &[false, true] {
                    let mut s = start;
                    let fwd = s.bit(input, enc);
                    let back = rollback_bit(&mut s, input, enc);
                    assert_eq!(fwd, back);
                    assert_eq!(s.lfsr(), start.lfsr());
                }
            }
        }
    }

    #[test]
    fn byte_and_word_rollback_invert_their_clocks() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let start = random_state(&mut rng);
            let byte_in = rng.gen::<u8>();
            let word_in = rng.gen::<u32>();
            let enc = rng.gen::<bool>();

            let mut s = start;
            let fwd = s.byte(byte_in, enc);
            assert_eq!(rollback_byte(&mut s, byte_in, enc), fwd);
            assert_eq!(s.lfsr(), start.lfsr());

            let mut s = start;
            let fwd = s.word(word_in, enc);
            assert_eq!(rollback_word(&mut s, word_in, enc), fwd);
            assert_eq!(s.lfsr(), start.lfsr());
        }
    }

    #[test]
    fn long_chains_from_masked_states() {
        // A recovery tool holds only the 24 significant bits per half; the
        // carries the forward clock parks above bit 23 are gone. Unwinding
        // must still restore every bit.
        let mut rng = StdRng::seed_from_u64(12);
        for _ in 0..200 {
            let start = random_state(&mut rng);
            let words: [u32; 3] = rng.gen();

            let mut s = start;
            for &w in &words {
                s.word(w, true);
            }
            let mut recovered = Crypto1::from_halves(s.odd & 0xFF_FFFF, s.even & 0xFF_FFFF);
            for &w in words.iter().rev() {
                rollback_word(&mut recovered, w, true);
            }
            assert_eq!(recovered.lfsr(), start.lfsr());
        }
    }

    #[test]
    fn recovers_key_from_authentication_trace() {
        // The mfkey-style flow: after a full authentication the state is
        // key + absorbed nonces; three word rollbacks yield the key.
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            let key: [u8; 6] = rng.gen();
            let uid: [u8; 4] = rng.gen();
            let nt: [u8; 4] = rng.gen();
            let nr: [u8; 4] = rng.gen();

            let mut enc_nt = nt;
            let mut s = Crypto1::setup(&key, &uid, &mut enc_nt);
            s.absorb_reader_nonce(&nr);

            let mut back = Crypto1::from_halves(s.odd & 0xFF_FFFF, s.even & 0xFF_FFFF);
            rollback_word(&mut back, BigEndian::read_u32(&nr), true);
            rollback_word(
                &mut back,
                BigEndian::read_u32(&uid) ^ BigEndian::read_u32(&nt),
                false,
            );
            assert_eq!(back.lfsr(), crate::cipher::key_word(&key));
        }
    }
}
