//! The byte-split engine: the same cipher over a six-byte register layout.
//!
//! Tag emulators run the cipher on small microcontrollers where the state
//! must live in byte registers. This layout keeps each 24-bit half as three
//! bytes, bit-reversed relative to the packed words, so a register shift is
//! three byte shifts and the filter reduces to table lookups whose results
//! OR together ([`crate::filter`] builds those tables). The bulk operations
//! here load the six bytes into locals once per call and store them back at
//! the end.
//!
//! Everything observable is identical to the packed engine, parity quirk
//! included. The test suite holds the two engines against each other on
//! random traffic; conversions in both directions are provided for callers
//! that mix them.

use byteorder::{ByteOrder, LittleEndian};

use crate::bits::odd_parity8;
use crate::cipher::Crypto1;
use crate::filter::{split_index, OUT_B0, OUT_B3, OUT_B7};
use crate::Error;

/// Feedback taps over the odd half, byte-split bit order.
pub const LFSR_MASK_ODD: u32 = 0x3A_7394;
/// Feedback taps over the even half, byte-split bit order.
pub const LFSR_MASK_EVEN: u32 = 0x20_10E1;

/// CRYPTO1 state in the byte-split layout. `even[0]` holds the
/// highest-numbered even-position bits; within each byte the shift moves
/// toward bit 0 and fresh bits enter at bit 7 of the last byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SplitState {
    /// Even-position bits of the 48-bit register.
    pub even: [u8; 3],
    /// Odd-position bits of the 48-bit register.
    pub odd: [u8; 3],
}

/// Reverses the significant 24 bits of a packed half into split bytes.
fn to_split_half(x: u32) -> [u8; 3] {
    let mut out = [0u8; 3];
    LittleEndian::write_u24(&mut out, (x & 0xFF_FFFF).reverse_bits() >> 8);
    out
}

/// Inverse of [`to_split_half`].
fn to_packed_half(b: &[u8; 3]) -> u32 {
    LittleEndian::read_u24(b).reverse_bits() >> 8
}

impl From<Crypto1> for SplitState {
    fn from(s: Crypto1) -> SplitState {
        SplitState {
            even: to_split_half(s.even),
            odd: to_split_half(s.odd),
        }
    }
}

impl From<SplitState> for Crypto1 {
    fn from(s: SplitState) -> Crypto1 {
        Crypto1::from_halves(to_packed_half(&s.odd), to_packed_half(&s.even))
    }
}

/// Shifts a three-byte half one position, feeding `input` in at the top.
#[inline]
fn shift24(half: &mut [u8; 3], input: u8) {
    half[0] = half[0] >> 1 | half[1] << 7;
    half[1] = half[1] >> 1 | half[2] << 7;
    half[2] = half[2] >> 1 | (input & 1) << 7;
}

/// Folds the tapped bits of both halves into the feedback bit. The first
/// triple is masked with the even polynomial, so callers pass the halves in
/// role order, not storage order.
#[inline]
fn feedback(e: &[u8; 3], o: &[u8; 3]) -> u8 {
    let mut f = e[0] & LFSR_MASK_EVEN as u8;
    f ^= e[1] & (LFSR_MASK_EVEN >> 8) as u8;
    f ^= e[2] & (LFSR_MASK_EVEN >> 16) as u8;
    f ^= o[0] & LFSR_MASK_ODD as u8;
    f ^= o[1] & (LFSR_MASK_ODD >> 8) as u8;
    f ^= o[2] & (LFSR_MASK_ODD >> 16) as u8;
    f ^= f >> 4 | f << 4;
    f ^= f >> 2;
    f ^= f >> 1;
    f & 1
}

/// Filter output at bit 0 of a byte.
#[inline]
fn filter_b0(odd: &[u8; 3]) -> u8 {
    OUT_B0[split_index(odd)]
}

/// Filter output at bit 3 of a byte.
#[inline]
fn filter_b3(odd: &[u8; 3]) -> u8 {
    OUT_B3[split_index(odd)]
}

/// Filter output at bit 7 of a byte.
#[inline]
fn filter_b7(odd: &[u8; 3]) -> u8 {
    OUT_B7[split_index(odd)]
}

/// Distributes one key byte across an even and an odd register byte, two
/// input bits per output bit position.
fn split_byte(even: &mut u8, odd: &mut u8, mut byte: u8) {
    for _ in 0..4 {
        *even = *even >> 1 | (byte & 1) << 7;
        byte >>= 1;
        *odd = *odd >> 1 | (byte & 1) << 7;
        byte >>= 1;
    }
}

impl SplitState {
    /// Loads a 6-byte key into a fresh register.
    pub fn load_key(key: &[u8; 6]) -> SplitState {
        let mut s = SplitState::default();
        for i in 0..3 {
            split_byte(&mut s.even[i], &mut s.odd[i], key[2 * i]);
            split_byte(&mut s.even[i], &mut s.odd[i], key[2 * i + 1]);
        }
        s
    }

    /// Standard authentication setup; see [`Crypto1::setup`].
    pub fn setup(key: &[u8; 6], uid: &[u8; 4], nonce: &mut [u8; 4]) -> SplitState {
        let mut s = SplitState::load_key(key);
        let (mut e, mut o) = (s.even, s.odd);
        for i in 0..4 {
            let mut input = nonce[i] ^ uid[i];
            let mut ks = 0;
            for b in 0..8u32 {
                let out = if b & 1 != 0 {
                    filter_b0(&e)
                } else {
                    filter_b0(&o)
                };
                ks = ks >> 1 | (out & 1) << 7;
                let fed = if b & 1 != 0 {
                    feedback(&o, &e)
                } else {
                    feedback(&e, &o)
                } ^ (input & 1);
                input >>= 1;
                if b & 1 != 0 {
                    shift24(&mut o, fed);
                } else {
                    shift24(&mut e, fed);
                }
            }
            nonce[i] ^= ks;
        }
        s.even = e;
        s.odd = o;
        s
    }

    /// Nested authentication setup with encrypted parity emission; see
    /// [`Crypto1::setup_nested`].
    pub fn setup_nested(
        key: &[u8; 6],
        uid: &[u8; 4],
        nonce: &mut [u8; 4],
        parity: &mut [u8; 4],
        decrypt: bool,
    ) -> SplitState {
        let mut s = SplitState::load_key(key);
        let (mut e, mut o) = (s.even, s.odd);
        // Filter output carried from parity position to the next byte's
        // first keystream bit.
        let mut carry = filter_b0(&o) & 1;
        for i in 0..4 {
            let mut input = nonce[i] ^ uid[i];
            let mut ks = 0;
            for b in 0..8u32 {
                let out = if b == 0 {
                    carry
                } else if b & 1 != 0 {
                    filter_b7(&e) >> 7
                } else {
                    filter_b7(&o) >> 7
                };
                ks = ks >> 1 | out << 7;
                let mut fed = if b & 1 != 0 {
                    feedback(&o, &e)
                } else {
                    feedback(&e, &o)
                } ^ (input & 1);
                input >>= 1;
                if decrypt {
                    fed ^= out;
                }
                if b & 1 != 0 {
                    shift24(&mut o, fed);
                } else {
                    shift24(&mut e, fed);
                }
            }
            carry = filter_b0(&o) & 1;
            parity[i] = odd_parity8(nonce[i]) ^ carry;
            nonce[i] ^= ks;
        }
        s.even = e;
        s.odd = o;
        s
    }

    /// Absorbs the encrypted reader nonce; see
    /// [`Crypto1::absorb_reader_nonce`].
    pub fn absorb_reader_nonce(&mut self, enc_nr: &[u8; 4]) {
        let (mut e, mut o) = (self.even, self.odd);
        for &byte in enc_nr.iter() {
            let mut input = byte;
            for b in 0..8u32 {
                let (ks, fed) = if b & 1 != 0 {
                    (filter_b0(&e) & 1, feedback(&o, &e))
                } else {
                    (filter_b0(&o) & 1, feedback(&e, &o))
                };
                let fed = fed ^ ks ^ (input & 1);
                input >>= 1;
                if b & 1 != 0 {
                    shift24(&mut o, fed);
                } else {
                    shift24(&mut e, fed);
                }
            }
        }
        self.even = e;
        self.odd = o;
    }

    /// Produces 8 keystream bits.
    pub fn keystream_byte(&mut self) -> u8 {
        let (mut e, mut o) = (self.even, self.odd);
        let mut ks = filter_b7(&o);
        for i in 0..8u32 {
            if i & 1 != 0 {
                let fed = feedback(&o, &e);
                shift24(&mut o, fed);
                ks = ks >> 1 | filter_b7(&e);
            } else {
                let fed = feedback(&e, &o);
                shift24(&mut e, fed);
                if i > 0 {
                    ks = ks >> 1 | filter_b7(&o);
                }
            }
        }
        self.even = e;
        self.odd = o;
        ks
    }

    /// Produces 4 keystream bits in positions 3..0.
    pub fn keystream_nibble(&mut self) -> u8 {
        let (mut e, mut o) = (self.even, self.odd);
        let mut ks = filter_b3(&o);
        for i in 0..4u32 {
            let out = if i & 1 != 0 {
                let fed = feedback(&o, &e);
                shift24(&mut o, fed);
                filter_b3(&e)
            } else {
                let fed = feedback(&e, &o);
                shift24(&mut e, fed);
                filter_b3(&o)
            };
            if i > 0 {
                ks = ks >> 1 | out;
            }
        }
        self.even = e;
        self.odd = o;
        ks & 0xF
    }

    /// Encrypts `buf` in place, emitting one encrypted parity bit per byte;
    /// see [`Crypto1::xor_bytes_with_parity`]. With `feed_input`, each
    /// pre-encryption input bit also enters the register.
    pub fn xor_bytes_with_parity(
        &mut self,
        buf: &mut [u8],
        par: &mut [u8],
        feed_input: bool,
    ) -> Result<(), Error> {
        if par.len() < buf.len() {
            return Err(Error::ParityBufferTooShort {
                needed: buf.len(),
                got: par.len(),
            });
        }
        let (mut e, mut o) = (self.even, self.odd);
        let mut carry = filter_b0(&o) & 1;
        for (byte, p) in buf.iter_mut().zip(par.iter_mut()) {
            let mut input = if feed_input { *byte } else { 0 };
            let mut ks = 0;
            for b in 0..8u32 {
                let out = if b == 0 {
                    carry
                } else if b & 1 != 0 {
                    filter_b7(&e) >> 7
                } else {
                    filter_b7(&o) >> 7
                };
                ks = ks >> 1 | out << 7;
                let fed = if b & 1 != 0 {
                    feedback(&o, &e)
                } else {
                    feedback(&e, &o)
                } ^ (input & 1);
                input >>= 1;
                if b & 1 != 0 {
                    shift24(&mut o, fed);
                } else {
                    shift24(&mut e, fed);
                }
            }
            carry = filter_b0(&o) & 1;
            *p = odd_parity8(*byte) ^ carry;
            *byte ^= ks;
        }
        self.even = e;
        self.odd = o;
        Ok(())
    }
}
