//! Implementation of the CRYPTO1 stream cipher used by MIFARE Classic
//! contactless cards.
//!
//! CRYPTO1 is a 48-bit nonlinear-filtered LFSR that produces one keystream
//! bit per clock. A MIFARE authentication folds a secret key, the card UID,
//! a card nonce, and a reader nonce into the register; all traffic after
//! that is XORed with the keystream, with an encrypted parity bit riding
//! along every transmitted byte. The cipher is long broken -- the same
//! structure that encrypts traffic supports running the register
//! *backwards*, which is what offline key-recovery tools do -- but
//! interacting with the installed base of cards and readers requires
//! producing its output bit-exactly.
//!
//! This crate implements:
//!
//! - the filter network and LFSR clocking over a packed two-word state
//!   ([`cipher::Crypto1`]), including authentication setup, nested
//!   authentication with encrypted parity, and the bulk traffic operations;
//! - the same engine over a byte-split register layout
//!   ([`split::SplitState`]) that keeps all live state in six bytes, the
//!   layout tag emulators run on;
//! - the inverse (rollback) clocks used by key recovery ([`rollback`]);
//! - the 16-bit tag PRNG and the valid-nonce enumeration helper ([`prng`]).
//!
//! The two state layouts are interconvertible and produce identical output;
//! the test suite holds them against each other and against fixed vectors.
//!
//! # A note on timing
//!
//! Nothing here is constant-time: the filter is table lookups and the
//! feedback path branches on secret data. That matches every deployed
//! implementation of this cipher. Do not use this crate as a template for
//! protecting secrets you care about; CRYPTO1 itself gave up that fight in
//! 2008.

pub mod bits;
pub mod cipher;
pub mod filter;
pub mod prng;
pub mod rollback;
pub mod split;

/// Errors produced by operations that take caller-sized buffers. These only
/// reflect contract violations by the caller; every cipher operation on
/// well-formed arguments is infallible.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A parity output buffer was shorter than the data buffer it must
    /// cover (one parity bit per data byte).
    ParityBufferTooShort {
        /// Required length (the data length).
        needed: usize,
        /// Provided length.
        got: usize,
    },
    /// A bit count referenced bits past the end of the provided buffer.
    BitCountOutOfRange {
        /// Requested number of bits.
        bits: usize,
        /// Number of bits the buffer holds.
        capacity: usize,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::ParityBufferTooShort { needed, got } => write!(
                f,
                "parity buffer holds {} bytes, {} data bytes need covering",
                got, needed
            ),
            Error::BitCountOutOfRange { bits, capacity } => write!(
                f,
                "bit count {} exceeds buffer capacity of {} bits",
                bits, capacity
            ),
        }
    }
}

impl std::error::Error for Error {}
