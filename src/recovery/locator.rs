//! Single-bit corruption locator.
//!
//! The corruption model is one flipped bit somewhere in a block's hashed
//! region (header + payload).  The stored checksum is treated as ground
//! truth: candidates are tried in ascending bit order and the first flip
//! whose CityHash128 equals the stored checksum is the correction.
//!
//! Bit `p` lives in byte `p / 8` under mask `1 << (p % 8)`.
//!
//! Every candidate is applied through a [`FlipGuard`], which undoes the flip
//! when dropped unless the candidate is kept.  A failed search, or a panic
//! in the middle of one, leaves the buffer exactly as it was.

use serde::Serialize;

use crate::checksum::Checksum;

/// Result of comparing a buffer against its stored checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verification {
    pub matches: bool,
    pub actual:  Checksum,
}

/// A bit position within a block's hashed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BitFlip {
    pub position: u64,
}

impl BitFlip {
    pub fn new(position: u64) -> Self {
        Self { position }
    }

    pub fn byte_index(&self) -> usize {
        (self.position / 8) as usize
    }

    pub fn bit(&self) -> u8 {
        (self.position % 8) as u8
    }

    pub fn mask(&self) -> u8 {
        1u8 << self.bit()
    }
}

/// Outcome of checking one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// Stored and computed checksums agree.
    Intact,
    /// Mismatch fixed by `flip`, already applied to the buffer.
    Corrected { actual: Checksum, flip: BitFlip },
    /// Mismatch that no single-bit flip explains.  Buffer untouched.
    Uncorrectable { actual: Checksum },
}

/// Hash `raw` and compare it with `expected`, both halves bitwise.
pub fn verify(raw: &[u8], expected: Checksum) -> Verification {
    let actual = Checksum::of(raw);
    Verification { matches: actual == expected, actual }
}

/// Flips one bit on construction and flips it back on drop, unless kept.
struct FlipGuard<'a> {
    bytes: &'a mut [u8],
    flip:  BitFlip,
    armed: bool,
}

impl<'a> FlipGuard<'a> {
    fn apply(bytes: &'a mut [u8], flip: BitFlip) -> Self {
        bytes[flip.byte_index()] ^= flip.mask();
        Self { bytes, flip, armed: true }
    }

    fn bytes(&self) -> &[u8] {
        &*self.bytes
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for FlipGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.bytes[self.flip.byte_index()] ^= self.flip.mask();
        }
    }
}

/// Try every bit of `raw` in ascending order; keep and return the first
/// flip that makes the buffer hash to `expected`.
///
/// Costs up to `8 * raw.len()` hashes of `raw.len()` bytes.  Does not check
/// whether `raw` already matches.
pub fn search(raw: &mut [u8], expected: Checksum) -> Option<BitFlip> {
    let total_bits = raw.len() as u64 * 8;
    tracing::debug!(bytes = raw.len(), candidates = total_bits, "searching for single-bit flip");

    for position in 0..total_bits {
        let flip = BitFlip::new(position);
        let guard = FlipGuard::apply(&mut *raw, flip);
        if Checksum::of(guard.bytes()) == expected {
            guard.keep();
            return Some(flip);
        }
    }
    None
}

/// `None` when `raw` already matches or when no single flip fixes it;
/// otherwise the corrected position, with the flip applied to `raw`.
pub fn locate_and_correct(raw: &mut [u8], expected: Checksum) -> Option<BitFlip> {
    match diagnose(raw, expected) {
        Diagnosis::Corrected { flip, .. } => Some(flip),
        Diagnosis::Intact | Diagnosis::Uncorrectable { .. } => None,
    }
}

pub fn diagnose(raw: &mut [u8], expected: Checksum) -> Diagnosis {
    let v = verify(raw, expected);
    if v.matches {
        return Diagnosis::Intact;
    }
    match search(raw, expected) {
        Some(flip) => Diagnosis::Corrected { actual: v.actual, flip },
        None       => Diagnosis::Uncorrectable { actual: v.actual },
    }
}
