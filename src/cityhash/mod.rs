//! CityHash v1.0.2, 128-bit variant.
//!
//! Block checksums in compressed column files are produced by
//! `CityHash128` from the 1.0.2 release of CityHash.  Later releases (1.0.3,
//! 1.1) changed the short-input path and the long-input mixing loop, so they
//! yield different fingerprints for the same bytes.  Only 1.0.2 is
//! implemented here, bit-exact.
//!
//! # Output layout
//! The result is a `(first, second)` pair of `u64`s, in the same order the
//! reference returns its `uint128` pair.  On disk the pair is stored as two
//! little-endian words, `first` then `second` (see `checksum.rs`).
//!
//! # Reads
//! All multi-byte loads are little-endian regardless of host byte order.

use std::mem;

// ── Constants ────────────────────────────────────────────────────────────────

// Primes between 2^63 and 2^64.
const K0: u64 = 0xc3a5_c85c_97cb_3127;
const K1: u64 = 0xb492_b66f_be98_f273;
const K2: u64 = 0x9ae1_6a3b_2f90_404f;
const K3: u64 = 0xc949_d7c7_509e_6557;

/// Multiplier of the 128 → 64 bit folding step.
const K_MUL: u64 = 0x9ddf_ea08_eb38_2d69;

// ── Primitives ───────────────────────────────────────────────────────────────

#[inline]
fn fetch64(s: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&s[at..at + 8]);
    u64::from_le_bytes(word)
}

#[inline]
fn fetch32(s: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&s[at..at + 4]);
    u32::from_le_bytes(word) as u64
}

#[inline]
fn shift_mix(val: u64) -> u64 {
    val ^ (val >> 47)
}

/// Fold 128 bits down to 64.
#[inline]
fn hash_len16(u: u64, v: u64) -> u64 {
    let mut a = (u ^ v).wrapping_mul(K_MUL);
    a ^= a >> 47;
    let mut b = (v ^ a).wrapping_mul(K_MUL);
    b ^= b >> 47;
    b.wrapping_mul(K_MUL)
}

fn hash_len0to16(s: &[u8]) -> u64 {
    let len = s.len();
    if len > 8 {
        let a = fetch64(s, 0);
        let b = fetch64(s, len - 8);
        // len is in 9..=16, the rotation amount is never zero.
        return hash_len16(a, b.wrapping_add(len as u64).rotate_right(len as u32)) ^ b;
    }
    if len >= 4 {
        let a = fetch32(s, 0);
        return hash_len16((len as u64).wrapping_add(a << 3), fetch32(s, len - 4));
    }
    if len > 0 {
        let a = s[0] as u32;
        let b = s[len >> 1] as u32;
        let c = s[len - 1] as u32;
        let y = a.wrapping_add(b << 8);
        let z = (len as u32).wrapping_add(c << 2);
        return shift_mix((y as u64).wrapping_mul(K2) ^ (z as u64).wrapping_mul(K3))
            .wrapping_mul(K2);
    }
    K2
}

/// 16-byte hash of four words plus two seeds.  Quick and dirty.
#[inline]
fn weak_hash_len32_with_seeds_words(
    w: u64, x: u64, y: u64, z: u64,
    mut a: u64, mut b: u64,
) -> (u64, u64) {
    a = a.wrapping_add(w);
    b = b.wrapping_add(a).wrapping_add(z).rotate_right(21);
    let c = a;
    a = a.wrapping_add(x).wrapping_add(y);
    b = b.wrapping_add(a.rotate_right(44));
    (a.wrapping_add(z), b.wrapping_add(c))
}

#[inline]
fn weak_hash_len32_with_seeds(s: &[u8], at: usize, a: u64, b: u64) -> (u64, u64) {
    weak_hash_len32_with_seeds_words(
        fetch64(s, at),
        fetch64(s, at + 8),
        fetch64(s, at + 16),
        fetch64(s, at + 24),
        a,
        b,
    )
}

// ── 128-bit paths ────────────────────────────────────────────────────────────

/// Short-input path (`len < 128`), a City/Murmur hybrid.
fn city_murmur(s: &[u8], seed: (u64, u64)) -> (u64, u64) {
    let (mut a, mut b) = seed;
    let len = s.len();
    let mut c: u64;
    let mut d: u64;

    if len <= 16 {
        a = shift_mix(a.wrapping_mul(K1)).wrapping_mul(K1);
        c = b.wrapping_mul(K1).wrapping_add(hash_len0to16(s));
        d = shift_mix(a.wrapping_add(if len >= 8 { fetch64(s, 0) } else { c }));
    } else {
        c = hash_len16(fetch64(s, len - 8).wrapping_add(K1), a);
        d = hash_len16(b.wrapping_add(len as u64), c.wrapping_add(fetch64(s, len - 16)));
        a = a.wrapping_add(d);
        let mut pos = 0;
        loop {
            a ^= shift_mix(fetch64(s, pos).wrapping_mul(K1)).wrapping_mul(K1);
            a = a.wrapping_mul(K1);
            b ^= a;
            c ^= shift_mix(fetch64(s, pos + 8).wrapping_mul(K1)).wrapping_mul(K1);
            c = c.wrapping_mul(K1);
            d ^= c;
            pos += 16;
            if len - pos <= 16 {
                break;
            }
        }
    }

    a = hash_len16(a, c);
    b = hash_len16(d, b);
    (a ^ b, hash_len16(b, a))
}

/// `CityHash128WithSeed` from CityHash v1.0.2.
pub fn city_hash128_with_seed(s: &[u8], seed: (u64, u64)) -> (u64, u64) {
    if s.len() < 128 {
        return city_murmur(s, seed);
    }

    // 56 bytes of state: v, w, x, y, z.
    let (mut x, mut y) = seed;
    let mut z = (s.len() as u64).wrapping_mul(K1);
    let mut v = (0u64, 0u64);
    let mut w = (0u64, 0u64);
    v.0 = (y ^ K1).rotate_right(49).wrapping_mul(K1).wrapping_add(fetch64(s, 0));
    v.1 = v.0.rotate_right(42).wrapping_mul(K1).wrapping_add(fetch64(s, 8));
    w.0 = y.wrapping_add(z).rotate_right(35).wrapping_mul(K1).wrapping_add(x);
    w.1 = x.wrapping_add(fetch64(s, 88)).rotate_right(53).wrapping_mul(K1);

    let mut pos = 0usize;
    let mut len = s.len();
    // Two 64-byte rounds per iteration; `len` drops by 128 each time.
    loop {
        for _ in 0..2 {
            x = x
                .wrapping_add(y)
                .wrapping_add(v.0)
                .wrapping_add(fetch64(s, pos + 16))
                .rotate_right(37)
                .wrapping_mul(K1);
            y = y
                .wrapping_add(v.1)
                .wrapping_add(fetch64(s, pos + 48))
                .rotate_right(42)
                .wrapping_mul(K1);
            x ^= w.1;
            y ^= v.0;
            z = (z ^ w.0).rotate_right(33);
            v = weak_hash_len32_with_seeds(s, pos, v.1.wrapping_mul(K1), x.wrapping_add(w.0));
            w = weak_hash_len32_with_seeds(s, pos + 32, z.wrapping_add(w.1), y);
            mem::swap(&mut z, &mut x);
            pos += 64;
        }
        len -= 128;
        if len < 128 {
            break;
        }
    }

    y = y.wrapping_add(w.0.rotate_right(37).wrapping_mul(K0).wrapping_add(z));
    x = x.wrapping_add(v.0.wrapping_add(z).rotate_right(49).wrapping_mul(K0));

    // Up to four 32-byte chunks from the end of the remaining tail.
    let mut tail_done = 0usize;
    while tail_done < len {
        tail_done += 32;
        y = y.wrapping_sub(x).rotate_right(42).wrapping_mul(K0).wrapping_add(v.1);
        w.0 = w.0.wrapping_add(fetch64(s, pos + len - tail_done + 16));
        x = x.rotate_right(49).wrapping_mul(K0).wrapping_add(w.0);
        w.0 = w.0.wrapping_add(v.0);
        v = weak_hash_len32_with_seeds(s, pos + len - tail_done, v.0, v.1);
    }

    x = hash_len16(x, v.0);
    y = hash_len16(y, w.0);
    (
        hash_len16(x.wrapping_add(v.1), w.1).wrapping_add(y),
        hash_len16(x.wrapping_add(w.1), y.wrapping_add(v.1)),
    )
}

/// `CityHash128` from CityHash v1.0.2.
///
/// Defined for every length including zero.  Pure and deterministic.
pub fn city_hash128(s: &[u8]) -> (u64, u64) {
    let len = s.len();
    if len >= 16 {
        city_hash128_with_seed(&s[16..], (fetch64(s, 0) ^ K3, fetch64(s, 8)))
    } else if len >= 8 {
        city_hash128_with_seed(
            &[],
            (fetch64(s, 0) ^ (len as u64).wrapping_mul(K0), fetch64(s, len - 8) ^ K1),
        )
    } else {
        city_hash128_with_seed(s, (K0, K1))
    }
}
