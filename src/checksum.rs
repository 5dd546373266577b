use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{self, Read, Write};

use crate::cityhash::city_hash128;

/// On-disk size of a block checksum.
pub const CHECKSUM_SIZE: usize = 16;

/// 128-bit block fingerprint, stored as two little-endian `u64` halves.
///
/// Two checksums are equal only when both halves are bitwise equal.  A
/// checksum is always recomputed from file contents; nothing caches it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Checksum {
    pub first:  u64,
    pub second: u64,
}

impl Checksum {
    pub fn new(first: u64, second: u64) -> Self {
        Self { first, second }
    }

    /// CityHash128 (v1.0.2) of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        let (first, second) = city_hash128(bytes);
        Self { first, second }
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u64::<LittleEndian>(self.first)?;
        writer.write_u64::<LittleEndian>(self.second)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            first:  reader.read_u64::<LittleEndian>()?,
            second: reader.read_u64::<LittleEndian>()?,
        })
    }

    pub fn from_bytes(bytes: &[u8; CHECKSUM_SIZE]) -> Self {
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        second.copy_from_slice(&bytes[8..]);
        Self {
            first:  u64::from_le_bytes(first),
            second: u64::from_le_bytes(second),
        }
    }

    pub fn to_bytes(&self) -> [u8; CHECKSUM_SIZE] {
        let mut out = [0u8; CHECKSUM_SIZE];
        out[..8].copy_from_slice(&self.first.to_le_bytes());
        out[8..].copy_from_slice(&self.second.to_le_bytes());
        out
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.first, self.second)
    }
}
