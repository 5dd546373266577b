//! Block framing and the sequential block reader.
//!
//! # Layout
//! ```text
//! ┌──────────────┬────────┬─────────────────┬───────────────────┬─────────────┐
//! │ checksum 16B │ method │ compressed u32  │ uncompressed u32  │ payload ... │
//! └──────────────┴────────┴─────────────────┴───────────────────┴─────────────┘
//!                 ◄──────────── compressed_size bytes, hashed ────────────────►
//! ```
//! All integers are little-endian.  `compressed_size` counts the 9 header
//! bytes plus the payload, and the checksum covers exactly that region.
//! There is no file header, no trailer, and no index: block N+1 starts where
//! block N ends, and a well-formed file ends exactly on a checksum boundary.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};
use thiserror::Error;

use crate::checksum::{Checksum, CHECKSUM_SIZE};

/// Size of `method` + `compressed_size` + `uncompressed_size`.
pub const BLOCK_HEADER_SIZE: usize = 9;

/// Largest `compressed_size` accepted by default (1 GiB).
pub const DEFAULT_MAX_BLOCK_SIZE: u64 = 0x4000_0000;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("file ends inside a checksum ({read} of 16 bytes present)")]
    TruncatedChecksum { read: usize },
    #[error("file ends inside the block header at byte {offset}")]
    TruncatedHeader { offset: u64 },
    #[error("file is clipped at block {offset}: expected compressed size {expected}, actual {actual}")]
    TruncatedPayload { offset: u64, expected: usize, actual: usize },
    #[error("block at byte {offset} declares {size} compressed bytes, limit is {limit}")]
    BlockTooLarge { offset: u64, size: u32, limit: u64 },
}

// ── Compression method ───────────────────────────────────────────────────────

/// Method byte of a block header.  Informational only: payloads are never
/// decompressed, so an unknown code is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Lz4,
    Zstd,
    Multiple,
    Delta,
    T64,
    DoubleDelta,
    Gorilla,
    Unknown(u8),
}

impl CompressionMethod {
    pub fn code(self) -> u8 {
        match self {
            CompressionMethod::None        => 0x02,
            CompressionMethod::Lz4         => 0x82,
            CompressionMethod::Zstd        => 0x90,
            CompressionMethod::Multiple    => 0x91,
            CompressionMethod::Delta       => 0x92,
            CompressionMethod::T64         => 0x93,
            CompressionMethod::DoubleDelta => 0x94,
            CompressionMethod::Gorilla     => 0x95,
            CompressionMethod::Unknown(c)  => c,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionMethod::None        => "NONE",
            CompressionMethod::Lz4         => "LZ4",
            CompressionMethod::Zstd        => "ZSTD",
            CompressionMethod::Multiple    => "Multiple",
            CompressionMethod::Delta       => "Delta",
            CompressionMethod::T64         => "T64",
            CompressionMethod::DoubleDelta => "DoubleDelta",
            CompressionMethod::Gorilla     => "Gorilla",
            CompressionMethod::Unknown(_)  => "unknown",
        }
    }
}

impl From<u8> for CompressionMethod {
    fn from(code: u8) -> Self {
        match code {
            0x02 => CompressionMethod::None,
            0x82 => CompressionMethod::Lz4,
            0x90 => CompressionMethod::Zstd,
            0x91 => CompressionMethod::Multiple,
            0x92 => CompressionMethod::Delta,
            0x93 => CompressionMethod::T64,
            0x94 => CompressionMethod::DoubleDelta,
            0x95 => CompressionMethod::Gorilla,
            c    => CompressionMethod::Unknown(c),
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.code())
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub method:            u8,
    pub compressed_size:   u32,
    pub uncompressed_size: u32,
}

impl BlockHeader {
    pub fn method(&self) -> CompressionMethod {
        CompressionMethod::from(self.method)
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u8(self.method)?;
        writer.write_u32::<LittleEndian>(self.compressed_size)?;
        writer.write_u32::<LittleEndian>(self.uncompressed_size)?;
        Ok(())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        Ok(Self {
            method:            reader.read_u8()?,
            compressed_size:   reader.read_u32::<LittleEndian>()?,
            uncompressed_size: reader.read_u32::<LittleEndian>()?,
        })
    }
}

// ── Blocks ───────────────────────────────────────────────────────────────────

/// Header plus the hashed bytes of one block.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// Absolute offset of the header, i.e. just past the checksum.
    pub offset: u64,
    pub header: BlockHeader,
    /// `compressed_size` bytes starting at `offset` (header included).
    pub bytes:  Vec<u8>,
}

/// One framed block: the stored checksum and the bytes it guards.
#[derive(Debug, Clone)]
pub struct Block {
    pub checksum: Checksum,
    pub data:     BlockData,
}

/// Read the 16-byte checksum at the cursor.
///
/// `Ok(None)` means the cursor was exactly at end of file, the only clean
/// way for a scan to finish.  Any partial read is a framing error.
pub fn read_checksum<R: Read>(reader: &mut R) -> Result<Option<Checksum>, FrameError> {
    let mut buf = [0u8; CHECKSUM_SIZE];
    let mut filled = 0;
    while filled < CHECKSUM_SIZE {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    match filled {
        0 => Ok(None),
        CHECKSUM_SIZE => Ok(Some(Checksum::from_bytes(&buf))),
        read => Err(FrameError::TruncatedChecksum { read }),
    }
}

/// Read the header that follows a checksum, then rewind over it and capture
/// `compressed_size` raw bytes from the header start.
///
/// On success the cursor sits right after the captured bytes, where the next
/// block's checksum begins.
pub fn read_data<R: Read + Seek>(reader: &mut R, max_block_size: u64) -> Result<BlockData, FrameError> {
    let offset = reader.stream_position()?;

    let header = match BlockHeader::read(&mut *reader) {
        Ok(h) => h,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::TruncatedHeader { offset });
        }
        Err(e) => return Err(e.into()),
    };
    if header.compressed_size as u64 > max_block_size {
        return Err(FrameError::BlockTooLarge {
            offset,
            size:  header.compressed_size,
            limit: max_block_size,
        });
    }

    // The checksum covers the header too.
    reader.seek(SeekFrom::Current(-(BLOCK_HEADER_SIZE as i64)))?;

    let expected = header.compressed_size as usize;
    let mut bytes = Vec::with_capacity(expected.min(1 << 20));
    let actual = reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
    if actual != expected {
        return Err(FrameError::TruncatedPayload { offset, expected, actual });
    }

    Ok(BlockData { offset, header, bytes })
}

/// Read the next whole block, or `Ok(None)` at a clean end of file.
pub fn read_block<R: Read + Seek>(reader: &mut R, max_block_size: u64) -> Result<Option<Block>, FrameError> {
    let checksum = match read_checksum(reader)? {
        Some(c) => c,
        None    => return Ok(None),
    };
    let data = read_data(reader, max_block_size)?;
    Ok(Some(Block { checksum, data }))
}

/// Frame `payload` as a complete block: checksum, header, payload.
pub fn encode_block(method: CompressionMethod, payload: &[u8], uncompressed_size: u32) -> Vec<u8> {
    let header = BlockHeader {
        method:            method.code(),
        compressed_size:   (BLOCK_HEADER_SIZE + payload.len()) as u32,
        uncompressed_size,
    };
    let mut hashed = Vec::with_capacity(BLOCK_HEADER_SIZE + payload.len());
    // Writing into a Vec cannot fail.
    let _ = header.write(&mut hashed);
    hashed.extend_from_slice(payload);

    let mut out = Vec::with_capacity(CHECKSUM_SIZE + hashed.len());
    out.extend_from_slice(&Checksum::of(&hashed).to_bytes());
    out.extend_from_slice(&hashed);
    out
}
