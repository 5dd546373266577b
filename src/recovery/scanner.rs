//! Sequential verify-and-repair scanner.
//!
//! # How it works
//!
//! The scanner walks the file from offset 0, one block at a time.  There is
//! no index: block N+1 is found by consuming block N, so blocks are handled
//! strictly in file order, and a repair to block N is on disk before block
//! N+1 is read.
//!
//! ## Per-block states
//!
//! | State | Next |
//! |-------|------|
//! | Reading checksum | clean EOF → done; otherwise reading block |
//! | Reading block | header + `compressed_size` bytes captured → verifying |
//! | Verifying | match → passthrough; mismatch → single-bit search |
//! | Search hit | backup (once per run), rewrite one byte → next block |
//! | Search miss | counted as uncorrectable, file untouched → next block |
//!
//! Framing problems (partial checksum, clipped header or payload, oversized
//! block) and I/O failures end the scan with a [`ScanError`].  Mismatches are
//! never errors; they are recorded in the [`ScanReport`].
//!
//! ## Events
//!
//! `scan()` reports progress through a caller-supplied observer, called with
//! a [`ScanEvent`] as each mismatch, backup and correction happens, in file
//! order.  The scanner itself prints nothing.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::block::{read_block, Block, BlockData, FrameError, DEFAULT_MAX_BLOCK_SIZE};
use crate::checksum::{Checksum, CHECKSUM_SIZE};
use super::locator::{search, verify, BitFlip};
use super::patch::{apply_fix, Backup, PatchError};

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("cannot open {}: {source}", .path.display())]
    Open {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Knobs for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Search for flips but never back up or write.
    pub dry_run:        bool,
    /// Largest `compressed_size` a header may declare.
    pub max_block_size: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            dry_run:        false,
            max_block_size: DEFAULT_MAX_BLOCK_SIZE,
        }
    }
}

/// A located single-bit flip and the byte it rewrites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Correction {
    /// Offset of the block header (just past its checksum).
    pub block_offset: u64,
    /// Bit position within the block's hashed bytes.
    pub bit_position: u64,
    pub file_offset:  u64,
    pub old:          u8,
    pub new:          u8,
    /// `false` in dry-run mode.
    pub applied:      bool,
}

/// A block whose checksum no single-bit flip can restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub block_offset: u64,
    pub size:         usize,
    pub expected:     Checksum,
    pub actual:       Checksum,
}

/// Notification passed to the observer of [`scan`].
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// Stored and computed checksums differ; a search follows.
    Mismatch {
        block_offset: u64,
        expected:     Checksum,
        actual:       Checksum,
        size:         usize,
    },
    /// The search found the flipped bit.
    FlipLocated {
        block_offset: u64,
        byte_index:   usize,
        bit:          u8,
    },
    /// First write of the run is about to happen; the file was copied here.
    BackupCreated { path: PathBuf },
    Corrected(Correction),
    Uncorrectable(Mismatch),
}

/// Tally and log of one scan.
#[derive(Debug, Default, Serialize)]
pub struct ScanReport {
    pub blocks_scanned: usize,
    pub bytes_scanned:  u64,
    pub corrected:      usize,
    pub uncorrected:    usize,
    pub corrections:    Vec<Correction>,
    pub uncorrectable:  Vec<Mismatch>,
    /// Backup written by this run, if any.
    pub backup:         Option<PathBuf>,
    pub dry_run:        bool,
}

impl ScanReport {
    pub fn is_clean(&self) -> bool {
        self.corrected == 0 && self.uncorrected == 0
    }

    /// Final line of console output.
    pub fn summary(&self) -> String {
        if self.is_clean() {
            "No errors".to_string()
        } else if self.dry_run {
            format!(
                "Dry run completed. Correctable errors: {}, Uncorrected errors: {}",
                self.corrected, self.uncorrected,
            )
        } else {
            format!(
                "Completed. Corrected errors: {}, Uncorrected errors: {}",
                self.corrected, self.uncorrected,
            )
        }
    }
}

// ── Scanner ───────────────────────────────────────────────────────────────────

/// Verify every block of `stream` from its current position to EOF and
/// repair single-bit flips in place.
///
/// # Arguments
/// * `stream`   - positioned at a block boundary.
/// * `backup`   - taken before the first write.  `None` only for streams that
///                have no file behind them.
/// * `options`  - see [`ScanOptions`].
/// * `observer` - called with every [`ScanEvent`], in file order.
pub fn scan<S, F>(
    stream:       &mut S,
    mut backup:   Option<&mut Backup>,
    options:      &ScanOptions,
    mut observer: F,
) -> Result<ScanReport, ScanError>
where
    S: Read + Write + Seek,
    F: FnMut(&ScanEvent),
{
    let mut report = ScanReport { dry_run: options.dry_run, ..ScanReport::default() };

    loop {
        let Block { checksum: expected, data } = match read_block(stream, options.max_block_size)? {
            Some(block) => block,
            None        => break,
        };
        let BlockData { offset, header, mut bytes } = data;

        report.blocks_scanned += 1;
        report.bytes_scanned += (CHECKSUM_SIZE + bytes.len()) as u64;
        tracing::debug!(offset, size = bytes.len(), method = %header.method(), "block read");

        let verification = verify(&bytes, expected);
        if verification.matches {
            continue;
        }
        let actual = verification.actual;

        tracing::info!(offset, %expected, %actual, size = bytes.len(), "checksum mismatch");
        observer(&ScanEvent::Mismatch { block_offset: offset, expected, actual, size: bytes.len() });

        let flip = match search(&mut bytes, expected) {
            Some(flip) => flip,
            None => {
                tracing::info!(offset, "no single-bit flip explains the mismatch");
                let mismatch = Mismatch { block_offset: offset, size: bytes.len(), expected, actual };
                observer(&ScanEvent::Uncorrectable(mismatch.clone()));
                report.uncorrected += 1;
                report.uncorrectable.push(mismatch);
                continue;
            }
        };

        observer(&ScanEvent::FlipLocated {
            block_offset: offset,
            byte_index:   flip.byte_index(),
            bit:          flip.bit(),
        });

        let correction = if options.dry_run {
            planned(offset, &bytes, flip)
        } else {
            if let Some(b) = backup.as_deref_mut() {
                if let Some(path) = b.ensure()? {
                    let path = path.to_path_buf();
                    observer(&ScanEvent::BackupCreated { path: path.clone() });
                    report.backup = Some(path);
                }
            }
            let patch = apply_fix(stream, &bytes, flip, offset)?;
            Correction {
                block_offset: offset,
                bit_position: flip.position,
                file_offset:  patch.file_offset,
                old:          patch.old,
                new:          patch.new,
                applied:      true,
            }
        };

        observer(&ScanEvent::Corrected(correction.clone()));
        report.corrected += 1;
        report.corrections.push(correction);
    }

    Ok(report)
}

/// Correction as it would be applied, for dry runs.
fn planned(block_offset: u64, bytes: &[u8], flip: BitFlip) -> Correction {
    let new = bytes[flip.byte_index()];
    Correction {
        block_offset,
        bit_position: flip.position,
        file_offset:  block_offset + flip.byte_index() as u64,
        old:          new ^ flip.mask(),
        new,
        applied:      false,
    }
}

/// Open `path` and [`scan`] it, backing it up to `<path>.bak` before the
/// first repair.  In dry-run mode the file is opened read-only.
pub fn repair_file<P, F>(path: P, options: &ScanOptions, observer: F) -> Result<ScanReport, ScanError>
where
    P: AsRef<Path>,
    F: FnMut(&ScanEvent),
{
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .read(true)
        .write(!options.dry_run)
        .open(path)
        .map_err(|source| ScanError::Open { path: path.to_path_buf(), source })?;

    let mut backup = Backup::new(path);
    let report = scan(&mut file, Some(&mut backup), options, observer)?;
    if report.corrections.iter().any(|c| c.applied) {
        file.sync_all()?;
    }
    Ok(report)
}
