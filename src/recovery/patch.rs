//! In-place single-byte repair and the one-time backup that precedes it.
//!
//! # Backup
//! Before the first write of a run, the whole file is copied byte-for-byte
//! to `<path>.bak`.  An existing `.bak` is never touched: it already holds
//! the file as it was before some earlier repair, which is the copy worth
//! keeping.  The copy is opened with create-new semantics so a concurrent
//! appearance of the target fails the run instead of being overwritten.
//!
//! # Patch
//! A correction rewrites exactly one byte at `block_offset + bit / 8`.
//! Nothing around it is re-framed, and the stream cursor is restored so the
//! sequential scan continues where it left off.

use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::locator::BitFlip;

pub const BACKUP_SUFFIX: &str = ".bak";

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{} is not a regular file", .0.display())]
    NotRegularFile(PathBuf),
    #[error("cannot back up to {}: {source}", .path.display())]
    Backup {
        path:   PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("byte {byte_index} is outside the {len}-byte block")]
    OutOfRange { byte_index: usize, len: usize },
}

/// One byte written back to the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Patch {
    /// Absolute offset of the rewritten byte.
    pub file_offset: u64,
    pub old:         u8,
    pub new:         u8,
}

/// `<path>.bak`, appended rather than replacing any extension.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(BACKUP_SUFFIX);
    PathBuf::from(name)
}

/// Copy `path` to `<path>.bak` unless that file already exists.
///
/// Returns the backup path when a copy was made, `None` when an earlier
/// backup was found and left alone.
pub fn ensure_backup(path: &Path) -> Result<Option<PathBuf>, PatchError> {
    let target = backup_path(path);
    match fs::symlink_metadata(&target) {
        Ok(_) => {
            tracing::debug!(backup = %target.display(), "backup already present");
            return Ok(None);
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(source) => return Err(PatchError::Backup { path: target, source }),
    }

    if !fs::metadata(path)?.is_file() {
        return Err(PatchError::NotRegularFile(path.to_path_buf()));
    }

    let mut source = File::open(path)?;
    let mut dest = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&target)
        .map_err(|source| PatchError::Backup { path: target.clone(), source })?;

    let copied = io::copy(&mut source, &mut dest).and_then(|n| dest.sync_all().map(|_| n));
    match copied {
        Ok(bytes) => {
            tracing::info!(backup = %target.display(), bytes, "backup created");
            Ok(Some(target))
        }
        Err(source) => {
            // A partial copy must not pass for a pristine backup next run.
            drop(dest);
            let _ = fs::remove_file(&target);
            Err(PatchError::Backup { path: target, source })
        }
    }
}

/// Per-run backup state: the existence check and copy happen at most once.
#[derive(Debug)]
pub struct Backup {
    source:  PathBuf,
    checked: bool,
    created: Option<PathBuf>,
}

impl Backup {
    pub fn new<P: AsRef<Path>>(source: P) -> Self {
        Self {
            source:  source.as_ref().to_path_buf(),
            checked: false,
            created: None,
        }
    }

    /// Make sure a backup exists before writing.  Returns the backup path
    /// only on the call that actually created it.
    pub fn ensure(&mut self) -> Result<Option<&Path>, PatchError> {
        if self.checked {
            return Ok(None);
        }
        self.created = ensure_backup(&self.source)?;
        self.checked = true;
        Ok(self.created.as_deref())
    }

    /// Backup made by this run, if any.
    pub fn created(&self) -> Option<&Path> {
        self.created.as_deref()
    }
}

/// Write the corrected byte of `raw` back to `file`.
///
/// `raw` must already carry the flip; `block_offset` is where `raw[0]` lives
/// in the file.
pub fn apply_fix<S: Write + Seek>(
    file:         &mut S,
    raw:          &[u8],
    flip:         BitFlip,
    block_offset: u64,
) -> Result<Patch, PatchError> {
    let byte_index = flip.byte_index();
    let new = *raw
        .get(byte_index)
        .ok_or(PatchError::OutOfRange { byte_index, len: raw.len() })?;
    let file_offset = block_offset + byte_index as u64;

    let resume = file.stream_position()?;
    file.seek(SeekFrom::Start(file_offset))?;
    file.write_all(&[new])?;
    file.flush()?;
    file.seek(SeekFrom::Start(resume))?;

    let patch = Patch { file_offset, old: new ^ flip.mask(), new };
    tracing::info!(offset = file_offset, old = patch.old, new = patch.new, "byte rewritten");
    Ok(patch)
}
