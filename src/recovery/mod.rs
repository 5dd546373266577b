//! Detection and in-place repair of single-bit block corruption.

pub mod locator;
pub mod patch;
pub mod scanner;

pub use locator::{diagnose, locate_and_correct, search, verify, BitFlip, Diagnosis, Verification};
pub use patch::{apply_fix, backup_path, ensure_backup, Backup, Patch, PatchError, BACKUP_SUFFIX};
pub use scanner::{
    repair_file, scan, Correction, Mismatch, ScanError, ScanEvent, ScanOptions, ScanReport,
};
