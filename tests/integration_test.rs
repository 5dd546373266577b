use chbitfix::block::{encode_block, CompressionMethod, BLOCK_HEADER_SIZE};
use chbitfix::checksum::{Checksum, CHECKSUM_SIZE};
use chbitfix::recovery::{backup_path, repair_file, ScanError, ScanEvent, ScanOptions};
use chbitfix::{BlockHeader, FrameError};
use std::fs;
use std::path::Path;
use tempfile::tempdir;

/// 1-block file: payload `[0x00, 0x00]`, method 1, uncompressed size 2.
fn tiny_block() -> Vec<u8> {
    encode_block(CompressionMethod::from(1), &[0x00, 0x00], 2)
}

fn column_file() -> Vec<u8> {
    let mut file = Vec::new();
    for (i, method) in [CompressionMethod::Lz4, CompressionMethod::Zstd, CompressionMethod::None]
        .into_iter()
        .enumerate()
    {
        let payload: Vec<u8> = (0..48u8).map(|b| b.wrapping_mul(7).wrapping_add(i as u8)).collect();
        file.extend(encode_block(method, &payload, 96));
    }
    file
}

fn repair(path: &Path) -> (chbitfix::ScanReport, Vec<ScanEvent>) {
    let mut events = Vec::new();
    let report = repair_file(path, &ScanOptions::default(), |e| events.push(e.clone())).unwrap();
    (report, events)
}

#[test]
fn test_tiny_block_layout() {
    let file = tiny_block();
    assert_eq!(file.len(), CHECKSUM_SIZE + BLOCK_HEADER_SIZE + 2);
    let header = BlockHeader::read(&file[CHECKSUM_SIZE..]).unwrap();
    assert_eq!(header, BlockHeader { method: 1, compressed_size: 11, uncompressed_size: 2 });
    let stored = Checksum::from_bytes(file[..CHECKSUM_SIZE].try_into().unwrap());
    assert_eq!(stored, Checksum::of(&file[CHECKSUM_SIZE..]));
}

#[test]
fn test_clean_file_reports_no_errors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("clean.bin");
    fs::write(&path, tiny_block()).unwrap();

    let (report, events) = repair(&path);
    assert!(report.is_clean());
    assert_eq!(report.summary(), "No errors");
    assert!(events.is_empty());
    assert_eq!(fs::read(&path).unwrap(), tiny_block());
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_clean_scan_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("column.bin");
    fs::write(&path, column_file()).unwrap();

    let first = repair(&path).0;
    let second = repair(&path).0;
    assert_eq!(first.summary(), second.summary());
    assert_eq!(first.blocks_scanned, 3);
    assert_eq!(fs::read(&path).unwrap(), column_file());
}

#[test]
fn test_payload_bit_three_is_restored() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flipped.bin");
    let mut damaged = tiny_block();
    let payload_start = CHECKSUM_SIZE + BLOCK_HEADER_SIZE;
    damaged[payload_start] = 0x08;
    fs::write(&path, &damaged).unwrap();

    let (report, events) = repair(&path);
    assert_eq!(report.corrected, 1);
    assert_eq!(report.uncorrected, 0);
    assert_eq!(report.summary(), "Completed. Corrected errors: 1, Uncorrected errors: 0");

    let c = &report.corrections[0];
    assert_eq!(c.bit_position, (BLOCK_HEADER_SIZE * 8 + 3) as u64);
    assert_eq!(c.file_offset, payload_start as u64);
    assert_eq!((c.old, c.new), (0x08, 0x00));

    assert_eq!(fs::read(&path).unwrap(), tiny_block());
    assert_eq!(fs::read(backup_path(&path)).unwrap(), damaged);
    assert_eq!(report.backup, Some(backup_path(&path)));

    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            ScanEvent::Mismatch { .. }      => "mismatch",
            ScanEvent::FlipLocated { .. }   => "located",
            ScanEvent::BackupCreated { .. } => "backup",
            ScanEvent::Corrected(_)         => "corrected",
            ScanEvent::Uncorrectable(_)     => "uncorrectable",
        })
        .collect();
    assert_eq!(kinds, ["mismatch", "located", "backup", "corrected"]);
}

#[test]
fn test_several_corrections_share_one_backup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("column.bin");
    let good = column_file();
    let block_len = good.len() / 3;

    let mut damaged = good.clone();
    damaged[CHECKSUM_SIZE + 20] ^= 0x02;
    damaged[2 * block_len + CHECKSUM_SIZE + 40] ^= 0x80;
    fs::write(&path, &damaged).unwrap();

    let (report, events) = repair(&path);
    assert_eq!(report.corrected, 2);
    assert_eq!(fs::read(&path).unwrap(), good);
    assert_eq!(fs::read(backup_path(&path)).unwrap(), damaged);
    let backups = events.iter().filter(|e| matches!(e, ScanEvent::BackupCreated { .. })).count();
    assert_eq!(backups, 1);

    // Second run: nothing to fix, backup untouched.
    let (again, _) = repair(&path);
    assert!(again.is_clean());
    assert_eq!(again.backup, None);
    assert_eq!(fs::read(backup_path(&path)).unwrap(), damaged);
}

#[test]
fn test_existing_backup_is_preserved() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("column.bin");
    let mut damaged = column_file();
    damaged[CHECKSUM_SIZE + 30] ^= 0x10;
    fs::write(&path, &damaged).unwrap();
    fs::write(backup_path(&path), b"older pristine copy").unwrap();

    let (report, events) = repair(&path);
    assert_eq!(report.corrected, 1);
    assert_eq!(report.backup, None);
    assert!(!events.iter().any(|e| matches!(e, ScanEvent::BackupCreated { .. })));
    assert_eq!(fs::read(backup_path(&path)).unwrap(), b"older pristine copy");
    assert_eq!(fs::read(&path).unwrap(), column_file());
}

#[test]
fn test_multi_bit_damage_is_left_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("column.bin");
    let mut damaged = column_file();
    let block_len = damaged.len() / 3;
    damaged[block_len + CHECKSUM_SIZE + 15] ^= 0x03;
    fs::write(&path, &damaged).unwrap();

    let (report, _) = repair(&path);
    assert_eq!(report.corrected, 0);
    assert_eq!(report.uncorrected, 1);
    assert_eq!(report.uncorrectable[0].block_offset, (block_len + CHECKSUM_SIZE) as u64);
    assert_eq!(fs::read(&path).unwrap(), damaged);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_truncated_file_is_fatal() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("clipped.bin");
    let mut file = tiny_block();
    file.pop();
    fs::write(&path, &file).unwrap();

    let err = repair_file(&path, &ScanOptions::default(), |_| {}).unwrap_err();
    assert!(matches!(
        err,
        ScanError::Frame(FrameError::TruncatedPayload { expected: 11, actual: 10, .. })
    ));
    assert_eq!(fs::read(&path).unwrap(), file);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_dry_run_leaves_file_and_backup_alone() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("column.bin");
    let mut damaged = column_file();
    damaged[CHECKSUM_SIZE + 12] ^= 0x20;
    fs::write(&path, &damaged).unwrap();

    let options = ScanOptions { dry_run: true, ..ScanOptions::default() };
    let report = repair_file(&path, &options, |_| {}).unwrap();
    assert_eq!(report.corrected, 1);
    assert!(report.corrections.iter().all(|c| !c.applied));
    assert_eq!(fs::read(&path).unwrap(), damaged);
    assert!(!backup_path(&path).exists());
}

#[test]
fn test_missing_file_is_an_open_error() {
    let dir = tempdir().unwrap();
    let err = repair_file(dir.path().join("absent.bin"), &ScanOptions::default(), |_| {}).unwrap_err();
    assert!(matches!(err, ScanError::Open { .. }));
}

#[test]
fn test_report_serializes_to_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("flipped.bin");
    let mut damaged = tiny_block();
    damaged[CHECKSUM_SIZE + BLOCK_HEADER_SIZE + 1] ^= 0x01;
    fs::write(&path, &damaged).unwrap();

    let (report, _) = repair(&path);
    let json: serde_json::Value = serde_json::to_value(&report).unwrap();
    assert_eq!(json["corrected"], 1);
    assert_eq!(json["corrections"][0]["file_offset"], (CHECKSUM_SIZE + BLOCK_HEADER_SIZE + 1) as u64);
    assert_eq!(json["dry_run"], false);
}
