//! Randomised checks of the single-bit repair guarantees.

use chbitfix::block::{encode_block, CompressionMethod, BLOCK_HEADER_SIZE};
use chbitfix::checksum::CHECKSUM_SIZE;
use chbitfix::recovery::{diagnose, scan, search, BitFlip, Diagnosis, ScanOptions};
use chbitfix::Checksum;
use proptest::prelude::*;
use std::io::Cursor;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn any_single_flip_is_located(data in prop::collection::vec(any::<u8>(), 1..64), seed in any::<u64>()) {
        let expected = Checksum::of(&data);
        let position = seed % (data.len() as u64 * 8);
        let mut raw = data.clone();
        raw[(position / 8) as usize] ^= 1 << (position % 8);

        let found = search(&mut raw, expected);
        prop_assert_eq!(found, Some(BitFlip::new(position)));
        prop_assert_eq!(raw, data);
    }

    #[test]
    fn failed_search_leaves_buffer_unchanged(
        data in prop::collection::vec(any::<u8>(), 2..48),
        a in any::<u64>(),
        b in any::<u64>(),
    ) {
        let bits = data.len() as u64 * 8;
        let (a, b) = (a % bits, b % bits);
        prop_assume!(a != b);

        let expected = Checksum::of(&data);
        let mut raw = data.clone();
        for p in [a, b] {
            raw[(p / 8) as usize] ^= 1 << (p % 8);
        }
        let corrupted = raw.clone();

        let diagnosis = diagnose(&mut raw, expected);
        prop_assert!(matches!(diagnosis, Diagnosis::Uncorrectable { .. }), "{:?}", diagnosis);
        prop_assert_eq!(raw, corrupted);
    }

    #[test]
    fn scan_restores_a_flipped_payload(
        payload in prop::collection::vec(any::<u8>(), 1..40),
        seed in any::<u64>(),
    ) {
        let good = encode_block(CompressionMethod::Lz4, &payload, 100);
        // Payload bits only, so the framing stays readable.
        let position = (BLOCK_HEADER_SIZE * 8) as u64 + seed % (payload.len() as u64 * 8);
        let mut damaged = good.clone();
        damaged[CHECKSUM_SIZE + (position / 8) as usize] ^= 1 << (position % 8);

        let mut cur = Cursor::new(damaged);
        let report = scan(&mut cur, None, &ScanOptions::default(), |_| {}).unwrap();
        prop_assert_eq!(report.corrected, 1);
        prop_assert_eq!(report.corrections[0].bit_position, position);
        prop_assert_eq!(cur.into_inner(), good);
    }
}
