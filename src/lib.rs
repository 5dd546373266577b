pub mod cityhash;
pub mod checksum;
pub mod block;
pub mod recovery;

pub use checksum::Checksum;
pub use block::{BlockHeader, CompressionMethod, FrameError, encode_block, read_block};
pub use recovery::{repair_file, scan, ScanError, ScanEvent, ScanOptions, ScanReport};
