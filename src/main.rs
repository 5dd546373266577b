use chbitfix::block::DEFAULT_MAX_BLOCK_SIZE;
use chbitfix::recovery::{repair_file, ScanEvent, ScanOptions};
use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "chbitfix",
    version,
    about = "Find and repair single-bit flips in checksummed compressed column files",
)]
struct Cli {
    /// File to verify and repair in place
    file: PathBuf,
    /// Locate flips but do not write or back up anything
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Print the scan report as JSON after the summary
    #[arg(long)]
    json: bool,
    /// Reject blocks declaring more compressed bytes than this
    #[arg(long, default_value_t = DEFAULT_MAX_BLOCK_SIZE)]
    max_block_size: u64,
    /// Log verbosity on stderr (-v, -vv, -vvv); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let options = ScanOptions {
        dry_run:        cli.dry_run,
        max_block_size: cli.max_block_size,
    };

    let report = repair_file(&cli.file, &options, print_event)?;
    println!("{}", report.summary());
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn print_event(event: &ScanEvent) {
    match event {
        ScanEvent::Mismatch { block_offset, expected, actual, size } => {
            println!(
                "Checksum doesn't match: corrupted data at byte {block_offset}. \
                 Reference: {expected}. Actual: {actual}. Size of compressed block: {size}"
            );
        }
        ScanEvent::FlipLocated { byte_index, bit, .. } => {
            println!(
                "    The mismatch is caused by single bit flip in data block at byte {byte_index}, bit {bit}"
            );
        }
        ScanEvent::BackupCreated { path } => {
            println!("    backup file to {}", path.display());
        }
        ScanEvent::Corrected(c) if c.applied => {
            println!(
                "    Fixing in file at byte {}. Old value: 0x{:x}. New value: 0x{:x}",
                c.file_offset, c.old, c.new,
            );
        }
        ScanEvent::Corrected(c) => {
            println!(
                "    Dry run: would fix byte {}. Old value: 0x{:x}. New value: 0x{:x}",
                c.file_offset, c.old, c.new,
            );
        }
        ScanEvent::Uncorrectable(_) => {
            println!("    Error: the mismatch is not caused by single bit flip. It can't be fixed!");
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "chbitfix=warn",
        1 => "chbitfix=info",
        2 => "chbitfix=debug",
        _ => "chbitfix=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
