pub mod frame;
pub mod log;

pub use frame::{RecordReader, ScanSummary};
pub use log::{Log, LogStats};

use crate::error::{Error, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Open a log file for sequential, read-only record access.
///
/// Useful for tooling that needs to look at a log without the state machine
/// that owns it. Yields `(offset, payload)` pairs; decoding is up to the caller.
pub fn read_records(path: &Path, max_record_size: u64) -> Result<RecordReader<BufReader<File>>> {
    let file = File::open(path)
        .map_err(|e| Error::io(format!("Failed to open log {}", path.display()), e))?;
    Ok(RecordReader::new(BufReader::new(file), max_record_size))
}
