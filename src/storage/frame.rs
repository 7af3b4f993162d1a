//! On-disk record framing.
//!
//! Layout of one record:
//!
//! ```text
//! [payload_len: u64 LE][crc32(payload): u32 LE][payload bytes]
//! ```

use crate::error::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom};

pub const HEADER_LEN: u64 = 12;

/// Build the full frame for `payload` so it can be written with one `write_all`.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN as usize + payload.len());
    // Length prefix + checksum, then payload
    frame.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

struct Header {
    len: u64,
    crc: u32,
}

/// Fill `buf` completely, or report how many bytes were available before EOF.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_header<R: Read>(reader: &mut R, offset: u64, max_record_size: u64) -> Result<Option<Header>> {
    let mut buf = [0u8; HEADER_LEN as usize];
    let n = read_full(reader, &mut buf).map_err(|e| Error::io("Failed to read record header", e))?;
    if n == 0 {
        return Ok(None);
    }
    if n < buf.len() {
        return Err(Error::TruncatedRecord { offset });
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&buf[..8]);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&buf[8..]);
    let len = u64::from_le_bytes(len_bytes);
    if len > max_record_size {
        return Err(Error::MalformedRecord {
            offset,
            reason: format!("record length {} exceeds limit {}", len, max_record_size),
        });
    }

    Ok(Some(Header {
        len,
        crc: u32::from_le_bytes(crc_bytes),
    }))
}

/// Streams checksummed payloads out of a log file, front to back.
pub struct RecordReader<R> {
    inner: R,
    offset: u64,
    max_record_size: u64,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, max_record_size: u64) -> Self {
        RecordReader {
            inner,
            offset: 0,
            max_record_size,
            failed: false,
        }
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_record(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        let start = self.offset;
        let header = match read_header(&mut self.inner, start, self.max_record_size)? {
            Some(h) => h,
            None => return Ok(None),
        };

        // Read payload
        let mut payload = vec![0u8; header.len as usize];
        let n = read_full(&mut self.inner, &mut payload)
            .map_err(|e| Error::io("Failed to read record payload", e))?;
        if n < payload.len() {
            return Err(Error::TruncatedRecord { offset: start });
        }

        // Verify checksum
        let computed = crc32fast::hash(&payload);
        if computed != header.crc {
            return Err(Error::ChecksumMismatch {
                offset: start,
                stored: header.crc,
                computed,
            });
        }

        self.offset = start + HEADER_LEN + header.len;
        Ok(Some((start, payload)))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<(u64, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Result of walking record headers without reading payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub records: u64,
    /// End of the last complete record.
    pub valid_len: u64,
    /// Set when the file ends inside a record.
    pub torn_at: Option<u64>,
}

/// Count complete records by hopping from header to header.
///
/// Checksums are not verified here; that is left to the reader used by replay.
pub fn scan<R: Read + Seek>(reader: &mut R, file_len: u64, max_record_size: u64) -> Result<ScanSummary> {
    let mut summary = ScanSummary::default();
    loop {
        let offset = summary.valid_len;
        let header = match read_header(reader, offset, max_record_size) {
            Ok(Some(h)) => h,
            Ok(None) => return Ok(summary),
            Err(Error::TruncatedRecord { offset }) => {
                summary.torn_at = Some(offset);
                return Ok(summary);
            }
            Err(e) => return Err(e),
        };

        // Payload runs past EOF: torn tail
        let end = offset + HEADER_LEN + header.len;
        if end > file_len {
            summary.torn_at = Some(offset);
            return Ok(summary);
        }
        // Skip payload
        reader
            .seek(SeekFrom::Start(end))
            .map_err(|e| Error::io("Failed to seek past record", e))?;
        summary.records += 1;
        summary.valid_len = end;
    }
}
