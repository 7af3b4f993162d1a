use crate::codec::{Codec, JsonCodec};
use crate::compaction::{self, CompactionPolicy, SnapshotProducer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::op::Operation;
use crate::replay::{replay_records, Replay};
use crate::storage::frame::{self, encode_frame, RecordReader};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Counters describing the log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Complete records in the file
    pub records: u64,
    /// File length in bytes
    pub bytes: u64,
    /// Records appended since the last baseline
    pub growth_records: u64,
    /// Bytes appended since the last baseline
    pub growth_bytes: u64,
}

/// The append side of the log. Only ever touched under the log's mutex.
struct Writer {
    file: File,
    stats: LogStats,
    /// Set when a failed append could not be undone; the file may end in a
    /// torn frame, so nothing more may be written through this handle.
    poisoned: Option<String>,
}

impl Writer {
    fn new(file: File) -> Self {
        Writer {
            file,
            stats: LogStats::default(),
            poisoned: None,
        }
    }

    fn check_usable(&self) -> Result<()> {
        match &self.poisoned {
            Some(reason) => Err(Error::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    /// Write `frames` and fsync before reporting success.
    ///
    /// On failure the file is cut back to its previous length so a torn frame
    /// never sits in front of later appends.
    fn append(&mut self, frames: &[u8], records: u64) -> Result<()> {
        self.check_usable()?;
        if let Err(e) = self.write_synced(frames) {
            self.rollback(&e);
            return Err(e);
        }
        let bytes = frames.len() as u64;
        self.stats.records += records;
        self.stats.bytes += bytes;
        self.stats.growth_records += records;
        self.stats.growth_bytes += bytes;
        Ok(())
    }

    fn write_synced(&mut self, frames: &[u8]) -> Result<()> {
        // Write length prefix + checksum + payload
        self.file
            .write_all(frames)
            .map_err(|e| Error::io("Failed to append to log", e))?;

        // Fsync for crash safety
        self.file
            .sync_all()
            .map_err(|e| Error::io("Failed to fsync log", e))
    }

    /// Cut the file back to the last confirmed length. If that fails too the
    /// writer is poisoned and every later write is refused.
    fn rollback(&mut self, cause: &Error) {
        let len = self.stats.bytes;
        if let Err(e) = self.file.set_len(len).and_then(|_| self.file.sync_all()) {
            tracing::error!(len, error = %e, cause = %cause, "Failed to truncate log after failed append");
            self.poisoned = Some(format!(
                "append failed ({}) and truncating to {} bytes failed ({})",
                cause, len, e
            ));
        }
    }
}

/// A durable, replayable log of state-mutating operations.
///
/// Every [`add`](Log::add) is fsynced before it returns. [`replay`](Log::replay)
/// rebuilds state by feeding the stored operations back in order, and
/// [`compact`](Log::compact) swaps the whole file for the baseline produced
/// by `P`, so the log stays proportional to the state rather than its history.
///
/// `add`, `compact` and `compact_if_necessary` serialize on one writer lock;
/// a compaction blocks appends until the new file is in place. `replay` reads
/// through its own handle and must not run while other threads are appending.
pub struct Log<P: SnapshotProducer, C = JsonCodec> {
    path: PathBuf,
    producer: P,
    codec: C,
    policy: CompactionPolicy,
    max_record_size: u64,
    writer: Mutex<Writer>,
}

impl<P, C> Log<P, C>
where
    P: SnapshotProducer,
    C: Codec,
{
    /// Open or create the log at `path` with default settings.
    pub fn open(path: impl AsRef<Path>, producer: P, codec: C) -> Result<Self> {
        Self::open_with_config(&Config::with_log_path(path.as_ref()), producer, codec)
    }

    /// Open or create the log described by `config`.
    ///
    /// An empty file is seeded with `producer`'s current snapshot, so a fresh
    /// log replays to the same state the caller started from. A non-empty file
    /// is only scanned to count its records; nothing is applied until `replay`.
    pub fn open_with_config(config: &Config, producer: P, codec: C) -> Result<Self> {
        let path = config.log_path.clone();
        ensure_dir(&path)?;
        remove_stale_temp(&path)?;

        let existed = path.exists();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::io(format!("Failed to open log {}", path.display()), e))?;
        let file_len = file
            .metadata()
            .map_err(|e| Error::io("Failed to stat log", e))?
            .len();

        let mut log = Log {
            path,
            producer,
            codec,
            policy: config.compaction,
            max_record_size: config.max_record_size,
            writer: Mutex::new(Writer::new(file)),
        };

        if file_len == 0 {
            log.seed(existed)?;
        } else {
            log.load_existing(file_len, config.repair_torn_tail)?;
        }

        Ok(log)
    }

    fn seed(&mut self, existed: bool) -> Result<()> {
        // Serialize the starting state as the first baseline
        let baseline = self.producer.produce_snapshot();
        let frames = self.encode_all(&baseline)?;
        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);
        writer.append(&frames.concat(), frames.len() as u64)?;
        writer.stats.growth_records = 0;
        writer.stats.growth_bytes = 0;
        // Fsync parent directory so the new file's entry is durable
        if !existed {
            compaction::sync_parent(&self.path)?;
        }

        tracing::info!(
            path = %self.path.display(),
            records = writer.stats.records,
            "Created log from snapshot"
        );
        Ok(())
    }

    fn load_existing(&mut self, file_len: u64, repair_torn_tail: bool) -> Result<()> {
        // Walk record headers to count complete records
        let scan_file = File::open(&self.path)
            .map_err(|e| Error::io("Failed to open log for scanning", e))?;
        let summary = frame::scan(&mut BufReader::new(scan_file), file_len, self.max_record_size)?;

        let writer = self.writer.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(offset) = summary.torn_at {
            if !repair_torn_tail {
                return Err(Error::TruncatedRecord { offset });
            }
            tracing::warn!(
                path = %self.path.display(),
                offset,
                dropped_bytes = file_len - summary.valid_len,
                "Truncating torn record at end of log"
            );
            writer
                .file
                .set_len(summary.valid_len)
                .and_then(|_| writer.file.sync_all())
                .map_err(|e| Error::io("Failed to truncate torn log tail", e))?;
        }

        // The size of the last baseline is unknown, so everything counts as growth.
        writer.stats = LogStats {
            records: summary.records,
            bytes: summary.valid_len,
            growth_records: summary.records,
            growth_bytes: summary.valid_len,
        };

        tracing::info!(
            path = %self.path.display(),
            records = summary.records,
            bytes = summary.valid_len,
            "Opened existing log"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn policy(&self) -> CompactionPolicy {
        self.policy
    }

    pub fn stats(&self) -> LogStats {
        self.writer().stats
    }

    /// Durably append one operation.
    ///
    /// Returns only once the record has been fsynced. Never compacts; call
    /// [`compact_if_necessary`](Log::compact_if_necessary) for that.
    ///
    /// If the append fails and the file cannot be cut back, the log refuses
    /// every later `add` and `compact` with [`Error::Poisoned`] until it is
    /// reopened.
    pub fn add(&self, op: &P::Op) -> Result<()> {
        // Serialize operation
        let frame = self.encode(op)?;
        let mut writer = self.writer();
        writer.append(&frame, 1)?;
        tracing::trace!(
            records = writer.stats.records,
            bytes = writer.stats.bytes,
            "Appended operation"
        );
        Ok(())
    }

    /// Rebuild state by applying every stored operation, in order, to `handler`.
    ///
    /// Stops at the first error: a torn or corrupt record, an operation the
    /// handler does not recognise, or an error returned by the handler itself.
    /// State built up to that point should be discarded. The file is never
    /// modified. Returns the number of operations applied.
    pub fn replay<H>(&self, handler: &mut H) -> Result<u64>
    where
        H: Replay<P::Op> + ?Sized,
    {
        let file = File::open(&self.path)
            .map_err(|e| Error::io(format!("Failed to open log {}", self.path.display()), e))?;
        let reader = RecordReader::new(BufReader::new(file), self.max_record_size);
        let applied = replay_records::<_, _, P::Op, _>(reader, &self.codec, handler)?;

        tracing::debug!(path = %self.path.display(), applied, "Replayed log");
        Ok(applied)
    }

    /// Replace the log with the producer's current snapshot.
    ///
    /// The new contents are written to a temp file and renamed over the log,
    /// so after a crash the path holds either the old log or the new one.
    pub fn compact(&self) -> Result<()> {
        let mut writer = self.writer();
        self.compact_locked(&mut writer)
    }

    /// Compact if growth since the last baseline has reached the configured
    /// policy. Returns whether a compaction ran.
    pub fn compact_if_necessary(&self) -> Result<bool> {
        let mut writer = self.writer();
        let LogStats {
            growth_records,
            growth_bytes,
            ..
        } = writer.stats;
        if !self.policy.is_exceeded(growth_records, growth_bytes) {
            tracing::debug!(growth_records, growth_bytes, "Compaction not needed");
            return Ok(false);
        }
        self.compact_locked(&mut writer)?;
        Ok(true)
    }

    /// Fsync and release the file handle.
    pub fn close(self) -> Result<()> {
        let writer = self.writer.into_inner().unwrap_or_else(PoisonError::into_inner);
        writer
            .file
            .sync_all()
            .map_err(|e| Error::io("Failed to fsync log on close", e))
    }

    fn compact_locked(&self, writer: &mut Writer) -> Result<()> {
        self.compact_with(writer, compaction::sync_parent)
    }

    fn compact_with<S>(&self, writer: &mut Writer, sync_dir: S) -> Result<()>
    where
        S: FnOnce(&Path) -> Result<()>,
    {
        writer.check_usable()?;

        // Serialize snapshot
        let baseline = self.producer.produce_snapshot();
        let frames = self.encode_all(&baseline)?;
        let compaction::Rewritten { file, sync_error } =
            compaction::rewrite_atomically_with(&self.path, &frames, sync_dir)?;

        // The path now holds the new file, so switch to it before reporting
        // any directory fsync failure
        let before = writer.stats;
        writer.file = file;
        writer.stats = LogStats {
            records: frames.len() as u64,
            bytes: frames.iter().map(|f| f.len() as u64).sum(),
            growth_records: 0,
            growth_bytes: 0,
        };

        if let Some(e) = sync_error {
            tracing::warn!(
                path = %self.path.display(),
                error = %e,
                "Compacted log is in place but its directory entry may not be durable"
            );
            return Err(e);
        }

        tracing::info!(
            path = %self.path.display(),
            records_before = before.records,
            bytes_before = before.bytes,
            records_after = writer.stats.records,
            bytes_after = writer.stats.bytes,
            "Compacted log"
        );
        Ok(())
    }

    fn encode(&self, op: &P::Op) -> Result<Vec<u8>> {
        let change = op.to_state_change();
        let payload = self
            .codec
            .encode(&change)
            .map_err(|e| Error::Encode(format!("{}: {}", change.key, e)))?;
        if payload.len() as u64 > self.max_record_size {
            return Err(Error::Encode(format!(
                "{}: record of {} bytes exceeds limit {}",
                change.key,
                payload.len(),
                self.max_record_size
            )));
        }
        Ok(encode_frame(&payload))
    }

    fn encode_all(&self, ops: &[P::Op]) -> Result<Vec<Vec<u8>>> {
        ops.iter().map(|op| self.encode(op)).collect()
    }

    fn writer(&self) -> MutexGuard<'_, Writer> {
        // Writer state only changes after a successful write, so it is still
        // consistent if a previous holder panicked.
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ensure the log's directory exists
fn ensure_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::io("Failed to create log directory", e))?;
        }
    }
    Ok(())
}

/// A temp file left behind means a compaction died before its rename; the
/// log itself is still the old, complete file.
fn remove_stale_temp(path: &Path) -> Result<()> {
    let tmp = compaction::temp_path(path)?;
    if tmp.exists() {
        tracing::warn!(path = %tmp.display(), "Removing temp file from interrupted compaction");
        fs::remove_file(&tmp).map_err(|e| Error::io("Failed to remove stale compaction file", e))?;
    }
    Ok(())
}
