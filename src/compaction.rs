//! Snapshot contract and crash-safe log rewriting.

use crate::error::{Error, Result};
use crate::op::Operation;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Produces the current state as a list of operations that rebuild it from empty.
///
/// This is the whole basis of compaction: replaying `produce_snapshot()` taken
/// at time T must yield the same state as replaying every operation added up
/// to T. The result must reflect a consistent view of the state, never one
/// with a mutation half applied.
///
/// The log calls this while holding its writer lock, so implementations must
/// not call back into the same log.
pub trait SnapshotProducer {
    type Op: Operation;

    fn produce_snapshot(&self) -> Vec<Self::Op>;
}

impl<F, O> SnapshotProducer for F
where
    F: Fn() -> Vec<O>,
    O: Operation,
{
    type Op = O;

    fn produce_snapshot(&self) -> Vec<O> {
        self()
    }
}

/// When `compact_if_necessary` should rewrite the log.
///
/// Limits apply to growth since the last baseline. Reaching either limit
/// triggers compaction; with neither set, only explicit `compact` calls do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionPolicy {
    pub max_records: Option<u64>,
    pub max_bytes: Option<u64>,
}

impl CompactionPolicy {
    pub fn records(max_records: u64) -> Self {
        CompactionPolicy {
            max_records: Some(max_records),
            max_bytes: None,
        }
    }

    pub fn bytes(max_bytes: u64) -> Self {
        CompactionPolicy {
            max_records: None,
            max_bytes: Some(max_bytes),
        }
    }

    pub fn never() -> Self {
        CompactionPolicy::default()
    }

    pub fn is_exceeded(&self, growth_records: u64, growth_bytes: u64) -> bool {
        self.max_records.is_some_and(|max| growth_records >= max)
            || self.max_bytes.is_some_and(|max| growth_bytes >= max)
    }
}

/// Sibling path used while a compaction is in flight: `ops.log` -> `ops.log.compact.tmp`.
pub fn temp_path(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("Log path has no file name: {}", path.display())))?;
    let mut tmp: OsString = name.to_os_string();
    tmp.push(".compact.tmp");
    Ok(path.with_file_name(tmp))
}

/// Fsync the directory holding `path` so a create or rename inside it is durable.
pub fn sync_parent(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            let dir = File::open(parent)
                .map_err(|e| Error::io("Failed to open parent directory", e))?;
            dir.sync_all()
                .map_err(|e| Error::io("Failed to fsync parent directory", e))?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// A rewrite whose rename has gone through.
#[derive(Debug)]
pub struct Rewritten {
    /// Append handle on the new file
    pub file: File,
    /// Set when fsyncing the directory after the rename failed. The new file
    /// is already at the log's path, so `file` must be used either way.
    pub sync_error: Option<Error>,
}

/// Replace the file at `path` with exactly `frames`, atomically.
///
/// The frames go to a temp file which is fsynced and then renamed over `path`,
/// so a crash leaves either the old file or the new one. The returned append
/// handle is opened before the rename so it refers to the new contents
/// whatever happens to the path afterwards.
///
/// An `Err` means the rename never happened and `path` still holds the old
/// file. Once the rename succeeds the result is always `Ok`.
pub fn rewrite_atomically(path: &Path, frames: &[Vec<u8>]) -> Result<Rewritten> {
    rewrite_atomically_with(path, frames, sync_parent)
}

pub(crate) fn rewrite_atomically_with<S>(
    path: &Path,
    frames: &[Vec<u8>],
    sync_dir: S,
) -> Result<Rewritten>
where
    S: FnOnce(&Path) -> Result<()>,
{
    let tmp_path = temp_path(path)?;
    let file = match write_and_rename(path, &tmp_path, frames) {
        Ok(file) => file,
        Err(e) => {
            if tmp_path.exists() {
                if let Err(cleanup) = fs::remove_file(&tmp_path) {
                    tracing::warn!(
                        path = %tmp_path.display(),
                        error = %cleanup,
                        "Failed to remove compaction temp file"
                    );
                }
            }
            return Err(e);
        }
    };

    // Fsync parent directory so the rename survives a crash
    let sync_error = sync_dir(path).err();
    Ok(Rewritten { file, sync_error })
}

fn write_and_rename(path: &Path, tmp_path: &Path, frames: &[Vec<u8>]) -> Result<File> {
    // Write snapshot records to temp file
    let mut file = File::create(tmp_path)
        .map_err(|e| Error::io("Failed to create compaction temp file", e))?;
    for frame in frames {
        file.write_all(frame)
            .map_err(|e| Error::io("Failed to write compacted record", e))?;
    }

    // Fsync for crash safety
    file.sync_all()
        .map_err(|e| Error::io("Failed to fsync compaction temp file", e))?;
    drop(file);

    let handle = OpenOptions::new()
        .read(true)
        .append(true)
        .open(tmp_path)
        .map_err(|e| Error::io("Failed to reopen compaction temp file", e))?;

    // Atomic rename
    fs::rename(tmp_path, path)
        .map_err(|e| Error::io("Failed to rename compacted log into place", e))?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::StateChange;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_policy_thresholds() {
        let p = CompactionPolicy::records(3);
        assert!(!p.is_exceeded(2, u64::MAX));
        assert!(p.is_exceeded(3, 0));

        let p = CompactionPolicy::bytes(100);
        assert!(!p.is_exceeded(1_000, 99));
        assert!(p.is_exceeded(0, 100));

        let p = CompactionPolicy {
            max_records: Some(10),
            max_bytes: Some(100),
        };
        assert!(p.is_exceeded(10, 0));
        assert!(p.is_exceeded(0, 100));
        assert!(!p.is_exceeded(9, 99));

        assert!(!CompactionPolicy::never().is_exceeded(u64::MAX, u64::MAX));
    }

    #[test]
    fn test_temp_path_is_sibling() {
        let tmp = temp_path(Path::new("/data/ops.log")).unwrap();
        assert_eq!(tmp, PathBuf::from("/data/ops.log.compact.tmp"));
        assert!(temp_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_closure_is_snapshot_producer() {
        let producer = || vec![crate::state_change!("append", 1)];
        let ops: Vec<StateChange> = producer.produce_snapshot();
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn test_rewrite_replaces_contents_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.log");
        fs::write(&path, b"old contents").unwrap();

        let rewritten = rewrite_atomically(&path, &[b"ab".to_vec(), b"cd".to_vec()]).unwrap();
        assert!(rewritten.sync_error.is_none());
        let mut handle = rewritten.file;
        assert_eq!(fs::read(&path).unwrap(), b"abcd");
        assert!(!temp_path(&path).unwrap().exists());

        // The returned handle appends to the new file
        handle.write_all(b"ef").unwrap();
        let mut contents = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"abcdef");
    }

    #[test]
    fn test_failed_rewrite_leaves_original() {
        let dir = TempDir::new().unwrap();
        // Renaming a file over a non-empty directory fails
        let path = dir.path().join("ops.log");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("keep"), b"x").unwrap();

        assert!(rewrite_atomically(&path, &[b"new".to_vec()]).is_err());
        assert!(path.join("keep").exists());
        assert!(!temp_path(&path).unwrap().exists());
    }

    #[test]
    fn test_directory_sync_failure_still_returns_new_handle() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ops.log");
        fs::write(&path, b"old").unwrap();

        let rewritten = rewrite_atomically_with(&path, &[b"new".to_vec()], |_| {
            Err(Error::io(
                "Failed to open parent directory",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ))
        })
        .unwrap();
        assert!(matches!(rewritten.sync_error, Some(Error::Io { .. })));
        assert_eq!(fs::read(&path).unwrap(), b"new");

        let mut handle = rewritten.file;
        handle.write_all(b"!").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new!");
    }
}
