//! A persisted operation log.
//!
//! Lets an in-memory state machine survive restarts: every mutation is
//! appended to a file as an operation, state is rebuilt by replaying those
//! operations in order, and the file is periodically compacted down to a
//! snapshot of the current state.
//!
//! ```no_run
//! use oplog::{JsonCodec, Log, Result, StateChange};
//! use oplog::op::params;
//!
//! # fn main() -> Result<()> {
//! let mut numbers: Vec<i64> = Vec::new();
//! let log = Log::open("numbers.log", || Vec::<StateChange>::new(), JsonCodec)?;
//! log.replay(&mut |change: StateChange| -> Result<()> {
//!     numbers.push(params::as_i64(&change, 0)?);
//!     Ok(())
//! })?;
//!
//! numbers.push(7);
//! log.add(&oplog::state_change!("append", 7))?;
//! log.compact_if_necessary()?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod compaction;
pub mod config;
pub mod error;
pub mod logger;
pub mod op;
pub mod replay;
pub mod storage;

pub use codec::{BincodeCodec, Codec, FnCodec, JsonCodec};
pub use compaction::{CompactionPolicy, SnapshotProducer};
pub use config::Config;
pub use error::{Error, Result};
pub use op::{Operation, StateChange};
pub use replay::{Handlers, Replay};
pub use storage::{Log, LogStats};

use sha2::{Digest, Sha256};

/// Calculate SHA256 digest
pub fn sha256_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}
