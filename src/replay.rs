//! Replay engine: decode stored records and hand them, in order, to the
//! caller's state machine.

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::op::{Operation, StateChange};
use crate::storage::frame::RecordReader;
use std::collections::HashMap;
use std::io::Read;

/// Receives replayed operations. Any error aborts the replay and is returned
/// to the caller unchanged.
pub trait Replay<O> {
    fn apply(&mut self, op: O) -> Result<()>;
}

impl<O, F> Replay<O> for F
where
    F: FnMut(O) -> Result<()>,
{
    fn apply(&mut self, op: O) -> Result<()> {
        self(op)
    }
}

type Handler<'a> = Box<dyn FnMut(&StateChange) -> Result<()> + 'a>;

/// String-keyed handler table for callers that work with raw [`StateChange`]s.
///
/// Each handler receives the whole envelope, so it can use the checked
/// accessors in [`crate::op::params`]. A record whose key has no registered
/// handler fails the replay with [`Error::UnrecognizedOperation`].
#[derive(Default)]
pub struct Handlers<'a> {
    handlers: HashMap<String, Handler<'a>>,
}

impl<'a> Handlers<'a> {
    pub fn new() -> Self {
        Handlers {
            handlers: HashMap::new(),
        }
    }

    /// Register `handler` for `key`, replacing any previous one.
    pub fn on<F>(mut self, key: impl Into<String>, handler: F) -> Self
    where
        F: FnMut(&StateChange) -> Result<()> + 'a,
    {
        self.handlers.insert(key.into(), Box::new(handler));
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }
}

impl Replay<StateChange> for Handlers<'_> {
    fn apply(&mut self, op: StateChange) -> Result<()> {
        let handler = self
            .handlers
            .get_mut(&op.key)
            .ok_or_else(|| Error::UnrecognizedOperation(op.key.clone()))?;
        handler(&op)
    }
}

/// Decode every record from `reader` and apply it through `handler`.
///
/// Stops at the first framing, decode, dispatch or handler error. Returns the
/// number of operations applied.
pub fn replay_records<R, C, O, H>(reader: RecordReader<R>, codec: &C, handler: &mut H) -> Result<u64>
where
    R: Read,
    C: Codec + ?Sized,
    O: Operation,
    H: Replay<O> + ?Sized,
{
    let mut applied = 0u64;
    for record in reader {
        let (offset, payload) = record?;
        let change = codec.decode(&payload).map_err(|e| Error::Decode {
            offset,
            reason: e.to_string(),
        })?;
        let op = O::from_state_change(change)?;
        handler.apply(op)?;
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::op::params;
    use crate::storage::frame::encode_frame;
    use std::io::Cursor;

    const MAX: u64 = 1 << 20;

    fn log_bytes(changes: &[StateChange]) -> Vec<u8> {
        changes
            .iter()
            .flat_map(|c| encode_frame(&JsonCodec.encode(c).unwrap()))
            .collect()
    }

    fn reader(bytes: Vec<u8>) -> RecordReader<Cursor<Vec<u8>>> {
        RecordReader::new(Cursor::new(bytes), MAX)
    }

    #[test]
    fn test_handlers_dispatch_in_order() {
        let bytes = log_bytes(&[
            crate::state_change!("push", "a"),
            crate::state_change!("push", "b"),
            crate::state_change!("pop"),
            crate::state_change!("push", "c"),
        ]);

        let items = std::cell::RefCell::new(Vec::<String>::new());
        let mut handlers = Handlers::new()
            .on("push", |c: &StateChange| {
                items.borrow_mut().push(params::as_str(c, 0)?.to_string());
                Ok(())
            })
            .on("pop", |_: &StateChange| {
                items.borrow_mut().pop();
                Ok(())
            });
        let n = replay_records(reader(bytes), &JsonCodec, &mut handlers).unwrap();
        drop(handlers);

        assert_eq!(n, 4);
        assert_eq!(items.into_inner(), vec!["a", "c"]);
    }

    #[test]
    fn test_unknown_key_fails() {
        let bytes = log_bytes(&[crate::state_change!("push", 1), crate::state_change!("frobnicate")]);
        let mut handlers = Handlers::new().on("push", |_: &StateChange| Ok(()));
        let err = replay_records(reader(bytes), &JsonCodec, &mut handlers).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedOperation(ref k) if k == "frobnicate"));
        assert!(!err.is_corruption());
    }

    #[test]
    fn test_handler_error_propagates_verbatim() {
        let bytes = log_bytes(&[crate::state_change!("set", "x"), crate::state_change!("set", 2)]);
        let mut seen = 0;
        let mut handler = |change: StateChange| -> Result<()> {
            seen += 1;
            params::as_i64(&change, 0).map(|_| ())
        };
        let err = replay_records::<_, _, StateChange, _>(reader(bytes), &JsonCodec, &mut handler)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParams { ref key, .. } if key == "set"));
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_decode_failure_reports_offset() {
        let mut bytes = log_bytes(&[crate::state_change!("a")]);
        let second = bytes.len() as u64;
        bytes.extend(encode_frame(b"not json"));
        let mut handler = |_: StateChange| -> Result<()> { Ok(()) };
        let err = replay_records::<_, _, StateChange, _>(reader(bytes), &JsonCodec, &mut handler)
            .unwrap_err();
        assert!(matches!(err, Error::Decode { offset, .. } if offset == second));
        assert!(err.is_corruption());
    }
}
