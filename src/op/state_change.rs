use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One state-mutating operation as it is stored in the log.
///
/// `key` names the kind of operation, `params` are its positional arguments.
/// Parameters are type-erased: after a round trip through a generic codec a
/// value may come back with a different concrete type (an integer written by
/// one codec can be read back as a float by another), so consumers should go
/// through the helpers in [`crate::op::params`] rather than match on the raw
/// `Value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub key: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

impl StateChange {
    pub fn new(key: impl Into<String>, params: Vec<Value>) -> Self {
        StateChange {
            key: key.into(),
            params,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Build a [`StateChange`] from a key and any number of serializable parameters.
///
/// ```
/// let change = oplog::state_change!("append", 7);
/// assert_eq!(change.key, "append");
/// assert_eq!(change.params, vec![oplog::op::json!(7)]);
/// ```
#[macro_export]
macro_rules! state_change {
    ($key:expr $(, $param:expr)* $(,)?) => {
        $crate::op::StateChange::new($key, vec![$($crate::op::json!($param)),*])
    };
}

/// A typed operation that can travel through the log.
///
/// Implement this for a closed enum of the operations a state machine
/// understands. `from_state_change` should match on the key exhaustively and
/// return [`crate::Error::UnrecognizedOperation`] for anything else, which
/// keeps records written by a newer build from being silently skipped.
pub trait Operation: Sized {
    fn to_state_change(&self) -> StateChange;

    fn from_state_change(change: StateChange) -> Result<Self>;
}

impl Operation for StateChange {
    fn to_state_change(&self) -> StateChange {
        self.clone()
    }

    fn from_state_change(change: StateChange) -> Result<Self> {
        Ok(change)
    }
}
