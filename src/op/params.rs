//! Checked access to the positional parameters of a [`StateChange`].
//!
//! The envelope does not enforce arity or types; whoever interprets a key
//! decides what its parameters must look like and uses these helpers to say so.

use crate::error::{Error, Result};
use crate::op::StateChange;
use serde_json::Value;

fn invalid(change: &StateChange, reason: String) -> Error {
    Error::InvalidParams {
        key: change.key.clone(),
        reason,
    }
}

/// Fail unless the change carries exactly `expected` parameters.
pub fn expect_arity(change: &StateChange, expected: usize) -> Result<()> {
    if change.params.len() != expected {
        return Err(invalid(
            change,
            format!("received {} parameters; expected {}", change.params.len(), expected),
        ));
    }
    Ok(())
}

/// Parameter at `index`, or an error naming the missing position.
pub fn get(change: &StateChange, index: usize) -> Result<&Value> {
    change
        .params
        .get(index)
        .ok_or_else(|| invalid(change, format!("missing parameter {}", index)))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read an integer parameter.
///
/// Accepts floats with no fractional part, since codecs that only know one
/// numeric type hand integers back as floats.
pub fn as_i64(change: &StateChange, index: usize) -> Result<i64> {
    let value = get(change, index)?;
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    if let Some(f) = value.as_f64() {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            return Ok(f as i64);
        }
        return Err(invalid(
            change,
            format!("parameter {} is {}; expected an integer", index, f),
        ));
    }
    Err(invalid(
        change,
        format!("parameter {} has type {}; expected an integer", index, type_name(value)),
    ))
}

pub fn as_u64(change: &StateChange, index: usize) -> Result<u64> {
    let value = get(change, index)?;
    if let Some(u) = value.as_u64() {
        return Ok(u);
    }
    let i = as_i64(change, index)?;
    u64::try_from(i).map_err(|_| {
        invalid(
            change,
            format!("parameter {} is {}; expected a non-negative integer", index, i),
        )
    })
}

pub fn as_f64(change: &StateChange, index: usize) -> Result<f64> {
    let value = get(change, index)?;
    value.as_f64().ok_or_else(|| {
        invalid(
            change,
            format!("parameter {} has type {}; expected a number", index, type_name(value)),
        )
    })
}

pub fn as_str(change: &StateChange, index: usize) -> Result<&str> {
    let value = get(change, index)?;
    value.as_str().ok_or_else(|| {
        invalid(
            change,
            format!("parameter {} has type {}; expected a string", index, type_name(value)),
        )
    })
}

pub fn as_bool(change: &StateChange, index: usize) -> Result<bool> {
    let value = get(change, index)?;
    value.as_bool().ok_or_else(|| {
        invalid(
            change,
            format!("parameter {} has type {}; expected a bool", index, type_name(value)),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn change(params: Vec<Value>) -> StateChange {
        StateChange::new("test", params)
    }

    #[test]
    fn test_integer_from_float_representation() {
        // 7 written as an integer, read back by a float-only decoder
        let c = change(vec![json!(7.0)]);
        assert_eq!(as_i64(&c, 0).unwrap(), 7);
        assert_eq!(as_u64(&c, 0).unwrap(), 7);
    }

    #[test]
    fn test_integer_rejects_fraction() {
        let c = change(vec![json!(7.5)]);
        let err = as_i64(&c, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidParams { .. }));
    }

    #[test]
    fn test_u64_rejects_negative() {
        let c = change(vec![json!(-1)]);
        assert!(as_u64(&c, 0).is_err());
        assert_eq!(as_i64(&c, 0).unwrap(), -1);
    }

    #[test]
    fn test_large_u64_survives() {
        let c = change(vec![json!(u64::MAX)]);
        assert_eq!(as_u64(&c, 0).unwrap(), u64::MAX);
    }

    #[test]
    fn test_arity() {
        let c = change(vec![json!(1), json!(2)]);
        assert!(expect_arity(&c, 2).is_ok());
        let err = expect_arity(&c, 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid parameters for test: received 2 parameters; expected 1"
        );
    }

    #[test]
    fn test_missing_and_mistyped() {
        let c = change(vec![json!("x")]);
        assert_eq!(as_str(&c, 0).unwrap(), "x");
        assert!(as_bool(&c, 0).is_err());
        assert!(as_f64(&c, 0).is_err());
        assert!(get(&c, 1).is_err());
    }
}
