//! Typed extraction from schema-less argument lists.
//!
//! Invocation arguments travel as an ordered sequence of encoded values;
//! a handler decodes the Nth value into the type it expects at the point of
//! dispatch instead of the protocol generating one shape per arity.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ProtocolError;

/// Decodes `args[index]` into `T`, failing with a parse error on a missing
/// argument or a type mismatch.
pub fn argument<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, ProtocolError> {
    let value = args
        .get(index)
        .ok_or(ProtocolError::MissingArgument(index))?;
    serde_json::from_value(value.clone())
        .map_err(|source| ProtocolError::ArgumentType { index, source })
}

/// Decodes an optional result value into `T`. An absent value decodes as
/// JSON `null`, so `T = ()` and `T = Option<_>` accept void completions.
pub fn result_value<T: DeserializeOwned>(value: Option<Value>) -> Result<T, ProtocolError> {
    serde_json::from_value(value.unwrap_or(Value::Null))
        .map_err(|source| ProtocolError::ArgumentType { index: 0, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_typed_arguments_in_order() {
        let args = vec![json!("alice"), json!(30), json!([1, 2, 3])];
        assert_eq!(argument::<String>(&args, 0).unwrap(), "alice");
        assert_eq!(argument::<u32>(&args, 1).unwrap(), 30);
        assert_eq!(argument::<Vec<i64>>(&args, 2).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn missing_argument_is_reported_by_index() {
        let args = vec![json!(1)];
        assert!(matches!(
            argument::<i32>(&args, 3),
            Err(ProtocolError::MissingArgument(3))
        ));
    }

    #[test]
    fn type_mismatch_is_a_parse_error() {
        let args = vec![json!("not a number")];
        assert!(matches!(
            argument::<i32>(&args, 0),
            Err(ProtocolError::ArgumentType { index: 0, .. })
        ));
    }

    #[test]
    fn void_completion_decodes_as_unit() {
        result_value::<()>(None).unwrap();
        assert_eq!(result_value::<Option<i32>>(None).unwrap(), None);
        assert_eq!(result_value::<i32>(Some(json!(5))).unwrap(), 5);
    }
}
