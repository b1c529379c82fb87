use crate::error::{FormatError, ProtocolError, RpcError};
use crate::method::MethodDescriptor;
use serde_json::{Map, Value};

/// A raw response, classified once at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedResponse {
    /// A single response object.
    Single(Result<Value, RpcError>),
    /// A batch response, in the order the node sent it.
    Batch(Vec<BatchEntry>),
}

/// One element of a batch response.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEntry {
    /// The response id, if present and not `null`.
    pub id: Option<Value>,
    pub outcome: Result<Value, RpcError>,
}

/// Parses raw transport text into a [`DecodedResponse`].
pub struct ResponseDecoder;

impl ResponseDecoder {
    pub fn decode(raw: &str) -> Result<DecodedResponse, ProtocolError> {
        let parsed: Value = serde_json::from_str(raw)
            .map_err(|err| ProtocolError::InvalidResponseFormat(err.to_string()))?;

        match parsed {
            Value::Array(elements) => Ok(DecodedResponse::Batch(
                elements
                    .into_iter()
                    .enumerate()
                    .map(|(position, element)| Self::decode_batch_element(position, element))
                    .collect(),
            )),
            Value::Object(object) => match Self::classify(object) {
                Classified::Outcome(outcome) => Ok(DecodedResponse::Single(outcome)),
                Classified::Empty => Err(ProtocolError::UnexpectedShape),
            },
            _ => Err(ProtocolError::UnexpectedShape),
        }
    }

    fn decode_batch_element(position: usize, element: Value) -> BatchEntry {
        let Value::Object(mut object) = element else {
            tracing::debug!(position, "batch element is not an object; treating as null");
            return BatchEntry {
                id: None,
                outcome: Ok(Value::Null),
            };
        };

        let id = object.remove("id").filter(|id| !id.is_null());

        let outcome = match Self::classify(object) {
            Classified::Outcome(outcome) => outcome,
            // Lossy on purpose: an element with neither `result` nor `error`
            // is an empty success.
            Classified::Empty => {
                tracing::debug!(position, "batch element has neither result nor error; treating as null");
                Ok(Value::Null)
            }
        };

        BatchEntry { id, outcome }
    }

    /// `result` wins unless it is absent or `null` and a non-null `error`
    /// is present.
    fn classify(mut object: Map<String, Value>) -> Classified {
        let result = object.remove("result");
        let error = object.remove("error").filter(|error| !error.is_null());

        match (result, error) {
            (Some(result), _) if !result.is_null() => Classified::Outcome(Ok(result)),
            (_, Some(error)) => Classified::Outcome(Err(RpcError::from_error_value(error))),
            (Some(null), None) => Classified::Outcome(Ok(null)),
            (None, None) => Classified::Empty,
        }
    }
}

enum Classified {
    Outcome(Result<Value, RpcError>),
    Empty,
}

/// Runs a successful result through the descriptor's output formatters.
///
/// Formatters take sequences, so a scalar result is wrapped into a
/// one-element vector and unwrapped again; an array result goes through
/// whole.
pub fn apply_transform(method: &dyn MethodDescriptor, value: Value) -> Result<Value, FormatError> {
    match value {
        Value::Array(values) => method.transform(values).map(Value::Array),
        single => method
            .transform(vec![single])?
            .into_iter()
            .next()
            .ok_or_else(|| FormatError::new("output formatter returned no values")),
    }
}
