//! Output formatters for Ethereum style results.
//!
//! Each formatter takes one result value. Descriptors map them over the
//! values a session hands to `MethodDescriptor::transform`.

use serde_json::Value;
use wsrpc::FormatError;

/// `"0x1b4"` -> `436`
pub fn hex_quantity_to_u64(value: &Value) -> Result<Value, FormatError> {
    let digits = hex_digits(value)?;
    u64::from_str_radix(digits, 16)
        .map(Value::from)
        .map_err(|err| FormatError::new(format!("invalid quantity {value}: {err}")))
}

/// `"0xde0b6b3a7640000"` -> `"1000000000000000000"`
///
/// Balances overflow `u64` (and JSON numbers), so the decimal form is a
/// string.
pub fn hex_quantity_to_decimal_string(value: &Value) -> Result<Value, FormatError> {
    let digits = hex_digits(value)?;
    u128::from_str_radix(digits, 16)
        .map(|quantity| Value::String(quantity.to_string()))
        .map_err(|err| FormatError::new(format!("invalid quantity {value}: {err}")))
}

/// Lowercases a string, e.g. a checksummed address.
pub fn lowercase(value: &Value) -> Result<Value, FormatError> {
    value
        .as_str()
        .map(|text| Value::String(text.to_lowercase()))
        .ok_or_else(|| FormatError::new(format!("expected a string, got {value}")))
}

fn hex_digits(value: &Value) -> Result<&str, FormatError> {
    let text = value
        .as_str()
        .ok_or_else(|| FormatError::new(format!("expected a hex string, got {value}")))?;
    text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .ok_or_else(|| FormatError::new(format!("missing 0x prefix in {text:?}")))
}
