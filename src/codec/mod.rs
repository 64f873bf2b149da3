pub mod data_uri;
pub mod face;
pub mod session_result;

pub use data_uri::DataUri;
pub use session_result::ImageEncoding;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde_json::{Map, Value};
use crate::common::{BridgeError, Result};

// Strict field accessors shared by the wire codecs. Every failure names the key.

pub(crate) fn as_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| BridgeError::Schema(format!("{} must be a JSON object", what)))
}

pub(crate) fn field<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a Value> {
    match object.get(key) {
        Some(Value::Null) | None => Err(BridgeError::missing_key(key)),
        Some(value) => Ok(value),
    }
}

pub(crate) fn f64_field(object: &Map<String, Value>, key: &str) -> Result<f64> {
    field(object, key)?
        .as_f64()
        .ok_or_else(|| BridgeError::wrong_type(key, "a number"))
}

pub(crate) fn i32_field(object: &Map<String, Value>, key: &str) -> Result<i32> {
    field(object, key)?
        .as_i64()
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| BridgeError::wrong_type(key, "a 32-bit integer"))
}

pub(crate) fn str_field<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    field(object, key)?
        .as_str()
        .ok_or_else(|| BridgeError::wrong_type(key, "a string"))
}

pub(crate) fn bytes_field(object: &Map<String, Value>, key: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(str_field(object, key)?)
        .map_err(|e| BridgeError::Schema(format!("key `{}` is not valid base64: {}", key, e)))
}

pub(crate) fn encode_bytes(bytes: &[u8]) -> Value {
    Value::String(BASE64.encode(bytes))
}

/// Parses JSON text handed over as a command argument.
pub(crate) fn parse_json(text: &str, what: &str) -> Result<Value> {
    serde_json::from_str(text).map_err(|e| BridgeError::Schema(format!("{} is not valid JSON: {}", what, e)))
}
