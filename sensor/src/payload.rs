//! Payload decoding.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// How incoming payload bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Payload must be a JSON object.
    #[default]
    Json,
    /// Payload is kept as opaque bytes.
    Raw,
    /// JSON object when it parses as one, raw bytes otherwise.
    Auto,
}

/// A payload that failed to decode.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Bytes are not valid JSON.
    #[error("invalid json payload: {0}")]
    Json(#[from] serde_json::Error),

    /// Valid JSON, but not an object.
    #[error("json payload is not an object (found {0})")]
    NotAnObject(&'static str),
}

/// Decoded message payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Parsed JSON object.
    Json(Map<String, Value>),
    /// Opaque bytes.
    Raw(Bytes),
}

impl PayloadFormat {
    /// Decode `bytes` according to this format.
    pub fn decode(self, bytes: &[u8]) -> Result<Payload, DecodeError> {
        match self {
            PayloadFormat::Json => decode_object(bytes).map(Payload::Json),
            PayloadFormat::Raw => Ok(Payload::Raw(Bytes::copy_from_slice(bytes))),
            PayloadFormat::Auto => Ok(match decode_object(bytes) {
                Ok(object) => Payload::Json(object),
                Err(_) => Payload::Raw(Bytes::copy_from_slice(bytes)),
            }),
        }
    }
}

fn decode_object(bytes: &[u8]) -> Result<Map<String, Value>, DecodeError> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(object) => Ok(object),
        Value::Array(_) => Err(DecodeError::NotAnObject("array")),
        Value::String(_) => Err(DecodeError::NotAnObject("string")),
        Value::Number(_) => Err(DecodeError::NotAnObject("number")),
        Value::Bool(_) => Err(DecodeError::NotAnObject("bool")),
        Value::Null => Err(DecodeError::NotAnObject("null")),
    }
}

impl Payload {
    /// The JSON object, if this payload was decoded as one.
    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Payload::Json(object) => Some(object),
            Payload::Raw(_) => None,
        }
    }

    /// The raw bytes, if this payload was kept opaque.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Payload::Json(_) => None,
            Payload::Raw(bytes) => Some(bytes),
        }
    }

    /// Render as a JSON value for readings.
    ///
    /// Raw bytes become a string: UTF-8 text as-is, anything else base64.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Json(object) => Value::Object(object.clone()),
            Payload::Raw(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => Value::String(text.to_string()),
                Err(_) => Value::String(BASE64.encode(bytes)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_object_decodes() {
        let payload = PayloadFormat::Json.decode(br#"{"x":1}"#).unwrap();
        assert_eq!(payload.to_value(), json!({"x": 1}));
        assert!(payload.as_bytes().is_none());
    }

    #[test]
    fn test_json_rejects_malformed_and_non_objects() {
        assert!(matches!(
            PayloadFormat::Json.decode(b"{not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            PayloadFormat::Json.decode(b"[1,2]"),
            Err(DecodeError::NotAnObject("array"))
        ));
        assert!(matches!(
            PayloadFormat::Json.decode(b"42"),
            Err(DecodeError::NotAnObject("number"))
        ));
    }

    #[test]
    fn test_raw_keeps_bytes() {
        let payload = PayloadFormat::Raw.decode(b"21.5").unwrap();
        assert_eq!(payload.as_bytes(), Some(&b"21.5"[..]));
        assert_eq!(payload.to_value(), json!("21.5"));
    }

    #[test]
    fn test_raw_binary_renders_base64() {
        let payload = PayloadFormat::Raw.decode(&[0xff, 0x00, 0x10]).unwrap();
        assert_eq!(payload.to_value(), json!("/wAQ"));
    }

    #[test]
    fn test_auto_falls_back_to_raw() {
        let object = PayloadFormat::Auto.decode(br#"{"a":"b"}"#).unwrap();
        assert!(object.as_json().is_some());

        let text = PayloadFormat::Auto.decode(b"hello").unwrap();
        assert_eq!(text.as_bytes(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_format_serde_names() {
        let format: PayloadFormat = serde_json::from_str("\"auto\"").unwrap();
        assert_eq!(format, PayloadFormat::Auto);
        assert_eq!(serde_json::to_string(&PayloadFormat::Raw).unwrap(), "\"raw\"");
    }
}
