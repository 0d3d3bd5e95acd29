//! Compressed-payload extraction.
//!
//! The server wraps its handler records in one of four envelope shapes; the
//! payload itself is always the same encoding: base64 over a gzip stream over
//! UTF-8 JSON, and the decoded JSON must be an array of records.

use std::io::Read;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use serde_json::Value;

use crate::domain::foundation::{DecodeStage, EngineError};
use crate::domain::protocol::tags::payload;

/// Locates the compressed payload text inside a decoded wire message.
///
/// The four known shapes are checked in priority order, first match wins:
/// 1. `params.compressedPayload` — asynchronous envelope.
/// 2. `params.compressedResult` — same envelope, alternate field name used
///    by one specific server operation.
/// 3. `compressedPayload` — top level.
/// 4. `result.compressedPayload` — result wrapper.
pub fn locate_compressed(message: &Value) -> Option<&str> {
    let params = message.get(payload::PARAMS);
    params
        .and_then(|p| p.get(payload::ASYNC_PRIMARY))
        .or_else(|| params.and_then(|p| p.get(payload::ASYNC_ALTERNATE)))
        .or_else(|| message.get(payload::ASYNC_PRIMARY))
        .or_else(|| message.get(payload::RESULT).and_then(|r| r.get(payload::ASYNC_PRIMARY)))
        .and_then(Value::as_str)
}

/// Decodes a compressed payload string into its handler record array.
///
/// # Errors
///
/// Any violation along the chain (bad base64, corrupt gzip, invalid UTF-8,
/// non-JSON, non-array) is a [`EngineError::Decode`] naming the failing
/// stage. A malformed payload is never coerced to an empty record list.
pub fn decode_payload(compressed: &str) -> Result<Vec<Value>, EngineError> {
    let bytes = BASE64
        .decode(compressed.as_bytes())
        .map_err(|e| EngineError::decode(DecodeStage::Base64, e.to_string()))?;

    let mut inflated = Vec::new();
    GzDecoder::new(bytes.as_slice())
        .read_to_end(&mut inflated)
        .map_err(|e| EngineError::decode(DecodeStage::Gzip, e.to_string()))?;

    let text = String::from_utf8(inflated)
        .map_err(|e| EngineError::decode(DecodeStage::Utf8, e.to_string()))?;

    let value: Value = serde_json::from_str(&text)
        .map_err(|e| EngineError::decode(DecodeStage::Json, e.to_string()))?;

    match value {
        Value::Array(records) => Ok(records),
        other => Err(EngineError::decode(
            DecodeStage::Shape,
            format!("expected handler array, got {}", json_kind(&other)),
        )),
    }
}

/// Extracts and decodes the handler records from a wire message.
///
/// Returns `Ok(None)` when no compressed field is present — absence is a
/// caller-visible non-result, not an error.
pub fn extract_handlers(message: &Value) -> Result<Option<Vec<Value>>, EngineError> {
    match locate_compressed(message) {
        Some(compressed) => decode_payload(compressed).map(Some),
        None => Ok(None),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Payload builders shared by protocol tests.
#[cfg(test)]
pub(crate) mod tests_support {
    use super::BASE64;
    use base64::Engine as _;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use serde_json::Value;
    use std::io::Write;

    /// Compresses a JSON value into a valid wire payload string.
    pub fn compress_records(value: &Value) -> String {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(value.to_string().as_bytes())
            .expect("gzip write");
        BASE64.encode(encoder.finish().expect("gzip finish"))
    }
}
