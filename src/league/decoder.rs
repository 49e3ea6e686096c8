//! Response body decoding, kept apart from the HTTP client
//!
//! Depending on the endpoint generation the federation answers with JSON or
//! XML. A failing request may still answer `200 OK` with an error payload:
//! either a JSON object carrying an `error` member or an XML `<error>`
//! element. Both are surfaced as [`ApiError::Reported`].

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::league::error::ApiError;

/// Turns a raw response body into a typed value
pub trait ResponseDecoder: Send + Sync {
    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ApiError>;
}

/// Text of the first `<error>` element with nested tags stripped and
/// whitespace collapsed. `None` if there is none or the body is not XML.
fn xml_error_message(body: &str) -> Option<String> {
    let mut reader = Reader::from_str(body);
    // Nesting level inside <error>, 0 while outside
    let mut depth = 0usize;
    let mut words = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(_)) if depth > 0 => depth += 1,
            Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"error" => depth = 1,
            Ok(Event::End(_)) if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(words.join(" "));
                }
            }
            Ok(Event::Text(ref e)) if depth > 0 => {
                if let Ok(text) = e.unescape() {
                    words.extend(text.split_whitespace().map(str::to_string));
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDecoder;

impl JsonDecoder {
    fn json_error_message(value: &Value) -> Option<String> {
        let error = value.as_object()?.get("error")?;
        match error {
            Value::Null | Value::Bool(false) => None,
            Value::String(message) => Some(message.clone()),
            Value::Object(fields) => Some(
                fields
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string()),
            ),
            other => Some(other.to_string()),
        }
    }
}

impl ResponseDecoder for JsonDecoder {
    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ApiError> {
        let trimmed = body.trim_start();

        if trimmed.starts_with('<') {
            return Err(match xml_error_message(trimmed) {
                Some(message) => ApiError::Reported(message),
                None => ApiError::Parse("expected JSON, got markup".to_string()),
            });
        }

        let value: Value =
            serde_json::from_str(trimmed).map_err(|e| ApiError::Parse(e.to_string()))?;

        if let Some(message) = Self::json_error_message(&value) {
            return Err(ApiError::Reported(message));
        }

        serde_json::from_value(value).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Decodes XML bodies with the serde mapping of `quick_xml`: the root element
/// name is ignored, child elements and attributes map to fields, repeated
/// elements to sequences.
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlDecoder;

impl ResponseDecoder for XmlDecoder {
    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ApiError> {
        let trimmed = body.trim_start();

        if let Some(message) = xml_error_message(trimmed) {
            return Err(ApiError::Reported(message));
        }

        quick_xml::de::from_str(trimmed).map_err(|e| ApiError::Parse(e.to_string()))
    }
}

/// Picks [`XmlDecoder`] for bodies starting with markup, [`JsonDecoder`] otherwise
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDecoder {
    json: JsonDecoder,
    xml: XmlDecoder,
}

impl ResponseDecoder for AutoDecoder {
    fn decode<T: DeserializeOwned>(&self, body: &str) -> Result<T, ApiError> {
        if body.trim_start().starts_with('<') {
            self.xml.decode(body)
        } else {
            self.json.decode(body)
        }
    }
}
