//! Extraction of incremental text from a streamed completion chunk.
use serde::Deserialize;
use serde_json::Value;
use serde_json::error::Category;
use thiserror::Error;

/// The payload of a data line could not be parsed as JSON, most likely
/// because the event was split across reads. Never surfaced to callers.
#[derive(Debug, Error)]
#[error("Incomplete data payload: {source}")]
pub struct RecoverableParseError {
    #[source]
    source: serde_json::Error,
}

#[derive(Debug, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DeltaChoice {
    #[serde(default)]
    pub delta: Option<Delta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

// {"id":"chatcmpl-1","choices":[{"index":0,"delta":{"content":"Hi"},"finish_reason":null}]}
#[derive(Debug, Default, Deserialize)]
pub struct DeltaPayload {
    #[serde(default)]
    pub choices: Vec<DeltaChoice>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl DeltaPayload {
    /// Parse a data payload. Syntax errors are recoverable, JSON that
    /// is well-formed but has an unexpected shape is treated as a chunk
    /// without text.
    pub fn parse(payload: &str) -> Result<Self, RecoverableParseError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|source| RecoverableParseError { source })?;

        match serde_json::from_value::<DeltaPayload>(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) if e.classify() == Category::Data => {
                tracing::warn!("Ignoring chunk with unexpected shape: {}\nError: {}", payload, e);
                Ok(DeltaPayload::default())
            }
            Err(source) => Err(RecoverableParseError { source }),
        }
    }

    /// The incremental text carried by the first choice, if any.
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.as_ref())
            .and_then(|delta| delta.content.as_deref())
            .filter(|content| !content.is_empty())
    }

    /// Error reported by the server in the middle of a stream.
    pub fn error_message(&self) -> Option<String> {
        let error = self.error.as_ref()?;
        if error.is_null() {
            return None;
        }
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
        Some(error.to_string())
    }
}

/// Extract the incremental text of a data payload. `Ok(None)` means the
/// chunk was well-formed but carried no text, e.g. metadata or usage.
pub fn extract(payload: &str) -> Result<Option<String>, RecoverableParseError> {
    Ok(DeltaPayload::parse(payload)?.text().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_content() {
        let payload = r#"{"choices":[{"delta":{"content":"Hello"}}]}"#;
        assert_eq!(extract(payload).unwrap(), Some("Hello".to_string()));
    }

    #[test]
    fn test_extract_full_openai_chunk() {
        let payload = r#"{
            "id":"chunk_123",
            "created":1234567890,
            "model":"gpt-4",
            "system_fingerprint":"fp_abc123",
            "choices":[{
                "index":0,
                "delta":{"role":"assistant","content":"Hi"},
                "finish_reason":null,
                "logprobs":null
            }]
        }"#;
        assert_eq!(extract(payload).unwrap(), Some("Hi".to_string()));
    }

    #[test]
    fn test_extract_without_content() {
        assert_eq!(extract(r#"{"choices":[{"delta":{}}]}"#).unwrap(), None);
        assert_eq!(
            extract(r#"{"choices":[{"delta":{"content":""}}]}"#).unwrap(),
            None
        );
        assert_eq!(
            extract(r#"{"choices":[{"delta":{"content":null},"finish_reason":"stop"}]}"#)
                .unwrap(),
            None
        );
        assert_eq!(extract(r#"{"choices":[]}"#).unwrap(), None);
        assert_eq!(
            extract(r#"{"usage":{"prompt_tokens":3,"completion_tokens":5}}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_extract_unexpected_shape_is_not_an_error() {
        assert_eq!(extract(r#"{"choices":"nope"}"#).unwrap(), None);
        assert_eq!(extract(r#"[1,2,3]"#).unwrap(), None);
    }

    #[test]
    fn test_extract_truncated_json_is_recoverable() {
        let payload = r#"{"choices":[{"delta":{"content":"hi"#;
        assert!(extract(payload).is_err());
        assert!(extract("not json").is_err());
    }

    #[test]
    fn test_error_message_object() {
        let payload = DeltaPayload::parse(r#"{"error":{"message":"provider error"}}"#).unwrap();
        assert_eq!(payload.error_message().as_deref(), Some("provider error"));
    }

    #[test]
    fn test_error_message_string() {
        let payload = DeltaPayload::parse(r#"{"error":"provider error"}"#).unwrap();
        assert_eq!(payload.error_message().as_deref(), Some("provider error"));
    }

    #[test]
    fn test_no_error_message() {
        let payload = DeltaPayload::parse(r#"{"choices":[],"error":null}"#).unwrap();
        assert!(payload.error_message().is_none());
    }
}
