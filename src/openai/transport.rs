//! Transports that deliver a streamed reply as text fragments.
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use http::{StatusCode, header::RETRY_AFTER};
use serde_json::Value;

use super::core::{Message, Role, completion_stream, streaming_client};
use crate::ai::prompt::SkillGap;
use crate::api::public::mentor::MentorRequest;
use crate::core::ChatError;

pub type FragmentStream = BoxStream<'static, Result<String, ChatError>>;

/// Sends the conversation so far and returns the body of a successful
/// response as a stream of text fragments. Non-success responses are
/// mapped to a `ChatError` before any fragment is produced.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, messages: &[Message]) -> Result<FragmentStream, ChatError>;
}

/// Talks directly to an OpenAI compatible chat completions endpoint.
pub struct CompletionsTransport {
    client: reqwest::Client,
    api_hostname: String,
    api_key: Option<String>,
    model: String,
    system_message: Option<String>,
}

impl CompletionsTransport {
    pub fn new(api_hostname: &str, api_key: Option<&str>, model: &str) -> Self {
        Self {
            client: streaming_client(),
            api_hostname: api_hostname.to_string(),
            api_key: api_key.map(str::to_string),
            model: model.to_string(),
            system_message: None,
        }
    }

    pub fn system_message(mut self, system_message: &str) -> Self {
        self.system_message = Some(system_message.to_string());
        self
    }
}

#[async_trait]
impl Transport for CompletionsTransport {
    async fn send(&self, messages: &[Message]) -> Result<FragmentStream, ChatError> {
        let mut payload = Vec::with_capacity(messages.len() + 1);
        if let Some(system_message) = &self.system_message {
            payload.push(Message::new(Role::System, system_message));
        }
        payload.extend_from_slice(messages);

        let response = completion_stream(
            &self.client,
            &payload,
            &self.api_hostname,
            self.api_key.as_deref(),
            &self.model,
        )
        .await
        .map_err(|e| ChatError::Transport(e.to_string()))?;

        Ok(fragments(error_for_status(response).await?))
    }
}

/// Talks to the skill mentor relay served by `edumesh serve`.
pub struct RelayTransport {
    client: reqwest::Client,
    url: String,
    skill_gaps: Vec<SkillGap>,
}

impl RelayTransport {
    pub fn new(url: &str) -> Self {
        Self {
            client: streaming_client(),
            url: url.to_string(),
            skill_gaps: Vec::new(),
        }
    }

    pub fn skill_gaps(mut self, skill_gaps: Vec<SkillGap>) -> Self {
        self.skill_gaps = skill_gaps;
        self
    }
}

#[async_trait]
impl Transport for RelayTransport {
    async fn send(&self, messages: &[Message]) -> Result<FragmentStream, ChatError> {
        let payload = MentorRequest {
            messages: messages.to_vec(),
            skill_gaps: self.skill_gaps.clone(),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        Ok(fragments(error_for_status(response).await?))
    }
}

/// Map a non-success response to the matching `ChatError`.
pub async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response, ChatError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();

    Err(classify_failure(status, retry_after, &body))
}

pub fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &str) -> ChatError {
    let message = error_body_message(body).unwrap_or_else(|| status.to_string());
    tracing::error!("Completion request failed with {}: {}", status, message);

    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited {
            message,
            retry_after,
        },
        StatusCode::PAYMENT_REQUIRED => ChatError::QuotaExhausted(message),
        _ => ChatError::Transport(format!("{}: {}", status, message)),
    }
}

// Error bodies are either `{"error": "..."}`, `{"error": {"message":
// "..."}}` or plain text
fn error_body_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return Some(body.to_string());
    };
    let error = json.get("error").unwrap_or(&json);
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
        .or_else(|| Some(body.to_string()))
}

/// Turn a response body into text fragments. Dropping the stream drops
/// the underlying body.
pub fn fragments(response: reqwest::Response) -> FragmentStream {
    let mut bytes = response.bytes_stream();
    let mut decoder = Utf8Decoder::default();

    stream! {
        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(ChatError::Transport(e.to_string()));
                    return;
                }
            };
            match decoder.decode(&chunk) {
                Ok(text) if text.is_empty() => continue,
                Ok(text) => yield Ok(text),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if let Err(e) = decoder.finish() {
            yield Err(e);
        }
    }
    .boxed()
}

/// Incremental UTF-8 decoding that holds back a multi-byte character
/// split across chunks until the rest of it arrives.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn decode(&mut self, chunk: &[u8]) -> Result<String, ChatError> {
        self.pending.extend_from_slice(chunk);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                let text = text.to_string();
                self.pending.clear();
                Ok(text)
            }
            // Incomplete sequence at the end, keep it for the next chunk
            Err(e) if e.error_len().is_none() => {
                let valid = e.valid_up_to();
                let rest = self.pending.split_off(valid);
                let text = String::from_utf8(std::mem::replace(&mut self.pending, rest))
                    .map_err(|e| ChatError::Transport(e.to_string()))?;
                Ok(text)
            }
            Err(e) => Err(ChatError::Transport(format!("Invalid UTF-8 in stream: {}", e))),
        }
    }

    pub fn finish(&mut self) -> Result<(), ChatError> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            self.pending.clear();
            Err(ChatError::Transport(
                "Stream ended inside a UTF-8 character".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    async fn collect(stream: FragmentStream) -> String {
        stream
            .map(|fragment| fragment.unwrap())
            .collect::<Vec<_>>()
            .await
            .concat()
    }

    #[test]
    fn test_utf8_decoder_split_character() {
        let mut decoder = Utf8Decoder::default();
        let bytes = "héllo 📚".as_bytes();
        // Split inside the é and inside the emoji
        let (a, rest) = bytes.split_at(2);
        let (b, c) = rest.split_at(rest.len() - 2);

        let mut out = decoder.decode(a).unwrap();
        assert_eq!(out, "h");
        out.push_str(&decoder.decode(b).unwrap());
        out.push_str(&decoder.decode(c).unwrap());
        assert_eq!(out, "héllo 📚");
        assert!(decoder.finish().is_ok());
    }

    #[test]
    fn test_utf8_decoder_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert!(decoder.decode(&[0x61, 0xff, 0x62]).is_err());
    }

    #[test]
    fn test_utf8_decoder_truncated_at_end() {
        let mut decoder = Utf8Decoder::default();
        decoder.decode(&"é".as_bytes()[..1]).unwrap();
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn test_classify_failure() {
        let err = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            Some(Duration::from_secs(3)),
            r#"{"error": "Rate limit exceeded. Please try again later."}"#,
        );
        match err {
            ChatError::RateLimited {
                message,
                retry_after,
            } => {
                assert_eq!(message, "Rate limit exceeded. Please try again later.");
                assert_eq!(retry_after, Some(Duration::from_secs(3)));
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }

        let err = classify_failure(
            StatusCode::PAYMENT_REQUIRED,
            None,
            r#"{"error": {"message": "insufficient credits"}}"#,
        );
        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);

        let err = classify_failure(StatusCode::BAD_GATEWAY, None, "upstream down");
        assert_eq!(err.kind(), ErrorKind::TransportError);
        assert_eq!(err.to_string(), "Transport error: 502 Bad Gateway: upstream down");
    }

    #[tokio::test]
    async fn test_completions_transport_streams_body() {
        let mut server = mockito::Server::new_async().await;
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\ndata: [DONE]\n\n";

        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "messages": [
                    {"role": "system", "content": "Be brief."},
                    {"role": "user", "content": "Hi"}
                ],
                "stream": true
            })))
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let transport = CompletionsTransport::new(&server.url(), Some("test-key"), "gpt-4")
            .system_message("Be brief.");
        let stream = transport
            .send(&[Message::new(Role::User, "Hi")])
            .await
            .unwrap();

        assert_eq!(collect(stream).await, body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_completions_transport_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("retry-after", "20")
            .with_body(r#"{"error":{"message":"Too many requests"}}"#)
            .create_async()
            .await;

        let transport = CompletionsTransport::new(&server.url(), None, "gpt-4");
        let err = transport
            .send(&[Message::new(Role::User, "Hi")])
            .await
            .err()
            .unwrap();

        match err {
            ChatError::RateLimited {
                message,
                retry_after,
            } => {
                assert_eq!(message, "Too many requests");
                assert_eq!(retry_after, Some(Duration::from_secs(20)));
            }
            other => panic!("Expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_relay_transport_quota_exhausted() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/skill-mentor")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "messages": [{"role": "user", "content": "Hi"}],
                "skillGaps": [{"skill_name": "Graphs", "current_level": 40}]
            })))
            .with_status(402)
            .with_body(r#"{"error":"AI credits exhausted. Please add credits to continue."}"#)
            .create_async()
            .await;

        let transport = RelayTransport::new(&format!("{}/api/skill-mentor", server.url()))
            .skill_gaps(vec![SkillGap::new("Graphs", 40)]);
        let err = transport
            .send(&[Message::new(Role::User, "Hi")])
            .await
            .err()
            .unwrap();

        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
    }

    #[tokio::test]
    async fn test_transport_unreachable_host() {
        let transport = CompletionsTransport::new("http://127.0.0.1:1", None, "gpt-4");
        let err = transport
            .send(&[Message::new(Role::User, "Hi")])
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::TransportError);
    }
}
