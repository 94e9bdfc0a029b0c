use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub enum Role {
    #[serde(rename = "system")]
    System,
    #[serde(rename = "assistant")]
    Assistant,
    #[serde(rename = "user")]
    User,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: &str) -> Self {
        Message {
            role,
            content: content.to_string(),
        }
    }
}

pub fn completions_url(api_hostname: &str) -> String {
    format!("{}/v1/chat/completions", api_hostname.trim_end_matches('/'))
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for streamed completions. Only connecting is bounded, a reply
/// keeps streaming for as long as chunks arrive and it is up to the
/// reader to give up on a stalled body.
pub fn streaming_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

fn completion_request(
    client: &reqwest::Client,
    messages: &[Message],
    api_hostname: &str,
    api_key: Option<&str>,
    model: &str,
) -> reqwest::RequestBuilder {
    let payload = json!({
        "model": model,
        "messages": messages,
        "stream": true,
    });
    let request = client
        .post(completions_url(api_hostname))
        .header("Content-Type", "application/json")
        .json(&payload);
    match api_key {
        Some(api_key) => request.bearer_auth(api_key),
        None => request,
    }
}

/// Start a streaming chat completion against an OpenAI compatible
/// API. The response is returned as soon as the headers arrive so the
/// caller can check the status and consume the body incrementally.
pub async fn completion_stream(
    client: &reqwest::Client,
    messages: &[Message],
    api_hostname: &str,
    api_key: Option<&str>,
    model: &str,
) -> Result<reqwest::Response, reqwest::Error> {
    completion_request(client, messages, api_hostname, api_key, model)
        .send()
        .await
}
