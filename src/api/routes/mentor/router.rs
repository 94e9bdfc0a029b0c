//! Router for the skill mentor API
//!
//! Relays a conversation to the upstream completions API with the
//! mentor system prompt and streams the SSE body back unchanged.

use anyhow::anyhow;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use super::public;
use crate::ai::prompt::{GREETING, SUGGESTED_PROMPTS, skill_mentor_prompt};
use crate::api::public::ApiError;
use crate::api::state::SharedState;
use crate::core::error::{QUOTA_EXHAUSTED_MESSAGE, RATE_LIMITED_MESSAGE};
use crate::openai::{Message, Role, completion_stream};

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(public::MentorErrorResponse::new(message))).into_response()
}

/// Stream the mentor's reply to a conversation
async fn mentor_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::MentorRequest>,
) -> Result<Response, ApiError> {
    let config = &state.config;
    let api_key = config
        .llm_api_key
        .as_deref()
        .ok_or_else(|| anyhow!("LLM API key is not configured"))?;

    let system_prompt = skill_mentor_prompt(&payload.skill_gaps)?;
    let mut messages = vec![Message::new(Role::System, &system_prompt)];
    messages.extend(payload.messages);

    tracing::debug!(
        "Relaying {} messages to {}",
        messages.len(),
        config.llm_api_hostname
    );
    let upstream = completion_stream(
        &state.client,
        &messages,
        &config.llm_api_hostname,
        Some(api_key),
        &config.llm_model,
    )
    .await?;

    let status = upstream.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = upstream.headers().get(header::RETRY_AFTER).cloned();
        let mut resp = error_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE);
        if let Some(retry_after) = retry_after {
            resp.headers_mut().insert(header::RETRY_AFTER, retry_after);
        }
        return Ok(resp);
    }
    if status == StatusCode::PAYMENT_REQUIRED {
        return Ok(error_response(
            StatusCode::PAYMENT_REQUIRED,
            QUOTA_EXHAUSTED_MESSAGE,
        ));
    }
    if !status.is_success() {
        let body = upstream.text().await.unwrap_or_default();
        tracing::error!("AI gateway error: {} {}", status, body);
        return Ok(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "AI gateway error",
        ));
    }

    let mut resp = Body::from_stream(upstream.bytes_stream()).into_response();
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    Ok(resp)
}

/// Greeting and starter prompts shown before the first message
async fn prompts() -> Json<public::MentorPromptsResponse> {
    Json(public::MentorPromptsResponse {
        greeting: GREETING.to_string(),
        prompts: SUGGESTED_PROMPTS.iter().map(|p| p.to_string()).collect(),
    })
}

/// Create the skill mentor router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(mentor_handler))
        .route("/prompts", get(prompts))
}
