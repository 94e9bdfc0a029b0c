//! Test utilities for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use axum::{Router, body::Body};

use edumesh::api::AppState;
use edumesh::api::app;
use edumesh::core::AppConfig;

pub fn test_config(llm_api_hostname: &str, llm_api_key: Option<&str>) -> AppConfig {
    AppConfig {
        llm_api_hostname: llm_api_hostname.to_string(),
        llm_api_key: llm_api_key.map(String::from),
        llm_model: String::from("gpt-4.1-mini"),
        relay_url: None,
        idle_timeout_secs: 5,
        max_pending_bytes: 64 * 1024,
        max_requeues: 8,
    }
}

/// Creates a test application router that relays to `upstream_url`.
pub fn test_app(upstream_url: &str) -> Router {
    app_with_config(test_config(upstream_url, Some("test-api-key")))
}

pub fn app_with_config(config: AppConfig) -> Router {
    app(Arc::new(AppState::new(config)))
}

/// Collect a response body into a string
pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(bytes.to_vec()).expect("Response body is not UTF-8")
}
