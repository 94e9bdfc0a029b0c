//! Errors surfaced by a conversation session.
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
pub const QUOTA_EXHAUSTED_MESSAGE: &str = "AI credits exhausted. Please add credits to continue.";

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message is empty")]
    EmptySubmission,
    #[error("A reply is already in progress")]
    ConcurrentSubmission,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("Turn {0} is already finalized")]
    InvalidState(String),
    #[error("Session was abandoned")]
    Abandoned,
}

/// Flat projection of `ChatError` that observers can store and compare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptySubmission,
    ConcurrentSubmission,
    TransportError,
    RateLimited,
    QuotaExhausted,
    InvalidState,
    Abandoned,
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::EmptySubmission => ErrorKind::EmptySubmission,
            ChatError::ConcurrentSubmission => ErrorKind::ConcurrentSubmission,
            ChatError::Transport(_) => ErrorKind::TransportError,
            ChatError::RateLimited { .. } => ErrorKind::RateLimited,
            ChatError::QuotaExhausted(_) => ErrorKind::QuotaExhausted,
            ChatError::InvalidState(_) => ErrorKind::InvalidState,
            ChatError::Abandoned => ErrorKind::Abandoned,
        }
    }

    /// Whether retrying the same request later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::Transport(_) | ChatError::RateLimited { .. })
    }

    /// Text suitable for showing to the person chatting.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::RateLimited {
                retry_after: Some(delay),
                ..
            } => format!(
                "Rate limit exceeded. Please try again in {} seconds.",
                delay.as_secs().max(1)
            ),
            ChatError::RateLimited { .. } => RATE_LIMITED_MESSAGE.to_string(),
            ChatError::QuotaExhausted(_) => QUOTA_EXHAUSTED_MESSAGE.to_string(),
            ChatError::Transport(_) => {
                "Something went wrong while talking to the mentor. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
