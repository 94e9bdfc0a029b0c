use std::sync::Arc;

use crate::core::AppConfig;
use crate::openai::streaming_client;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: AppConfig,
    // Reused so upstream connections are pooled
    pub client: reqwest::Client,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            client: streaming_client(),
        }
    }
}
