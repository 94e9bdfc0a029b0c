use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm_api_hostname: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub relay_url: Option<String>,
    pub idle_timeout_secs: u64,
    pub max_pending_bytes: usize,
    pub max_requeues: usize,
}

impl AppConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn env_number<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(val) => val.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {}", key, val);
            default
        }),
        Err(_) => default,
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let llm_api_hostname = env::var("EDUMESH_LLM_HOST")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let llm_api_key = env::var("EDUMESH_LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|k| !k.trim().is_empty());
        let llm_model =
            env::var("EDUMESH_LLM_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let relay_url = env::var("EDUMESH_RELAY_URL").ok();
        let idle_timeout_secs = env_number("EDUMESH_IDLE_TIMEOUT_SECS", 60);
        let max_pending_bytes = env_number("EDUMESH_MAX_PENDING_BYTES", 64 * 1024);
        let max_requeues = env_number("EDUMESH_MAX_REQUEUES", 8);

        Self {
            llm_api_hostname,
            llm_api_key,
            llm_model,
            relay_url,
            idle_timeout_secs,
            max_pending_bytes,
            max_requeues,
        }
    }
}
