use crate::services::summarizer::{GeminiSummarizer, Summarizer};
use crate::ws::SignalingRelay;
use std::sync::Arc;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub stun_servers: Vec<String>,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        // A missing .env file is fine; the environment alone is enough
        let _ = dotenvy::dotenv();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:5000".to_string());

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());
        if gemini_api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set, summarization requests will fail");
        }

        let gemini_base_url = std::env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1".to_string());

        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_else(|_| vec![DEFAULT_STUN_SERVER.to_string()]);

        Ok(Config {
            bind_address,
            gemini_api_key,
            gemini_base_url,
            gemini_model,
            stun_servers,
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub relay: Arc<SignalingRelay>,
    pub summarizer: Arc<dyn Summarizer>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let summarizer = Arc::new(GeminiSummarizer::new(
            config.gemini_api_key.clone(),
            config.gemini_base_url.clone(),
            config.gemini_model.clone(),
        ));
        Self::with_summarizer(config, summarizer)
    }

    pub fn with_summarizer(config: Config, summarizer: Arc<dyn Summarizer>) -> Self {
        Self {
            config,
            relay: Arc::new(SignalingRelay::new()),
            summarizer,
        }
    }
}
