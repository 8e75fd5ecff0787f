use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::utils::embedding::EmbeddingBackend;

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    #[serde(default = "default_dataset_path")]
    pub dataset_path: String,
    #[serde(default)]
    pub index_path: Option<String>,
    #[serde(default)]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default)]
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_base_url")]
    pub gemini_base_url: String,
    #[serde(default)]
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_query_model")]
    pub query_model: String,
    #[serde(default)]
    pub query_system_prompt: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
    #[serde(default = "default_embedding_retries")]
    pub embedding_retries: usize,
    #[serde(default = "default_embedding_concurrency")]
    pub embedding_concurrency: usize,
    #[serde(default)]
    pub fastembed_model: Option<String>,
    #[serde(default)]
    pub fastembed_cache_dir: Option<String>,
    #[serde(default)]
    pub fastembed_show_download_progress: Option<bool>,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

fn default_dataset_path() -> String {
    "gita_slokas.json".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}

const fn default_embedding_dimensions() -> u32 {
    768
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

// Gemini exposes an OpenAI-compatible chat endpoint.
fn default_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/openai".to_string()
}

fn default_query_model() -> String {
    "gemini-2.0-flash".to_string()
}

const fn default_top_k() -> usize {
    3
}

const fn default_provider_timeout_secs() -> u64 {
    30
}

const fn default_embedding_retries() -> usize {
    3
}

const fn default_embedding_concurrency() -> usize {
    4
}

const fn default_http_port() -> u16 {
    3000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dataset_path: default_dataset_path(),
            index_path: None,
            embedding_backend: EmbeddingBackend::default(),
            embedding_model: default_embedding_model(),
            embedding_dimensions: default_embedding_dimensions(),
            gemini_api_key: None,
            gemini_base_url: default_gemini_base_url(),
            openai_api_key: String::new(),
            openai_base_url: default_base_url(),
            query_model: default_query_model(),
            query_system_prompt: None,
            top_k: default_top_k(),
            provider_timeout_secs: default_provider_timeout_secs(),
            embedding_retries: default_embedding_retries(),
            embedding_concurrency: default_embedding_concurrency(),
            fastembed_model: None,
            fastembed_cache_dir: None,
            fastembed_show_download_progress: None,
            http_port: default_http_port(),
        }
    }
}

impl AppConfig {
    /// Key used for the Gemini embedding API; falls back to the chat key.
    pub fn gemini_key(&self) -> &str {
        self.gemini_api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(&self.openai_api_key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_k == 0 {
            return Err(ConfigError::Message("top_k must be at least 1".into()));
        }
        if self.embedding_dimensions == 0 {
            return Err(ConfigError::Message(
                "embedding_dimensions must be greater than zero".into(),
            ));
        }
        if self.provider_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "provider_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default().try_parsing(true))
        .build()?;

    let config: AppConfig = config.try_deserialize()?;
    config.validate()?;
    Ok(config)
}
