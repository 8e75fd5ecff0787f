use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{error::AppError, utils::config::AppConfig};

// BGE models expect this instruction in front of search queries.
const BGE_QUERY_INSTRUCTION: &str = "Represent this sentence for searching relevant passages: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    Gemini,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "fastembed")]
    FastEmbed,
    Hashed,
}

impl FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'gemini', 'openai', 'hashed', or 'fastembed'."
            )),
        }
    }
}

/// Which side of the retrieval pair a text is embedded for.
///
/// Hosted providers optimise the two differently, so a passage vector is not a
/// valid stand-in for a query vector even when the text is identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingMode {
    Document,
    Query,
}

impl EmbeddingMode {
    const fn gemini_task_type(self) -> &'static str {
        match self {
            Self::Document => "RETRIEVAL_DOCUMENT",
            Self::Query => "RETRIEVAL_QUERY",
        }
    }

    pub const fn operation(self) -> &'static str {
        match self {
            Self::Document => "document embedding",
            Self::Query => "query embedding",
        }
    }
}

/// Seam between the retrieval pipeline and whatever produces vectors.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;

    /// Backend and model label recorded alongside persisted vectors.
    fn label(&self) -> String;

    async fn embed_text(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, AppError>;
}

#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
    timeout: Duration,
}

#[derive(Clone)]
enum EmbeddingInner {
    Gemini {
        http: reqwest::Client,
        base_url: String,
        api_key: String,
        model: String,
        dimensions: u32,
    },
    OpenAI {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
    FastEmbed {
        model: Arc<Mutex<TextEmbedding>>,
        model_name: EmbeddingModel,
        dimension: usize,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiEmbedRequest<'a> {
    model: String,
    content: GeminiContent<'a>,
    task_type: &'static str,
    output_dimensionality: u32,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    parts: [GeminiPart<'a>; 1],
}

#[derive(Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GeminiEmbedResponse {
    embedding: GeminiEmbedding,
}

#[derive(Deserialize)]
struct GeminiEmbedding {
    values: Vec<f32>,
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Gemini { .. } => "gemini",
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::FastEmbed { .. } => "fastembed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Gemini { dimensions, .. } | EmbeddingInner::OpenAI { dimensions, .. } => {
                *dimensions as usize
            }
            EmbeddingInner::Hashed { dimension } | EmbeddingInner::FastEmbed { dimension, .. } => {
                *dimension
            }
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::Gemini { model, .. } | EmbeddingInner::OpenAI { model, .. } => {
                Some(model.clone())
            }
            EmbeddingInner::FastEmbed { model_name, .. } => Some(model_name.to_string()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn embed(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, mode, *dimension)),
            EmbeddingInner::Gemini {
                http,
                base_url,
                api_key,
                model,
                dimensions,
            } => {
                let model_path = if model.starts_with("models/") {
                    model.clone()
                } else {
                    format!("models/{model}")
                };
                let url = format!("{}/{model_path}:embedContent", base_url.trim_end_matches('/'));
                let body = GeminiEmbedRequest {
                    model: model_path,
                    content: GeminiContent {
                        parts: [GeminiPart { text }],
                    },
                    task_type: mode.gemini_task_type(),
                    output_dimensionality: *dimensions,
                };

                let response = http
                    .post(url)
                    .header("x-goog-api-key", api_key)
                    .json(&body)
                    .send()
                    .await
                    .context("sending Gemini embedContent request")?
                    .error_for_status()
                    .context("Gemini embedContent returned an error status")?
                    .json::<GeminiEmbedResponse>()
                    .await
                    .context("decoding Gemini embedContent response")?;

                Ok(response.embedding.values)
            }
            EmbeddingInner::FastEmbed {
                model, model_name, ..
            } => {
                let input = match mode {
                    EmbeddingMode::Query if is_bge(model_name) => {
                        format!("{BGE_QUERY_INSTRUCTION}{text}")
                    }
                    _ => text.to_owned(),
                };
                let mut guard = model.lock().await;
                let embeddings = guard
                    .embed(vec![input], None)
                    .context("generating fastembed vector")?;
                embeddings
                    .into_iter()
                    .next()
                    .ok_or_else(|| anyhow!("fastembed returned no embedding for input"))
            }
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                // The OpenAI embeddings endpoint has no task type; both modes share it.
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embedding = response
                    .data
                    .first()
                    .ok_or_else(|| anyhow!("No embedding data received from OpenAI API"))?
                    .embedding
                    .clone();

                Ok(embedding)
            }
        }
    }

    pub fn new_gemini(
        api_key: String,
        base_url: String,
        model: String,
        dimensions: u32,
    ) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!(
                "the gemini embedding backend needs GEMINI_API_KEY or OPENAI_API_KEY"
            ));
        }

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Gemini {
                http: reqwest::Client::new(),
                base_url,
                api_key,
                model,
                dimensions,
            },
            timeout: default_timeout(),
        })
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
            timeout: default_timeout(),
        }
    }

    pub async fn new_fastembed(
        model_override: Option<String>,
        cache_dir: Option<PathBuf>,
        show_download_progress: bool,
    ) -> Result<Self> {
        let model_name = if let Some(code) = model_override {
            EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?
        } else {
            EmbeddingModel::default()
        };

        let mut options = TextInitOptions::new(model_name.clone())
            .with_show_download_progress(show_download_progress);
        if let Some(dir) = cache_dir {
            options = options.with_cache_dir(dir);
        }
        let model_name_for_task = model_name.clone();
        let model_name_code = model_name.to_string();

        let (model, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let model =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let info = EmbeddingModel::get_model_info(&model_name_for_task)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {model_name_code}"))?;
            Ok((model, info.dim))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(EmbeddingProvider {
            inner: EmbeddingInner::FastEmbed {
                model: Arc::new(Mutex::new(model)),
                model_name,
                dimension,
            },
            timeout: default_timeout(),
        })
    }

    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(2),
            },
            timeout: default_timeout(),
        }
    }

    /// Builds the provider selected by `embedding_backend`.
    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        let provider = match config.embedding_backend {
            EmbeddingBackend::Gemini => Self::new_gemini(
                config.gemini_key().to_owned(),
                config.gemini_base_url.clone(),
                config.embedding_model.clone(),
                config.embedding_dimensions,
            )?,
            EmbeddingBackend::OpenAI => {
                let client = openai_client.unwrap_or_else(|| {
                    Arc::new(Client::with_config(
                        OpenAIConfig::new()
                            .with_api_key(&config.openai_api_key)
                            .with_api_base(&config.openai_base_url),
                    ))
                });
                Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                )
            }
            EmbeddingBackend::FastEmbed => {
                Self::new_fastembed(
                    config.fastembed_model.clone(),
                    config.fastembed_cache_dir.as_ref().map(PathBuf::from),
                    config.fastembed_show_download_progress.unwrap_or(true),
                )
                .await?
            }
            EmbeddingBackend::Hashed => Self::new_hashed(config.embedding_dimensions as usize),
        };

        Ok(provider.with_timeout(Duration::from_secs(config.provider_timeout_secs)))
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingProvider {
    fn dimension(&self) -> usize {
        EmbeddingProvider::dimension(self)
    }

    fn label(&self) -> String {
        match self.model_code() {
            Some(model) => format!("{}:{model}", self.backend_label()),
            None => format!("{}:{}", self.backend_label(), self.dimension()),
        }
    }

    async fn embed_text(&self, text: &str, mode: EmbeddingMode) -> Result<Vec<f32>, AppError> {
        let embedding = tokio::time::timeout(self.timeout, self.embed(text, mode))
            .await
            .map_err(|_| AppError::Timeout {
                operation: mode.operation(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| AppError::Embedding(format!("{e:#}")))?;

        debug!(
            backend = self.backend_label(),
            ?mode,
            dimension = embedding.len(),
            "Embedding created"
        );
        Ok(embedding)
    }
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn is_bge(model: &EmbeddingModel) -> bool {
    model.to_string().to_ascii_lowercase().contains("bge")
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, mode: EmbeddingMode, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(2);
    let mut vector = vec![0.0f32; dim];

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        if let Some(slot) = vector.get_mut(idx) {
            *slot += 1.0;
        }
    }

    // Mode marker: a fixed slot per mode keeps the two sides deterministic but
    // never identical for the same text.
    let marker = match mode {
        EmbeddingMode::Document => 0,
        EmbeddingMode::Query => 1,
    };
    if let Some(slot) = vector.get_mut(marker) {
        *slot += 0.5;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    // Buckets 0 and 1 are reserved for the mode markers.
    let spread = dimension.saturating_sub(2).max(1);
    2 + (hasher.finish() as usize) % spread
}
