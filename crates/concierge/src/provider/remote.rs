//! Remote providers using OpenAI-compatible APIs
//!
//! `RemoteEmbeddingProvider` posts to `{base_url}/embeddings` and
//! `RemoteGenerationProvider` to `{base_url}/chat/completions`. Each call is
//! a single attempt; retry policy belongs to the caller. Rate limits, 5xx
//! responses and network failures are reported as `ProviderError::Transient`.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::error::{ConciergeError, Result};
use crate::provider::{
    Embedding, EmbeddingProvider, Generation, GenerationProvider, GenerationRequest,
    ProviderError, estimate_tokens,
};

/// HTTP client, endpoint and credentials shared by both remote providers
#[derive(Debug, Clone)]
struct RemoteClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RemoteClient {
    fn new(config: &ProviderConfig, api_key: String) -> Result<Self> {
        url::Url::parse(&config.base_url).map_err(|e| {
            ConciergeError::Config(format!("Invalid base_url '{}': {e}", config.base_url))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConciergeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn from_env(config: &ProviderConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            ConciergeError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;
        Self::new(config, api_key)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> std::result::Result<Resp, ProviderError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let url = format!("{}/{path}", self.base_url);
        debug!("Calling remote API at: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(classify_status(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

fn classify_request_error(e: reqwest::Error) -> ProviderError {
    if e.is_decode() {
        ProviderError::InvalidResponse(e.to_string())
    } else {
        ProviderError::Transient(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> ProviderError {
    let message = format!("API returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        ProviderError::Transient(message)
    } else {
        ProviderError::Rejected(message)
    }
}

/// OpenAI-compatible embeddings request
#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

/// OpenAI-compatible embeddings response
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// Token usage block shared by both endpoints
#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// Embedding provider backed by an OpenAI-compatible `/embeddings` endpoint
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingProvider {
    remote: RemoteClient,
    model: String,
}

impl RemoteEmbeddingProvider {
    /// Create a provider, reading the API key from `config.api_key_env`
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let remote = RemoteClient::from_env(config)?;
        info!(
            "RemoteEmbeddingProvider initialized with model: {}, base_url: {}",
            config.embedding_model, config.base_url
        );
        Ok(Self {
            remote,
            model: config.embedding_model.clone(),
        })
    }

    /// Create a provider with an explicit API key
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::new(config, api_key.into())?,
            model: config.embedding_model.clone(),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Embedding>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let mut response: EmbeddingResponse = self.remote.post("embeddings", &request).await?;

        if response.data.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }
        response.data.sort_by_key(|d| d.index);

        // Usage is reported per request; spread it over the inputs
        let total = response
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| texts.iter().map(|t| estimate_tokens(t)).sum());
        let count = texts.len() as u32;
        let share = total / count;
        let remainder = total % count;

        Ok(response
            .data
            .into_iter()
            .enumerate()
            .map(|(i, d)| Embedding {
                vector: d.embedding,
                tokens_used: if i == 0 { share + remainder } else { share },
            })
            .collect())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

/// Message in the chat completion request
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

/// OpenAI-compatible chat completion response
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

/// Choice in the chat completion response
#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// Message in the response choice
#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Generation provider backed by an OpenAI-compatible `/chat/completions` endpoint
#[derive(Debug, Clone)]
pub struct RemoteGenerationProvider {
    remote: RemoteClient,
    model: String,
}

impl RemoteGenerationProvider {
    /// Create a provider, reading the API key from `config.api_key_env`
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let remote = RemoteClient::from_env(config)?;
        info!(
            "RemoteGenerationProvider initialized with model: {}, base_url: {}",
            config.generation_model, config.base_url
        );
        Ok(Self {
            remote,
            model: config.generation_model.clone(),
        })
    }

    /// Create a provider with an explicit API key
    pub fn with_api_key(config: &ProviderConfig, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            remote: RemoteClient::new(config, api_key.into())?,
            model: config.generation_model.clone(),
        })
    }
}

#[async_trait]
impl GenerationProvider for RemoteGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> std::result::Result<Generation, ProviderError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let completion: ChatCompletionResponse =
            self.remote.post("chat/completions", &body).await?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ProviderError::InvalidResponse("Empty response".to_string()))?;

        let tokens_used = completion
            .usage
            .map(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(&request.prompt) + estimate_tokens(&text));

        Ok(Generation { text, tokens_used })
    }

    fn model(&self) -> &str {
        &self.model
    }
}
