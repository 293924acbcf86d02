use crate::context::render_prompt;
use crate::embeddings::{Embedding, EmbeddingProvider};
use crate::error::ProviderError;
use crate::llm::{GenerationOptions, LanguageModel};
use async_trait::async_trait;
use log::debug;
use std::time::Duration;

/// Connection settings for an Ollama server
#[derive(Debug, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        OllamaConfig {
            base_url: "http://localhost:11434".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Client for interacting with the Ollama API
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(config: &OllamaConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(OllamaClient {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<Req, Resp>(&self, path: &str, request: &Req) -> Result<Resp, ProviderError>
    where
        Req: serde::Serialize + ?Sized,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(request).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::Status { status, body });
        }

        Ok(response.json().await?)
    }
}

/// Embeddings through `POST /api/embed`
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient, model: impl Into<String>) -> Self {
        OllamaEmbedder {
            client,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str) -> Result<Embedding, ProviderError> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Embedding>, ProviderError> {
        #[derive(serde::Serialize)]
        struct EmbedRequest<'a> {
            model: &'a str,
            input: &'a [&'a str],
        }

        #[derive(serde::Deserialize, Debug)]
        struct EmbedResponse {
            embeddings: Vec<Vec<f32>>,
        }

        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbedRequest {
            model: &self.model,
            input: texts,
        };
        let response: EmbedResponse = self.client.post("/api/embed", &request).await?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }
        debug!("Embedded {} texts with {}", texts.len(), self.model);

        Ok(response.embeddings.into_iter().map(Embedding::new).collect())
    }
}

/// Completions through `POST /api/generate`
#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    model: String,
    options: GenerationOptions,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient, model: impl Into<String>, options: GenerationOptions) -> Self {
        OllamaLlm {
            client,
            model: model.into(),
            options,
        }
    }
}

#[async_trait]
impl LanguageModel for OllamaLlm {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, context: &str) -> Result<String, ProviderError> {
        #[derive(serde::Serialize)]
        struct GenerateRequest<'a> {
            model: &'a str,
            prompt: &'a str,
            stream: bool,
            #[serde(skip_serializing_if = "Option::is_none")]
            options: Option<&'a GenerationOptions>,
        }

        #[derive(serde::Deserialize, Debug)]
        struct GenerateResponse {
            response: String,
        }

        let full_prompt = render_prompt(prompt, context);
        let request = GenerateRequest {
            model: &self.model,
            prompt: &full_prompt,
            stream: false,
            options: (!self.options.is_empty()).then_some(&self.options),
        };

        let response: GenerateResponse = self.client.post("/api/generate", &request).await?;
        if response.response.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(
                "No response generated".to_string(),
            ));
        }

        Ok(response.response)
    }
}
