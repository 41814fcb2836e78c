//! OpenAI-compatible `/embeddings` gateway.

use crate::error::EmbedError;
use crate::http::{join, send_json};
use async_trait::async_trait;
use log::debug;
use recall_rs_memory::{EmbeddingError, EmbeddingGateway};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default OpenAI embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-3-small";
/// Dimension of [`DEFAULT_MODEL`].
pub const DEFAULT_DIMENSION: usize = 1536;

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    #[serde(default)]
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Embeds text through the OpenAI embeddings API or a compatible server.
#[derive(Clone)]
pub struct OpenAiGateway {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl std::fmt::Debug for OpenAiGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiGateway")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("dimension", &self.dimension)
            .finish_non_exhaustive()
    }
}

impl OpenAiGateway {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(EmbedError::MissingApiKey);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimension,
            timeout,
        })
    }
}

#[async_trait]
impl EmbeddingGateway for OpenAiGateway {
    fn provider(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.base_url)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = self
            .client
            .post(join(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingsRequest {
                model: &self.model,
                input: text,
            });
        let response: EmbeddingsResponse =
            send_json(request, "openai", &self.base_url, &self.model, self.timeout).await?;
        let Some(item) = response.data.into_iter().next() else {
            return Err(EmbeddingError::InvalidResponse(
                "openai returned no embeddings".to_string(),
            ));
        };
        debug!(
            "openai embedding received (model={}, dimension={})",
            self.model,
            item.embedding.len()
        );
        Ok(item.embedding)
    }
}
