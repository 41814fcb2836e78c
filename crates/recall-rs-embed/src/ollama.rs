//! Ollama `/api/embed` gateway.

use crate::error::EmbedError;
use crate::http::{join, send_json};
use async_trait::async_trait;
use log::debug;
use recall_rs_memory::{EmbeddingError, EmbeddingGateway};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default Ollama embedding model.
pub const DEFAULT_MODEL: &str = "nomic-embed-text";
/// Dimension of [`DEFAULT_MODEL`].
pub const DEFAULT_DIMENSION: usize = 768;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeds text through a local or remote Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaGateway {
    client: Client,
    host: String,
    model: String,
    dimension: usize,
    timeout: Duration,
}

impl OllamaGateway {
    pub fn new(
        host: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
        timeout: Duration,
    ) -> Result<Self, EmbedError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            host: host.into(),
            model: model.into(),
            dimension,
            timeout,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

#[async_trait]
impl EmbeddingGateway for OllamaGateway {
    fn provider(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn base_url(&self) -> Option<&str> {
        Some(&self.host)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let endpoint = join(&self.host, "api/embed");
        let request = self.client.post(&endpoint).json(&EmbedRequest {
            model: &self.model,
            input: text,
        });
        let response: EmbedResponse =
            send_json(request, "ollama", &self.host, &self.model, self.timeout).await?;
        let vector = response.embeddings.into_iter().next().unwrap_or_default();
        if vector.is_empty() {
            return Err(EmbeddingError::InvalidResponse(
                "ollama returned no embeddings".to_string(),
            ));
        }
        debug!(
            "ollama embedding received (model={}, dimension={})",
            self.model,
            vector.len()
        );
        Ok(vector)
    }
}
