//! Embedding gateway selection for the command surface.

use async_trait::async_trait;
use recall_rs_config::EmbeddingProfile;
use recall_rs_embed::{Provider, ProviderSettings, build_gateway, detect_provider};
use recall_rs_memory::{EmbeddingGateway, MemoryError};
use std::sync::Arc;

/// Picks a provider for new stores and builds gateways for profiles.
#[async_trait]
pub trait GatewayFactory: Send + Sync {
    /// Provider used when a store has no config and none was requested.
    async fn detect(&self) -> Result<Provider, MemoryError>;

    /// Gateway producing embeddings for `profile`.
    fn build(&self, profile: &EmbeddingProfile) -> Result<Arc<dyn EmbeddingGateway>, MemoryError>;
}

/// Ollama/OpenAI over HTTP, configured from the environment.
#[derive(Debug, Clone, Default)]
pub struct HttpGateways {
    settings: ProviderSettings,
}

impl HttpGateways {
    pub fn new(settings: ProviderSettings) -> Self {
        Self { settings }
    }

    pub fn from_env() -> Self {
        Self::new(ProviderSettings::from_env())
    }
}

#[async_trait]
impl GatewayFactory for HttpGateways {
    async fn detect(&self) -> Result<Provider, MemoryError> {
        Ok(detect_provider(&self.settings).await?)
    }

    fn build(&self, profile: &EmbeddingProfile) -> Result<Arc<dyn EmbeddingGateway>, MemoryError> {
        Ok(build_gateway(profile, &self.settings)?)
    }
}
