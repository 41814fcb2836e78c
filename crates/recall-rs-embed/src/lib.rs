//! HTTP embedding gateways.
//!
//! Ollama and OpenAI-compatible endpoints behind the
//! [`recall_rs_memory::EmbeddingGateway`] contract, plus provider detection
//! for stores that do not have a config yet.

mod error;
mod http;
mod ollama;
mod openai;
mod provider;

pub use error::EmbedError;
pub use ollama::OllamaGateway;
pub use openai::OpenAiGateway;
pub use provider::{
    DEFAULT_OLLAMA_HOST, DEFAULT_OPENAI_BASE_URL, DETECT_TIMEOUT, Provider, ProviderSettings,
    build_gateway, detect_provider,
};
