//! Error types for gateway construction and provider selection.

use recall_rs_memory::MemoryError;

/// Errors raised before any embedding request is made.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// Provider name not recognised.
    #[error("unknown embedding provider '{0}' (expected 'ollama' or 'openai')")]
    UnknownProvider(String),
    /// OpenAI was selected without credentials.
    #[error("OPENAI_API_KEY is not set")]
    MissingApiKey,
    /// Detection found neither a local Ollama nor OpenAI credentials.
    #[error("no embedding provider available (ollama not reachable at {ollama_host}, OPENAI_API_KEY not set)")]
    NoProvider { ollama_host: String },
    /// HTTP client could not be built.
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl From<EmbedError> for MemoryError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::UnknownProvider(_) => MemoryError::Validation(err.to_string()),
            other => MemoryError::ProviderUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EmbedError;
    use pretty_assertions::assert_eq;
    use recall_rs_memory::{ErrorKind, MemoryError};

    #[test]
    fn maps_to_engine_error_kinds() {
        let unknown: MemoryError = EmbedError::UnknownProvider("cohere".to_string()).into();
        assert_eq!(unknown.kind(), ErrorKind::Validation);
        let missing: MemoryError = EmbedError::MissingApiKey.into();
        assert_eq!(missing.kind(), ErrorKind::ProviderUnavailable);
        let none: MemoryError = EmbedError::NoProvider {
            ollama_host: "http://localhost:11434".to_string(),
        }
        .into();
        assert_eq!(none.kind(), ErrorKind::ProviderUnavailable);
    }
}
