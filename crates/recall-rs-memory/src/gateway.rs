//! Embedding gateway contract consumed by the engine.

use async_trait::async_trait;
use recall_rs_config::EmbeddingProfile;
use std::time::Duration;

/// Maximum number of characters sent to a provider.
pub const MAX_EMBED_CHARS: usize = 8192;

/// Failures reported by an embedding gateway.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    /// The provider could not be reached or refused the request.
    #[error("{0}")]
    Unavailable(String),
    /// The provider refused the request, for example on bad credentials.
    #[error("request rejected: {0}")]
    Rejected(String),
    /// The provider does not serve the requested model.
    #[error("model '{0}' is not available")]
    ModelNotFound(String),
    /// The provider did not answer in time.
    #[error("request timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    /// The provider answered with something that is not an embedding.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Unavailable(_) | EmbeddingError::Timeout(_)
        )
    }
}

/// Converts text into fixed-dimension vectors.
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    /// Provider identifier recorded in the store config.
    fn provider(&self) -> &str;

    /// Model identifier recorded in the store config.
    fn model(&self) -> &str;

    /// Length of every vector this gateway returns.
    fn dimension(&self) -> usize;

    /// Endpoint override, if any.
    fn base_url(&self) -> Option<&str> {
        None
    }

    /// Embed already preprocessed text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Profile compared against the store config.
    fn profile(&self) -> EmbeddingProfile {
        let profile = EmbeddingProfile::new(self.provider(), self.model(), self.dimension());
        match self.base_url() {
            Some(url) => profile.with_base_url(url),
            None => profile,
        }
    }
}

/// Normalize text before embedding: trim, collapse whitespace runs to a
/// single space, and cap the length at [`MAX_EMBED_CHARS`] characters.
pub fn preprocess(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len().min(MAX_EMBED_CHARS));
    let mut count = 0usize;
    for word in text.split_whitespace() {
        if count > 0 {
            if count == MAX_EMBED_CHARS {
                break;
            }
            collapsed.push(' ');
            count += 1;
        }
        for ch in word.chars() {
            if count == MAX_EMBED_CHARS {
                break;
            }
            collapsed.push(ch);
            count += 1;
        }
    }
    collapsed.truncate(collapsed.trim_end().len());
    collapsed
}

#[cfg(test)]
mod tests {
    use super::{EmbeddingError, MAX_EMBED_CHARS, preprocess};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    #[test]
    fn collapses_whitespace() {
        assert_eq!(preprocess("  hello \n\t world  "), "hello world");
        assert_eq!(preprocess("   "), "");
    }

    #[test]
    fn truncates_by_characters() {
        let long = "é".repeat(MAX_EMBED_CHARS + 10);
        let processed = preprocess(&long);
        assert_eq!(processed.chars().count(), MAX_EMBED_CHARS);
    }

    #[test]
    fn truncation_never_leaves_trailing_space() {
        let word = "a".repeat(MAX_EMBED_CHARS - 1);
        let processed = preprocess(&format!("{word} b c"));
        assert_eq!(processed.chars().count(), MAX_EMBED_CHARS - 1);
        assert!(!processed.ends_with(' '));
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(EmbeddingError::Unavailable("down".to_string()).is_retryable());
        assert!(EmbeddingError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!EmbeddingError::ModelNotFound("m".to_string()).is_retryable());
        assert!(!EmbeddingError::InvalidResponse("x".to_string()).is_retryable());
        assert!(!EmbeddingError::Rejected("401".to_string()).is_retryable());
    }
}
