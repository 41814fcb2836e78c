use async_trait::async_trait;
use parking_lot::Mutex;
use recall_rs_memory::{EmbeddingError, EmbeddingGateway};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(token: &str) -> u64 {
    token.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    })
}

/// Deterministic bag-of-words embedder: lowercase alphanumeric tokens are
/// hashed into signed buckets and the result is L2-normalized. Texts that
/// share words score higher than texts that do not.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    provider: String,
    model: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            provider: "test".to_string(),
            model: "hash".to_string(),
            dimension,
        }
    }

    pub fn with_identity(mut self, provider: &str, model: &str) -> Self {
        self.provider = provider.to_string();
        self.model = model.to_string();
        self
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if self.dimension == 0 {
            return vector;
        }
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|ch: char| !ch.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            let hash = fnv1a(token);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl EmbeddingGateway for HashEmbedder {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.vector(text))
    }
}

/// Gateway whose every call fails with a fixed error.
#[derive(Debug, Clone)]
pub struct FailingEmbedder {
    dimension: usize,
    model_missing: bool,
    calls: Arc<AtomicUsize>,
}

impl FailingEmbedder {
    /// Fails as an unreachable provider.
    pub fn unavailable(dimension: usize) -> Self {
        Self {
            dimension,
            model_missing: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fails as a provider without the configured model.
    pub fn model_missing(dimension: usize) -> Self {
        Self {
            model_missing: true,
            ..Self::unavailable(dimension)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGateway for FailingEmbedder {
    fn provider(&self) -> &str {
        "test"
    }

    fn model(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.model_missing {
            Err(EmbeddingError::ModelNotFound("hash".to_string()))
        } else {
            Err(EmbeddingError::Unavailable("connection refused".to_string()))
        }
    }
}

/// Hash embedder that sleeps before answering.
#[derive(Debug, Clone)]
pub struct SlowEmbedder {
    inner: HashEmbedder,
    delay: Duration,
}

impl SlowEmbedder {
    pub fn new(dimension: usize, delay: Duration) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            delay,
        }
    }
}

#[async_trait]
impl EmbeddingGateway for SlowEmbedder {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.inner.vector(text))
    }
}

/// Hash embedder that records its inputs and can fail its first calls as
/// an unavailable provider.
#[derive(Debug, Clone)]
pub struct CountingEmbedder {
    inner: HashEmbedder,
    failures_left: Arc<AtomicUsize>,
    inputs: Arc<Mutex<Vec<String>>>,
}

impl CountingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            inner: HashEmbedder::new(dimension),
            failures_left: Arc::new(AtomicUsize::new(0)),
            inputs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_first(self, failures: usize) -> Self {
        self.failures_left.store(failures, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl EmbeddingGateway for CountingEmbedder {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.inputs.lock().push(text.to_string());
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(EmbeddingError::Unavailable("temporarily down".to_string()));
        }
        Ok(self.inner.vector(text))
    }
}

/// Gateway that reports one dimension and returns vectors of another.
#[derive(Debug, Clone)]
pub struct MismatchedEmbedder {
    claimed: usize,
    inner: HashEmbedder,
}

impl MismatchedEmbedder {
    pub fn new(claimed: usize, actual: usize) -> Self {
        Self {
            claimed,
            inner: HashEmbedder::new(actual),
        }
    }
}

#[async_trait]
impl EmbeddingGateway for MismatchedEmbedder {
    fn provider(&self) -> &str {
        self.inner.provider()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn dimension(&self) -> usize {
        self.claimed
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.inner.vector(text))
    }
}
