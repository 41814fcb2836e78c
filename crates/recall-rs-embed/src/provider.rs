//! Provider selection and gateway construction.

use crate::error::EmbedError;
use crate::http::join;
use crate::{ollama, openai};
use crate::{OllamaGateway, OpenAiGateway};
use log::{debug, info};
use recall_rs_config::EmbeddingProfile;
use recall_rs_memory::EmbeddingGateway;
use reqwest::Client;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
/// Time allowed for the Ollama reachability probe.
pub const DETECT_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const OLLAMA_HOST_VAR: &str = "OLLAMA_HOST";
const OPENAI_API_KEY_VAR: &str = "OPENAI_API_KEY";
const OPENAI_BASE_URL_VAR: &str = "OPENAI_BASE_URL";

/// Supported embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Ollama,
    OpenAi,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAi => "openai",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::Ollama => ollama::DEFAULT_MODEL,
            Provider::OpenAi => openai::DEFAULT_MODEL,
        }
    }

    pub fn default_dimension(self) -> usize {
        match self {
            Provider::Ollama => ollama::DEFAULT_DIMENSION,
            Provider::OpenAi => openai::DEFAULT_DIMENSION,
        }
    }

    /// Profile for this provider with optional model and dimension overrides.
    pub fn profile(self, model: Option<&str>, dimension: Option<usize>) -> EmbeddingProfile {
        EmbeddingProfile::new(
            self.as_str(),
            model.unwrap_or(self.default_model()),
            dimension.unwrap_or(self.default_dimension()),
        )
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = EmbedError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "openai" => Ok(Provider::OpenAi),
            _ => Err(EmbedError::UnknownProvider(value.to_string())),
        }
    }
}

/// Endpoints and credentials taken from the environment.
#[derive(Clone, PartialEq)]
pub struct ProviderSettings {
    /// `OLLAMA_HOST` override.
    pub ollama_host: Option<String>,
    /// `OPENAI_BASE_URL` override.
    pub openai_base_url: Option<String>,
    /// `OPENAI_API_KEY`.
    pub openai_api_key: Option<String>,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("ollama_host", &self.ollama_host)
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<set>"))
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            ollama_host: None,
            openai_base_url: None,
            openai_api_key: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ProviderSettings {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            ollama_host: read(OLLAMA_HOST_VAR).map(|host| normalize_host(&host)),
            openai_base_url: read(OPENAI_BASE_URL_VAR),
            openai_api_key: read(OPENAI_API_KEY_VAR),
            ..Self::default()
        }
    }

    /// Ollama endpoint: environment, then the store's recorded endpoint,
    /// then the default.
    pub fn ollama_host(&self, recorded: Option<&str>) -> String {
        self.ollama_host
            .as_deref()
            .or(recorded)
            .unwrap_or(DEFAULT_OLLAMA_HOST)
            .to_string()
    }

    /// OpenAI endpoint with the same precedence as [`Self::ollama_host`].
    pub fn openai_base_url(&self, recorded: Option<&str>) -> String {
        self.openai_base_url
            .as_deref()
            .or(recorded)
            .unwrap_or(DEFAULT_OPENAI_BASE_URL)
            .to_string()
    }
}

/// `OLLAMA_HOST` is often given as a bare `host:port`.
fn normalize_host(host: &str) -> String {
    if host.contains("://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

/// Pick a provider for a new store: a reachable Ollama wins, then OpenAI
/// when an API key is configured.
pub async fn detect_provider(settings: &ProviderSettings) -> Result<Provider, EmbedError> {
    let host = settings.ollama_host(None);
    let client = Client::builder().timeout(DETECT_TIMEOUT).build()?;
    match client.get(join(&host, "api/tags")).send().await {
        Ok(response) if response.status().is_success() => {
            info!("detected embedding provider (provider=ollama, host={host})");
            return Ok(Provider::Ollama);
        }
        Ok(response) => {
            debug!(
                "ollama probe rejected (host={host}, status={})",
                response.status()
            );
        }
        Err(err) => debug!("ollama probe failed (host={host}): {err}"),
    }
    if settings.openai_api_key.is_some() {
        info!("detected embedding provider (provider=openai)");
        return Ok(Provider::OpenAi);
    }
    Err(EmbedError::NoProvider { ollama_host: host })
}

/// Build the gateway described by `profile`.
pub fn build_gateway(
    profile: &EmbeddingProfile,
    settings: &ProviderSettings,
) -> Result<Arc<dyn EmbeddingGateway>, EmbedError> {
    let provider = profile.provider.parse::<Provider>()?;
    let recorded = profile.base_url.as_deref();
    let gateway: Arc<dyn EmbeddingGateway> = match provider {
        Provider::Ollama => Arc::new(OllamaGateway::new(
            settings.ollama_host(recorded),
            profile.model.clone(),
            profile.dimension,
            settings.request_timeout,
        )?),
        Provider::OpenAi => {
            let api_key = settings
                .openai_api_key
                .clone()
                .ok_or(EmbedError::MissingApiKey)?;
            Arc::new(OpenAiGateway::new(
                settings.openai_base_url(recorded),
                api_key,
                profile.model.clone(),
                profile.dimension,
                settings.request_timeout,
            )?)
        }
    };
    debug!(
        "built embedding gateway (provider={}, model={}, dimension={})",
        gateway.provider(),
        gateway.model(),
        gateway.dimension()
    );
    Ok(gateway)
}
