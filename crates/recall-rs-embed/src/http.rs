//! Request plumbing shared by the HTTP gateways.

use log::debug;
use recall_rs_memory::EmbeddingError;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Longest response body excerpt carried in error messages.
const BODY_EXCERPT: usize = 200;

/// Send `request` and decode a JSON body of type `T`.
///
/// `service` names the provider in messages; `model` is reported when the
/// provider answers 404.
pub(crate) async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    service: &str,
    endpoint: &str,
    model: &str,
    timeout: Duration,
) -> Result<T, EmbeddingError> {
    let response = request
        .send()
        .await
        .map_err(|err| transport_error(err, service, endpoint, timeout))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!("embedding request failed (service={service}, status={status})");
        return Err(status_error(status, &body, service, model));
    }
    response
        .json::<T>()
        .await
        .map_err(|err| EmbeddingError::InvalidResponse(format!("{service}: {err}")))
}

fn transport_error(
    err: reqwest::Error,
    service: &str,
    endpoint: &str,
    timeout: Duration,
) -> EmbeddingError {
    if err.is_timeout() {
        return EmbeddingError::Timeout(timeout);
    }
    EmbeddingError::Unavailable(format!("cannot reach {service} at {endpoint}: {err}"))
}

/// Classify a non-success HTTP status.
pub(crate) fn status_error(
    status: StatusCode,
    body: &str,
    service: &str,
    model: &str,
) -> EmbeddingError {
    let detail = excerpt(body);
    match status {
        StatusCode::NOT_FOUND => EmbeddingError::ModelNotFound(model.to_string()),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            EmbeddingError::Unavailable(format!("{service} returned {status}: {detail}"))
        }
        status if status.is_server_error() => {
            EmbeddingError::Unavailable(format!("{service} returned {status}: {detail}"))
        }
        status => EmbeddingError::Rejected(format!("{service} returned {status}: {detail}")),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

/// Join a base URL and a path without doubling the slash.
pub(crate) fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::{excerpt, join, status_error};
    use pretty_assertions::assert_eq;
    use recall_rs_memory::EmbeddingError;
    use reqwest::StatusCode;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(join("http://host:1/", "/api/embed"), "http://host:1/api/embed");
        assert_eq!(join("http://host/v1", "embeddings"), "http://host/v1/embeddings");
    }

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "", "ollama", "nomic"),
            EmbeddingError::ModelNotFound(model) if model == "nomic"
        ));
        assert!(status_error(StatusCode::SERVICE_UNAVAILABLE, "", "ollama", "m").is_retryable());
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "", "openai", "m").is_retryable());
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, "bad key", "openai", "m"),
            EmbeddingError::Rejected(_)
        ));
    }

    #[test]
    fn long_bodies_are_cut() {
        let body = "x".repeat(500);
        assert_eq!(excerpt(&body).len(), 203);
        assert_eq!(excerpt("  short "), "short");
    }
}
