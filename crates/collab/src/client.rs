//! Shared HTTP plumbing: one `reqwest::Client` per collaborator base URL,
//! JSON POST with status checking, and mapping of transport failures onto
//! [`CollaboratorError`].

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use forma_core::collaborators::CollaboratorError;

/// Errors from the collaborator HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum CollabApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The collaborator returned a non-2xx status code.
    #[error("Collaborator API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

/// JSON-over-HTTP client for a single collaborator service.
#[derive(Clone)]
pub struct CollabClient {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl CollabClient {
    /// * `base_url` - e.g. `http://extractor:8080`; a trailing slash is ignored.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollabApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url, timeout))
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// `POST {base_url}{path}` with a JSON body, decoding a JSON response.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, CollabApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Translate a transport error into the collaborator error taxonomy.
    pub fn classify(&self, err: CollabApiError) -> CollaboratorError {
        match err {
            CollabApiError::Request(e) if e.is_timeout() => {
                CollaboratorError::Timeout(self.timeout.as_secs())
            }
            CollabApiError::Request(e) => CollaboratorError::Other(e.to_string()),
            CollabApiError::ApiError { status, body } => match status {
                404 | 410 => CollaboratorError::NotFound(body),
                400 | 415 | 422 => CollaboratorError::Malformed(body),
                408 | 504 => CollaboratorError::Timeout(self.timeout.as_secs()),
                507 => CollaboratorError::ResourceExhausted(body),
                _ => CollaboratorError::Other(format!("status {status}: {body}")),
            },
        }
    }

    // ---- private helpers ----

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, CollabApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CollabApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CollabApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}
