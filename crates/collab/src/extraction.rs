//! Client for the extraction service.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use forma_core::collaborators::{CollaboratorError, Extractor};
use forma_core::content::ExtractionResult;

use crate::client::{CollabApiError, CollabClient};

#[derive(Serialize)]
struct ExtractRequest<'a> {
    source_path: &'a str,
    template_path: &'a str,
}

/// `POST /extract` returning an [`ExtractionResult`].
#[derive(Clone)]
pub struct ExtractionApi {
    client: CollabClient,
}

impl ExtractionApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CollabApiError> {
        Ok(Self {
            client: CollabClient::new(base_url, timeout)?,
        })
    }

    pub fn with_client(client: CollabClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extractor for ExtractionApi {
    async fn extract(
        &self,
        source_path: &str,
        template_path: &str,
    ) -> Result<ExtractionResult, CollaboratorError> {
        tracing::debug!(source_path, template_path, "Requesting extraction");
        self.client
            .post_json(
                "/extract",
                &ExtractRequest {
                    source_path,
                    template_path,
                },
            )
            .await
            .map_err(|e| self.client.classify(e))
    }
}
