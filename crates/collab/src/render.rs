//! Client for the render service.

use std::time::Duration;

use async_trait::async_trait;

use forma_core::collaborators::{CollaboratorError, RenderOutcome, RenderRequest, Renderer};

use crate::client::{CollabApiError, CollabClient};

/// `POST /render` with a [`RenderRequest`], returning a [`RenderOutcome`].
#[derive(Clone)]
pub struct RenderApi {
    client: CollabClient,
}

impl RenderApi {
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
impl Renderer for RenderApi {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, CollaboratorError> {
        tracing::debug!(
            output_name = %request.output_name,
            associations = request.associations.len(),
            "Requesting render",
        );
        self.client
            .post_json("/render", request)
            .await
            .map_err(|e| self.client.classify(e))
    }
}
