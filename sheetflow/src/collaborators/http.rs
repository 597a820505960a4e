//! HTTP collaborator: forwards tasks to an agent service.

use super::{Collaborator, TaskRequest};
use crate::core::StageResult;
use crate::errors::CollaboratorError;
use async_trait::async_trait;
use std::time::Duration;

const MAX_ERROR_BODY: usize = 512;

/// POSTs each [`TaskRequest`] as JSON and reads a [`StageResult`] back.
#[derive(Debug, Clone)]
pub struct HttpCollaborator {
    name: String,
    endpoint: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpCollaborator {
    /// Creates a collaborator for an endpoint with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns `CollaboratorError::Transport` if the client cannot be built.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            endpoint: endpoint.into(),
            token: None,
            client,
        })
    }

    /// Sends a bearer token with every request.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The endpoint URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: &TaskRequest) -> Result<StageResult, CollaboratorError> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let result: StageResult = response
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))?;

        tracing::debug!(
            collaborator = %self.name,
            stage = %request.stage,
            usable = result.is_usable(),
            "Collaborator answered"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageName;

    #[test]
    fn test_builds_with_token() {
        let collaborator = HttpCollaborator::new("agent", "http://127.0.0.1:9/task", Duration::from_secs(5))
            .unwrap()
            .with_token("secret");
        assert_eq!(collaborator.name(), "agent");
        assert_eq!(collaborator.endpoint(), "http://127.0.0.1:9/task");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let collaborator =
            HttpCollaborator::new("agent", "http://127.0.0.1:9/task", Duration::from_millis(500)).unwrap();
        let err = collaborator
            .invoke(&TaskRequest::new(StageName::FetchTable, "fetch"))
            .await
            .unwrap_err();
        assert!(matches!(err, CollaboratorError::Transport(_)));
    }
}
