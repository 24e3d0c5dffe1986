use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::ContentItem;

/// Creates the notebook that holds a generation's source material.
#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Returns the external notebook id.
    async fn create(&self, title: &str, items: &[ContentItem], user_id: &str) -> Result<String>;
}

/// Turns a notebook into an audio overview. Long-running (minutes).
#[async_trait]
pub trait SynthesisService: Send + Sync {
    async fn synthesize(&self, notebook_id: &str, user_id: &str, format: &str) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct CreateNotebookRequest<'a> {
    title: &'a str,
    user_id: &'a str,
    content_items: &'a [ContentItem],
}

#[derive(Debug, Serialize)]
struct AudioOverviewRequest<'a> {
    user_id: &'a str,
    format: &'a str,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ServiceStatus {
    Ok,
    Error,
}

#[derive(Debug, Deserialize)]
struct ServiceResponse {
    status: ServiceStatus,
    notebook_id: Option<String>,
    error: Option<String>,
}

/// HTTP client for the notebook automation service.
pub struct NotebookClient {
    client: Client,
    base_url: Url,
}

impl NotebookClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Config(format!("Invalid notebook service URL: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Notebook service URL cannot be a base: {}",
                base_url
            )));
        }

        // Request bounds are enforced per stage by the pipeline.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Decode a service reply. Error replies may arrive with any HTTP status.
    async fn read_response(response: reqwest::Response) -> Result<ServiceResponse> {
        let status = response.status();
        let body = response.text().await?;

        match serde_json::from_str::<ServiceResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(_) if !status.is_success() => Ok(ServiceResponse {
                status: ServiceStatus::Error,
                notebook_id: None,
                error: Some(format!("Notebook service returned HTTP {}: {}", status, body)),
            }),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactService for NotebookClient {
    async fn create(&self, title: &str, items: &[ContentItem], user_id: &str) -> Result<String> {
        let request = CreateNotebookRequest {
            title,
            user_id,
            content_items: items,
        };

        let response = self
            .client
            .post(self.endpoint(&["notebooks"]))
            .json(&request)
            .send()
            .await?;
        let reply = Self::read_response(response).await?;

        match reply {
            ServiceResponse {
                status: ServiceStatus::Ok,
                notebook_id: Some(id),
                ..
            } => Ok(id),
            ServiceResponse {
                status: ServiceStatus::Ok,
                notebook_id: None,
                ..
            } => Err(AppError::ArtifactService(
                "Notebook service returned no notebook id".to_string(),
            )),
            ServiceResponse { error, .. } => Err(AppError::ArtifactService(
                error.unwrap_or_else(|| "Failed to create notebook".to_string()),
            )),
        }
    }
}

#[async_trait]
impl SynthesisService for NotebookClient {
    async fn synthesize(&self, notebook_id: &str, user_id: &str, format: &str) -> Result<()> {
        let request = AudioOverviewRequest { user_id, format };

        let response = self
            .client
            .post(self.endpoint(&["notebooks", notebook_id, "audio"]))
            .json(&request)
            .send()
            .await?;
        let reply = Self::read_response(response).await?;

        if reply.status == ServiceStatus::Ok {
            Ok(())
        } else {
            Err(AppError::SynthesisService(
                reply
                    .error
                    .unwrap_or_else(|| "Failed to generate audio".to_string()),
            ))
        }
    }
}
