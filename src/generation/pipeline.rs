use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::db::{JobStore, PreferenceStore, SourceRegistry};
use crate::error::{AppError, Result};
use crate::models::{GenerationJob, JobStatus, JobUpdate, SourcesUsed};
use crate::services::{ArtifactService, SynthesisService};

use super::ContentAggregator;

pub const NO_CONTENT_ERROR: &str = "No content found from any sources";

/// Upper bounds for the two external stages.
#[derive(Debug, Clone, Copy)]
pub struct PipelineTimeouts {
    pub artifact: Duration,
    pub synthesis: Duration,
}

/// Drives one job from `scheduled` to `complete` or `failed`.
///
/// Every outcome is written to the job store. `run` only returns an error
/// when the store itself refused the final write.
pub struct GenerationPipeline {
    jobs: Arc<dyn JobStore>,
    preferences: Arc<dyn PreferenceStore>,
    sources: Arc<dyn SourceRegistry>,
    aggregator: ContentAggregator,
    artifacts: Arc<dyn ArtifactService>,
    synthesis: Arc<dyn SynthesisService>,
    timeouts: PipelineTimeouts,
}

impl GenerationPipeline {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        preferences: Arc<dyn PreferenceStore>,
        sources: Arc<dyn SourceRegistry>,
        aggregator: ContentAggregator,
        artifacts: Arc<dyn ArtifactService>,
        synthesis: Arc<dyn SynthesisService>,
        timeouts: PipelineTimeouts,
    ) -> Self {
        Self {
            jobs,
            preferences,
            sources,
            aggregator,
            artifacts,
            synthesis,
            timeouts,
        }
    }

    pub async fn run(&self, user_id: &str, job_id: Uuid) -> Result<GenerationJob> {
        tracing::info!(job_id = %job_id, user_id, "Starting generation");

        match self.drive(user_id, job_id).await {
            Ok(job) => {
                tracing::info!(job_id = %job_id, user_id, status = %job.status, "Generation finished");
                Ok(job)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, user_id, error = %e, "Generation failed unexpectedly");
                self.jobs
                    .update(job_id, JobUpdate::failed(e.to_string()))
                    .await
                    .map_err(|update_err| {
                        tracing::error!(
                            critical = true,
                            job_id = %job_id,
                            user_id,
                            error = %update_err,
                            "Could not record generation failure; job left in its last written state"
                        );
                        update_err
                    })
            }
        }
    }

    async fn drive(&self, user_id: &str, job_id: Uuid) -> Result<GenerationJob> {
        self.jobs
            .update(job_id, JobUpdate::status(JobStatus::Fetching))
            .await?;

        let items = self.aggregator.collect(user_id).await;
        if items.is_empty() {
            tracing::warn!(job_id = %job_id, user_id, "{}", NO_CONTENT_ERROR);
            return self
                .jobs
                .update(job_id, JobUpdate::failed(NO_CONTENT_ERROR))
                .await;
        }

        self.jobs
            .update(job_id, JobUpdate::status(JobStatus::Generating))
            .await?;

        let topics: Vec<String> = self
            .sources
            .list_topics(user_id)
            .await?
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| t.topic)
            .collect();
        let title = artifact_title(&topics, Utc::now().date_naive());
        let format = self.preferences.get_preferences(user_id).await?.podcast_style;

        tracing::info!(job_id = %job_id, "Creating notebook \"{}\" with {} items", title, items.len());
        let created = bounded(
            self.timeouts.artifact,
            "Notebook creation",
            self.artifacts.create(&title, &items, user_id),
        )
        .await;
        let notebook_id = match created {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Notebook creation failed");
                return self
                    .jobs
                    .update(job_id, JobUpdate::failed(e.to_string()))
                    .await;
            }
        };

        tracing::info!(job_id = %job_id, notebook_id = %notebook_id, format = %format, "Generating audio overview");
        let synthesized = bounded(
            self.timeouts.synthesis,
            "Audio generation",
            self.synthesis.synthesize(&notebook_id, user_id, &format),
        )
        .await;
        if let Err(e) = synthesized {
            tracing::warn!(job_id = %job_id, notebook_id = %notebook_id, error = %e, "Audio generation failed");
            return self
                .jobs
                .update(
                    job_id,
                    JobUpdate::failed(e.to_string()).with_notebook(notebook_id),
                )
                .await;
        }

        self.jobs
            .update(
                job_id,
                JobUpdate::status(JobStatus::Complete)
                    .with_notebook(notebook_id)
                    .with_sources(SourcesUsed::from_items(&items)),
            )
            .await
    }
}

async fn bounded<T>(
    limit: Duration,
    stage: &str,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(format!(
            "{} timed out after {:?}",
            stage, limit
        ))),
    }
}

/// Notebook title for a day's brief, e.g.
/// `Daily Brief - Topics AI, Space, and Health - 2024-01-01`.
pub fn artifact_title(topics: &[String], date: NaiveDate) -> String {
    let date = date.format("%Y-%m-%d");
    let listed = match topics {
        [] => return format!("Daily Brief - {}", date),
        [only] => only.clone(),
        [first, second] => format!("{} and {}", first, second),
        [rest @ .., last] => format!("{}, and {}", rest.join(", "), last),
    };
    format!("Daily Brief - Topics {} - {}", listed, date)
}
