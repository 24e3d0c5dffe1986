use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

use super::{ContentItem, SourceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Scheduled,
    Fetching,
    Generating,
    Complete,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Scheduled => "scheduled",
            JobStatus::Fetching => "fetching",
            JobStatus::Generating => "generating",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Legal edges of the generation state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Scheduled, Fetching)
                | (Fetching, Generating)
                | (Generating, Complete)
                | (Scheduled | Fetching | Generating, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(JobStatus::Scheduled),
            "fetching" => Ok(JobStatus::Fetching),
            "generating" => Ok(JobStatus::Generating),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown job status: {}", other).into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourcesUsed {
    pub rss_feeds: usize,
    pub news_topics: usize,
    pub total_items: usize,
}

impl SourcesUsed {
    pub fn from_items(items: &[ContentItem]) -> Self {
        let rss_feeds = items
            .iter()
            .filter(|i| i.source_type == SourceType::Rss)
            .map(|i| i.source_identifier.as_str())
            .collect::<HashSet<_>>()
            .len();
        let news_topics = items
            .iter()
            .filter(|i| i.source_type == SourceType::TopicNews)
            .count();

        Self {
            rss_feeds,
            news_topics,
            total_items: items.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    /// The scheduled occurrence this job was created for; `None` for manual runs.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub notebook_id: Option<String>,
    pub sources_used: Option<SourcesUsed>,
    pub error_message: Option<String>,
}

impl GenerationJob {
    pub fn new(
        user_id: impl Into<String>,
        scheduled_for: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            status: JobStatus::Scheduled,
            scheduled_for,
            scheduled_at: now,
            started_at: None,
            completed_at: None,
            notebook_id: None,
            sources_used: None,
            error_message: None,
        }
    }

    /// Apply a partial update, validating the status edge and stamping
    /// `started_at`/`completed_at` together with the status write.
    /// On error the job is left untouched.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) -> Result<()> {
        if let Some(next) = update.status {
            if next != self.status || self.status.is_terminal() {
                if !self.status.can_transition_to(next) {
                    return Err(AppError::InvalidTransition {
                        from: self.status,
                        to: next,
                    });
                }

                // Timestamps never run backwards relative to earlier stamps.
                if self.started_at.is_none() && (next == JobStatus::Fetching || next.is_terminal())
                {
                    self.started_at = Some(now.max(self.scheduled_at));
                }
                if next.is_terminal() {
                    let started = self.started_at.unwrap_or(self.scheduled_at);
                    self.completed_at = Some(now.max(started));
                }
                self.status = next;
            }
        }

        if let Some(error) = &update.error_message {
            self.error_message = Some(error.clone());
        }
        if let Some(notebook_id) = &update.notebook_id {
            self.notebook_id = Some(notebook_id.clone());
        }
        if let Some(sources) = update.sources_used {
            self.sources_used = Some(sources);
        }

        Ok(())
    }
}

/// Partial job update. Unset fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub error_message: Option<String>,
    pub notebook_id: Option<String>,
    pub sources_used: Option<SourcesUsed>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn with_notebook(mut self, notebook_id: impl Into<String>) -> Self {
        self.notebook_id = Some(notebook_id.into());
        self
    }

    pub fn with_sources(mut self, sources: SourcesUsed) -> Self {
        self.sources_used = Some(sources);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job() -> GenerationJob {
        GenerationJob::new("user-1", None, Utc::now())
    }

    #[test]
    fn test_new_job_has_no_run_timestamps() {
        let job = job();
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[test]
    fn test_happy_path_stamps_timestamps() {
        let mut job = job();
        let t0 = job.scheduled_at;

        job.apply(&JobUpdate::status(JobStatus::Fetching), t0 + Duration::seconds(1))
            .unwrap();
        assert_eq!(job.started_at, Some(t0 + Duration::seconds(1)));
        assert!(job.completed_at.is_none());

        job.apply(&JobUpdate::status(JobStatus::Generating), t0 + Duration::seconds(2))
            .unwrap();
        assert_eq!(job.started_at, Some(t0 + Duration::seconds(1)));

        let sources = SourcesUsed {
            rss_feeds: 1,
            news_topics: 0,
            total_items: 3,
        };
        job.apply(
            &JobUpdate::status(JobStatus::Complete)
                .with_notebook("nb-1")
                .with_sources(sources),
            t0 + Duration::seconds(3),
        )
        .unwrap();

        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.completed_at, Some(t0 + Duration::seconds(3)));
        assert_eq!(job.notebook_id.as_deref(), Some("nb-1"));
        assert_eq!(job.sources_used, Some(sources));
    }

    #[test]
    fn test_illegal_transitions_are_rejected() {
        let mut job = job();
        let err = job
            .apply(&JobUpdate::status(JobStatus::Complete), Utc::now())
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::InvalidTransition {
                from: JobStatus::Scheduled,
                to: JobStatus::Complete
            }
        ));
        assert_eq!(job.status, JobStatus::Scheduled);

        job.apply(&JobUpdate::failed("boom"), Utc::now()).unwrap();
        assert!(job.apply(&JobUpdate::failed("again"), Utc::now()).is_err());
        assert!(job
            .apply(&JobUpdate::status(JobStatus::Fetching), Utc::now())
            .is_err());
        assert_eq!(job.error_message.as_deref(), Some("boom"));
    }

    #[test]
    fn test_failure_from_scheduled_still_stamps_started() {
        let mut job = job();
        job.apply(&JobUpdate::failed("early"), Utc::now()).unwrap();
        let started = job.started_at.unwrap();
        let completed = job.completed_at.unwrap();
        assert!(completed >= started);
    }

    #[test]
    fn test_completed_never_precedes_started() {
        let mut job = job();
        let t0 = job.scheduled_at;
        job.apply(&JobUpdate::status(JobStatus::Fetching), t0 + Duration::seconds(10))
            .unwrap();
        // A skewed clock must not produce completed_at < started_at.
        job.apply(&JobUpdate::failed("x"), t0 + Duration::seconds(5))
            .unwrap();
        assert!(job.completed_at.unwrap() >= job.started_at.unwrap());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            JobStatus::Scheduled,
            JobStatus::Fetching,
            JobStatus::Generating,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("paused".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_sources_used_counts_distinct_feeds() {
        let item = |source_type, id: &str| ContentItem {
            source_type,
            title: "t".into(),
            body: "b".into(),
            source_identifier: id.into(),
        };
        let items = vec![
            item(SourceType::Rss, "https://a.example/feed"),
            item(SourceType::Rss, "https://a.example/feed"),
            item(SourceType::Rss, "https://b.example/feed"),
            item(SourceType::TopicNews, "AI"),
        ];

        let used = SourcesUsed::from_items(&items);
        assert_eq!(used.rss_feeds, 2);
        assert_eq!(used.news_topics, 1);
        assert_eq!(used.total_items, 4);
    }
}
