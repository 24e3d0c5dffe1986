use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;

use crate::db::{JobStore, PreferenceStore};
use crate::error::Result;
use crate::models::JobUpdate;
use crate::schedule::DueClock;

use super::GenerationPipeline;

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// Users with daily generation enabled.
    pub checked: usize,
    /// Jobs created and driven during this tick.
    pub generated: usize,
    pub users: Vec<String>,
}

pub struct TickHandler {
    preferences: Arc<dyn PreferenceStore>,
    jobs: Arc<dyn JobStore>,
    pipeline: Arc<GenerationPipeline>,
    clock: DueClock,
}

impl TickHandler {
    pub fn new(
        preferences: Arc<dyn PreferenceStore>,
        jobs: Arc<dyn JobStore>,
        pipeline: Arc<GenerationPipeline>,
        clock: DueClock,
    ) -> Self {
        Self {
            preferences,
            jobs,
            pipeline,
            clock,
        }
    }

    pub async fn run_tick(&self) -> Result<TickSummary> {
        self.run_tick_at(Utc::now()).await
    }

    /// Create and drive a job for every user whose scheduled time falls in
    /// the due window around `now`.
    ///
    /// Only a failure to enumerate users is returned as an error. Per-user
    /// failures end up on the user's job.
    pub async fn run_tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary> {
        let candidates = self.preferences.users_with_schedule_enabled().await?;
        tracing::debug!("Checking {} users with daily generation enabled", candidates.len());

        let mut launched = Vec::new();
        for prefs in &candidates {
            let Some(occurrence) = self.clock.current_occurrence(prefs, now) else {
                continue;
            };

            match self.jobs.create_scheduled(&prefs.user_id, occurrence).await {
                Ok(Some(job)) => {
                    tracing::info!(
                        user_id = %prefs.user_id,
                        job_id = %job.id,
                        "Scheduled generation for occurrence {}",
                        occurrence
                    );
                    let pipeline = Arc::clone(&self.pipeline);
                    let user_id = prefs.user_id.clone();
                    let handle = tokio::spawn(async move { pipeline.run(&user_id, job.id).await });
                    launched.push((prefs.user_id.clone(), job.id, handle));
                }
                Ok(None) => {
                    tracing::debug!(
                        user_id = %prefs.user_id,
                        "Occurrence {} already has a job",
                        occurrence
                    );
                }
                Err(e) => {
                    tracing::warn!(user_id = %prefs.user_id, error = %e, "Failed to create scheduled job");
                }
            }
        }

        let users: Vec<String> = launched.iter().map(|(user, _, _)| user.clone()).collect();

        let outcomes = join_all(
            launched
                .into_iter()
                .map(|(user_id, job_id, handle)| async move { (user_id, job_id, handle.await) }),
        )
        .await;

        for (user_id, job_id, outcome) in outcomes {
            match outcome {
                Ok(Ok(_)) => {}
                // Already logged as critical inside the pipeline.
                Ok(Err(_)) => {}
                Err(join_err) => {
                    tracing::error!(user_id = %user_id, job_id = %job_id, error = %join_err, "Generation task panicked");
                    let update = JobUpdate::failed(format!("Generation task aborted: {}", join_err));
                    if let Err(e) = self.jobs.update(job_id, update).await {
                        tracing::error!(
                            critical = true,
                            user_id = %user_id,
                            job_id = %job_id,
                            error = %e,
                            "Could not record generation failure; job left in its last written state"
                        );
                    }
                }
            }
        }

        if !users.is_empty() {
            tracing::info!(
                "Tick finished: {} checked, {} generated",
                candidates.len(),
                users.len()
            );
        }

        Ok(TickSummary {
            checked: candidates.len(),
            generated: users.len(),
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::{Duration, NaiveTime, TimeZone};

    use super::*;
    use crate::db::{MemoryStore, SourceRegistry};
    use crate::error::AppError;
    use crate::generation::pipeline::tests::{pipeline, FakeNotebooks, FEED_URL};
    use crate::generation::pipeline::NO_CONTENT_ERROR;
    use crate::models::{JobStatus, PreferenceUpdate, UserSchedulePreference};

    async fn enable(store: &MemoryStore, user_id: &str) {
        store
            .update_preferences(
                user_id,
                PreferenceUpdate {
                    daily_generation_enabled: Some(true),
                    generation_time: NaiveTime::from_hms_opt(7, 0, 0),
                    timezone: Some(chrono_tz::America::Los_Angeles),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    fn handler(store: Arc<MemoryStore>, notebooks: Arc<FakeNotebooks>) -> TickHandler {
        TickHandler::new(
            store.clone(),
            store.clone(),
            Arc::new(pipeline(store, notebooks)),
            DueClock::new(Duration::minutes(5)),
        )
    }

    /// 07:02 in Los Angeles during winter.
    fn due_instant() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 15, 2, 0).unwrap()
    }

    #[tokio::test]
    async fn test_one_failure_does_not_affect_the_other() {
        let store = Arc::new(MemoryStore::new());
        for user in ["alice", "bob"] {
            enable(&store, user).await;
            store.add_rss_source(user, FEED_URL, "News").await.unwrap();
        }
        let notebooks = Arc::new(FakeNotebooks {
            fail_synthesis: vec!["bob".into()],
            ..Default::default()
        });

        let summary = handler(store.clone(), notebooks)
            .run_tick_at(due_instant())
            .await
            .unwrap();

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.generated, 2);
        assert_eq!(summary.users, vec!["alice", "bob"]);

        let alice = &store.list("alice", 10).await.unwrap()[0];
        let bob = &store.list("bob", 10).await.unwrap()[0];
        assert_eq!(alice.status, JobStatus::Complete);
        assert_eq!(bob.status, JobStatus::Failed);
        assert_eq!(bob.error_message.as_deref(), Some("Audio quota reached"));
    }

    #[tokio::test]
    async fn test_repeated_ticks_in_window_create_one_job() {
        let store = Arc::new(MemoryStore::new());
        enable(&store, "alice").await;
        store.add_rss_source("alice", FEED_URL, "News").await.unwrap();
        let handler = handler(store.clone(), Arc::new(FakeNotebooks::default()));

        let first = handler.run_tick_at(due_instant()).await.unwrap();
        let second = handler
            .run_tick_at(due_instant() + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(first.generated, 1);
        assert_eq!(second.generated, 0);
        assert_eq!(second.checked, 1);
        assert_eq!(store.list("alice", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_job_does_not_suppress_schedule() {
        let store = Arc::new(MemoryStore::new());
        enable(&store, "alice").await;
        store.add_rss_source("alice", FEED_URL, "News").await.unwrap();
        store.create("alice").await.unwrap();

        let summary = handler(store.clone(), Arc::new(FakeNotebooks::default()))
            .run_tick_at(due_instant())
            .await
            .unwrap();

        assert_eq!(summary.generated, 1);
        assert_eq!(store.list("alice", 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_outside_window_and_disabled_users_are_skipped() {
        let store = Arc::new(MemoryStore::new());
        enable(&store, "alice").await;
        store.get_preferences("carol").await.unwrap();
        let handler = handler(store.clone(), Arc::new(FakeNotebooks::default()));

        let early = Utc.with_ymd_and_hms(2024, 1, 15, 14, 59, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 15, 15, 5, 0).unwrap();

        for now in [early, late] {
            let summary = handler.run_tick_at(now).await.unwrap();
            assert_eq!(summary.checked, 1);
            assert_eq!(summary.generated, 0);
        }
        assert!(store.list("alice", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_without_sources_gets_failed_job() {
        let store = Arc::new(MemoryStore::new());
        enable(&store, "alice").await;

        let summary = handler(store.clone(), Arc::new(FakeNotebooks::default()))
            .run_tick_at(due_instant())
            .await
            .unwrap();

        assert_eq!(summary.generated, 1);
        let job = &store.list("alice", 10).await.unwrap()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(NO_CONTENT_ERROR));
    }

    #[tokio::test]
    async fn test_panicking_pipeline_is_recorded_as_failed() {
        let store = Arc::new(MemoryStore::new());
        for user in ["alice", "bob"] {
            enable(&store, user).await;
            store.add_rss_source(user, FEED_URL, "News").await.unwrap();
        }
        let notebooks = Arc::new(FakeNotebooks {
            panic_for: vec!["alice".into()],
            ..Default::default()
        });

        let summary = handler(store.clone(), notebooks)
            .run_tick_at(due_instant())
            .await
            .unwrap();
        assert_eq!(summary.generated, 2);

        let alice = &store.list("alice", 10).await.unwrap()[0];
        assert_eq!(alice.status, JobStatus::Failed);
        assert!(alice
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Generation task aborted"));
        assert_eq!(
            store.list("bob", 10).await.unwrap()[0].status,
            JobStatus::Complete
        );
    }

    struct UnavailablePreferences;

    #[async_trait]
    impl PreferenceStore for UnavailablePreferences {
        async fn get_preferences(&self, _user_id: &str) -> Result<UserSchedulePreference> {
            Err(AppError::Config("preference source down".into()))
        }

        async fn update_preferences(
            &self,
            _user_id: &str,
            _update: PreferenceUpdate,
        ) -> Result<UserSchedulePreference> {
            Err(AppError::Config("preference source down".into()))
        }

        async fn users_with_schedule_enabled(&self) -> Result<Vec<UserSchedulePreference>> {
            Err(AppError::Config("preference source down".into()))
        }
    }

    #[tokio::test]
    async fn test_unavailable_preferences_fail_the_tick() {
        let store = Arc::new(MemoryStore::new());
        let handler = TickHandler::new(
            Arc::new(UnavailablePreferences),
            store.clone(),
            Arc::new(pipeline(store.clone(), Arc::new(FakeNotebooks::default()))),
            DueClock::new(Duration::minutes(5)),
        );

        assert!(handler.run_tick_at(due_instant()).await.is_err());
        assert!(store.list("alice", 10).await.unwrap().is_empty());
    }
}
