use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use url::Url;
use uuid::Uuid;

use crate::ai::{TopicSource, TopicSummarizer};
use crate::config::{Config, StorageBackend};
use crate::db::{MemoryStore, Repository, Stores};
use crate::error::{AppError, Result};
use crate::feed::{parse_opml_file, FeedFetcher, FeedSource};
use crate::generation::{
    ContentAggregator, GenerationPipeline, PipelineTimeouts, TickHandler, TickSummary,
};
use crate::models::{
    GenerationJob, NewsTopic, PreferenceUpdate, RssSource, UserSchedulePreference,
};
use crate::schedule::DueClock;
use crate::services::{ArtifactService, NotebookClient, SynthesisService};

/// Result of an OPML import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub skipped: usize,
}

/// External collaborators the app is wired to.
pub struct Services {
    pub feeds: Arc<dyn FeedSource>,
    pub topics: Option<Arc<dyn TopicSource>>,
    pub artifacts: Arc<dyn ArtifactService>,
    pub synthesis: Arc<dyn SynthesisService>,
}

pub struct App {
    pub stores: Stores,
    pipeline: Arc<GenerationPipeline>,
    ticker: Arc<TickHandler>,
    clock: DueClock,
    tick_interval: Duration,
}

impl App {
    pub async fn new(config: &Config) -> Result<Self> {
        config.validate()?;

        let stores = match config.storage {
            StorageBackend::Sqlite => {
                Stores::shared(Arc::new(Repository::new(&config.db_path).await?))
            }
            StorageBackend::Memory => {
                tracing::warn!("Using in-memory storage; jobs and preferences are lost on exit");
                Stores::shared(Arc::new(MemoryStore::new()))
            }
        };

        let topics = match &config.claude_api_key {
            Some(key) => Some(Arc::new(TopicSummarizer::new(
                key.clone(),
                config.claude_api_url.clone(),
                config.topic_timeout(),
            )?) as Arc<dyn TopicSource>),
            None => {
                tracing::info!("No claude_api_key configured; topic news is disabled");
                None
            }
        };

        let notebooks = Arc::new(NotebookClient::new(&config.notebook_service_url)?);
        let services = Services {
            feeds: Arc::new(FeedFetcher::new(config.feed_timeout())?),
            topics,
            artifacts: notebooks.clone(),
            synthesis: notebooks,
        };

        Ok(Self::with_services(config, stores, services))
    }

    pub fn with_services(config: &Config, stores: Stores, services: Services) -> Self {
        let aggregator = ContentAggregator::new(
            stores.sources.clone(),
            services.feeds,
            services.topics,
            config.source_timeout(),
            config.max_entries_per_feed,
        );

        let pipeline = Arc::new(GenerationPipeline::new(
            stores.jobs.clone(),
            stores.preferences.clone(),
            stores.sources.clone(),
            aggregator,
            services.artifacts,
            services.synthesis,
            PipelineTimeouts {
                artifact: config.artifact_timeout(),
                synthesis: config.synthesis_timeout(),
            },
        ));

        let clock = DueClock::new(chrono::Duration::minutes(config.due_window_minutes as i64));
        let ticker = Arc::new(TickHandler::new(
            stores.preferences.clone(),
            stores.jobs.clone(),
            pipeline.clone(),
            clock,
        ));

        Self {
            stores,
            pipeline,
            ticker,
            clock,
            tick_interval: config.tick_interval(),
        }
    }

    pub async fn run_tick(&self) -> Result<TickSummary> {
        self.ticker.run_tick().await
    }

    /// Run the scheduler until `shutdown` resolves.
    ///
    /// Each tick runs in its own task so a long synthesis never delays the
    /// next due check. Ticks still in flight at shutdown are aborted.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = JoinSet::new();
        tokio::pin!(shutdown);

        tracing::info!(
            "Scheduler started, checking every {}s",
            self.tick_interval.as_secs()
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let ticker = self.ticker.clone();
                    ticks.spawn(async move { ticker.run_tick().await });
                }
                Some(finished) = ticks.join_next(), if !ticks.is_empty() => {
                    match finished {
                        Ok(Ok(summary)) => {
                            tracing::debug!(checked = summary.checked, generated = summary.generated, "Tick complete");
                        }
                        Ok(Err(e)) => tracing::error!(error = %e, "Tick failed; retrying next interval"),
                        Err(e) => tracing::error!(error = %e, "Tick task panicked"),
                    }
                }
            }
        }

        if !ticks.is_empty() {
            tracing::warn!("Aborting {} in-flight ticks", ticks.len());
            ticks.shutdown().await;
        }

        Ok(())
    }

    /// Manually start a generation now and drive it to completion.
    pub async fn trigger_generation(&self, user_id: &str) -> Result<GenerationJob> {
        let job = self.stores.jobs.create(user_id).await?;
        tracing::info!(job_id = %job.id, user_id, "Manual generation triggered");
        self.pipeline.run(user_id, job.id).await
    }

    pub async fn jobs(&self, user_id: &str, limit: usize) -> Result<Vec<GenerationJob>> {
        self.stores.jobs.list(user_id, limit).await
    }

    pub async fn job(&self, user_id: &str, job_id: Uuid) -> Result<GenerationJob> {
        self.stores
            .jobs
            .get(user_id, job_id)
            .await?
            .ok_or(AppError::JobNotFound(job_id))
    }

    /// Whether `prefs` is inside its due window at `now`.
    pub fn is_due(&self, prefs: &UserSchedulePreference, now: DateTime<Utc>) -> bool {
        self.clock.is_due(prefs, now)
    }

    pub async fn preferences(&self, user_id: &str) -> Result<UserSchedulePreference> {
        self.stores.preferences.get_preferences(user_id).await
    }

    pub async fn update_schedule(
        &self,
        user_id: &str,
        update: PreferenceUpdate,
    ) -> Result<UserSchedulePreference> {
        if update.is_empty() {
            return self.preferences(user_id).await;
        }
        self.stores
            .preferences
            .update_preferences(user_id, update)
            .await
    }

    pub async fn add_feed(&self, user_id: &str, url: &str, name: Option<&str>) -> Result<RssSource> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::Config(format!("Invalid feed URL {}: {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(AppError::Config(format!(
                "Feed URL must use http or https: {}",
                url
            )));
        }

        let name = match name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => parsed.host_str().unwrap_or(url).to_string(),
        };

        self.stores
            .sources
            .add_rss_source(user_id, parsed.as_str(), &name)
            .await
    }

    pub async fn add_topic(&self, user_id: &str, topic: &str) -> Result<NewsTopic> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(AppError::Config("Topic must not be empty".to_string()));
        }
        self.stores.sources.add_news_topic(user_id, topic).await
    }

    pub async fn feeds(&self, user_id: &str) -> Result<Vec<RssSource>> {
        self.stores.sources.list_rss(user_id).await
    }

    pub async fn topics(&self, user_id: &str) -> Result<Vec<NewsTopic>> {
        self.stores.sources.list_topics(user_id).await
    }

    pub async fn set_feed_enabled(&self, user_id: &str, id: Uuid, enabled: bool) -> Result<()> {
        found(self.stores.sources.set_rss_enabled(user_id, id, enabled).await?, id)
    }

    pub async fn set_topic_enabled(&self, user_id: &str, id: Uuid, enabled: bool) -> Result<()> {
        found(self.stores.sources.set_topic_enabled(user_id, id, enabled).await?, id)
    }

    pub async fn remove_feed(&self, user_id: &str, id: Uuid) -> Result<()> {
        found(self.stores.sources.remove_rss_source(user_id, id).await?, id)?;
        tracing::info!(source_id = %id, user_id, "Removed RSS source");
        Ok(())
    }

    pub async fn remove_topic(&self, user_id: &str, id: Uuid) -> Result<()> {
        found(self.stores.sources.remove_news_topic(user_id, id).await?, id)?;
        tracing::info!(topic_id = %id, user_id, "Removed news topic");
        Ok(())
    }

    pub async fn import_opml(&self, user_id: &str, path: &Path) -> Result<ImportReport> {
        let feeds = parse_opml_file(path)?;
        let mut report = ImportReport::default();

        for feed in feeds {
            match self.add_feed(user_id, &feed.url, Some(&feed.name)).await {
                Ok(_) => report.imported += 1,
                Err(e) => {
                    tracing::warn!("Skipping feed {}: {}", feed.url, e);
                    report.skipped += 1;
                }
            }
        }

        tracing::info!(
            "Imported {} feeds for {} ({} skipped)",
            report.imported,
            user_id,
            report.skipped
        );
        Ok(report)
    }
}

fn found(matched: bool, id: Uuid) -> Result<()> {
    if matched {
        Ok(())
    } else {
        Err(AppError::SourceNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use chrono::TimeZone;

    use super::*;
    use crate::generation::pipeline::NO_CONTENT_ERROR;
    use crate::models::{FeedEntry, JobStatus};
    use async_trait::async_trait;

    struct NoFeeds;

    #[async_trait]
    impl FeedSource for NoFeeds {
        async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
            Err(AppError::Other(anyhow::anyhow!("offline: {url}")))
        }
    }

    fn app() -> App {
        let config = Config {
            storage: StorageBackend::Memory,
            ..Config::default()
        };
        let notebooks = Arc::new(NotebookClient::new("http://127.0.0.1:9").unwrap());
        App::with_services(
            &config,
            Stores::shared(Arc::new(MemoryStore::new())),
            Services {
                feeds: Arc::new(NoFeeds),
                topics: None,
                artifacts: notebooks.clone(),
                synthesis: notebooks,
            },
        )
    }

    #[tokio::test]
    async fn test_add_feed_validates_url() {
        let app = app();

        let source = app
            .add_feed("user-1", "https://blog.example.com/rss", None)
            .await
            .unwrap();
        assert_eq!(source.name, "blog.example.com");

        assert!(app.add_feed("user-1", "ftp://example.com/rss", None).await.is_err());
        assert!(app.add_feed("user-1", "not a url", None).await.is_err());
        assert!(app.add_topic("user-1", "   ").await.is_err());
    }

    #[tokio::test]
    async fn test_import_opml_counts_duplicates() {
        let app = app();
        app.add_feed("user-1", "https://a.example/feed", Some("A"))
            .await
            .unwrap();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"<?xml version="1.0"?>
<opml version="2.0"><head><title>subs</title></head><body>
  <outline text="Tech">
    <outline text="A" xmlUrl="https://a.example/feed"/>
    <outline text="B" title="Blog B" xmlUrl="https://b.example/feed"/>
  </outline>
</body></opml>"#
        )
        .unwrap();

        let report = app.import_opml("user-1", file.path()).await.unwrap();
        assert_eq!(
            report,
            ImportReport {
                imported: 1,
                skipped: 1
            }
        );

        let sources = app.stores.sources.list_rss("user-1").await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[1].name, "Blog B");
    }

    #[tokio::test]
    async fn test_list_toggle_and_remove_sources() {
        let app = app();
        let feed = app
            .add_feed("user-1", "https://a.example/feed", Some("A"))
            .await
            .unwrap();
        let topic = app.add_topic("user-1", "  AI ").await.unwrap();

        assert_eq!(app.feeds("user-1").await.unwrap()[0].id, feed.id);
        assert_eq!(app.topics("user-1").await.unwrap()[0].topic, "AI");
        assert!(app.feeds("user-2").await.unwrap().is_empty());

        app.set_feed_enabled("user-1", feed.id, false).await.unwrap();
        assert!(!app.feeds("user-1").await.unwrap()[0].enabled);
        app.set_topic_enabled("user-1", topic.id, false).await.unwrap();
        assert!(!app.topics("user-1").await.unwrap()[0].enabled);

        assert!(matches!(
            app.remove_feed("user-2", feed.id).await,
            Err(AppError::SourceNotFound(id)) if id == feed.id
        ));
        assert!(matches!(
            app.set_topic_enabled("user-2", topic.id, true).await,
            Err(AppError::SourceNotFound(_))
        ));

        app.remove_feed("user-1", feed.id).await.unwrap();
        app.remove_topic("user-1", topic.id).await.unwrap();
        assert!(app.feeds("user-1").await.unwrap().is_empty());
        assert!(app.topics("user-1").await.unwrap().is_empty());
        assert!(matches!(
            app.remove_topic("user-1", topic.id).await,
            Err(AppError::SourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_generation_without_content() {
        let app = app();
        let job = app.trigger_generation("user-1").await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some(NO_CONTENT_ERROR));
        assert!(job.scheduled_for.is_none());
        assert_eq!(app.job("user-1", job.id).await.unwrap().id, job.id);
        assert!(matches!(
            app.job("user-2", job.id).await,
            Err(AppError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_schedule() {
        let app = app();
        let prefs = app
            .update_schedule(
                "user-1",
                PreferenceUpdate {
                    daily_generation_enabled: Some(true),
                    timezone: Some(chrono_tz::Europe::Berlin),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(prefs.daily_generation_enabled);
        assert_eq!(prefs.timezone, chrono_tz::Europe::Berlin);

        let unchanged = app
            .update_schedule("user-1", PreferenceUpdate::default())
            .await
            .unwrap();
        assert_eq!(unchanged.updated_at, prefs.updated_at);

        // 07:00 in Berlin is 06:00 UTC in January; the window is five minutes.
        let at = |h, m| Utc.with_ymd_and_hms(2024, 1, 15, h, m, 0).unwrap();
        assert!(app.is_due(&prefs, at(6, 3)));
        assert!(!app.is_due(&prefs, at(6, 6)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let app = app();
        let shutdown = tokio::time::sleep(Duration::from_millis(50));
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(2), app.run(shutdown))
                .await
                .unwrap()
        );
    }
}
