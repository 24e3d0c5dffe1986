mod memory;
mod repository;
mod schema;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    GenerationJob, JobUpdate, NewsTopic, PreferenceUpdate, RssSource, UserSchedulePreference,
};

pub use memory::MemoryStore;
pub use repository::Repository;

/// Record of generation attempts. Single source of truth for job status.
///
/// `update` is atomic per job id: the transition check, timestamp stamping and
/// write happen under one lock or transaction.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a manually triggered job in `scheduled` state.
    async fn create(&self, user_id: &str) -> Result<GenerationJob>;

    /// Create a job for a scheduled occurrence unless one already exists for
    /// `(user_id, occurrence)`. Returns `None` when it already existed.
    async fn create_scheduled(
        &self,
        user_id: &str,
        occurrence: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>>;

    async fn get(&self, user_id: &str, job_id: Uuid) -> Result<Option<GenerationJob>>;

    /// Newest first by `scheduled_at`.
    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<GenerationJob>>;

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<GenerationJob>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Returns stored preferences, materializing defaults on first access.
    async fn get_preferences(&self, user_id: &str) -> Result<UserSchedulePreference>;

    async fn update_preferences(
        &self,
        user_id: &str,
        update: PreferenceUpdate,
    ) -> Result<UserSchedulePreference>;

    async fn users_with_schedule_enabled(&self) -> Result<Vec<UserSchedulePreference>>;
}

#[async_trait]
pub trait SourceRegistry: Send + Sync {
    async fn list_rss(&self, user_id: &str) -> Result<Vec<RssSource>>;

    async fn list_topics(&self, user_id: &str) -> Result<Vec<NewsTopic>>;

    async fn add_rss_source(&self, user_id: &str, url: &str, name: &str) -> Result<RssSource>;

    async fn add_news_topic(&self, user_id: &str, topic: &str) -> Result<NewsTopic>;

    /// Returns false when the user has no such source.
    async fn set_rss_enabled(&self, user_id: &str, source_id: Uuid, enabled: bool)
        -> Result<bool>;

    async fn set_topic_enabled(&self, user_id: &str, topic_id: Uuid, enabled: bool)
        -> Result<bool>;

    async fn remove_rss_source(&self, user_id: &str, source_id: Uuid) -> Result<bool>;

    async fn remove_news_topic(&self, user_id: &str, topic_id: Uuid) -> Result<bool>;
}

/// The three store roles, usually backed by one shared object.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub sources: Arc<dyn SourceRegistry>,
}

impl Stores {
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + PreferenceStore + SourceRegistry + 'static,
    {
        Self {
            jobs: store.clone(),
            preferences: store.clone(),
            sources: store,
        }
    }
}
