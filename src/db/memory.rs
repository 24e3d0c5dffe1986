use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    GenerationJob, JobUpdate, NewsTopic, PreferenceUpdate, RssSource, UserSchedulePreference,
};

use super::{JobStore, PreferenceStore, SourceRegistry};

/// Process-local store for running without a database file.
///
/// Each collection has its own lock; every read-modify-write happens while
/// holding it, so updates to a job are never lost.
#[derive(Default)]
pub struct MemoryStore {
    preferences: Mutex<HashMap<String, UserSchedulePreference>>,
    rss_sources: Mutex<Vec<RssSource>>,
    news_topics: Mutex<Vec<NewsTopic>>,
    jobs: Mutex<Vec<GenerationJob>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, user_id: &str) -> Result<GenerationJob> {
        let job = GenerationJob::new(user_id, None, Utc::now());
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }

    async fn create_scheduled(
        &self,
        user_id: &str,
        occurrence: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>> {
        let mut jobs = self.jobs.lock().await;
        if jobs
            .iter()
            .any(|j| j.user_id == user_id && j.scheduled_for == Some(occurrence))
        {
            return Ok(None);
        }

        let job = GenerationJob::new(user_id, Some(occurrence), Utc::now());
        jobs.push(job.clone());
        Ok(Some(job))
    }

    async fn get(&self, user_id: &str, job_id: Uuid) -> Result<Option<GenerationJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .find(|j| j.id == job_id && j.user_id == user_id)
            .cloned())
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<GenerationJob>> {
        let mut jobs: Vec<_> = self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|j| j.user_id == user_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<GenerationJob> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or(AppError::JobNotFound(job_id))?;

        job.apply(&update, Utc::now())?;
        Ok(job.clone())
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get_preferences(&self, user_id: &str) -> Result<UserSchedulePreference> {
        let mut preferences = self.preferences.lock().await;
        let prefs = preferences.entry(user_id.to_string()).or_insert_with(|| {
            tracing::debug!("Creating default preferences for {}", user_id);
            UserSchedulePreference::new(user_id)
        });
        Ok(prefs.clone())
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        update: PreferenceUpdate,
    ) -> Result<UserSchedulePreference> {
        let mut preferences = self.preferences.lock().await;
        let prefs = preferences
            .entry(user_id.to_string())
            .or_insert_with(|| UserSchedulePreference::new(user_id));
        prefs.apply(&update);
        Ok(prefs.clone())
    }

    async fn users_with_schedule_enabled(&self) -> Result<Vec<UserSchedulePreference>> {
        let mut enabled: Vec<_> = self
            .preferences
            .lock()
            .await
            .values()
            .filter(|p| p.daily_generation_enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(enabled)
    }
}

#[async_trait]
impl SourceRegistry for MemoryStore {
    async fn list_rss(&self, user_id: &str) -> Result<Vec<RssSource>> {
        Ok(self
            .rss_sources
            .lock()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_topics(&self, user_id: &str) -> Result<Vec<NewsTopic>> {
        Ok(self
            .news_topics
            .lock()
            .await
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn add_rss_source(&self, user_id: &str, url: &str, name: &str) -> Result<RssSource> {
        let mut sources = self.rss_sources.lock().await;
        if sources.iter().any(|s| s.user_id == user_id && s.url == url) {
            return Err(anyhow::anyhow!("Feed already added: {}", url).into());
        }

        let source = RssSource {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            enabled: true,
            created_at: Utc::now(),
        };
        sources.push(source.clone());
        Ok(source)
    }

    async fn add_news_topic(&self, user_id: &str, topic: &str) -> Result<NewsTopic> {
        let mut topics = self.news_topics.lock().await;
        if topics.iter().any(|t| t.user_id == user_id && t.topic == topic) {
            return Err(anyhow::anyhow!("Topic already added: {}", topic).into());
        }

        let topic = NewsTopic {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            enabled: true,
            created_at: Utc::now(),
        };
        topics.push(topic.clone());
        Ok(topic)
    }

    async fn set_rss_enabled(
        &self,
        user_id: &str,
        source_id: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        let mut sources = self.rss_sources.lock().await;
        match sources
            .iter_mut()
            .find(|s| s.id == source_id && s.user_id == user_id)
        {
            Some(source) => {
                source.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_topic_enabled(
        &self,
        user_id: &str,
        topic_id: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        let mut topics = self.news_topics.lock().await;
        match topics
            .iter_mut()
            .find(|t| t.id == topic_id && t.user_id == user_id)
        {
            Some(topic) => {
                topic.enabled = enabled;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove_rss_source(&self, user_id: &str, source_id: Uuid) -> Result<bool> {
        let mut sources = self.rss_sources.lock().await;
        let before = sources.len();
        sources.retain(|s| !(s.id == source_id && s.user_id == user_id));
        Ok(sources.len() < before)
    }

    async fn remove_news_topic(&self, user_id: &str, topic_id: Uuid) -> Result<bool> {
        let mut topics = self.news_topics.lock().await;
        let before = topics.len();
        topics.retain(|t| !(t.id == topic_id && t.user_id == user_id));
        Ok(topics.len() < before)
    }
}
