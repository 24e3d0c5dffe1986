use std::sync::Arc;
use std::time::Duration;

use crate::ai::TopicSource;
use crate::db::SourceRegistry;
use crate::feed::FeedSource;
use crate::models::{ContentItem, FeedEntry, RssSource, SourceType};

/// Gathers a user's content from every enabled source family.
///
/// Families are fetched concurrently and independently. A failing family
/// contributes nothing; the others still return. Within a family, sources
/// still pending at `family_timeout` are dropped and everything finished
/// before it is kept. Items come out in a stable order: RSS before topics,
/// then registry order, then entry order within a feed.
pub struct ContentAggregator {
    sources: Arc<dyn SourceRegistry>,
    feeds: Arc<dyn FeedSource>,
    topics: Option<Arc<dyn TopicSource>>,
    family_timeout: Duration,
    max_entries_per_feed: usize,
}

impl ContentAggregator {
    pub fn new(
        sources: Arc<dyn SourceRegistry>,
        feeds: Arc<dyn FeedSource>,
        topics: Option<Arc<dyn TopicSource>>,
        family_timeout: Duration,
        max_entries_per_feed: usize,
    ) -> Self {
        Self {
            sources,
            feeds,
            topics,
            family_timeout,
            max_entries_per_feed,
        }
    }

    pub async fn collect(&self, user_id: &str) -> Vec<ContentItem> {
        let (rss, topics) = tokio::join!(self.collect_rss(user_id), self.collect_topics(user_id));

        tracing::info!(
            "Collected content for {}: {} RSS items, {} topic summaries",
            user_id,
            rss.len(),
            topics.len()
        );

        rss.into_iter().chain(topics).collect()
    }

    async fn collect_rss(&self, user_id: &str) -> Vec<ContentItem> {
        let sources: Vec<RssSource> = match self.sources.list_rss(user_id).await {
            Ok(sources) => sources.into_iter().filter(|s| s.enabled).collect(),
            Err(e) => {
                tracing::warn!("Failed to list RSS sources for {}: {}", user_id, e);
                return Vec::new();
            }
        };
        if sources.is_empty() {
            return Vec::new();
        }

        let urls: Vec<String> = sources.iter().map(|s| s.url.clone()).collect();
        let mut fetched = self.feeds.fetch_many(&urls, self.family_timeout).await;

        sources
            .iter()
            .flat_map(|source| {
                fetched
                    .remove(&source.url)
                    .unwrap_or_default()
                    .into_iter()
                    .take(self.max_entries_per_feed)
                    .map(move |entry| rss_item(source, entry))
            })
            .collect()
    }

    async fn collect_topics(&self, user_id: &str) -> Vec<ContentItem> {
        let names: Vec<String> = match self.sources.list_topics(user_id).await {
            Ok(topics) => topics
                .into_iter()
                .filter(|t| t.enabled)
                .map(|t| t.topic)
                .collect(),
            Err(e) => {
                tracing::warn!("Failed to list news topics for {}: {}", user_id, e);
                return Vec::new();
            }
        };
        if names.is_empty() {
            return Vec::new();
        }

        let Some(summarizer) = &self.topics else {
            tracing::warn!(
                "No topic summarizer configured; skipping {} topics for {}",
                names.len(),
                user_id
            );
            return Vec::new();
        };

        let mut summaries = match summarizer.summarize(&names, self.family_timeout).await {
            Ok(summaries) => summaries,
            Err(e) => {
                tracing::warn!("Topic summaries for {} failed: {}", user_id, e);
                return Vec::new();
            }
        };

        names
            .into_iter()
            .filter_map(|topic| {
                let summary = summaries.remove(&topic)?;
                Some(ContentItem {
                    source_type: SourceType::TopicNews,
                    title: format!("Latest news: {}", topic),
                    body: summary,
                    source_identifier: topic,
                })
            })
            .collect()
    }
}

fn rss_item(source: &RssSource, entry: FeedEntry) -> ContentItem {
    let body = entry
        .content_text
        .or(entry.link)
        .unwrap_or_else(|| entry.title.clone());

    ContentItem {
        source_type: SourceType::Rss,
        title: format!("{}: {}", source.name, entry.title),
        body,
        source_identifier: source.url.clone(),
    }
}
