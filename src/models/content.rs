use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Rss,
    TopicNews,
}

/// One normalized unit of input handed to the notebook service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentItem {
    pub source_type: SourceType,
    pub title: String,
    pub body: String,
    /// Feed URL for RSS items, topic name for topic summaries.
    pub source_identifier: String,
}

/// A parsed feed entry, before it becomes a [`ContentItem`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: Option<String>,
    pub content_text: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}
