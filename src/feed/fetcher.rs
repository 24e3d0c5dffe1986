use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::parser;
use futures::stream::{self, StreamExt};
use reqwest::Client;

use crate::error::{AppError, Result};
use crate::models::FeedEntry;

const MAX_CONCURRENT_FETCHES: usize = 5;

#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>>;

    /// Fetch many feeds at once, at most five in flight.
    ///
    /// Failing URLs are logged and omitted, never returned as errors. Feeds
    /// still pending when `deadline` passes are dropped; everything that
    /// finished before it is kept.
    async fn fetch_many(
        &self,
        urls: &[String],
        deadline: Duration,
    ) -> HashMap<String, Vec<FeedEntry>> {
        let results = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                let result = self.fetch_feed(&url).await;
                (url, result)
            })
            .buffer_unordered(MAX_CONCURRENT_FETCHES)
            .take_until(tokio::time::sleep(deadline));
        tokio::pin!(results);

        let mut fetched = HashMap::new();
        let mut finished = 0;
        while let Some((url, result)) = results.next().await {
            finished += 1;
            match result {
                Ok(entries) => {
                    tracing::debug!("Fetched {} entries from {}", entries.len(), url);
                    fetched.insert(url, entries);
                }
                Err(e) => tracing::warn!("Failed to fetch {}: {}", url, e),
            }
        }

        if finished < urls.len() {
            tracing::warn!(
                "{} feeds still pending after {:?}; dropped",
                urls.len() - finished,
                deadline
            );
        }
        fetched
    }
}

pub struct FeedFetcher {
    client: Client,
    timeout: Duration,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent("daily-brief/1.0")
            .build()?;

        Ok(Self { client, timeout })
    }

    async fn download(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch feed: HTTP {}", response.status()).into());
        }

        let bytes = response.bytes().await?;
        let feed = parser::parse(&bytes[..])?;

        let entries = feed
            .entries
            .into_iter()
            .map(|entry| {
                // Try content first, then fall back to summary
                let content_html = entry
                    .content
                    .as_ref()
                    .and_then(|c| c.body.as_ref())
                    .or_else(|| entry.summary.as_ref().map(|s| &s.content));

                let content_text = content_html
                    .and_then(|html| html2text::from_read(html.as_bytes(), 100).ok())
                    .map(|text| text.trim().to_string())
                    .filter(|text| !text.is_empty());

                FeedEntry {
                    title: entry
                        .title
                        .map(|t| t.content)
                        .unwrap_or_else(|| "Untitled".to_string()),
                    link: entry.links.first().map(|l| l.href.clone()),
                    content_text,
                    published_at: entry.published.or(entry.updated),
                }
            })
            .collect();

        Ok(entries)
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    /// Bounded by the per-feed timeout, body download included.
    async fn fetch_feed(&self, url: &str) -> Result<Vec<FeedEntry>> {
        match tokio::time::timeout(self.timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "Feed {} timed out after {:?}",
                url, self.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rss(items: &[&str]) -> String {
        let items: String = items
            .iter()
            .map(|title| {
                format!(
                    "<item><title>{title}</title><link>https://news.example/{title}</link>\
                     <description>&lt;p&gt;Body of {title}&lt;/p&gt;</description></item>"
                )
            })
            .collect();
        format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>Test</title>
               <link>https://news.example</link><description>d</description>{items}</channel></rss>"#
        )
    }

    #[tokio::test]
    async fn test_fetch_feed_parses_entries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["one", "two"])))
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(Duration::from_secs(5)).unwrap();
        let entries = fetcher
            .fetch_feed(&format!("{}/feed.xml", server.uri()))
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "one");
        assert_eq!(entries[0].link.as_deref(), Some("https://news.example/one"));
        assert!(entries[0]
            .content_text
            .as_deref()
            .unwrap()
            .contains("Body of one"));
    }

    #[tokio::test]
    async fn test_fetch_many_drops_failing_urls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["a", "b", "c"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&["late"]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let good = format!("{}/good.xml", server.uri());
        let urls = vec![
            good.clone(),
            format!("{}/slow.xml", server.uri()),
            format!("{}/broken.xml", server.uri()),
        ];

        let fetcher = FeedFetcher::new(Duration::from_millis(300)).unwrap();
        let results = fetcher.fetch_many(&urls, Duration::from_secs(10)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[&good].len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_many_keeps_finished_feeds_at_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/good.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss(&["a", "b", "c"])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow.xml"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&["late"]))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let good = format!("{}/good.xml", server.uri());
        let urls = vec![format!("{}/slow.xml", server.uri()), good.clone()];

        // The per-feed timeout is longer than the deadline, so only the
        // deadline can cut the slow feed off.
        let fetcher = FeedFetcher::new(Duration::from_secs(5)).unwrap();
        let results = fetcher.fetch_many(&urls, Duration::from_secs(1)).await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[&good].len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_feed_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(rss(&["late"]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let fetcher = FeedFetcher::new(Duration::from_millis(200)).unwrap();
        assert!(fetcher
            .fetch_feed(&format!("{}/feed.xml", server.uri()))
            .await
            .is_err());
    }
}
