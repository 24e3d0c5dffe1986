use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

pub const CLAUDE_API_URL: &str = "https://api.anthropic.com/v1/messages";
const CLAUDE_MODEL: &str = "claude-3-5-haiku-20241022";
const MAX_CONCURRENT_TOPICS: usize = 3;

/// Produces a current-news summary per topic.
///
/// Topics that fail individually, or are still pending at `deadline`, are
/// left out of the map. An error is returned only when no topic produced a
/// summary.
#[async_trait]
pub trait TopicSource: Send + Sync {
    async fn summarize(
        &self,
        topics: &[String],
        deadline: Duration,
    ) -> Result<HashMap<String, String>>;
}

#[derive(Debug, Serialize)]
struct MessageRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    #[allow(dead_code)]
    content_type: String,
    text: Option<String>,
}

pub struct TopicSummarizer {
    client: Client,
    api_key: String,
    api_url: String,
}

impl TopicSummarizer {
    pub fn new(api_key: String, api_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            api_url,
        })
    }

    pub async fn summarize_topic(&self, topic: &str) -> Result<String> {
        let system_prompt = r#"You are a news editor preparing source material for a daily audio briefing.
Summarize the most important recent developments on the requested topic.
Write 3-5 short paragraphs of plain prose with concrete facts, names and dates.
Do not use headings, lists or markdown."#;

        let user_message = format!(
            "Summarize the latest news from the past 24 hours about: {}",
            topic
        );

        let request = MessageRequest {
            model: CLAUDE_MODEL.to_string(),
            max_tokens: 1024,
            messages: vec![Message {
                role: "user".to_string(),
                content: user_message,
            }],
            system: Some(system_prompt.to_string()),
        };

        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::TopicApi(format!("API error: {}", error_text)));
        }

        let message_response: MessageResponse = response.json().await?;

        let summary = message_response
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("\n");

        if summary.trim().is_empty() {
            return Err(AppError::TopicApi(format!("Empty summary for {}", topic)));
        }

        Ok(summary)
    }
}

#[async_trait]
impl TopicSource for TopicSummarizer {
    async fn summarize(
        &self,
        topics: &[String],
        deadline: Duration,
    ) -> Result<HashMap<String, String>> {
        let results = stream::iter(topics.iter().cloned())
            .map(|topic| async move {
                let result = self.summarize_topic(&topic).await;
                (topic, result)
            })
            .buffer_unordered(MAX_CONCURRENT_TOPICS)
            .take_until(tokio::time::sleep(deadline));
        tokio::pin!(results);

        let mut summaries = HashMap::new();
        let mut finished = 0;
        let mut last_error = None;
        while let Some((topic, result)) = results.next().await {
            finished += 1;
            match result {
                Ok(summary) => {
                    summaries.insert(topic, summary);
                }
                Err(e) => {
                    tracing::warn!("Failed to summarize topic {}: {}", topic, e);
                    last_error = Some(e);
                }
            }
        }

        if finished < topics.len() {
            tracing::warn!(
                "{} topics still pending after {:?}; dropped",
                topics.len() - finished,
                deadline
            );
            if summaries.is_empty() {
                return Err(AppError::Timeout(format!(
                    "Topic summaries timed out after {:?}",
                    deadline
                )));
            }
        }

        match last_error {
            Some(e) if summaries.is_empty() => Err(e),
            _ => Ok(summaries),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn summarizer(server: &MockServer) -> TopicSummarizer {
        TopicSummarizer::new(
            "test-key".to_string(),
            format!("{}/v1/messages", server.uri()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn reply(text: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": text }]
        }))
    }

    #[tokio::test]
    async fn test_summarize_drops_failed_topics() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "test-key"))
            .and(body_string_contains("about: AI"))
            .respond_with(reply("AI news."))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("about: Space"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let topics = vec!["AI".to_string(), "Space".to_string()];
        let summaries = summarizer(&server)
            .summarize(&topics, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries["AI"], "AI news.");
    }

    #[tokio::test]
    async fn test_summarize_keeps_topics_finished_by_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("about: AI"))
            .respond_with(reply("AI news."))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("about: Space"))
            .respond_with(reply("Space news.").set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let topics = vec!["Space".to_string(), "AI".to_string()];
        let summaries = summarizer(&server)
            .summarize(&topics, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert!(summaries.contains_key("AI"));
    }

    #[tokio::test]
    async fn test_summarize_fails_when_every_topic_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid x-api-key"))
            .mount(&server)
            .await;

        let err = summarizer(&server)
            .summarize(&["AI".to_string()], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid x-api-key"));
    }

    #[tokio::test]
    async fn test_summarize_nothing_requested() {
        let server = MockServer::start().await;
        let summaries = summarizer(&server)
            .summarize(&[], Duration::from_secs(5))
            .await
            .unwrap();
        assert!(summaries.is_empty());
    }
}
