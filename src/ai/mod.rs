mod summarizer;

pub use summarizer::{TopicSource, TopicSummarizer, CLAUDE_API_URL};
