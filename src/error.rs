use thiserror::Error;
use uuid::Uuid;

use crate::models::JobStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("OPML error: {0}")]
    Opml(#[from] opml::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown timezone: {0}")]
    InvalidTimezone(String),

    #[error("{0}")]
    InvalidTime(String),

    #[error("Illegal job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Generation job not found: {0}")]
    JobNotFound(Uuid),

    #[error("Source not found: {0}")]
    SourceNotFound(Uuid),

    // Upstream messages are kept verbatim so operators see what the service reported.
    #[error("{0}")]
    ArtifactService(String),

    #[error("{0}")]
    SynthesisService(String),

    #[error("Topic API error: {0}")]
    TopicApi(String),

    #[error("{0}")]
    Timeout(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
