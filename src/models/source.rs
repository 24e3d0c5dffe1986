use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RssSource {
    pub id: Uuid,
    pub user_id: String,
    pub url: String,
    pub name: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsTopic {
    pub id: Uuid,
    pub user_id: String,
    pub topic: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}
