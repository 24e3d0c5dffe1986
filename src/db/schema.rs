pub const SCHEMA: &str = r#"
-- user_preferences table
CREATE TABLE IF NOT EXISTS user_preferences (
    user_id TEXT PRIMARY KEY,
    daily_generation_enabled INTEGER NOT NULL DEFAULT 0,
    generation_time TEXT NOT NULL DEFAULT '07:00',
    timezone TEXT NOT NULL DEFAULT 'America/Los_Angeles',
    podcast_style TEXT NOT NULL DEFAULT 'deep-dive',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_user_preferences_enabled ON user_preferences(daily_generation_enabled);

-- rss_sources table
CREATE TABLE IF NOT EXISTS rss_sources (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    url TEXT NOT NULL,
    name TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, url)
);

CREATE INDEX IF NOT EXISTS idx_rss_sources_user_id ON rss_sources(user_id);

-- news_topics table
CREATE TABLE IF NOT EXISTS news_topics (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, topic)
);

CREATE INDEX IF NOT EXISTS idx_news_topics_user_id ON news_topics(user_id);

-- generation_jobs table
-- scheduled_for is NULL for manual runs; NULLs never collide in the unique index.
CREATE TABLE IF NOT EXISTS generation_jobs (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    scheduled_for TEXT,
    scheduled_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    notebook_id TEXT,
    sources_used TEXT,
    error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_generation_jobs_user_scheduled ON generation_jobs(user_id, scheduled_at DESC);
CREATE UNIQUE INDEX IF NOT EXISTS idx_generation_jobs_occurrence ON generation_jobs(user_id, scheduled_for);
"#;
