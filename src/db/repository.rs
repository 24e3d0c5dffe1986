use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    GenerationJob, JobUpdate, NewsTopic, PreferenceUpdate, RssSource, SourcesUsed,
    UserSchedulePreference,
};

use super::schema::SCHEMA;
use super::{JobStore, PreferenceStore, SourceRegistry};

const JOB_COLUMNS: &str = "id, user_id, status, scheduled_for, scheduled_at, started_at, \
                           completed_at, notebook_id, sources_used, error_message";

const PREFERENCE_COLUMNS: &str =
    "user_id, daily_generation_enabled, generation_time, timezone, podcast_style, updated_at";

/// SQLite-backed store. All statements run on the connection's single
/// background thread, so each `call` is serialized against every other.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }
}

#[async_trait]
impl JobStore for Repository {
    async fn create(&self, user_id: &str) -> Result<GenerationJob> {
        let job = GenerationJob::new(user_id, None, Utc::now());
        let row = job.clone();
        self.conn
            .call(move |conn| {
                insert_job(conn, &row)?;
                Ok(())
            })
            .await?;
        Ok(job)
    }

    async fn create_scheduled(
        &self,
        user_id: &str,
        occurrence: DateTime<Utc>,
    ) -> Result<Option<GenerationJob>> {
        let job = GenerationJob::new(user_id, Some(occurrence), Utc::now());
        let row = job.clone();
        let inserted = self
            .conn
            .call(move |conn| Ok(insert_job(conn, &row)?))
            .await?;

        Ok((inserted == 1).then_some(job))
    }

    async fn get(&self, user_id: &str, job_id: Uuid) -> Result<Option<GenerationJob>> {
        let user_id = user_id.to_string();
        let job = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = ?1 AND user_id = ?2"
                ))?;
                let job = stmt
                    .query_row(params![job_id.to_string(), user_id], job_from_row)
                    .optional()?;
                Ok(job)
            })
            .await?;
        Ok(job)
    }

    async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<GenerationJob>> {
        let user_id = user_id.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM generation_jobs WHERE user_id = ?1 \
                     ORDER BY scheduled_at DESC LIMIT ?2"
                ))?;
                let jobs = stmt
                    .query_map(params![user_id, limit], job_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    async fn update(&self, job_id: Uuid, update: JobUpdate) -> Result<GenerationJob> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;

                let current = tx
                    .query_row(
                        &format!("SELECT {JOB_COLUMNS} FROM generation_jobs WHERE id = ?1"),
                        params![job_id.to_string()],
                        job_from_row,
                    )
                    .optional()?;

                let Some(mut job) = current else {
                    return Ok(Err(AppError::JobNotFound(job_id)));
                };

                if let Err(e) = job.apply(&update, Utc::now()) {
                    return Ok(Err(e));
                }

                tx.execute(
                    r#"UPDATE generation_jobs SET
                           status = ?2,
                           started_at = ?3,
                           completed_at = ?4,
                           notebook_id = ?5,
                           sources_used = ?6,
                           error_message = ?7
                       WHERE id = ?1"#,
                    params![
                        job.id.to_string(),
                        job.status.as_str(),
                        job.started_at.map(format_timestamp),
                        job.completed_at.map(format_timestamp),
                        job.notebook_id,
                        sources_to_json(job.sources_used)?,
                        job.error_message,
                    ],
                )?;
                tx.commit()?;

                Ok(Ok(job))
            })
            .await?
    }
}

#[async_trait]
impl PreferenceStore for Repository {
    async fn get_preferences(&self, user_id: &str) -> Result<UserSchedulePreference> {
        let user_id = user_id.to_string();
        let prefs = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let prefs = load_or_create_preferences(&tx, &user_id)?;
                tx.commit()?;
                Ok(prefs)
            })
            .await?;
        Ok(prefs)
    }

    async fn update_preferences(
        &self,
        user_id: &str,
        update: PreferenceUpdate,
    ) -> Result<UserSchedulePreference> {
        let user_id = user_id.to_string();
        let prefs = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut prefs = load_or_create_preferences(&tx, &user_id)?;
                prefs.apply(&update);
                tx.execute(
                    r#"UPDATE user_preferences SET
                           daily_generation_enabled = ?2,
                           generation_time = ?3,
                           timezone = ?4,
                           podcast_style = ?5,
                           updated_at = ?6
                       WHERE user_id = ?1"#,
                    params![
                        prefs.user_id,
                        prefs.daily_generation_enabled,
                        prefs.generation_time.format("%H:%M").to_string(),
                        prefs.timezone.name(),
                        prefs.podcast_style,
                        format_timestamp(prefs.updated_at),
                    ],
                )?;
                tx.commit()?;
                Ok(prefs)
            })
            .await?;
        Ok(prefs)
    }

    async fn users_with_schedule_enabled(&self) -> Result<Vec<UserSchedulePreference>> {
        let prefs = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PREFERENCE_COLUMNS} FROM user_preferences \
                     WHERE daily_generation_enabled = 1 ORDER BY user_id"
                ))?;
                let prefs = stmt
                    .query_map([], preferences_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(prefs)
            })
            .await?;
        Ok(prefs)
    }
}

#[async_trait]
impl SourceRegistry for Repository {
    async fn list_rss(&self, user_id: &str) -> Result<Vec<RssSource>> {
        let user_id = user_id.to_string();
        let sources = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, url, name, enabled, created_at FROM rss_sources \
                     WHERE user_id = ?1 ORDER BY created_at, rowid",
                )?;
                let sources = stmt
                    .query_map(params![user_id], rss_source_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(sources)
            })
            .await?;
        Ok(sources)
    }

    async fn list_topics(&self, user_id: &str) -> Result<Vec<NewsTopic>> {
        let user_id = user_id.to_string();
        let topics = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, topic, enabled, created_at FROM news_topics \
                     WHERE user_id = ?1 ORDER BY created_at, rowid",
                )?;
                let topics = stmt
                    .query_map(params![user_id], news_topic_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(topics)
            })
            .await?;
        Ok(topics)
    }

    async fn add_rss_source(&self, user_id: &str, url: &str, name: &str) -> Result<RssSource> {
        let source = RssSource {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            url: url.to_string(),
            name: name.to_string(),
            enabled: true,
            created_at: Utc::now(),
        };
        let row = source.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO rss_sources (id, user_id, url, name, enabled, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        row.id.to_string(),
                        row.user_id,
                        row.url,
                        row.name,
                        row.enabled,
                        format_timestamp(row.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(source)
    }

    async fn add_news_topic(&self, user_id: &str, topic: &str) -> Result<NewsTopic> {
        let topic = NewsTopic {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            topic: topic.to_string(),
            enabled: true,
            created_at: Utc::now(),
        };
        let row = topic.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO news_topics (id, user_id, topic, enabled, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        row.id.to_string(),
                        row.user_id,
                        row.topic,
                        row.enabled,
                        format_timestamp(row.created_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(topic)
    }

    async fn set_rss_enabled(
        &self,
        user_id: &str,
        source_id: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE rss_sources SET enabled = ?1 WHERE id = ?2 AND user_id = ?3",
                    params![enabled, source_id.to_string(), user_id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn set_topic_enabled(
        &self,
        user_id: &str,
        topic_id: Uuid,
        enabled: bool,
    ) -> Result<bool> {
        let user_id = user_id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE news_topics SET enabled = ?1 WHERE id = ?2 AND user_id = ?3",
                    params![enabled, topic_id.to_string(), user_id],
                )?;
                Ok(changed)
            })
            .await?;
        Ok(changed > 0)
    }

    async fn remove_rss_source(&self, user_id: &str, source_id: Uuid) -> Result<bool> {
        let user_id = user_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM rss_sources WHERE id = ?1 AND user_id = ?2",
                    params![source_id.to_string(), user_id],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn remove_news_topic(&self, user_id: &str, topic_id: Uuid) -> Result<bool> {
        let user_id = user_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM news_topics WHERE id = ?1 AND user_id = ?2",
                    params![topic_id.to_string(), user_id],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted > 0)
    }
}

/// Returns the number of rows inserted (0 when the occurrence already has a job).
fn insert_job(conn: &rusqlite::Connection, job: &GenerationJob) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO generation_jobs ({JOB_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            job.id.to_string(),
            job.user_id,
            job.status.as_str(),
            job.scheduled_for.map(format_timestamp),
            format_timestamp(job.scheduled_at),
            job.started_at.map(format_timestamp),
            job.completed_at.map(format_timestamp),
            job.notebook_id,
            sources_to_json(job.sources_used)?,
            job.error_message,
        ],
    )
}

fn load_or_create_preferences(
    tx: &Transaction,
    user_id: &str,
) -> rusqlite::Result<UserSchedulePreference> {
    let defaults = UserSchedulePreference::new(user_id);
    tx.execute(
        &format!(
            "INSERT OR IGNORE INTO user_preferences ({PREFERENCE_COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ),
        params![
            defaults.user_id,
            defaults.daily_generation_enabled,
            defaults.generation_time.format("%H:%M").to_string(),
            defaults.timezone.name(),
            defaults.podcast_style,
            format_timestamp(defaults.updated_at),
        ],
    )?;
    tx.query_row(
        &format!("SELECT {PREFERENCE_COLUMNS} FROM user_preferences WHERE user_id = ?1"),
        params![user_id],
        preferences_from_row,
    )
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.to_string().into())
}

fn sources_to_json(sources: Option<SourcesUsed>) -> rusqlite::Result<Option<String>> {
    sources
        .map(|s| serde_json::to_string(&s))
        .transpose()
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp_at(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_at(row, idx).map(Some),
        None => Ok(None),
    }
}

fn uuid_at(row: &Row, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn job_from_row(row: &Row) -> rusqlite::Result<GenerationJob> {
    let status: String = row.get(2)?;
    let sources_used = match row.get::<_, Option<String>>(8)? {
        Some(json) => {
            Some(serde_json::from_str::<SourcesUsed>(&json).map_err(|e| conversion_error(8, e))?)
        }
        None => None,
    };

    Ok(GenerationJob {
        id: uuid_at(row, 0)?,
        user_id: row.get(1)?,
        status: status.parse().map_err(|e| conversion_error(2, e))?,
        scheduled_for: optional_timestamp_at(row, 3)?,
        scheduled_at: timestamp_at(row, 4)?,
        started_at: optional_timestamp_at(row, 5)?,
        completed_at: optional_timestamp_at(row, 6)?,
        notebook_id: row.get(7)?,
        sources_used,
        error_message: row.get(9)?,
    })
}

fn preferences_from_row(row: &Row) -> rusqlite::Result<UserSchedulePreference> {
    let time: String = row.get(2)?;
    let timezone: String = row.get(3)?;

    Ok(UserSchedulePreference {
        user_id: row.get(0)?,
        daily_generation_enabled: row.get::<_, i64>(1)? != 0,
        generation_time: NaiveTime::parse_from_str(&time, "%H:%M")
            .map_err(|e| conversion_error(2, e))?,
        timezone: timezone
            .parse::<Tz>()
            .map_err(|e| conversion_error(3, e))?,
        podcast_style: row.get(4)?,
        updated_at: timestamp_at(row, 5)?,
    })
}

fn rss_source_from_row(row: &Row) -> rusqlite::Result<RssSource> {
    Ok(RssSource {
        id: uuid_at(row, 0)?,
        user_id: row.get(1)?,
        url: row.get(2)?,
        name: row.get(3)?,
        enabled: row.get::<_, i64>(4)? != 0,
        created_at: timestamp_at(row, 5)?,
    })
}

fn news_topic_from_row(row: &Row) -> rusqlite::Result<NewsTopic> {
    Ok(NewsTopic {
        id: uuid_at(row, 0)?,
        user_id: row.get(1)?,
        topic: row.get(2)?,
        enabled: row.get::<_, i64>(3)? != 0,
        created_at: timestamp_at(row, 4)?,
    })
}
