use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

mod ai;
mod app;
mod config;
mod db;
mod error;
mod feed;
mod generation;
mod models;
mod schedule;
mod services;

use app::App;
use config::Config;
use error::Result;
use models::{parse_generation_time, parse_timezone, PreferenceUpdate};
use schedule::next_due_description;

#[derive(Parser)]
#[command(
    name = "daily-brief",
    version,
    about = "Schedules and runs daily audio brief generations"
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler until Ctrl-C (default)
    Run,
    /// Run a single scheduler tick and print its summary
    Tick,
    /// Generate a brief for a user right now
    Generate { user: String },
    /// List a user's recent generation jobs
    Jobs {
        user: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show one generation job
    Job { user: String, job_id: Uuid },
    /// Show or change a user's daily schedule
    Schedule {
        user: String,
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Local time of day, HH:MM
        #[arg(long)]
        time: Option<String>,
        /// IANA timezone, e.g. America/Los_Angeles
        #[arg(long)]
        timezone: Option<String>,
        /// Audio format passed to the synthesis service
        #[arg(long)]
        style: Option<String>,
    },
    /// Subscribe a user to an RSS feed
    AddFeed {
        user: String,
        url: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Subscribe a user to a news topic
    AddTopic { user: String, topic: String },
    /// List a user's RSS feeds
    Feeds { user: String },
    /// List a user's news topics
    Topics { user: String },
    /// Enable or disable one of a user's RSS feeds
    SetFeed {
        user: String,
        id: Uuid,
        #[command(flatten)]
        toggle: Toggle,
    },
    /// Enable or disable one of a user's news topics
    SetTopic {
        user: String,
        id: Uuid,
        #[command(flatten)]
        toggle: Toggle,
    },
    /// Unsubscribe a user from an RSS feed
    RemoveFeed { user: String, id: Uuid },
    /// Unsubscribe a user from a news topic
    RemoveTopic { user: String, id: Uuid },
    /// Import RSS subscriptions from an OPML file
    ImportOpml { user: String, path: PathBuf },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct Toggle {
    #[arg(long)]
    enable: bool,
    #[arg(long)]
    disable: bool,
}

#[derive(Serialize)]
struct ScheduleView {
    #[serde(flatten)]
    preferences: models::UserSchedulePreference,
    next_generation: String,
    due_now: bool,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let app = App::new(&config).await?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            app.run(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!("Failed to listen for Ctrl-C: {}", e);
                }
            })
            .await?;
        }
        Command::Tick => print_json(&app.run_tick().await?)?,
        Command::Generate { user } => print_json(&app.trigger_generation(&user).await?)?,
        Command::Jobs { user, limit } => print_json(&app.jobs(&user, limit).await?)?,
        Command::Job { user, job_id } => print_json(&app.job(&user, job_id).await?)?,
        Command::Schedule {
            user,
            enable,
            disable,
            time,
            timezone,
            style,
        } => {
            let update = PreferenceUpdate {
                daily_generation_enabled: match (enable, disable) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
                generation_time: time.as_deref().map(parse_generation_time).transpose()?,
                timezone: timezone.as_deref().map(parse_timezone).transpose()?,
                podcast_style: style,
            };
            let preferences = app.update_schedule(&user, update).await?;
            let now = Utc::now();
            print_json(&ScheduleView {
                next_generation: next_due_description(&preferences, now),
                due_now: app.is_due(&preferences, now),
                preferences,
            })?;
        }
        Command::AddFeed { user, url, name } => {
            print_json(&app.add_feed(&user, &url, name.as_deref()).await?)?
        }
        Command::AddTopic { user, topic } => print_json(&app.add_topic(&user, &topic).await?)?,
        Command::ImportOpml { user, path } => print_json(&app.import_opml(&user, &path).await?)?,
        Command::Feeds { user } => print_json(&app.feeds(&user).await?)?,
        Command::Topics { user } => print_json(&app.topics(&user).await?)?,
        Command::SetFeed { user, id, toggle } => {
            app.set_feed_enabled(&user, id, toggle.enable).await?;
            print_json(&app.feeds(&user).await?)?
        }
        Command::SetTopic { user, id, toggle } => {
            app.set_topic_enabled(&user, id, toggle.enable).await?;
            print_json(&app.topics(&user).await?)?
        }
        Command::RemoveFeed { user, id } => {
            app.remove_feed(&user, id).await?;
            print_json(&app.feeds(&user).await?)?
        }
        Command::RemoveTopic { user, id } => {
            app.remove_topic(&user, id).await?;
            print_json(&app.topics(&user).await?)?
        }
    }

    Ok(())
}
