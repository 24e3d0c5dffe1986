mod content;
mod job;
mod preference;
mod source;

pub use content::{ContentItem, FeedEntry, SourceType};
pub use job::{GenerationJob, JobStatus, JobUpdate, SourcesUsed};
pub use preference::{
    parse_generation_time, parse_timezone, PreferenceUpdate, UserSchedulePreference,
};
pub use source::{NewsTopic, RssSource};
