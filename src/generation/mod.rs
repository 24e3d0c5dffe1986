//! Scheduling and orchestration of daily generations.
//!
//! ```text
//! TickHandler::run_tick
//!   ├── PreferenceStore::users_with_schedule_enabled
//!   ├── DueClock::current_occurrence        (per user)
//!   ├── JobStore::create_scheduled          (dedup per occurrence)
//!   └── GenerationPipeline::run             (spawned per due user, all joined)
//!         ├── ContentAggregator::collect    (RSS + topic news, concurrently)
//!         ├── ArtifactService::create
//!         └── SynthesisService::synthesize
//! ```

mod aggregator;
pub(crate) mod pipeline;
mod scheduler;

pub use aggregator::ContentAggregator;
pub use pipeline::{GenerationPipeline, PipelineTimeouts};
pub use scheduler::{TickHandler, TickSummary};
