//! # EchoAudit client library
//!
//! Console-side logic for the EchoAudit sales-call archive:
//! - `job_service`: Job Service client (HTTP) behind the `JobService` trait
//! - `index` / `calls` / `catalog`: navigation over period → organization → agent
//!   and the selected agent's calls grouped by day
//! - `pipeline`: stage orchestration, status polling, single-flight guard
//! - `playback`: one-at-a-time audio playback
//! - `session`: wiring of the above over one event bus

pub mod calls;
pub mod catalog;
pub mod error;
pub mod index;
pub mod job_service;
pub mod pipeline;
pub mod playback;
pub mod session;

pub use catalog::{Catalog, CatalogView};
pub use error::{CatalogError, JobServiceError, PipelineError, PlaybackError};
pub use job_service::{HttpJobService, JobService};
pub use pipeline::{AgentAnalysis, PendingForce, Pipeline, PipelineConfig, PipelineSnapshot};
pub use playback::{AudioSink, CommandSink, PlaybackController, Toggle};
pub use session::{Session, SessionSettings};
