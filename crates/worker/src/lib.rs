//! Worker process for the forma pipeline.
//!
//! - [`config`]: environment-driven settings.
//! - [`dispatcher`]: the polling loop that hands queued jobs to the
//!   [`StageRunner`](forma_pipeline::StageRunner).
//! - [`events`]: logs everything published on the event bus.

pub mod config;
pub mod dispatcher;
pub mod events;

pub use config::{ConfigError, WorkerConfig};
pub use dispatcher::JobDispatcher;
