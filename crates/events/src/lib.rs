//! In-process job lifecycle events.
//!
//! - [`EventBus`]: publish/subscribe hub backed by `tokio::sync::broadcast`.
//! - [`PipelineEvent`]: the event envelope published on every job
//!   transition, failure, retry and batch creation.

pub mod bus;

pub use bus::{EventBus, PipelineEvent};
