//! HTTP clients for the extraction and render collaborators.
//!
//! Both implement the collaborator traits from `forma_core::collaborators`
//! so the pipeline never depends on transport details.

pub mod client;
pub mod extraction;
pub mod render;

pub use client::{CollabApiError, CollabClient};
pub use extraction::ExtractionApi;
pub use render::RenderApi;
