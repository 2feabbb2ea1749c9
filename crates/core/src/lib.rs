//! Domain logic for the forma job orchestration core.
//!
//! Everything in this crate is free of I/O: the matching and validation
//! engines, the stage/status model and its transition table, the error
//! taxonomy and recovery resume-point logic. Persistence lives in
//! `forma-db`, orchestration in `forma-pipeline`.

pub mod collaborators;
pub mod content;
pub mod error;
pub mod error_category;
pub mod geometry;
pub mod matching;
pub mod payloads;
pub mod recovery;
pub mod stages;
pub mod types;
pub mod validation;
