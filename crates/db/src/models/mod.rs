pub mod batch;
pub mod job;
pub mod job_log;
pub mod warning;
