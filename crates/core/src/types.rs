/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identity recorded for transitions performed by automation.
pub const SYSTEM_ACTOR: &str = "system";

/// Identity recorded for claims and stage work performed by a named worker.
pub fn worker_actor(worker_name: &str) -> String {
    format!("worker:{worker_name}")
}
