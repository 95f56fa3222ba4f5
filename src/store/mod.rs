//! Token and attendance persistence.
//!
//! Every state-changing primitive here is a single conditional operation:
//! the precondition and the write happen atomically inside the backend, so
//! callers never need to pair a read with a separate write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, AttendanceReportRow, AttendanceSummary, AttendeeDetails, PurgeCounts, Token,
    TokenFilter, TokenWithAttendee,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Token {0} does not exist")]
    TokenMissing(Uuid),
}

impl StoreError {
    /// Connectivity failures the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Database(
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            )
        )
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

pub type SharedStore = Arc<dyn AttendanceStore>;

#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Short backend name for health reporting
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> StoreResult<()>;

    // Tokens
    async fn existing_codes(&self, codes: &[String]) -> StoreResult<Vec<String>>;
    /// Inserts new tokens; codes that already exist are skipped, not errors
    async fn insert_tokens(&self, codes: &[String], label: Option<&str>)
        -> StoreResult<Vec<Token>>;
    async fn find_token_by_id(&self, id: Uuid) -> StoreResult<Option<Token>>;
    async fn find_token_by_code(&self, code: &str) -> StoreResult<Option<Token>>;
    async fn list_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<TokenWithAttendee>>;
    /// Removes tokens that have no attendance record
    async fn delete_generated_tokens(&self) -> StoreResult<u64>;
    async fn delete_all(&self) -> StoreResult<PurgeCounts>;

    // Attendance records
    async fn find_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>>;
    async fn find_record_by_token(&self, token_id: Uuid) -> StoreResult<Option<AttendanceRecord>>;
    /// Creates the record for `token_id` if none exists, which also flips the
    /// token to `registered`. `None` means a record already existed.
    async fn register(
        &self,
        token_id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>>;
    /// Sets `time_in` where it is null. `None` means the precondition failed.
    async fn set_time_in(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>>;
    /// Sets `time_out` where `time_in` is set and `time_out` is null, never
    /// earlier than `time_in`. `None` means the precondition failed.
    async fn set_time_out(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>>;
    async fn update_record_details(
        &self,
        id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>>;
    async fn delete_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>>;

    // Reporting
    async fn snapshot(&self) -> StoreResult<Vec<AttendanceReportRow>>;
    async fn summary(&self) -> StoreResult<AttendanceSummary>;
}
