use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{AttendanceStore, StoreError, StoreResult};
use crate::models::{
    AttendanceRecord, AttendanceReportRow, AttendanceSummary, AttendeeDetails, PurgeCounts, Token,
    TokenFilter, TokenWithAttendee,
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Attempts at deleting unregistered tokens while registrations race it
const DELETE_GENERATED_ATTEMPTS: usize = 8;

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

/// Postgres-backed store; the conditional SQL statements provide atomicity
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttendanceStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn existing_codes(&self, codes: &[String]) -> StoreResult<Vec<String>> {
        Ok(Token::existing_codes(&self.pool, codes).await?)
    }

    async fn insert_tokens(
        &self,
        codes: &[String],
        label: Option<&str>,
    ) -> StoreResult<Vec<Token>> {
        Ok(Token::insert_batch(&self.pool, codes, label).await?)
    }

    async fn find_token_by_id(&self, id: Uuid) -> StoreResult<Option<Token>> {
        Ok(Token::find_by_id(&self.pool, id).await?)
    }

    async fn find_token_by_code(&self, code: &str) -> StoreResult<Option<Token>> {
        Ok(Token::find_by_code(&self.pool, code).await?)
    }

    async fn list_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<TokenWithAttendee>> {
        let tokens = Token::list(&self.pool, filter).await?;
        let ids: Vec<Uuid> = tokens.iter().map(|t| t.id).collect();

        let mut records: HashMap<Uuid, AttendanceRecord> =
            AttendanceRecord::find_by_token_ids(&self.pool, &ids)
                .await?
                .into_iter()
                .map(|r| (r.token_id, r))
                .collect();

        Ok(tokens
            .into_iter()
            .map(|token| TokenWithAttendee {
                attendee: records.remove(&token.id),
                token,
            })
            .collect())
    }

    async fn delete_generated_tokens(&self) -> StoreResult<u64> {
        let mut attempt = 1;

        loop {
            match Token::delete_generated(&self.pool).await {
                Ok(deleted) => return Ok(deleted),
                Err(e) if is_foreign_key_violation(&e) && attempt < DELETE_GENERATED_ATTEMPTS => {
                    tracing::debug!(attempt, "Token registered during delete, retrying");
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn delete_all(&self) -> StoreResult<PurgeCounts> {
        Ok(Token::delete_all(&self.pool).await?)
    }

    async fn find_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::find_by_id(&self.pool, id).await?)
    }

    async fn find_record_by_token(&self, token_id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::find_by_token_id(&self.pool, token_id).await?)
    }

    async fn register(
        &self,
        token_id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>> {
        match AttendanceRecord::insert_if_absent(&self.pool, token_id, details).await {
            Ok(record) => Ok(record),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::TokenMissing(token_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn set_time_in(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::mark_time_in(&self.pool, token_id, at).await?)
    }

    async fn set_time_out(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::mark_time_out(&self.pool, token_id, at).await?)
    }

    async fn update_record_details(
        &self,
        id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::update_details(&self.pool, id, details).await?)
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        Ok(AttendanceRecord::delete(&self.pool, id).await?)
    }

    async fn snapshot(&self) -> StoreResult<Vec<AttendanceReportRow>> {
        Ok(AttendanceRecord::list_with_codes(&self.pool).await?)
    }

    async fn summary(&self) -> StoreResult<AttendanceSummary> {
        Ok(AttendanceRecord::summary(&self.pool).await?)
    }
}
