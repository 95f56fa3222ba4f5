use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AttendanceStore, StoreError, StoreResult};
use crate::models::{
    AttendanceRecord, AttendanceReportRow, AttendanceSummary, AttendeeDetails, PurgeCounts, Token,
    TokenFilter, TokenStatus, TokenWithAttendee,
};

#[derive(Debug, Clone)]
struct StoredToken {
    id: Uuid,
    code: String,
    label: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    tokens: HashMap<Uuid, StoredToken>,
    ids_by_code: HashMap<String, Uuid>,
    records: HashMap<Uuid, AttendanceRecord>,
    record_ids_by_token: HashMap<Uuid, Uuid>,
}

impl Inner {
    fn token(&self, stored: &StoredToken) -> Token {
        let status = if self.record_ids_by_token.contains_key(&stored.id) {
            TokenStatus::Registered
        } else {
            TokenStatus::Generated
        };

        Token {
            id: stored.id,
            code: stored.code.clone(),
            label: stored.label.clone(),
            status,
            created_at: stored.created_at,
        }
    }

    fn record_for_token_mut(&mut self, token_id: Uuid) -> Option<&mut AttendanceRecord> {
        let record_id = self.record_ids_by_token.get(&token_id)?;
        self.records.get_mut(record_id)
    }
}

/// Non-durable store holding everything behind one lock.
///
/// Each primitive checks its precondition and writes inside a single critical
/// section, giving the same compare-and-swap behaviour as the SQL backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttendanceStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn existing_codes(&self, codes: &[String]) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock().await;
        Ok(codes
            .iter()
            .filter(|c| inner.ids_by_code.contains_key(*c))
            .cloned()
            .collect())
    }

    async fn insert_tokens(
        &self,
        codes: &[String],
        label: Option<&str>,
    ) -> StoreResult<Vec<Token>> {
        let mut inner = self.inner.lock().await;
        let created_at = Utc::now();
        let mut created = Vec::with_capacity(codes.len());

        for code in codes {
            if inner.ids_by_code.contains_key(code) {
                continue;
            }

            let stored = StoredToken {
                id: Uuid::new_v4(),
                code: code.clone(),
                label: label.map(str::to_string),
                created_at,
            };
            inner.ids_by_code.insert(code.clone(), stored.id);
            created.push(inner.token(&stored));
            inner.tokens.insert(stored.id, stored);
        }

        Ok(created)
    }

    async fn find_token_by_id(&self, id: Uuid) -> StoreResult<Option<Token>> {
        let inner = self.inner.lock().await;
        Ok(inner.tokens.get(&id).map(|t| inner.token(t)))
    }

    async fn find_token_by_code(&self, code: &str) -> StoreResult<Option<Token>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .ids_by_code
            .get(code)
            .and_then(|id| inner.tokens.get(id))
            .map(|t| inner.token(t)))
    }

    async fn list_tokens(&self, filter: &TokenFilter) -> StoreResult<Vec<TokenWithAttendee>> {
        let inner = self.inner.lock().await;

        let mut tokens: Vec<Token> = inner
            .tokens
            .values()
            .map(|t| inner.token(t))
            .filter(|t| filter.status.map_or(true, |s| t.status == s))
            .collect();
        tokens.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.code.cmp(&b.code))
        });
        tokens.truncate(usize::try_from(filter.limit).unwrap_or(0));

        Ok(tokens
            .into_iter()
            .map(|token| TokenWithAttendee {
                attendee: inner
                    .record_ids_by_token
                    .get(&token.id)
                    .and_then(|id| inner.records.get(id))
                    .cloned(),
                token,
            })
            .collect())
    }

    async fn delete_generated_tokens(&self) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;

        let unused: Vec<(Uuid, String)> = inner
            .tokens
            .values()
            .filter(|t| !inner.record_ids_by_token.contains_key(&t.id))
            .map(|t| (t.id, t.code.clone()))
            .collect();

        for (id, code) in &unused {
            inner.tokens.remove(id);
            inner.ids_by_code.remove(code);
        }

        Ok(unused.len() as u64)
    }

    async fn delete_all(&self) -> StoreResult<PurgeCounts> {
        let mut inner = self.inner.lock().await;
        let counts = PurgeCounts {
            tokens_deleted: inner.tokens.len() as u64,
            records_deleted: inner.records.len() as u64,
        };
        *inner = Inner::default();
        Ok(counts)
    }

    async fn find_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner.records.get(&id).cloned())
    }

    async fn find_record_by_token(&self, token_id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .record_ids_by_token
            .get(&token_id)
            .and_then(|id| inner.records.get(id))
            .cloned())
    }

    async fn register(
        &self,
        token_id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let mut inner = self.inner.lock().await;

        if !inner.tokens.contains_key(&token_id) {
            return Err(StoreError::TokenMissing(token_id));
        }
        if inner.record_ids_by_token.contains_key(&token_id) {
            return Ok(None);
        }

        let record = AttendanceRecord {
            id: Uuid::new_v4(),
            token_id,
            full_name: details.full_name.clone(),
            course: details.course.clone(),
            year_level: details.year_level.clone(),
            email: details.email.clone(),
            contact_number: details.contact_number.clone(),
            student_number: details.student_number.clone(),
            remarks: details.remarks.clone(),
            time_in: None,
            time_out: None,
            created_at: Utc::now(),
        };
        inner.record_ids_by_token.insert(token_id, record.id);
        inner.records.insert(record.id, record.clone());

        Ok(Some(record))
    }

    async fn set_time_in(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let mut inner = self.inner.lock().await;

        Ok(match inner.record_for_token_mut(token_id) {
            Some(record) if record.time_in.is_none() => {
                record.time_in = Some(at);
                Some(record.clone())
            }
            _ => None,
        })
    }

    async fn set_time_out(
        &self,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let mut inner = self.inner.lock().await;

        Ok(match inner.record_for_token_mut(token_id) {
            Some(record) if record.time_out.is_none() => match record.time_in {
                Some(time_in) => {
                    record.time_out = Some(at.max(time_in));
                    Some(record.clone())
                }
                None => None,
            },
            _ => None,
        })
    }

    async fn update_record_details(
        &self,
        id: Uuid,
        details: &AttendeeDetails,
    ) -> StoreResult<Option<AttendanceRecord>> {
        let mut inner = self.inner.lock().await;

        Ok(inner.records.get_mut(&id).map(|record| {
            record.full_name = details.full_name.clone();
            record.course = details.course.clone();
            record.year_level = details.year_level.clone();
            record.email = details.email.clone();
            record.contact_number = details.contact_number.clone();
            record.student_number = details.student_number.clone();
            record.remarks = details.remarks.clone();
            record.clone()
        }))
    }

    async fn delete_record(&self, id: Uuid) -> StoreResult<Option<AttendanceRecord>> {
        let mut inner = self.inner.lock().await;

        let record = inner.records.remove(&id);
        if let Some(ref r) = record {
            inner.record_ids_by_token.remove(&r.token_id);
        }

        Ok(record)
    }

    async fn snapshot(&self) -> StoreResult<Vec<AttendanceReportRow>> {
        let inner = self.inner.lock().await;

        let mut rows: Vec<AttendanceReportRow> = inner
            .records
            .values()
            .filter_map(|record| {
                inner.tokens.get(&record.token_id).map(|t| AttendanceReportRow {
                    record: record.clone(),
                    token_code: t.code.clone(),
                })
            })
            .collect();
        rows.sort_by(|a, b| b.record.created_at.cmp(&a.record.created_at));

        Ok(rows)
    }

    async fn summary(&self) -> StoreResult<AttendanceSummary> {
        let inner = self.inner.lock().await;

        let total_tokens = inner.tokens.len() as i64;
        let registered = inner.records.len() as i64;
        let timed_in = inner
            .records
            .values()
            .filter(|r| r.time_in.is_some() && r.time_out.is_none())
            .count() as i64;
        let completed = inner
            .records
            .values()
            .filter(|r| r.time_out.is_some())
            .count() as i64;

        Ok(AttendanceSummary {
            total_tokens,
            registered,
            available: total_tokens - registered,
            timed_in,
            completed,
        })
    }
}
