use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, FromRow, PgPool, Row};
use uuid::Uuid;

use super::attendance::AttendanceRecord;

/// Lifecycle status of a token, derived from the presence of an attendance record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Generated,
    Registered,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Generated => "generated",
            TokenStatus::Registered => "registered",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    pub code: String,
    pub label: Option<String>,
    pub status: TokenStatus,
    pub created_at: DateTime<Utc>,
}

// Every token query selects a boolean `registered` column instead of a stored status.
impl<'r> FromRow<'r, PgRow> for Token {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let registered: bool = row.try_get("registered")?;

        Ok(Self {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            label: row.try_get("label")?,
            status: if registered {
                TokenStatus::Registered
            } else {
                TokenStatus::Generated
            },
            created_at: row.try_get("created_at")?,
        })
    }
}

/// A token together with its attendance record, if one exists
#[derive(Debug, Clone, Serialize)]
pub struct TokenWithAttendee {
    #[serde(flatten)]
    pub token: Token,
    pub attendee: Option<AttendanceRecord>,
}

#[derive(Debug, Clone)]
pub struct TokenFilter {
    pub status: Option<TokenStatus>,
    pub limit: i64,
}

impl Default for TokenFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeCounts {
    pub tokens_deleted: u64,
    pub records_deleted: u64,
}

impl Token {
    /// Inserts a batch of codes, silently skipping any that already exist
    pub async fn insert_batch(
        pool: &PgPool,
        codes: &[String],
        label: Option<&str>,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let tokens = sqlx::query_as::<_, Token>(
            r#"
            INSERT INTO tokens (code, label)
            SELECT code, $2 FROM UNNEST($1::text[]) AS code
            ON CONFLICT (code) DO NOTHING
            RETURNING id, code, label, created_at, FALSE AS registered
            "#,
        )
        .bind(codes)
        .bind(label)
        .fetch_all(pool)
        .await?;

        Ok(tokens)
    }

    /// Returns the subset of `codes` already present in the table
    pub async fn existing_codes(pool: &PgPool, codes: &[String]) -> Result<Vec<String>, sqlx::Error> {
        let existing = sqlx::query_scalar::<_, String>(
            r#"
            SELECT code FROM tokens WHERE code = ANY($1)
            "#,
        )
        .bind(codes)
        .fetch_all(pool)
        .await?;

        Ok(existing)
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let token = sqlx::query_as::<_, Token>(
            r#"
            SELECT t.id, t.code, t.label, t.created_at,
                   EXISTS (SELECT 1 FROM attendance_records a WHERE a.token_id = t.id) AS registered
            FROM tokens t
            WHERE t.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(token)
    }

    pub async fn find_by_code(pool: &PgPool, code: &str) -> Result<Option<Self>, sqlx::Error> {
        let token = sqlx::query_as::<_, Token>(
            r#"
            SELECT t.id, t.code, t.label, t.created_at,
                   EXISTS (SELECT 1 FROM attendance_records a WHERE a.token_id = t.id) AS registered
            FROM tokens t
            WHERE t.code = $1
            "#,
        )
        .bind(code)
        .fetch_optional(pool)
        .await?;

        Ok(token)
    }

    /// Lists tokens newest first, optionally restricted to one status
    pub async fn list(pool: &PgPool, filter: &TokenFilter) -> Result<Vec<Self>, sqlx::Error> {
        let tokens = sqlx::query_as::<_, Token>(
            r#"
            SELECT t.id, t.code, t.label, t.created_at, (a.id IS NOT NULL) AS registered
            FROM tokens t
            LEFT JOIN attendance_records a ON a.token_id = t.id
            WHERE $1::text IS NULL OR ($1::text = 'registered') = (a.id IS NOT NULL)
            ORDER BY t.created_at DESC, t.code ASC
            LIMIT $2
            "#,
        )
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit)
        .fetch_all(pool)
        .await?;

        Ok(tokens)
    }

    /// Deletes every token that has never been registered.
    ///
    /// Tokens row-locked by an in-flight registration are skipped. A
    /// registration that commits between the snapshot and the lock still
    /// surfaces as a foreign key violation, which callers retry.
    pub async fn delete_generated(pool: &PgPool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM tokens
            WHERE id IN (
                SELECT t.id FROM tokens t
                WHERE NOT EXISTS (SELECT 1 FROM attendance_records a WHERE a.token_id = t.id)
                FOR UPDATE OF t SKIP LOCKED
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Deletes all attendance records and tokens
    pub async fn delete_all(pool: &PgPool) -> Result<PurgeCounts, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let records = sqlx::query("DELETE FROM attendance_records")
            .execute(&mut *tx)
            .await?;
        let tokens = sqlx::query("DELETE FROM tokens").execute(&mut *tx).await?;

        tx.commit().await?;

        Ok(PurgeCounts {
            tokens_deleted: tokens.rows_affected(),
            records_deleted: records.rows_affected(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_value(TokenStatus::Generated).unwrap(),
            serde_json::json!("generated")
        );
        assert_eq!(
            serde_json::from_str::<TokenStatus>(r#""registered""#).unwrap(),
            TokenStatus::Registered
        );
    }

    #[test]
    fn test_token_with_attendee_flattens_token() {
        let token = Token {
            id: Uuid::new_v4(),
            code: "AB12EF".to_string(),
            label: Some("Batch A".to_string()),
            status: TokenStatus::Generated,
            created_at: Utc::now(),
        };

        let value = serde_json::to_value(TokenWithAttendee {
            token,
            attendee: None,
        })
        .unwrap();

        assert_eq!(value["code"], "AB12EF");
        assert_eq!(value["status"], "generated");
        assert!(value["attendee"].is_null());
    }
}
