use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Attendance lifecycle of a token, derived from the token and its record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceState {
    Unregistered,
    AwaitingTimeIn,
    AwaitingTimeOut,
    Complete,
}

impl AttendanceState {
    pub fn of(record: Option<&AttendanceRecord>) -> Self {
        record.map_or(AttendanceState::Unregistered, AttendanceRecord::state)
    }
}

/// The transition reported back to a scanning client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Registered,
    TimeIn,
    TimeOut,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub token_id: Uuid,
    pub full_name: String,
    pub course: String,
    pub year_level: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub student_number: Option<String>,
    pub remarks: Option<String>,
    pub time_in: Option<DateTime<Utc>>,
    pub time_out: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl AttendanceRecord {
    pub fn state(&self) -> AttendanceState {
        match (self.time_in, self.time_out) {
            (None, _) => AttendanceState::AwaitingTimeIn,
            (Some(_), None) => AttendanceState::AwaitingTimeOut,
            (Some(_), Some(_)) => AttendanceState::Complete,
        }
    }
}

/// Attendee fields as submitted by a client, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttendeeInput {
    pub full_name: Option<String>,
    pub course: Option<String>,
    pub year_level: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub student_number: Option<String>,
    pub remarks: Option<String>,
}

/// Validated and normalized attendee identity
#[derive(Debug, Clone, PartialEq)]
pub struct AttendeeDetails {
    pub full_name: String,
    pub course: String,
    pub year_level: Option<String>,
    pub email: Option<String>,
    pub contact_number: Option<String>,
    pub student_number: Option<String>,
    pub remarks: Option<String>,
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AttendeeInput {
    /// True when the client sent no attendee field at all
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.course.is_none()
            && self.year_level.is_none()
            && self.email.is_none()
            && self.contact_number.is_none()
            && self.student_number.is_none()
            && self.remarks.is_none()
    }

    /// Trims every field, lower-cases the email and checks the required fields
    pub fn validate(self) -> Result<AttendeeDetails, String> {
        let full_name = clean(self.full_name).ok_or_else(|| "full_name is required".to_string())?;
        let course = clean(self.course).ok_or_else(|| "course is required".to_string())?;

        Ok(AttendeeDetails {
            full_name,
            course,
            year_level: clean(self.year_level),
            email: clean(self.email).map(|e| e.to_lowercase()),
            contact_number: clean(self.contact_number),
            student_number: clean(self.student_number),
            remarks: clean(self.remarks),
        })
    }
}

/// Attendance record joined with the code of its token
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AttendanceReportRow {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub record: AttendanceRecord,
    pub token_code: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, FromRow)]
pub struct AttendanceSummary {
    pub total_tokens: i64,
    pub registered: i64,
    pub available: i64,
    pub timed_in: i64,
    pub completed: i64,
}

impl AttendanceRecord {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT * FROM attendance_records WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_token_id(
        pool: &PgPool,
        token_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT * FROM attendance_records WHERE token_id = $1
            "#,
        )
        .bind(token_id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_token_ids(
        pool: &PgPool,
        token_ids: &[Uuid],
    ) -> Result<Vec<Self>, sqlx::Error> {
        let records = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            SELECT * FROM attendance_records WHERE token_id = ANY($1)
            "#,
        )
        .bind(token_ids)
        .fetch_all(pool)
        .await?;

        Ok(records)
    }

    /// Creates the record for a token unless one already exists.
    ///
    /// Returns `None` when another registration got there first.
    pub async fn insert_if_absent(
        pool: &PgPool,
        token_id: Uuid,
        details: &AttendeeDetails,
    ) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            INSERT INTO attendance_records (
                token_id, full_name, course, year_level, email,
                contact_number, student_number, remarks
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (token_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(token_id)
        .bind(&details.full_name)
        .bind(&details.course)
        .bind(&details.year_level)
        .bind(&details.email)
        .bind(&details.contact_number)
        .bind(&details.student_number)
        .bind(&details.remarks)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// Sets `time_in` only if it is still unset
    pub async fn mark_time_in(
        pool: &PgPool,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_records
            SET time_in = $2
            WHERE token_id = $1 AND time_in IS NULL
            RETURNING *
            "#,
        )
        .bind(token_id)
        .bind(at)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// Sets `time_out` only if `time_in` is set and `time_out` is still unset
    pub async fn mark_time_out(
        pool: &PgPool,
        token_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_records
            SET time_out = GREATEST($2, time_in)
            WHERE token_id = $1 AND time_in IS NOT NULL AND time_out IS NULL
            RETURNING *
            "#,
        )
        .bind(token_id)
        .bind(at)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// Replaces the identity fields; timestamps are left untouched
    pub async fn update_details(
        pool: &PgPool,
        id: Uuid,
        details: &AttendeeDetails,
    ) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            UPDATE attendance_records
            SET full_name = $2,
                course = $3,
                year_level = $4,
                email = $5,
                contact_number = $6,
                student_number = $7,
                remarks = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(&details.full_name)
        .bind(&details.course)
        .bind(&details.year_level)
        .bind(&details.email)
        .bind(&details.contact_number)
        .bind(&details.student_number)
        .bind(&details.remarks)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let record = sqlx::query_as::<_, AttendanceRecord>(
            r#"
            DELETE FROM attendance_records WHERE id = $1 RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// All records with their token codes, newest registration first
    pub async fn list_with_codes(pool: &PgPool) -> Result<Vec<AttendanceReportRow>, sqlx::Error> {
        let rows = sqlx::query_as::<_, AttendanceReportRow>(
            r#"
            SELECT a.*, t.code AS token_code
            FROM attendance_records a
            JOIN tokens t ON t.id = a.token_id
            ORDER BY a.created_at DESC
            "#,
        )
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }

    pub async fn summary(pool: &PgPool) -> Result<AttendanceSummary, sqlx::Error> {
        let summary = sqlx::query_as::<_, AttendanceSummary>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM tokens) AS total_tokens,
                (SELECT COUNT(*) FROM attendance_records) AS registered,
                (SELECT COUNT(*) FROM tokens t
                 WHERE NOT EXISTS (SELECT 1 FROM attendance_records a WHERE a.token_id = t.id)) AS available,
                (SELECT COUNT(*) FROM attendance_records
                 WHERE time_in IS NOT NULL AND time_out IS NULL) AS timed_in,
                (SELECT COUNT(*) FROM attendance_records WHERE time_out IS NOT NULL) AS completed
            "#,
        )
        .fetch_one(pool)
        .await?;

        Ok(summary)
    }
}
