use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, AttendanceState, AttendeeInput, Token, TokenStatus, TransitionType,
};
use crate::store::{SharedStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum TransitionError {
    #[error("Token not found: {0}")]
    TokenNotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The transition a `process` call resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub kind: TransitionType,
    /// Whether this call performed the mutation, as opposed to observing one
    pub applied: bool,
    pub record: AttendanceRecord,
}

impl Transition {
    fn applied(kind: TransitionType, record: AttendanceRecord) -> Self {
        Self {
            kind,
            applied: true,
            record,
        }
    }

    fn observed(kind: TransitionType, record: AttendanceRecord) -> Self {
        Self {
            kind,
            applied: false,
            record,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub token: Token,
    /// `None` when the token is unregistered and no attendee details were given
    pub transition: Option<Transition>,
}

impl ProcessOutcome {
    pub fn state(&self) -> AttendanceState {
        AttendanceState::of(self.transition.as_ref().map(|t| &t.record))
    }
}

/// Decides and applies the next attendance transition for a token.
///
/// The engine reads the current record to decide which step is due, then
/// applies that step with the store's conditional primitive. A step whose
/// precondition no longer holds is a lost race: the engine re-reads and
/// reports the winner's result instead of writing.
#[derive(Clone)]
pub struct TransitionEngine {
    store: SharedStore,
}

impl TransitionEngine {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, attendee))]
    pub async fn process(
        &self,
        token_id: Uuid,
        attendee: Option<AttendeeInput>,
    ) -> Result<ProcessOutcome, TransitionError> {
        let token = self
            .store
            .find_token_by_id(token_id)
            .await?
            .ok_or_else(|| TransitionError::TokenNotFound(token_id.to_string()))?;

        self.advance(token, attendee).await
    }

    /// Same as [`process`](Self::process), addressing the token by its code
    #[tracing::instrument(skip(self, attendee))]
    pub async fn process_code(
        &self,
        code: &str,
        attendee: Option<AttendeeInput>,
    ) -> Result<ProcessOutcome, TransitionError> {
        let token = self
            .store
            .find_token_by_code(code)
            .await?
            .ok_or_else(|| TransitionError::TokenNotFound(code.to_string()))?;

        self.advance(token, attendee).await
    }

    async fn advance(
        &self,
        mut token: Token,
        attendee: Option<AttendeeInput>,
    ) -> Result<ProcessOutcome, TransitionError> {
        let current = self.store.find_record_by_token(token.id).await?;

        let transition = match (current, attendee) {
            (None, None) => {
                tracing::debug!(token_id = %token.id, "Token awaiting registration");
                None
            }
            (None, Some(input)) => self.register(token.id, input).await?,
            // Details sent before the first time-in are a repeated registration.
            // Once timed in, the details are ignored and the scan advances.
            (Some(record), Some(_)) if record.state() == AttendanceState::AwaitingTimeIn => {
                tracing::debug!(token_id = %token.id, "Token already registered, returning existing record");
                Some(Transition::observed(TransitionType::Registered, record))
            }
            (Some(record), _) => self.step(record).await?,
        };

        token.status = if transition.is_some() {
            TokenStatus::Registered
        } else {
            TokenStatus::Generated
        };

        Ok(ProcessOutcome { token, transition })
    }

    async fn register(
        &self,
        token_id: Uuid,
        input: AttendeeInput,
    ) -> Result<Option<Transition>, TransitionError> {
        let details = input.validate().map_err(|msg| {
            tracing::warn!(token_id = %token_id, reason = %msg, "Rejected registration");
            TransitionError::Validation(msg)
        })?;

        match self.store.register(token_id, &details).await {
            Ok(Some(record)) => {
                tracing::info!(token_id = %token_id, record_id = %record.id, "Token registered");
                Ok(Some(Transition::applied(TransitionType::Registered, record)))
            }
            Ok(None) => {
                tracing::debug!(token_id = %token_id, "Registration lost to a concurrent request");
                Ok(self
                    .store
                    .find_record_by_token(token_id)
                    .await?
                    .map(|record| Transition::observed(TransitionType::Registered, record)))
            }
            Err(StoreError::TokenMissing(id)) => Err(TransitionError::TokenNotFound(id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn step(&self, record: AttendanceRecord) -> Result<Option<Transition>, TransitionError> {
        let token_id = record.token_id;
        let now = Utc::now();

        let (kind, updated) = match record.state() {
            AttendanceState::AwaitingTimeIn => (
                TransitionType::TimeIn,
                self.store.set_time_in(token_id, now).await?,
            ),
            AttendanceState::AwaitingTimeOut => (
                TransitionType::TimeOut,
                self.store.set_time_out(token_id, now).await?,
            ),
            _ => {
                tracing::debug!(token_id = %token_id, "Attendance already complete");
                return Ok(Some(Transition::observed(TransitionType::Completed, record)));
            }
        };

        if let Some(updated) = updated {
            tracing::info!(token_id = %token_id, transition = ?kind, "Attendance transition applied");
            return Ok(Some(Transition::applied(kind, updated)));
        }

        tracing::debug!(token_id = %token_id, transition = ?kind, "Transition lost to a concurrent request");

        // Report the winner's record; a record deleted in the meantime leaves
        // the token unregistered.
        Ok(self
            .store
            .find_record_by_token(token_id)
            .await?
            .map(|latest| {
                if latest.state() == AttendanceState::Complete {
                    Transition::observed(TransitionType::Completed, latest)
                } else {
                    Transition::observed(kind, latest)
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::token_generator::{tests::ScriptedCodes, TokenGenerator};
    use crate::store::{AttendanceStore, MemoryStore};
    use std::sync::Arc;

    fn jane() -> AttendeeInput {
        AttendeeInput {
            full_name: Some("Jane Doe".to_string()),
            course: Some("BSIT".to_string()),
            ..Default::default()
        }
    }

    async fn setup(codes: &[&str]) -> (Arc<MemoryStore>, TransitionEngine, Vec<Token>) {
        let store = Arc::new(MemoryStore::new());
        let generator = TokenGenerator::new(store.clone(), Arc::new(ScriptedCodes::new(codes)), 3000);
        let tokens = generator.generate(codes.len() as i64, None).await.unwrap();
        let engine = TransitionEngine::new(store.clone());
        (store, engine, tokens)
    }

    fn kind_of(outcome: &ProcessOutcome) -> Option<TransitionType> {
        outcome.transition.as_ref().map(|t| t.kind)
    }

    #[tokio::test]
    async fn test_full_lifecycle_scenario() {
        let (_store, engine, _) = setup(&["AB12EF"]).await;

        let registered = engine.process_code("AB12EF", Some(jane())).await.unwrap();
        let transition = registered.transition.clone().unwrap();
        assert_eq!(transition.kind, TransitionType::Registered);
        assert!(transition.applied);
        assert_eq!(transition.record.time_in, None);
        assert_eq!(registered.token.status, TokenStatus::Registered);
        assert_eq!(registered.state(), AttendanceState::AwaitingTimeIn);

        let timed_in = engine.process_code("AB12EF", None).await.unwrap();
        assert_eq!(kind_of(&timed_in), Some(TransitionType::TimeIn));
        assert!(timed_in.transition.as_ref().unwrap().record.time_in.is_some());

        let timed_out = engine.process_code("AB12EF", None).await.unwrap();
        assert_eq!(kind_of(&timed_out), Some(TransitionType::TimeOut));
        let finished = timed_out.transition.unwrap().record;

        let again = engine.process_code("AB12EF", None).await.unwrap();
        let completed = again.transition.unwrap();
        assert_eq!(completed.kind, TransitionType::Completed);
        assert!(!completed.applied);
        assert_eq!(completed.record, finished);
    }

    #[tokio::test]
    async fn test_unregistered_scan_returns_token() {
        let (_store, engine, tokens) = setup(&["AB12EF"]).await;

        let outcome = engine.process(tokens[0].id, None).await.unwrap();

        assert!(outcome.transition.is_none());
        assert_eq!(outcome.token.code, "AB12EF");
        assert_eq!(outcome.token.status, TokenStatus::Generated);
        assert_eq!(outcome.state(), AttendanceState::Unregistered);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let (_store, engine, _) = setup(&["AB12EF"]).await;

        assert!(matches!(
            engine.process(Uuid::new_v4(), None).await,
            Err(TransitionError::TokenNotFound(_))
        ));
        assert!(matches!(
            engine.process_code("NOPE", Some(jane())).await,
            Err(TransitionError::TokenNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_requires_name_and_course() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;

        let input = AttendeeInput {
            full_name: Some("Jane Doe".to_string()),
            ..Default::default()
        };
        let result = engine.process(tokens[0].id, Some(input)).await;

        assert!(matches!(result, Err(TransitionError::Validation(msg)) if msg.contains("course")));
        assert!(store.find_record_by_token(tokens[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_repeat_registration_returns_existing_record() {
        let (_store, engine, tokens) = setup(&["AB12EF"]).await;
        let first = engine.process(tokens[0].id, Some(jane())).await.unwrap();

        let other = AttendeeInput {
            full_name: Some("John Roe".to_string()),
            course: Some("BSCE".to_string()),
            ..Default::default()
        };
        let second = engine.process(tokens[0].id, Some(other)).await.unwrap();
        let transition = second.transition.unwrap();

        assert_eq!(transition.kind, TransitionType::Registered);
        assert!(!transition.applied);
        assert_eq!(transition.record, first.transition.unwrap().record);
        assert_eq!(transition.record.time_in, None);
    }

    #[tokio::test]
    async fn test_completed_is_idempotent() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;
        engine.process(id, Some(jane())).await.unwrap();
        engine.process(id, None).await.unwrap();
        engine.process(id, None).await.unwrap();
        let done = store.find_record_by_token(id).await.unwrap().unwrap();

        for _ in 0..5 {
            let outcome = engine.process(id, None).await.unwrap();
            let transition = outcome.transition.unwrap();
            assert_eq!(transition.kind, TransitionType::Completed);
            assert_eq!(transition.record.time_in, done.time_in);
            assert_eq!(transition.record.time_out, done.time_out);
        }
    }

    #[tokio::test]
    async fn test_details_are_ignored_once_timed_in() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;
        engine.process(id, Some(jane())).await.unwrap();
        engine.process(id, None).await.unwrap();

        let timed_out = engine.process(id, Some(jane())).await.unwrap();
        assert_eq!(timed_out.state(), AttendanceState::Complete);
        let transition = timed_out.transition.unwrap();
        assert_eq!(transition.kind, TransitionType::TimeOut);
        assert!(transition.applied);

        let done = store.find_record_by_token(id).await.unwrap().unwrap();
        let again = engine.process(id, Some(jane())).await.unwrap();
        let transition = again.transition.unwrap();
        assert_eq!(transition.kind, TransitionType::Completed);
        assert!(!transition.applied);
        assert_eq!(transition.record.time_out, done.time_out);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_time_out_applies_once() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;
        engine.process(id, Some(jane())).await.unwrap();
        engine.process(id, None).await.unwrap();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.process(id, None).await })
            })
            .collect();

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap().unwrap());
        }

        let applied: Vec<&Transition> = outcomes
            .iter()
            .filter_map(|o| o.transition.as_ref())
            .filter(|t| t.applied)
            .collect();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].kind, TransitionType::TimeOut);

        let stored = store.find_record_by_token(id).await.unwrap().unwrap();
        for outcome in &outcomes {
            let transition = outcome.transition.as_ref().unwrap();
            if !transition.applied {
                assert_eq!(transition.kind, TransitionType::Completed);
            }
            assert_eq!(transition.record.time_out, stored.time_out);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_time_in_never_cascades_to_time_out() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;
        engine.process(id, Some(jane())).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.process(id, None).await })
            })
            .collect();

        let mut time_in_applied = 0;
        let mut time_out_applied = 0;
        for handle in handles {
            let transition = handle.await.unwrap().unwrap().transition.unwrap();
            if transition.applied {
                match transition.kind {
                    TransitionType::TimeIn => time_in_applied += 1,
                    TransitionType::TimeOut => time_out_applied += 1,
                    other => panic!("unexpected applied transition {:?}", other),
                }
            }
        }

        let stored = store.find_record_by_token(id).await.unwrap().unwrap();
        assert_eq!(time_in_applied, 1);
        // A late request may legitimately see the timed-in record and time out.
        assert!(time_out_applied <= 1);
        assert_eq!(stored.time_out.is_some(), time_out_applied == 1);
        if let (Some(time_in), Some(time_out)) = (stored.time_in, stored.time_out) {
            assert!(time_in <= time_out);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_creates_one_record() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let engine = engine.clone();
                let input = AttendeeInput {
                    full_name: Some(format!("Attendee {}", i)),
                    course: Some("BSIT".to_string()),
                    ..Default::default()
                };
                tokio::spawn(async move { engine.process(id, Some(input)).await })
            })
            .collect();

        let mut applied = 0;
        for handle in handles {
            let transition = handle.await.unwrap().unwrap().transition.unwrap();
            assert_eq!(transition.kind, TransitionType::Registered);
            if transition.applied {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(store.summary().await.unwrap().registered, 1);
    }

    #[tokio::test]
    async fn test_delete_then_reregister() {
        let (store, engine, tokens) = setup(&["AB12EF"]).await;
        let id = tokens[0].id;
        let first = engine.process(id, Some(jane())).await.unwrap();
        engine.process(id, None).await.unwrap();

        let record_id = first.transition.unwrap().record.id;
        store.delete_record(record_id).await.unwrap();

        let token = store.find_token_by_id(id).await.unwrap().unwrap();
        assert_eq!(token.status, TokenStatus::Generated);

        let again = engine.process_code("AB12EF", Some(jane())).await.unwrap();
        let transition = again.transition.unwrap();
        assert_eq!(transition.kind, TransitionType::Registered);
        assert!(transition.applied);
        assert_ne!(transition.record.id, record_id);
        assert_eq!(transition.record.time_in, None);
    }
}
