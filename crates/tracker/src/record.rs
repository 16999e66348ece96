//! Persisted job record and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use reviva_core::{JobId, JobKind, OwnerId};

/// Job lifecycle state.
///
/// `Starting` is initial; `Succeeded`, `Failed` and `Expired` are terminal.
/// Transitions are driven only by the poll loop or an explicit cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Starting,
    Processing,
    Finalizing,
    Succeeded,
    Failed,
    Expired,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Expired
        )
    }
}

/// Why a job ended without a result. Distinct variants drive distinct
/// user-facing messaging; all of them mean the reservation was rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The provider rejected the input on content-policy grounds.
    ContentPolicy,
    /// The local polling ceiling was exceeded; the remote job's fate is
    /// unknown.
    Timeout,
    /// The user cancelled.
    Cancelled,
    /// Any other provider-reported failure, with the provider's text.
    Provider(String),
}

/// One in-flight or terminal generation attempt, persisted per
/// (owner, kind) so tracking survives an app restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub kind: JobKind,
    pub owner_id: OwnerId,
    /// Opaque reference to the source image (local URI or remote handle).
    pub input_ref: String,
    pub created_at: DateTime<Utc>,
    pub state: JobState,
    /// Set only on `Succeeded`.
    pub result_ref: Option<String>,
    /// Set only on `Failed`.
    pub failure: Option<FailureReason>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub poll_attempts: u32,
}

impl JobRecord {
    pub fn new(
        job_id: JobId,
        kind: JobKind,
        owner_id: OwnerId,
        input_ref: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_id,
            kind,
            owner_id,
            input_ref: input_ref.into(),
            created_at,
            state: JobState::Starting,
            result_ref: None,
            failure: None,
            last_polled_at: None,
            poll_attempts: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Record a non-terminal phase observation from the provider.
    pub fn mark_phase(&mut self, state: JobState, at: DateTime<Utc>) {
        debug_assert!(!state.is_terminal());
        self.state = state;
        self.last_polled_at = Some(at);
    }

    pub fn mark_succeeded(&mut self, result_ref: impl Into<String>, at: DateTime<Utc>) {
        self.state = JobState::Succeeded;
        self.result_ref = Some(result_ref.into());
        self.last_polled_at = Some(at);
    }

    pub fn mark_failed(&mut self, reason: FailureReason, at: DateTime<Utc>) {
        self.state = JobState::Failed;
        self.failure = Some(reason);
        self.last_polled_at = Some(at);
    }

    pub fn mark_expired(&mut self, at: DateTime<Utc>) {
        self.state = JobState::Expired;
        self.last_polled_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::new("job-1"),
            JobKind::Video,
            OwnerId::new("user-1"),
            "file:///photo.jpg",
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[test]
    fn lifecycle_to_success() {
        let mut rec = record();
        assert_eq!(rec.state, JobState::Starting);
        assert!(!rec.is_terminal());

        let at = rec.created_at + chrono::Duration::seconds(5);
        rec.mark_phase(JobState::Processing, at);
        rec.mark_phase(JobState::Finalizing, at);
        rec.mark_succeeded("remote://result/42", at);

        assert!(rec.is_terminal());
        assert_eq!(rec.result_ref.as_deref(), Some("remote://result/42"));
        assert!(rec.failure.is_none());
    }

    #[test]
    fn failure_carries_reason() {
        let mut rec = record();
        rec.mark_failed(FailureReason::ContentPolicy, rec.created_at);
        assert!(rec.is_terminal());
        assert_eq!(rec.failure, Some(FailureReason::ContentPolicy));
        assert!(rec.result_ref.is_none());
    }

    #[test]
    fn record_round_trips_through_json() {
        let mut rec = record();
        rec.mark_failed(FailureReason::Provider("boom".to_string()), rec.created_at);

        let json = serde_json::to_string(&rec).unwrap();
        let back: JobRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
