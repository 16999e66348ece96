//! Seam to the external generation service.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use reviva_core::{JobId, JobKind};

use crate::record::JobState;

/// Remote job phase as reported by the provider's status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Starting,
    Processing,
    Finalizing,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }

    /// Local record state corresponding to a non-terminal phase.
    pub fn as_state(&self) -> JobState {
        match self {
            JobPhase::Starting => JobState::Starting,
            JobPhase::Processing => JobState::Processing,
            JobPhase::Finalizing => JobState::Finalizing,
            JobPhase::Succeeded => JobState::Succeeded,
            JobPhase::Failed => JobState::Failed,
        }
    }
}

/// Result of creating a remote job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedJob {
    pub job_id: JobId,
    pub phase: JobPhase,
}

/// One status observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub phase: JobPhase,
    /// Present once the phase is `Succeeded`.
    pub result_ref: Option<String>,
    /// Free-text failure detail; the tracker classifies it, nothing else
    /// reads it.
    pub error_text: Option<String>,
}

/// Provider call failure.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// Network trouble or a 5xx; retried by the poll loop, not fatal.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The provider refused the request outright.
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// External job provider: create, poll, best-effort cancel.
#[async_trait]
pub trait JobProvider: Send + Sync {
    async fn create(&self, kind: JobKind, input_ref: &str) -> Result<CreatedJob, ProviderError>;

    async fn fetch(&self, job_id: &JobId) -> Result<JobSnapshot, ProviderError>;

    /// Best-effort; the remote job may complete anyway.
    async fn cancel(&self, job_id: &JobId) -> Result<(), ProviderError>;
}
