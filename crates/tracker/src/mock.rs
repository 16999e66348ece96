//! Deterministic stand-in for the external job provider.
//!
//! Jobs advance one scripted step per `fetch` call, with the final step
//! sticky, so tests and demos drive the exact same state machine the real
//! provider exposes without network calls or timing dependence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use reviva_core::{JobId, JobKind};

use crate::provider::{CreatedJob, JobPhase, JobProvider, JobSnapshot, ProviderError};

/// One scripted `fetch` outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockStep {
    /// Report a non-terminal phase.
    Phase(JobPhase),
    /// Fail this fetch with a transient provider error.
    Unavailable,
    /// Terminal success with a synthetic result reference.
    Succeed,
    /// Terminal failure with the given provider error text.
    Fail(String),
}

#[derive(Debug)]
struct ScriptedJob {
    kind: JobKind,
    steps: Vec<MockStep>,
    cursor: usize,
}

/// In-memory `JobProvider` with per-job scripts.
#[derive(Debug, Default)]
pub struct MockJobProvider {
    jobs: Mutex<HashMap<JobId, ScriptedJob>>,
    /// Script applied to the next created job, then cleared.
    next_script: Mutex<Option<Vec<MockStep>>>,
    created: Mutex<u32>,
    cancelled: Mutex<Vec<JobId>>,
}

impl MockJobProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn default_script() -> Vec<MockStep> {
        vec![
            MockStep::Phase(JobPhase::Starting),
            MockStep::Phase(JobPhase::Processing),
            MockStep::Phase(JobPhase::Processing),
            MockStep::Phase(JobPhase::Finalizing),
            MockStep::Succeed,
        ]
    }

    /// Script the next created job's fetch sequence.
    pub fn script_next(&self, steps: Vec<MockStep>) {
        *self.next_script.lock().unwrap() = Some(steps);
    }

    /// Script the next created job to fail with the given error text after
    /// a couple of processing polls.
    pub fn fail_next_with(&self, error_text: impl Into<String>) {
        self.script_next(vec![
            MockStep::Phase(JobPhase::Starting),
            MockStep::Phase(JobPhase::Processing),
            MockStep::Fail(error_text.into()),
        ]);
    }

    /// Script the next created job to never terminate.
    pub fn hang_next(&self) {
        self.script_next(vec![MockStep::Phase(JobPhase::Processing)]);
    }

    pub fn created_count(&self) -> u32 {
        *self.created.lock().unwrap()
    }

    pub fn was_cancelled(&self, job_id: &JobId) -> bool {
        self.cancelled.lock().unwrap().contains(job_id)
    }
}

#[async_trait]
impl JobProvider for MockJobProvider {
    async fn create(&self, kind: JobKind, _input_ref: &str) -> Result<CreatedJob, ProviderError> {
        let job_id = JobId::new(format!("mock-{}", Uuid::now_v7()));
        let steps = self
            .next_script
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(Self::default_script);

        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            ScriptedJob {
                kind,
                steps,
                cursor: 0,
            },
        );
        *self.created.lock().unwrap() += 1;

        Ok(CreatedJob {
            job_id,
            phase: JobPhase::Starting,
        })
    }

    async fn fetch(&self, job_id: &JobId) -> Result<JobSnapshot, ProviderError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ProviderError::Rejected(format!("unknown job {job_id}")))?;

        let step = job.steps[job.cursor.min(job.steps.len() - 1)].clone();
        if job.cursor + 1 < job.steps.len() {
            job.cursor += 1;
        }

        match step {
            MockStep::Phase(phase) => Ok(JobSnapshot {
                phase,
                result_ref: None,
                error_text: None,
            }),
            MockStep::Unavailable => Err(ProviderError::Unavailable("mock outage".to_string())),
            MockStep::Succeed => Ok(JobSnapshot {
                phase: JobPhase::Succeeded,
                result_ref: Some(format!("mock://result/{}/{job_id}", job.kind)),
                error_text: None,
            }),
            MockStep::Fail(text) => Ok(JobSnapshot {
                phase: JobPhase::Failed,
                result_ref: None,
                error_text: Some(text),
            }),
        }
    }

    async fn cancel(&self, job_id: &JobId) -> Result<(), ProviderError> {
        self.cancelled.lock().unwrap().push(job_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_script_walks_to_success() {
        let provider = MockJobProvider::new();
        let created = provider.create(JobKind::Photo, "input").await.unwrap();

        let mut phases = Vec::new();
        loop {
            let snap = provider.fetch(&created.job_id).await.unwrap();
            phases.push(snap.phase);
            if snap.phase.is_terminal() {
                assert!(snap.result_ref.is_some());
                break;
            }
        }

        assert_eq!(
            phases,
            vec![
                JobPhase::Starting,
                JobPhase::Processing,
                JobPhase::Processing,
                JobPhase::Finalizing,
                JobPhase::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn terminal_step_is_sticky() {
        let provider = MockJobProvider::new();
        provider.fail_next_with("flagged as sensitive (E005)");
        let created = provider.create(JobKind::Video, "input").await.unwrap();

        for _ in 0..3 {
            provider.fetch(&created.job_id).await.unwrap();
        }
        let first = provider.fetch(&created.job_id).await.unwrap();
        let second = provider.fetch(&created.job_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.phase, JobPhase::Failed);
        assert_eq!(first.error_text.as_deref(), Some("flagged as sensitive (E005)"));
    }

    #[tokio::test]
    async fn unknown_job_is_rejected() {
        let provider = MockJobProvider::new();
        let err = provider.fetch(&JobId::new("nope")).await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected(_)));
    }
}
