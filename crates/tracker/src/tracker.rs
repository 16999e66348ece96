//! Generation job tracker: submission, polling, resume, cancel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use reviva_billing::{DenialReason, Reservation, UsageLedger};
use reviva_core::{Clock, JobKind, OwnerId};

use crate::classify::classify_error;
use crate::provider::{JobPhase, JobProvider, ProviderError};
use crate::record::{FailureReason, JobRecord, JobState};
use crate::schedule::{KindPolicy, PollSchedule};
use crate::store::{RecordStore, StoreError};

/// Tracker configuration: shared back-off schedule plus per-kind limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub schedule: PollSchedule,
    pub photo: KindPolicy,
    pub video: KindPolicy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            schedule: PollSchedule::default(),
            photo: KindPolicy::default_for(JobKind::Photo),
            video: KindPolicy::default_for(JobKind::Video),
        }
    }
}

impl TrackerConfig {
    pub fn policy(&self, kind: JobKind) -> KindPolicy {
        match kind {
            JobKind::Photo => self.photo,
            JobKind::Video => self.video,
        }
    }
}

/// Outcome of `start()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new remote job was created and is being tracked.
    Started(JobRecord),
    /// A non-terminal job already existed for this (owner, kind); no new
    /// remote job was created and no quota was charged.
    AlreadyRunning(JobRecord),
}

impl StartOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            StartOutcome::Started(r) | StartOutcome::AlreadyRunning(r) => r,
        }
    }
}

/// Tracker error taxonomy surfaced to the UI layer. Transient provider
/// errors are retried inside the poll loop and never appear here.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Pre-flight denial; no provider call was made, nothing to roll back.
    #[error("{kind} quota exhausted")]
    QuotaExceeded { kind: JobKind },
    #[error("provider unavailable: {0}")]
    Provider(String),
    #[error("no active {kind} job")]
    NoActiveJob { kind: JobKind },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Derived, non-authoritative view for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub is_generating: bool,
    pub state: Option<JobState>,
    pub elapsed_seconds: i64,
    pub phase_label: &'static str,
    pub percent: u8,
}

impl Progress {
    fn idle() -> Self {
        Self {
            is_generating: false,
            state: None,
            elapsed_seconds: 0,
            phase_label: "Idle",
            percent: 0,
        }
    }
}

type SlotKey = (OwnerId, JobKind);

struct ActiveLoop {
    generation: u64,
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Slot {
    /// Serializes `start()` per (owner, kind) so a second submission always
    /// observes the first one's persisted record.
    gate: Arc<AsyncMutex<()>>,
    active: Option<ActiveLoop>,
}

/// Client-resident job tracker.
///
/// Local state is a resumable cache; the remote provider is the source of
/// truth. One unit of quota is reserved per accepted job and rolled back on
/// every outcome that produces no result.
pub struct GenerationTracker {
    ledger: Arc<dyn UsageLedger>,
    provider: Arc<dyn JobProvider>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    config: TrackerConfig,
    slots: Arc<Mutex<HashMap<SlotKey, Slot>>>,
    generations: AtomicU64,
}

impl GenerationTracker {
    pub fn new(
        ledger: Arc<dyn UsageLedger>,
        provider: Arc<dyn JobProvider>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_config(ledger, provider, store, clock, TrackerConfig::default())
    }

    pub fn with_config(
        ledger: Arc<dyn UsageLedger>,
        provider: Arc<dyn JobProvider>,
        store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            ledger,
            provider,
            store,
            clock,
            config,
            slots: Arc::new(Mutex::new(HashMap::new())),
            generations: AtomicU64::new(0),
        }
    }

    /// Submit a generation job.
    ///
    /// Order matters: the per-key gate closes the double-submit race, the
    /// quota reservation happens before any provider contact, and a create
    /// failure rolls the reservation back.
    pub async fn start(
        &self,
        owner: &OwnerId,
        kind: JobKind,
        input_ref: &str,
    ) -> Result<StartOutcome, TrackerError> {
        let gate = self.gate_for(&(owner.clone(), kind));
        let _guard = gate.lock().await;

        if let Some(existing) = self.store.load(owner, kind)? {
            if !existing.is_terminal() {
                debug!(owner = %owner, kind = %kind, job_id = %existing.job_id, "returning in-flight job");
                return Ok(StartOutcome::AlreadyRunning(existing));
            }
        }

        match self.ledger.reserve(owner, kind) {
            Reservation::Denied(DenialReason::QuotaExceeded) => {
                return Err(TrackerError::QuotaExceeded { kind });
            }
            Reservation::Allowed => {}
        }

        let created = match self.provider.create(kind, input_ref).await {
            Ok(created) => created,
            Err(e) => {
                self.ledger.rollback(owner, kind);
                return Err(TrackerError::Provider(e.to_string()));
            }
        };

        let now = self.clock.now();
        let mut record = JobRecord::new(created.job_id, kind, owner.clone(), input_ref, now);
        if !created.phase.is_terminal() {
            record.state = created.phase.as_state();
        }
        self.store.save(&record)?;
        info!(owner = %owner, kind = %kind, job_id = %record.job_id, "job started");

        self.spawn_poll_loop(record.clone(), 0);
        Ok(StartOutcome::Started(record))
    }

    /// Re-enter tracking for persisted non-terminal records after a process
    /// restart, at the back-off stage matching the elapsed time.
    pub fn resume(&self) -> Result<Vec<JobRecord>, TrackerError> {
        let mut resumed = Vec::new();

        for mut record in self.store.all()? {
            if record.is_terminal() {
                continue;
            }
            let key = (record.owner_id.clone(), record.kind);
            {
                let slots = self.slots.lock().unwrap();
                if slots.get(&key).is_some_and(|s| s.active.is_some()) {
                    continue;
                }
            }

            let now = self.clock.now();
            let elapsed = (now - record.created_at).to_std().unwrap_or_default();
            let policy = self.config.policy(record.kind);

            if elapsed > policy.ceiling {
                record.mark_expired(now);
                self.ledger.rollback(&record.owner_id, record.kind);
                self.store.save(&record)?;
                warn!(job_id = %record.job_id, "stale job expired on resume");
                resumed.push(record);
                continue;
            }

            let stage = self.config.schedule.stage_for_elapsed(elapsed);
            info!(job_id = %record.job_id, stage, "resuming job tracking");
            self.spawn_poll_loop(record.clone(), stage);
            resumed.push(record);
        }

        Ok(resumed)
    }

    /// Cancel the in-flight job for (owner, kind).
    ///
    /// The remote cancel is best-effort; locally the job always settles as
    /// `Failed`/`Cancelled` with the reservation rolled back, since user
    /// intent is "stop and don't charge".
    pub async fn cancel(&self, owner: &OwnerId, kind: JobKind) -> Result<JobRecord, TrackerError> {
        let active = {
            let mut slots = self.slots.lock().unwrap();
            slots
                .get_mut(&(owner.clone(), kind))
                .and_then(|s| s.active.take())
        };

        let Some(record) = self.store.load(owner, kind)? else {
            return Err(TrackerError::NoActiveJob { kind });
        };
        if record.is_terminal() && active.is_none() {
            return Err(TrackerError::NoActiveJob { kind });
        }

        if let Err(e) = self.provider.cancel(&record.job_id).await {
            debug!(job_id = %record.job_id, error = %e, "remote cancel failed; ignoring");
        }

        match active {
            Some(active) => {
                let _ = active.cancel.send(true);
                let _ = active.handle.await;
            }
            None => {
                // No loop running (killed before resume); settle directly.
                let mut record = record;
                record.mark_failed(FailureReason::Cancelled, self.clock.now());
                self.ledger.rollback(owner, kind);
                self.store.save(&record)?;
            }
        }

        self.store
            .load(owner, kind)?
            .ok_or(TrackerError::NoActiveJob { kind })
    }

    /// Clear a terminal record once the UI has shown it. Returns whether
    /// anything was cleared.
    pub fn acknowledge(&self, owner: &OwnerId, kind: JobKind) -> Result<bool, TrackerError> {
        match self.store.load(owner, kind)? {
            Some(record) if record.is_terminal() => {
                self.store.clear(owner, kind)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// UI-facing read model derived from the persisted record.
    pub fn progress(&self, owner: &OwnerId, kind: JobKind) -> Result<Progress, TrackerError> {
        let Some(record) = self.store.load(owner, kind)? else {
            return Ok(Progress::idle());
        };

        let elapsed = (self.clock.now() - record.created_at).num_seconds().max(0);
        let ceiling_secs = self.config.policy(kind).ceiling.as_secs().max(1) as i64;

        let percent = match record.state {
            JobState::Starting => 5,
            JobState::Processing => {
                let share = (elapsed * 100 / ceiling_secs).min(100) as u32;
                (10 + share * 75 / 100) as u8
            }
            JobState::Finalizing => 90,
            JobState::Succeeded | JobState::Failed | JobState::Expired => 100,
        };

        Ok(Progress {
            is_generating: !record.is_terminal(),
            state: Some(record.state),
            elapsed_seconds: elapsed,
            phase_label: phase_label(record.state),
            percent,
        })
    }

    fn gate_for(&self, key: &SlotKey) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap();
        slots.entry(key.clone()).or_default().gate.clone()
    }

    fn spawn_poll_loop(&self, record: JobRecord, start_attempt: u32) {
        let key = (record.owner_id.clone(), record.kind);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let ctx = LoopCtx {
            ledger: self.ledger.clone(),
            provider: self.provider.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            schedule: self.config.schedule,
            policy: self.config.policy(record.kind),
            slots: self.slots.clone(),
            key: key.clone(),
            generation,
        };
        let handle = tokio::spawn(poll_loop(ctx, record, start_attempt, cancel_rx));

        let mut slots = self.slots.lock().unwrap();
        slots.entry(key).or_default().active = Some(ActiveLoop {
            generation,
            cancel: cancel_tx,
            handle,
        });
    }
}

fn phase_label(state: JobState) -> &'static str {
    match state {
        JobState::Starting => "Queued",
        JobState::Processing => "Generating",
        JobState::Finalizing => "Finishing up",
        JobState::Succeeded => "Ready",
        JobState::Failed => "Failed",
        JobState::Expired => "Expired",
    }
}

struct LoopCtx {
    ledger: Arc<dyn UsageLedger>,
    provider: Arc<dyn JobProvider>,
    store: Arc<dyn RecordStore>,
    clock: Arc<dyn Clock>,
    schedule: PollSchedule,
    policy: KindPolicy,
    slots: Arc<Mutex<HashMap<SlotKey, Slot>>>,
    key: SlotKey,
    generation: u64,
}

async fn poll_loop(
    ctx: LoopCtx,
    mut record: JobRecord,
    start_attempt: u32,
    mut cancel: watch::Receiver<bool>,
) {
    let mut attempt = start_attempt;

    loop {
        attempt += 1;
        let delay = ctx.schedule.delay_for_attempt(attempt);
        tokio::select! {
            biased;
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Cancel handle gone (tracker dropped); keep polling on
                    // the schedule, nothing can signal us anymore.
                    tokio::time::sleep(delay).await;
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
        if *cancel.borrow() {
            settle_cancelled(&ctx, &mut record);
            break;
        }

        let now = ctx.clock.now();
        let elapsed = (now - record.created_at).to_std().unwrap_or_default();
        if elapsed > ctx.policy.ceiling {
            record.poll_attempts = attempt;
            record.mark_expired(now);
            ctx.ledger.rollback(&record.owner_id, record.kind);
            persist(&ctx, &record);
            warn!(job_id = %record.job_id, "job exceeded non-terminal ceiling; expired");
            break;
        }

        match ctx.provider.fetch(&record.job_id).await {
            Err(ProviderError::Unavailable(e)) => {
                debug!(job_id = %record.job_id, error = %e, "status fetch failed; retrying");
                record.poll_attempts = attempt;
                record.last_polled_at = Some(now);
                persist(&ctx, &record);
            }
            Err(ProviderError::Rejected(e)) => {
                record.poll_attempts = attempt;
                record.mark_failed(classify_error(&e), now);
                ctx.ledger.rollback(&record.owner_id, record.kind);
                persist(&ctx, &record);
                warn!(job_id = %record.job_id, error = %e, "provider rejected status fetch");
                break;
            }
            Ok(snapshot) => {
                // Cancellation racing the in-flight fetch: cancel wins.
                if *cancel.borrow() {
                    settle_cancelled(&ctx, &mut record);
                    break;
                }

                record.poll_attempts = attempt;
                match snapshot.phase {
                    JobPhase::Succeeded => {
                        // Reservation stands; success is the one outcome
                        // that keeps the charge.
                        record.mark_succeeded(snapshot.result_ref.unwrap_or_default(), now);
                        persist(&ctx, &record);
                        info!(job_id = %record.job_id, attempts = attempt, "job succeeded");
                        break;
                    }
                    JobPhase::Failed => {
                        let reason = snapshot
                            .error_text
                            .as_deref()
                            .map(classify_error)
                            .unwrap_or_else(|| {
                                FailureReason::Provider("unspecified provider failure".to_string())
                            });
                        record.mark_failed(reason, now);
                        ctx.ledger.rollback(&record.owner_id, record.kind);
                        persist(&ctx, &record);
                        info!(job_id = %record.job_id, failure = ?record.failure, "job failed");
                        break;
                    }
                    phase => {
                        record.mark_phase(phase.as_state(), now);
                        persist(&ctx, &record);
                    }
                }
            }
        }

        if attempt >= ctx.policy.max_attempts {
            // Local tracking limit, not a remote cancellation; the remote
            // job may still complete. Roll back rather than risk a silent
            // charge for a result the user never sees.
            record.mark_failed(FailureReason::Timeout, ctx.clock.now());
            ctx.ledger.rollback(&record.owner_id, record.kind);
            persist(&ctx, &record);
            warn!(job_id = %record.job_id, attempts = attempt, "polling attempt cap reached");
            break;
        }
    }

    // Deregister, unless a newer loop already took the slot.
    let mut slots = ctx.slots.lock().unwrap();
    if let Some(slot) = slots.get_mut(&ctx.key) {
        if slot
            .active
            .as_ref()
            .is_some_and(|a| a.generation == ctx.generation)
        {
            slot.active = None;
        }
    }
}

fn settle_cancelled(ctx: &LoopCtx, record: &mut JobRecord) {
    record.mark_failed(FailureReason::Cancelled, ctx.clock.now());
    ctx.ledger.rollback(&record.owner_id, record.kind);
    persist(ctx, record);
    info!(job_id = %record.job_id, "job cancelled locally");
}

fn persist(ctx: &LoopCtx, record: &JobRecord) {
    if let Err(e) = ctx.store.save(record) {
        warn!(job_id = %record.job_id, error = %e, "failed to persist job record");
    }
}
