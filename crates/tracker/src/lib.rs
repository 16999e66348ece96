//! `reviva-tracker` — client-resident generation job tracking.
//!
//! ## Design
//!
//! - At most one non-terminal job per (owner, kind); `start()` enforces it
//! - Quota is reserved before the provider is contacted, rolled back on
//!   every failed outcome
//! - Polling with a fixed-then-multiplicative back-off schedule
//! - The persisted record is a resumable cache; the remote provider stays
//!   the source of truth
//! - Cooperative cancellation via a watch channel, checked before each wait
//!
//! ## Components
//!
//! - `JobRecord`: persisted per-(owner, kind) job state
//! - `PollSchedule` / `KindPolicy`: back-off timing and per-kind ceilings
//! - `JobProvider`: seam to the external generation service
//! - `MockJobProvider`: deterministic stand-in for tests and demos
//! - `RecordStore`: local persistence (in-memory or JSON file)
//! - `GenerationTracker`: the service tying it all together

pub mod classify;
pub mod mock;
pub mod provider;
pub mod record;
pub mod schedule;
pub mod store;
pub mod tracker;

pub use classify::classify_error;
pub use mock::{MockJobProvider, MockStep};
pub use provider::{CreatedJob, JobPhase, JobProvider, JobSnapshot, ProviderError};
pub use record::{FailureReason, JobRecord, JobState};
pub use schedule::{KindPolicy, PollSchedule};
pub use store::{InMemoryRecordStore, JsonFileRecordStore, RecordStore, StoreError};
pub use tracker::{GenerationTracker, Progress, StartOutcome, TrackerConfig, TrackerError};
