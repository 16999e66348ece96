//! `reviva-reconciler` — subscription lifecycle reconciliation.
//!
//! Inbound webhook events are triggers, not truth: every entitlement
//! decision re-fetches canonical subscriber state from the billing provider
//! and recomputes plan and cycle from it, which is what makes retried
//! deliveries and reordered events converge.

pub mod directory;
pub mod event;
pub mod handler;

pub use directory::{
    DirectoryError, Entitlement, RestSubscriberDirectory, StaticDirectory, SubscriberDirectory,
    SubscriberState,
};
pub use event::{EventType, SubscriptionEvent, WebhookEnvelope};
pub use handler::{plan_from_product, ReconcileError, ReconcileOutcome, Reconciler};
