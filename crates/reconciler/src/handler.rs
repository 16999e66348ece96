//! The event reconciler: webhook event in, ledger state out.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use reviva_billing::{compute_cycle, PlanType, UsageLedger};
use reviva_core::{Clock, JobKind, OwnerId};

use crate::directory::{DirectoryError, SubscriberDirectory};
use crate::event::{EventType, SubscriptionEvent};

/// Successful reconciliation result, echoed back to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileOutcome {
    pub canonical_id: OwnerId,
    pub event_type: EventType,
}

/// Reconciliation failure. Surfaced as a 500 so the billing provider
/// redelivers the event; every ledger mutation is idempotent, so the retry
/// is safe.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("event carries no subject id")]
    MissingSubject,
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

/// Derive the plan tier from a store product identifier.
pub fn plan_from_product(product_id: &str) -> PlanType {
    if product_id.to_lowercase().contains("week") {
        PlanType::Weekly
    } else {
        PlanType::Monthly
    }
}

/// Stateless per-event handler. Holds no mutable state of its own; all
/// writes go through the ledger, each as one atomic upsert keyed by
/// recomputed provider truth.
pub struct Reconciler {
    directory: Arc<dyn SubscriberDirectory>,
    ledger: Arc<dyn UsageLedger>,
    clock: Arc<dyn Clock>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn SubscriberDirectory>,
        ledger: Arc<dyn UsageLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            ledger,
            clock,
        }
    }

    pub async fn handle(
        &self,
        event: &SubscriptionEvent,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        // Test pings are acknowledged without touching anything.
        if event.event_type == EventType::Test {
            let canonical_id = event
                .subject_id()
                .unwrap_or_else(|| OwnerId::new("test"));
            return Ok(ReconcileOutcome {
                canonical_id,
                event_type: EventType::Test,
            });
        }

        let subject = event.subject_id().ok_or(ReconcileError::MissingSubject)?;

        // The event is only a trigger; entitlement truth comes from a fresh
        // fetch. This happens before any ledger mutation, so a slow provider
        // never holds a ledger lock.
        let state = self.directory.fetch(&subject).await?;
        let canonical_id = state
            .original_app_user_id
            .clone()
            .map(OwnerId::new)
            .unwrap_or_else(|| subject.clone());

        let now = self.clock.now();

        if event.event_type.is_activation() {
            match state.entitlement.as_ref().filter(|_| state.entitled_at(now)) {
                Some(entitlement) => {
                    let plan = plan_from_product(&entitlement.product_identifier);
                    let anchor = entitlement.original_purchase_at.unwrap_or(now);
                    let window = compute_cycle(anchor, plan, now);
                    self.ledger.upsert_plan(&canonical_id, plan, anchor, window);
                    info!(
                        canonical = %canonical_id,
                        plan = %plan,
                        event = event.event_type.as_str(),
                        "entitlement reconciled"
                    );
                }
                None => {
                    // Activation event but no live entitlement on fetch
                    // (already lapsed, refunded, or out-of-order delivery).
                    warn!(
                        canonical = %canonical_id,
                        event = event.event_type.as_str(),
                        "activation event without live entitlement"
                    );
                    self.ledger.deactivate(&canonical_id);
                }
            }
        } else if event.event_type.is_deactivation() {
            self.ledger.deactivate(&canonical_id);
        } else if event.event_type == EventType::Transfer {
            for alias in event.transferred_from.iter().flatten() {
                let alias = OwnerId::new(alias.as_str());
                for kind in JobKind::ALL {
                    self.ledger.merge_into(&canonical_id, &alias, kind);
                }
            }
            info!(canonical = %canonical_id, "transfer reconciled");
        }

        Ok(ReconcileOutcome {
            canonical_id,
            event_type: event.event_type,
        })
    }
}
