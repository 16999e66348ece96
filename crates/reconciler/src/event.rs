//! Inbound subscription lifecycle events.
//!
//! Shapes follow the billing provider's webhook payloads. Events are
//! consumed once and folded into the usage ledger; they are never persisted.

use serde::{Deserialize, Serialize};

use reviva_core::OwnerId;

/// Webhook body: a versioned envelope around one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub api_version: Option<String>,
    pub event: SubscriptionEvent,
}

/// Subscription lifecycle event type, in the provider's naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "INITIAL_PURCHASE")]
    InitialPurchase,
    #[serde(rename = "RENEWAL")]
    Renewal,
    #[serde(rename = "PRODUCT_CHANGE")]
    ProductChange,
    #[serde(rename = "UNCANCELLATION")]
    Uncancellation,
    #[serde(rename = "EXPIRATION")]
    Expiration,
    #[serde(rename = "CANCELLATION")]
    Cancellation,
    #[serde(rename = "BILLING_ISSUE")]
    BillingIssue,
    #[serde(rename = "TRANSFER")]
    Transfer,
    #[serde(rename = "TEST")]
    Test,
}

impl EventType {
    /// Events that (re)affirm an entitlement and warrant a plan recompute.
    pub fn is_activation(&self) -> bool {
        matches!(
            self,
            EventType::InitialPurchase
                | EventType::Renewal
                | EventType::ProductChange
                | EventType::Uncancellation
        )
    }

    /// Events that end or interrupt an entitlement.
    pub fn is_deactivation(&self) -> bool {
        matches!(
            self,
            EventType::Expiration | EventType::Cancellation | EventType::BillingIssue
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::InitialPurchase => "INITIAL_PURCHASE",
            EventType::Renewal => "RENEWAL",
            EventType::ProductChange => "PRODUCT_CHANGE",
            EventType::Uncancellation => "UNCANCELLATION",
            EventType::Expiration => "EXPIRATION",
            EventType::Cancellation => "CANCELLATION",
            EventType::BillingIssue => "BILLING_ISSUE",
            EventType::Transfer => "TRANSFER",
            EventType::Test => "TEST",
        }
    }
}

/// One lifecycle notification. Embedded fields are used only to locate the
/// subscriber and drive transfers; entitlement decisions come from a fresh
/// provider fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default)]
    pub app_user_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub transferred_from: Option<Vec<String>>,
    #[serde(default)]
    pub transferred_to: Option<Vec<String>>,
    #[serde(default)]
    pub purchased_at_ms: Option<i64>,
    #[serde(default)]
    pub expiration_at_ms: Option<i64>,
    #[serde(default)]
    pub event_timestamp_ms: Option<i64>,
    #[serde(default)]
    pub price: Option<f64>,
}

impl SubscriptionEvent {
    /// The id the provider keyed this event by. Transfer events may carry it
    /// only in the transferred-to list.
    pub fn subject_id(&self) -> Option<OwnerId> {
        self.app_user_id
            .as_deref()
            .or_else(|| {
                self.transferred_to
                    .as_ref()
                    .and_then(|ids| ids.first())
                    .map(String::as_str)
            })
            .map(OwnerId::new)
    }
}
