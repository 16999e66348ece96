//! Canonical subscriber state, fetched from the billing provider.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use reviva_core::OwnerId;

/// Entitlement name granting generation access.
const PRO_ENTITLEMENT: &str = "pro";

/// One entitlement as reported by the billing provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Entitlement {
    pub expires_at: Option<DateTime<Utc>>,
    pub product_identifier: String,
    pub original_purchase_at: Option<DateTime<Utc>>,
}

/// Canonical subscriber record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberState {
    /// The provider's stable id; the event's subject may be an alias of it.
    pub original_app_user_id: Option<String>,
    pub entitlement: Option<Entitlement>,
}

impl SubscriberState {
    /// Active if an entitlement expiry exists and lies in the future.
    pub fn entitled_at(&self, now: DateTime<Utc>) -> bool {
        self.entitlement
            .as_ref()
            .and_then(|e| e.expires_at)
            .is_some_and(|expires| expires > now)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DirectoryError {
    #[error("subscriber fetch failed: {0}")]
    Fetch(String),
}

/// Lookup seam to the billing provider's subscriber API.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    async fn fetch(&self, subject: &OwnerId) -> Result<SubscriberState, DirectoryError>;
}

/// REST client against the billing provider's `GET /subscribers/{id}`.
pub struct RestSubscriberDirectory {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestSubscriberDirectory {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SubscriberResponse {
    subscriber: SubscriberPayload,
}

#[derive(Debug, Deserialize)]
struct SubscriberPayload {
    #[serde(default)]
    original_app_user_id: Option<String>,
    #[serde(default)]
    entitlements: HashMap<String, EntitlementPayload>,
}

#[derive(Debug, Deserialize)]
struct EntitlementPayload {
    #[serde(default)]
    expires_date: Option<DateTime<Utc>>,
    product_identifier: String,
    #[serde(default)]
    original_purchase_date: Option<DateTime<Utc>>,
}

#[async_trait]
impl SubscriberDirectory for RestSubscriberDirectory {
    async fn fetch(&self, subject: &OwnerId) -> Result<SubscriberState, DirectoryError> {
        let url = format!("{}/subscribers/{}", self.base_url.trim_end_matches('/'), subject);
        debug!(subject = %subject, "fetching canonical subscriber state");

        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?;

        let mut body: SubscriberResponse = response
            .json()
            .await
            .map_err(|e| DirectoryError::Fetch(e.to_string()))?;

        let entitlement = body
            .subscriber
            .entitlements
            .remove(PRO_ENTITLEMENT)
            .or_else(|| body.subscriber.entitlements.into_values().next())
            .map(|e| Entitlement {
                expires_at: e.expires_date,
                product_identifier: e.product_identifier,
                original_purchase_at: e.original_purchase_date,
            });

        Ok(SubscriberState {
            original_app_user_id: body.subscriber.original_app_user_id,
            entitlement,
        })
    }
}

/// Fixed-response directory for tests/dev. Unknown subjects resolve to an
/// empty (never-subscribed) state, mirroring the provider's behavior.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    subscribers: Mutex<HashMap<OwnerId, SubscriberState>>,
    unavailable: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, subject: impl Into<OwnerId>, state: SubscriberState) {
        self.subscribers.lock().unwrap().insert(subject.into(), state);
    }

    /// Make every fetch fail, to exercise the retry-on-500 path.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }
}

#[async_trait]
impl SubscriberDirectory for StaticDirectory {
    async fn fetch(&self, subject: &OwnerId) -> Result<SubscriberState, DirectoryError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(DirectoryError::Fetch("directory unavailable".to_string()));
        }
        Ok(self
            .subscribers
            .lock()
            .unwrap()
            .get(subject)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn entitlement_requires_future_expiry() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();

        let mut state = SubscriberState::default();
        assert!(!state.entitled_at(now));

        state.entitlement = Some(Entitlement {
            expires_at: None,
            product_identifier: "reviva_pro_monthly".to_string(),
            original_purchase_at: None,
        });
        assert!(!state.entitled_at(now));

        state.entitlement.as_mut().unwrap().expires_at =
            Some(now + chrono::Duration::days(12));
        assert!(state.entitled_at(now));

        state.entitlement.as_mut().unwrap().expires_at =
            Some(now - chrono::Duration::seconds(1));
        assert!(!state.entitled_at(now));
    }

    #[test]
    fn subscriber_payload_parses_provider_shape() {
        let raw = serde_json::json!({
            "subscriber": {
                "original_app_user_id": "user-main",
                "entitlements": {
                    "pro": {
                        "expires_date": "2025-07-01T00:00:00Z",
                        "product_identifier": "reviva_pro_weekly",
                        "original_purchase_date": "2025-06-01T09:30:00Z",
                    }
                }
            }
        });

        let parsed: SubscriberResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed.subscriber.original_app_user_id.as_deref(),
            Some("user-main")
        );
        let ent = parsed.subscriber.entitlements.get("pro").unwrap();
        assert_eq!(ent.product_identifier, "reviva_pro_weekly");
        assert!(ent.expires_date.is_some());
    }
}
