//! Environment-driven API configuration.

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: String,
    /// Shared secret the billing provider sends as a bearer token. When
    /// unset, webhook authentication is disabled (dev only).
    pub webhook_secret: Option<String>,
    pub billing_api_url: String,
    pub billing_api_key: String,
}

impl ApiConfig {
    pub fn from_env() -> Self {
        let webhook_secret = std::env::var("WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty());
        if webhook_secret.is_none() {
            tracing::warn!("WEBHOOK_SECRET not set; webhook authentication disabled");
        }

        let billing_api_url = std::env::var("BILLING_API_URL")
            .unwrap_or_else(|_| "https://billing.invalid/v1".to_string());
        let billing_api_key = std::env::var("BILLING_API_KEY").unwrap_or_else(|_| {
            tracing::warn!("BILLING_API_KEY not set; using insecure dev default");
            "dev-key".to_string()
        });

        let bind_addr =
            std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        Self {
            bind_addr,
            webhook_secret,
            billing_api_url,
            billing_api_key,
        }
    }
}
