use std::sync::Arc;

use reviva_api::app::{build_app, AppState};
use reviva_api::config::ApiConfig;
use reviva_billing::InMemoryUsageLedger;
use reviva_core::SystemClock;
use reviva_reconciler::{Reconciler, RestSubscriberDirectory};

#[tokio::main]
async fn main() {
    reviva_observability::init();

    let config = ApiConfig::from_env();

    let clock = Arc::new(SystemClock);
    let directory = Arc::new(RestSubscriberDirectory::new(
        config.billing_api_url.clone(),
        config.billing_api_key.clone(),
    ));
    let ledger = Arc::new(InMemoryUsageLedger::new(clock.clone()));
    let reconciler = Arc::new(Reconciler::new(directory, ledger, clock));

    let app = build_app(AppState {
        reconciler,
        webhook_secret: config.webhook_secret.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {}: {e}", config.bind_addr));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app).await.unwrap();
}
