//! Router control plane entrypoint.
//!
//! Endpoints (see `handlers::routes` for the full surface):
//! - `POST /quote` – quote a model request against currently active nodes
//! - `POST /infer` / `POST /infer/stream` – execute inference, gated by payment if configured
//! - `POST /payment-receipt` – settle a payment challenge
//! - `POST /federation/*` – inter-router capability, payment, and auction control messages
//!
//! This server includes:
//! - structured tracing via `TraceLayer`
//! - CORS support for cross-origin clients
//! - crash-recoverable state via a debounced JSON snapshot

use std::process;

use fedinfer_router::run::run;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "router exited with error");
        process::exit(70);
    }
}
