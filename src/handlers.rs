//! The public HTTP surface (C10, §4.10, §6).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream;
use router_types::envelope::{content_hash_hex, Envelope};
use router_types::federation_proto::{
    CapabilityProfile, ControlMessageType, JobBid, PeerRouter, RequestForBid, RouterControlMessage,
};
use router_types::inference::{InferenceRequest, InferenceResponse, InferenceStreamChunk, MeteringRecord};
use router_types::payment::{build_splits, PaymentReceipt, PaymentRequest};
use router_types::quote::{QuoteRequest, QuoteResponse, QuotedPrice};
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::RouterError;
use crate::federation::{auction, relay, FederationError};
use crate::ln_adapter::LightningAdapter;
use crate::offload;
use crate::payment_engine::PaymentState;
use crate::runner::Runner;
use crate::scheduler::{self, RequestShape};
use crate::state::{mean_node_load, AppState};

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/status", get(get_status))
        .route("/nodes", get(get_nodes))
        .route("/metrics", get(get_metrics))
        .route("/quote", post(post_quote))
        .route("/infer", post(post_infer))
        .route("/infer/stream", post(post_infer_stream))
        .route("/payment-receipt", post(post_payment_receipt))
        .route("/federation/caps", post(post_federation_caps))
        .route("/federation/payment-request", post(post_federation_payment_request))
        .route("/federation/payment-receipt", post(post_federation_payment_receipt))
        .with_state(state)
}

#[instrument(skip_all)]
async fn get_health() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

#[instrument(skip_all)]
async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.now_ms();
    Json(json!({
        "ok": true,
        "uptimeMs": now - state.started_at_ms,
        "mode": if state.config.router_require_payment { "paid" } else { "open" },
        "config": {
            "routerId": state.config.router_id,
            "offloadThreshold": state.config.router_offload_threshold,
            "replayWindowMs": state.config.router_replay_window_ms,
        }
    }))
}

#[instrument(skip_all)]
async fn get_nodes(State(state): State<AppState>) -> impl IntoResponse {
    let now = state.now_ms();
    let nodes = state.registry.all_nodes();
    let active = state.registry.active_nodes(now);
    Json(json!({ "nodes": nodes, "active": active }))
}

#[instrument(skip_all)]
async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

/// Verifies a raw envelope's signature off the async runtime via the worker pool (C12),
/// then deserializes the payload into `T` once verification has passed.
async fn verify_and_decode<T: serde::de::DeserializeOwned + Send + 'static>(
    state: &AppState,
    raw: Value,
) -> Result<Envelope<T>, RouterError> {
    let envelope: Envelope<Value> = serde_json::from_value(raw)
        .map_err(|e| RouterError::EnvelopeMalformed(e.to_string()))?;
    let verified = {
        let envelope = envelope.clone();
        state.worker_pool.submit(move || envelope.verify()).await
    };
    if !verified {
        return Err(RouterError::EnvelopeSignatureInvalid);
    }
    state
        .replay_store
        .check(&envelope.nonce, envelope.ts, state.now_ms(), state.config.router_replay_window_ms)
        .map_err(RouterError::Replay)?;
    let payload: T = serde_json::from_value(envelope.payload)
        .map_err(|e| RouterError::EnvelopeMalformed(e.to_string()))?;
    Ok(Envelope {
        payload,
        nonce: envelope.nonce,
        ts: envelope.ts,
        key_id: envelope.key_id,
        sig: envelope.sig,
    })
}

fn sign<T: serde::Serialize>(state: &AppState, payload: T, nonce: &str, ts: i64) -> Envelope<T> {
    Envelope::sign(payload, nonce, ts, &state.signing_identity).expect("signing a fresh payload cannot fail")
}

fn fresh_nonce() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

#[instrument(skip_all)]
async fn post_quote(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_quote(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_quote(state: AppState, raw: Value) -> Result<Response, RouterError> {
    let envelope = verify_and_decode::<QuoteRequest>(&state, raw).await?;
    let request = &envelope.payload;
    let now = state.now_ms();
    let nodes = state.registry.active_nodes(now);
    let shape = RequestShape {
        model_id: &request.model_id,
        input_tokens: request.input_tokens_estimate,
        output_tokens: request.output_tokens_estimate,
        constraints: request.constraints.as_ref(),
    };
    let (node, price) = scheduler::select(&nodes, &shape, scheduler::DEFAULT_WEIGHTS)
        .map_err(RouterError::Scheduler)?;
    let capability = node
        .capability_for(&request.model_id)
        .expect("scheduler only selects nodes supporting the requested model");
    let response = QuoteResponse {
        request_id: request.request_id.clone(),
        node_id: node.node_id.clone(),
        price: QuotedPrice {
            total: price,
            currency: capability.pricing.currency.clone(),
        },
        latency_estimate_ms: capability.latency_estimate_ms,
    };
    let quote = sign(&state, response, &fresh_nonce(), now);
    Ok((StatusCode::OK, Json(json!({ "quote": quote }))).into_response())
}

#[instrument(skip_all)]
async fn post_infer(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_infer(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Attempts to offload this request to a peer router under backpressure (§4.8): direct
/// peer selection by price/load first, falling back to an RFB/BID/AWARD auction. Holds an
/// `offloadSlots` permit for the duration of the attempt, so at most `maxOffloads` of these
/// run concurrently; beyond that the caller sees `router-saturated` immediately rather than
/// queuing behind an already-busy mesh.
async fn attempt_offload(
    state: &AppState,
    raw: &Value,
    job_type: &str,
    job_id: &str,
    now: i64,
) -> Result<Response, RouterError> {
    let _permit = state
        .offload_slots
        .clone()
        .try_acquire_owned()
        .map_err(|_| RouterError::RouterSaturated)?;
    state.metrics.federation_attempts_total.inc();

    let peers = state.peers.eligible_peers(now);
    if let Some(peer) = offload::pick_direct_peer(&peers, job_type, |_| offload_jitter()) {
        if let Some(response) = forward_to_peer(state, &peer.router_id, &peer.endpoint, raw).await {
            return Ok(response);
        }
    }

    run_auction(state, &peers, job_type, job_id, raw, now).await
}

fn offload_jitter() -> f64 {
    use rand::Rng;
    rand::rng().random_range(0.0..0.01)
}

/// Posts `raw` to a peer's `/infer` and passes its response back unchanged, so the mesh
/// stays transparent from the client's point of view (§4.8). `None` on any transport
/// failure; the caller decides what that means (try the next peer, or give up).
async fn forward_to_peer(state: &AppState, router_id: &str, endpoint: &str, raw: &Value) -> Option<Response> {
    match state.peer_client.forward_infer(endpoint, raw).await {
        Ok((status, body)) => {
            state.metrics.federation_success_total.inc();
            let code = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            Some((code, Json(body)).into_response())
        }
        Err(e) => {
            tracing::debug!(router_id, endpoint, error = %e, "peer forward failed");
            state.peers.record_failure(router_id);
            None
        }
    }
}

/// Runs one RFB → BID → AWARD round for a job this router can't place on a direct peer
/// (§4.7). Collects bids for `auctionTimeoutMs`, awards the cheapest (cost-adjusted) one,
/// and forwards the request to the winner.
async fn run_auction(
    state: &AppState,
    peers: &[PeerRouter],
    job_type: &str,
    job_id: &str,
    raw: &Value,
    now: i64,
) -> Result<Response, RouterError> {
    let job_bytes = serde_json::to_vec(raw).map_err(|e| RouterError::Internal(e.to_string()))?;
    let rfb = RequestForBid {
        job_id: job_id.to_string(),
        job_hash: content_hash_hex(&job_bytes),
        job_type: job_type.to_string(),
        deadline_ms: now + state.config.router_auction_timeout_ms as i64,
        max_price_msat: u64::MAX,
        validation_mode: "none".into(),
    };
    let message = RouterControlMessage::sign(
        ControlMessageType::Rfb,
        state.config.router_id.clone(),
        fresh_nonce(),
        now,
        rfb.deadline_ms,
        rfb.clone(),
        &state.signing_identity,
        None,
    )
    .map_err(|e| RouterError::Internal(e.to_string()))?;
    let bytes = serde_json::to_vec(&message).map_err(|e| RouterError::Internal(e.to_string()))?;

    let mut rx = state.bid_collector.register(job_id);
    if !relay::publish_to_all(&state.relays, bytes).await {
        state.bid_collector.unregister(job_id);
        return Err(RouterError::Federation(FederationError::PeerUnreachable));
    }

    let mut bids: Vec<JobBid> = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_millis(state.config.router_auction_timeout_ms);
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => break,
            bid = rx.recv() => match bid {
                Some(bid) => bids.push(bid),
                None => break,
            },
        }
    }
    state.bid_collector.unregister(job_id);

    let winner = auction::pick_winner(&bids, auction::DEFAULT_LAMBDA)
        .cloned()
        .ok_or(RouterError::Federation(FederationError::AuctionNoBids))?;
    let award = auction::build_award(&rfb, &winner, now, state.config.router_auction_timeout_ms as i64 * 4);
    if let Ok(award_message) = RouterControlMessage::sign(
        ControlMessageType::Award,
        state.config.router_id.clone(),
        fresh_nonce(),
        now,
        award.award_expiry,
        award.clone(),
        &state.signing_identity,
        None,
    ) {
        if let Ok(award_bytes) = serde_json::to_vec(&award_message) {
            relay::publish_to_all(&state.relays, award_bytes).await;
        }
    }
    state.metrics.federation_awards_total.inc();

    let peer = peers.iter().find(|p| p.router_id == winner.router_id).ok_or_else(|| {
        RouterError::Federation(FederationError::Failure("award winner is not a known peer".into()))
    })?;
    forward_to_peer(state, &peer.router_id, &peer.endpoint, raw)
        .await
        .ok_or(RouterError::Federation(FederationError::PeerUnreachable))
}

/// Calls the runner for `request`, retrying once against the same node and, failing
/// that, once more against a freshly scheduled alternate node before giving up (§7:
/// "runner 5xx/timeout → retry once against same node then once against an alternate").
/// A `runner-client-error` (4xx) is never retried, since the request itself is the problem.
async fn infer_with_retry(
    state: &AppState,
    request: &InferenceRequest,
    mut node_id: String,
    nodes: &[router_types::model::Node],
    shape: &RequestShape<'_>,
    now: i64,
) -> Result<(InferenceResponse, MeteringRecord), RouterError> {
    let mut retries_left = 2u8;
    loop {
        match state.runner.infer(request).await {
            Ok(ok) => {
                state.registry.record_success(&node_id, now);
                return Ok(ok);
            }
            Err(crate::runner::RunnerError::ClientError(msg)) => {
                return Err(RouterError::RunnerClientError(msg));
            }
            Err(crate::runner::RunnerError::Unavailable(msg)) => {
                state.registry.record_failure(&node_id, now);
                if retries_left == 0 {
                    return Err(RouterError::RunnerUnavailable(msg));
                }
                if retries_left == 1 {
                    let alternates: Vec<router_types::model::Node> =
                        nodes.iter().filter(|n| n.node_id != node_id).cloned().collect();
                    match scheduler::select(&alternates, shape, scheduler::DEFAULT_WEIGHTS) {
                        Ok((alt, _)) => node_id = alt.node_id.clone(),
                        Err(_) => return Err(RouterError::RunnerUnavailable(msg)),
                    }
                }
                retries_left -= 1;
            }
        }
    }
}

async fn handle_infer(state: AppState, raw: Value) -> Result<Response, RouterError> {
    let now = state.now_ms();
    let forward_raw = raw.clone();
    let envelope = verify_and_decode::<InferenceRequest>(&state, raw).await?;
    let request = envelope.payload;

    if state.ledger.is_consumed(&request.request_id) {
        return Err(RouterError::Payment(crate::payment_engine::PaymentError::AlreadyConsumed));
    }

    let load_factor = mean_node_load(&state.registry, now);
    if offload::should_offload(load_factor, state.config.router_offload_threshold) {
        return attempt_offload(&state, &forward_raw, &request.model_id, &request.request_id, now).await;
    }

    if state.config.router_require_payment {
        let needs_challenge = matches!(
            state.ledger.state(&request.request_id, now),
            PaymentState::Challenged | PaymentState::Expired | PaymentState::None
        ) && request.payment_receipts.is_empty();
        if needs_challenge {
            let nodes = state.registry.active_nodes(now);
            let shape = RequestShape {
                model_id: &request.model_id,
                input_tokens: request.input.len() as u64,
                output_tokens: request.max_tokens as u64,
                constraints: request.constraints.as_ref(),
            };
            let (node, price) = scheduler::select(&nodes, &shape, scheduler::DEFAULT_WEIGHTS)
                .map_err(RouterError::Scheduler)?;
            let amount_sats = price.round().max(1.0) as u64;
            let payment_request = PaymentRequest {
                request_id: request.request_id.clone(),
                amount_sats,
                invoice: None,
                expires_at_ms: now + state.config.router_payment_ttl_ms,
                splits: build_splits(amount_sats, &node.node_id, &state.config.router_id, state.config.router_fee_bps),
            };
            state.ledger.issue_challenge(payment_request.clone());
            state.metrics.payment_challenges_total.inc();
            let signed = sign(&state, payment_request, &fresh_nonce(), now);
            return Ok((StatusCode::PAYMENT_REQUIRED, Json(json!({ "payment": signed }))).into_response());
        }
    }

    let nodes = state.registry.active_nodes(now);
    let shape = RequestShape {
        model_id: &request.model_id,
        input_tokens: request.input.len() as u64,
        output_tokens: request.max_tokens as u64,
        constraints: request.constraints.as_ref(),
    };
    let (node, _) = scheduler::select(&nodes, &shape, scheduler::DEFAULT_WEIGHTS).map_err(RouterError::Scheduler)?;
    let (response, metering) =
        infer_with_retry(&state, &request, node.node_id.clone(), &nodes, &shape, now).await?;
    state.ledger.mark_consumed(&request.request_id);
    state.metrics.infer_requests_total.with_label_values(&["success"]).inc();

    let response_envelope = sign(&state, response, &fresh_nonce(), now);
    let metering_envelope = sign(&state, metering, &fresh_nonce(), now);
    Ok((StatusCode::OK, Json(json!({ "response": response_envelope, "metering": metering_envelope }))).into_response())
}

/// `POST /infer/stream`: same verification and payment-challenge path as `/infer`, but the
/// successful case streams `InferenceStreamChunk`s over SSE instead of returning one body.
#[instrument(skip_all)]
async fn post_infer_stream(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    let now = state.now_ms();
    let forward_raw = raw.clone();
    let envelope = match verify_and_decode::<InferenceRequest>(&state, raw).await {
        Ok(envelope) => envelope,
        Err(e) => return e.into_response(),
    };
    let request = envelope.payload;

    if state.ledger.is_consumed(&request.request_id) {
        return RouterError::Payment(crate::payment_engine::PaymentError::AlreadyConsumed).into_response();
    }

    let load_factor = mean_node_load(&state.registry, now);
    if offload::should_offload(load_factor, state.config.router_offload_threshold) {
        return match attempt_offload(&state, &forward_raw, &request.model_id, &request.request_id, now).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        };
    }

    if state.config.router_require_payment {
        let needs_challenge = matches!(
            state.ledger.state(&request.request_id, now),
            PaymentState::Challenged | PaymentState::Expired | PaymentState::None
        ) && request.payment_receipts.is_empty();
        if needs_challenge {
            let nodes = state.registry.active_nodes(now);
            let shape = RequestShape {
                model_id: &request.model_id,
                input_tokens: request.input.len() as u64,
                output_tokens: request.max_tokens as u64,
                constraints: request.constraints.as_ref(),
            };
            let payment_request = match scheduler::select(&nodes, &shape, scheduler::DEFAULT_WEIGHTS) {
                Ok((node, price)) => {
                    let amount_sats = price.round().max(1.0) as u64;
                    PaymentRequest {
                        request_id: request.request_id.clone(),
                        amount_sats,
                        invoice: None,
                        expires_at_ms: now + state.config.router_payment_ttl_ms,
                        splits: build_splits(amount_sats, &node.node_id, &state.config.router_id, state.config.router_fee_bps),
                    }
                }
                Err(e) => return RouterError::Scheduler(e).into_response(),
            };
            state.ledger.issue_challenge(payment_request.clone());
            state.metrics.payment_challenges_total.inc();
            let signed = sign(&state, payment_request, &fresh_nonce(), now);
            return (StatusCode::PAYMENT_REQUIRED, Json(json!({ "payment": signed }))).into_response();
        }
    }

    let request_id = request.request_id.clone();
    let nodes = state.registry.active_nodes(now);
    let shape = RequestShape {
        model_id: &request.model_id,
        input_tokens: request.input.len() as u64,
        output_tokens: request.max_tokens as u64,
        constraints: request.constraints.as_ref(),
    };
    let outcome = match scheduler::select(&nodes, &shape, scheduler::DEFAULT_WEIGHTS) {
        Ok((node, _)) => infer_with_retry(&state, &request, node.node_id.clone(), &nodes, &shape, now)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(RouterError::Scheduler(e).to_string()),
    };
    let chunk = match outcome {
        Ok((response, metering)) => {
            state.ledger.mark_consumed(&request.request_id);
            state.metrics.infer_requests_total.with_label_values(&["success"]).inc();
            let response_envelope = sign(&state, response, &fresh_nonce(), now);
            let metering_envelope = sign(&state, metering, &fresh_nonce(), now);
            InferenceStreamChunk::Final {
                request_id,
                response: response_envelope,
                metering: metering_envelope,
            }
        }
        Err(error) => {
            state.metrics.infer_requests_total.with_label_values(&["error"]).inc();
            InferenceStreamChunk::Error { request_id, error }
        }
    };

    let event_name = match &chunk {
        InferenceStreamChunk::Delta { .. } => "chunk",
        InferenceStreamChunk::Final { .. } => "final",
        InferenceStreamChunk::Error { .. } => "error",
    };
    let event = Event::default().event(event_name).json_data(&chunk).expect("chunk serializes");
    let body = stream::once(async move { Ok::<_, std::convert::Infallible>(event) });
    Sse::new(body).into_response()
}

#[instrument(skip_all)]
async fn post_payment_receipt(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_payment_receipt(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_payment_receipt(state: AppState, raw: Value) -> Result<Response, RouterError> {
    let envelope = verify_and_decode::<PaymentReceipt>(&state, raw).await?;
    let receipt = envelope.payload;
    let now = state.now_ms();

    if let Some(adapter) = &state.ln_adapter {
        if let Some(invoice) = &receipt.invoice {
            let verify = adapter
                .verify(crate::ln_adapter::VerifyRequest {
                    request_id: &receipt.request_id,
                    payee_id: &receipt.payee_id,
                    amount_sats: receipt.amount_sats,
                    invoice,
                    payment_hash: receipt.payment_hash.as_deref().unwrap_or(""),
                })
                .await
                .map_err(|e| RouterError::RunnerUnavailable(e.to_string()))?;
            if !verify.paid {
                return Err(RouterError::Payment(crate::payment_engine::PaymentError::Unsettled));
            }
        }
    }

    state
        .ledger
        .accept_receipt(receipt, now)
        .map_err(RouterError::Payment)?;
    state.metrics.payment_receipts_total.inc();
    Ok((StatusCode::OK, Json(json!({ "ok": true }))).into_response())
}

#[instrument(skip_all)]
async fn post_federation_caps(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_federation_caps(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_federation_caps(state: AppState, raw: Value) -> Result<Response, RouterError> {
    let message: RouterControlMessage<CapabilityProfile> =
        serde_json::from_value(raw).map_err(|e| RouterError::EnvelopeMalformed(e.to_string()))?;
    if message.message_type != ControlMessageType::CapsAnnounce {
        return Err(RouterError::EnvelopeMalformed("expected a CAPS_ANNOUNCE message".into()));
    }
    let now = state.now_ms();
    if !message.is_fresh(now) {
        return Err(RouterError::Federation(crate::federation::FederationError::AwardExpired));
    }
    let known_key = state.peers.get(&message.router_id).and_then(|p| p.capability_profile.map(|c| c.key_id));
    let verified = match &known_key {
        Some(pinned) => message.payload.key_id == *pinned && message.verify_against(pinned),
        None => message.verify_against(&message.payload.key_id),
    };
    if !verified {
        return Err(RouterError::EnvelopeSignatureInvalid);
    }
    if !state.peers.dedup(&message.message_id) {
        return Ok((StatusCode::OK, Json(json!({ "ok": true }))).into_response());
    }
    state.peers.upsert_with(&message.router_id, now, |peer| {
        peer.endpoint = message.payload.endpoint.clone();
        peer.price_sheet = message.payload.price_sheet.clone();
        peer.capability_profile = Some(message.payload.clone());
    });
    Ok((StatusCode::OK, Json(json!({ "ok": true }))).into_response())
}

/// `POST /federation/payment-request`: a peer router reports a settled offload via a
/// signed `ReceiptSummary`; this router replies with its own `PaymentRequest` covering the
/// router-to-router fee leg of that settlement.
#[instrument(skip_all)]
async fn post_federation_payment_request(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_federation_payment_request(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_federation_payment_request(state: AppState, raw: Value) -> Result<Response, RouterError> {
    use router_types::federation_proto::ReceiptSummary;

    let envelope = verify_and_decode::<ReceiptSummary>(&state, raw).await?;
    let summary = envelope.payload;
    let now = state.now_ms();

    let peer_router_id = envelope.key_id.clone();
    let splits = build_splits(summary.total_sats, &peer_router_id, &state.config.router_id, state.config.router_fee_bps);
    let router_amount = splits
        .iter()
        .find(|s| matches!(s.payee_type, router_types::payment::PayeeType::Router))
        .map(|s| s.amount_sats)
        .unwrap_or(0);

    let payment_request = PaymentRequest {
        request_id: summary.request_id.clone(),
        amount_sats: router_amount,
        invoice: None,
        expires_at_ms: now + state.config.router_payment_ttl_ms,
        splits: vec![router_types::payment::PaymentSplit {
            payee_type: router_types::payment::PayeeType::Router,
            payee_id: state.config.router_id.clone(),
            amount_sats: router_amount,
        }],
    };
    state.ledger.issue_challenge(payment_request.clone());
    state.metrics.payment_challenges_total.inc();
    let signed = sign(&state, payment_request, &fresh_nonce(), now);
    Ok((StatusCode::OK, Json(json!({ "payment": signed }))).into_response())
}

#[instrument(skip_all)]
async fn post_federation_payment_receipt(State(state): State<AppState>, Json(raw): Json<Value>) -> Response {
    match handle_payment_receipt(state, raw).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        use crate::config::RouterConfig;
        use ed25519_dalek::SigningKey;
        let sk = SigningKey::generate(&mut rand::rngs::OsRng);
        let identity = router_types::SigningIdentity::Ed25519(Box::new(sk));
        AppState {
            config: Arc::new(RouterConfig {
                router_id: "r1".into(),
                router_key_id: identity.key_id(),
                router_endpoint: "http://localhost:8080".into(),
                router_port: 8080,
                router_host: std::net::IpAddr::from([0, 0, 0, 0]),
                router_private_key_pem: String::new(),
                router_require_payment: false,
                router_state_file: "test-state.json".into(),
                router_replay_window_ms: 300_000,
                router_fee_bps: 100,
                router_offload_threshold: 0.75,
                router_max_offloads: 16,
                router_auction_timeout_ms: 500,
                router_relay_bootstrap: vec![],
                router_relay_aggregators: vec![],
                router_relay_trust: vec![],
                ln_adapter_url: None,
                router_persist_interval_ms: 5_000,
                router_heartbeat_ttl_ms: 60_000,
                router_cooldown_base_ms: 10_000,
                router_cooldown_cap_ms: 600_000,
                router_cooldown_threshold: 3,
                router_payment_ttl_ms: 60_000,
                router_caps_interval_ms: 30_000,
                router_status_interval_ms: 5_000,
                router_price_interval_ms: 60_000,
                router_worker_pool_size: Some(2),
            }),
            signing_identity: Arc::new(identity),
            replay_store: Arc::new(crate::replaystore::FileReplayStore::load(std::env::temp_dir().join("handlers-test-replay.json"))),
            registry: Arc::new(crate::registry::NodeRegistry::new(3, 10_000, 600_000, 60_000)),
            ledger: Arc::new(crate::payment_engine::PaymentLedger::new()),
            stake: Arc::new(crate::stake::StakeStore::new()),
            peers: Arc::new(crate::federation::PeerDirectory::new()),
            relays: Arc::new(vec![]),
            bid_collector: Arc::new(crate::federation::BidCollector::new()),
            peer_client: Arc::new(crate::federation::peer_client::PeerClient::new(std::time::Duration::from_secs(1))),
            offload_slots: Arc::new(tokio::sync::Semaphore::new(16)),
            worker_pool: Arc::new(crate::workerpool::WorkerPool::new(2)),
            metrics: Arc::new(crate::metrics::Metrics::new()),
            persistence: Arc::new(crate::persistence::PersistenceWriter::new(std::env::temp_dir().join("handlers-test-state.json"))),
            runner: Arc::new(crate::runner::HttpRunner::new("http://localhost:9", std::time::Duration::from_secs(1))),
            ln_adapter: None,
            started_at_ms: 0,
        }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = routes(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn quote_for_unknown_model_returns_422() {
        let app = routes(test_state());
        let state = test_state();
        let request = QuoteRequest {
            request_id: "q1".into(),
            model_id: "m".into(),
            input_tokens_estimate: 100,
            output_tokens_estimate: 50,
            max_tokens: 256,
            constraints: None,
        };
        let envelope = sign(&state, request, "n1", 0);
        let body = serde_json::to_vec(&envelope).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/quote")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
