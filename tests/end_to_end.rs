//! End-to-end HTTP scenarios driven through the full axum router, per the documented
//! request/response flows: a happy quote, a pay-then-infer round trip, replay rejection,
//! and cooldown after repeated node failures.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use ed25519_dalek::SigningKey;
use fedinfer_router::config::RouterConfig;
use fedinfer_router::federation::peer_client::PeerClient;
use fedinfer_router::federation::{BidCollector, PeerDirectory};
use fedinfer_router::handlers::routes;
use fedinfer_router::ln_adapter::HttpLightningAdapter;
use fedinfer_router::metrics::Metrics;
use fedinfer_router::payment_engine::PaymentLedger;
use fedinfer_router::persistence::PersistenceWriter;
use fedinfer_router::registry::NodeRegistry;
use fedinfer_router::replaystore::FileReplayStore;
use fedinfer_router::runner::HttpRunner;
use fedinfer_router::state::AppState;
use fedinfer_router::workerpool::WorkerPool;
use router_types::envelope::Envelope;
use router_types::inference::{InferenceRequest, InferenceResponse, MeteringRecord};
use router_types::model::{Capability, NodeManifest, Pricing, PricingUnit};
use router_types::quote::QuoteRequest;
use router_types::SigningIdentity;
use serde_json::{json, Value};
use tower::ServiceExt;

fn now_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn test_manifest(node_id: &str) -> NodeManifest {
    NodeManifest {
        node_id: node_id.into(),
        key_id: "deadbeef".into(),
        endpoint: "http://node.local".into(),
        region: None,
        max_concurrent: 10,
        capabilities: vec![Capability {
            model_id: "gpt-test".into(),
            context_window: 4096,
            max_tokens: 256,
            pricing: Pricing {
                unit: PricingUnit::Token,
                input_rate: 0.01,
                output_rate: 0.02,
                currency: "sat".into(),
            },
            latency_estimate_ms: None,
        }],
    }
}

/// Builds a fresh `AppState` backed by temp-file stores unique to the calling test, plus a
/// client signing identity used to sign outbound requests. `require_payment` lets callers
/// exercise the paid and open-access paths with the same helper.
fn test_state(tag: &str, require_payment: bool, runner_url: String) -> (AppState, SigningIdentity) {
    let router_sk = SigningKey::generate(&mut rand::rngs::OsRng);
    let router_identity = SigningIdentity::Ed25519(Box::new(router_sk));
    let client_sk = SigningKey::generate(&mut rand::rngs::OsRng);
    let client_identity = SigningIdentity::Ed25519(Box::new(client_sk));

    let state_path = std::env::temp_dir().join(format!("e2e-{tag}-{}-state.json", std::process::id()));
    let replay_path = std::env::temp_dir().join(format!("e2e-{tag}-{}-replay.json", std::process::id()));
    let _ = std::fs::remove_file(&state_path);
    let _ = std::fs::remove_file(&replay_path);

    let config = RouterConfig {
        router_id: "r1".into(),
        router_key_id: router_identity.key_id(),
        router_endpoint: "http://localhost:8080".into(),
        router_port: 8080,
        router_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        router_private_key_pem: String::new(),
        router_require_payment: require_payment,
        router_state_file: state_path,
        router_replay_window_ms: 300_000,
        router_fee_bps: 1000,
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
    };

    let state = AppState {
        config: Arc::new(config),
        signing_identity: Arc::new(router_identity),
        replay_store: Arc::new(FileReplayStore::load(&replay_path)),
        registry: Arc::new(NodeRegistry::new(3, 10_000, 600_000, 60_000)),
        ledger: Arc::new(PaymentLedger::new()),
        stake: Arc::new(fedinfer_router::stake::StakeStore::new()),
        peers: Arc::new(PeerDirectory::new()),
        relays: Arc::new(vec![]),
        bid_collector: Arc::new(BidCollector::new()),
        peer_client: Arc::new(PeerClient::new(std::time::Duration::from_secs(5))),
        offload_slots: Arc::new(tokio::sync::Semaphore::new(16)),
        worker_pool: Arc::new(WorkerPool::new(2)),
        metrics: Arc::new(Metrics::new()),
        persistence: Arc::new(PersistenceWriter::new(std::env::temp_dir().join(format!("e2e-{tag}-{}-snapshot.json", std::process::id())))),
        runner: Arc::new(HttpRunner::new(runner_url, std::time::Duration::from_secs(5))),
        ln_adapter: None::<Arc<HttpLightningAdapter>>,
        started_at_ms: now_ms(),
    };
    (state, client_identity)
}

/// Spawns a minimal mock runner: a second axum app bound to an ephemeral port, serving only
/// `POST /infer` with a canned response/metering pair. Stands in for the collaborator
/// process the real `HttpRunner` talks to.
async fn spawn_mock_runner() -> String {
    async fn infer(Json(request): Json<InferenceRequest>) -> Json<Value> {
        Json(json!({
            "response": InferenceResponse {
                request_id: request.request_id.clone(),
                node_id: "n1".into(),
                output: format!("echo:{}", request.input),
            },
            "metering": MeteringRecord {
                request_id: request.request_id,
                node_id: "n1".into(),
                input_tokens: 4,
                output_tokens: 2,
                cost_sats: Some(2),
            },
        }))
    }

    let app = Router::new().route("/infer", post(infer));
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn happy_quote_picks_the_only_capable_node() {
    let (state, client) = test_state("happy-quote", false, "http://127.0.0.1:1".into());
    state.registry.admit_manifest(&test_manifest("n1"), true);
    state.registry.heartbeat("n1", state.now_ms(), 2);

    let request = QuoteRequest {
        request_id: "q1".into(),
        model_id: "gpt-test".into(),
        input_tokens_estimate: 100,
        output_tokens_estimate: 50,
        max_tokens: 256,
        constraints: None,
    };
    let envelope = Envelope::sign(request, "nonce-quote-1", state.now_ms(), &client).unwrap();
    let app = routes(state);
    let (status, body) = post_json(app, "/quote", serde_json::to_value(&envelope).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    let quote = &body["quote"]["payload"];
    assert_eq!(quote["nodeId"], "n1");
    assert!((quote["price"]["total"].as_f64().unwrap() - 2.0).abs() < 1e-9);
}

#[tokio::test]
async fn infer_is_challenged_then_succeeds_after_a_receipt_is_paid() {
    let runner_url = spawn_mock_runner().await;
    let (state, client) = test_state("pay-then-infer", true, runner_url);
    state.registry.admit_manifest(&test_manifest("n1"), true);
    state.registry.heartbeat("n1", state.now_ms(), 0);
    let app = routes(state.clone());

    let infer_request = InferenceRequest {
        request_id: "req-1".into(),
        model_id: "gpt-test".into(),
        input: "hello".into(),
        max_tokens: 50,
        max_runtime_ms: None,
        constraints: None,
        payment_receipts: vec![],
    };
    let envelope = Envelope::sign(infer_request.clone(), "nonce-infer-1", state.now_ms(), &client).unwrap();
    let (status, body) = post_json(app.clone(), "/infer", serde_json::to_value(&envelope).unwrap()).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    let payment = &body["payment"]["payload"];
    let amount_sats = payment["amountSats"].as_u64().unwrap();
    assert!(amount_sats > 0);

    let receipt = router_types::payment::PaymentReceipt {
        request_id: "req-1".into(),
        payee_type: router_types::payment::PayeeType::Node,
        payee_id: "n1".into(),
        amount_sats,
        invoice: None,
        payment_hash: None,
        settled_at_ms: Some(state.now_ms()),
    };
    let receipt_envelope = Envelope::sign(receipt, "nonce-receipt-1", state.now_ms(), &client).unwrap();
    let (status, _) = post_json(app.clone(), "/payment-receipt", serde_json::to_value(&receipt_envelope).unwrap()).await;
    assert_eq!(status, StatusCode::OK);

    let retry_envelope = Envelope::sign(infer_request, "nonce-infer-2", state.now_ms(), &client).unwrap();
    let (status, body) = post_json(app, "/infer", serde_json::to_value(&retry_envelope).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["payload"]["output"], "echo:hello");
    assert!(state.ledger.is_consumed("req-1"));
}

#[tokio::test]
async fn replaying_an_envelope_within_the_window_is_rejected() {
    let (state, client) = test_state("replay", false, "http://127.0.0.1:1".into());
    state.registry.admit_manifest(&test_manifest("n1"), true);
    state.registry.heartbeat("n1", state.now_ms(), 0);

    let request = QuoteRequest {
        request_id: "q1".into(),
        model_id: "gpt-test".into(),
        input_tokens_estimate: 10,
        output_tokens_estimate: 5,
        max_tokens: 32,
        constraints: None,
    };
    let envelope = Envelope::sign(request, "nonce-replay", state.now_ms(), &client).unwrap();
    let raw = serde_json::to_value(&envelope).unwrap();
    let app = routes(state.clone());

    let (first_status, _) = post_json(app.clone(), "/quote", raw.clone()).await;
    assert_eq!(first_status, StatusCode::OK);

    let (second_status, body) = post_json(app, "/quote", raw).await;
    assert_eq!(second_status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "nonce-reused");
}

#[tokio::test]
async fn three_consecutive_failures_cool_a_node_out_of_scheduling() {
    let (state, client) = test_state("cooldown", false, "http://127.0.0.1:1".into());
    state.registry.admit_manifest(&test_manifest("n1"), true);
    let now = state.now_ms();
    state.registry.heartbeat("n1", now, 0);
    state.registry.record_failure("n1", now);
    state.registry.record_failure("n1", now);
    state.registry.record_failure("n1", now);
    assert!(state.registry.is_cooling("n1", now));

    let request = QuoteRequest {
        request_id: "q1".into(),
        model_id: "gpt-test".into(),
        input_tokens_estimate: 10,
        output_tokens_estimate: 5,
        max_tokens: 32,
        constraints: None,
    };
    let envelope = Envelope::sign(request, "nonce-cooldown", now, &client).unwrap();
    let app = routes(state);
    let (status, body) = post_json(app, "/quote", serde_json::to_value(&envelope).unwrap()).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "no-capable-node");
}

#[tokio::test]
async fn state_survives_a_restart_from_its_snapshot_file() {
    let (state, _client) = test_state("crash-recovery", false, "http://127.0.0.1:1".into());
    state.registry.admit_manifest(&test_manifest("n1"), true);
    state.registry.heartbeat("n1", state.now_ms(), 3);

    let snapshot =
        fedinfer_router::persistence::build_snapshot(&state.registry, &state.ledger, &state.stake, &state.peers, state.now_ms());
    state.persistence.flush(snapshot).await.unwrap();

    let reloaded = PersistenceWriter::load(&state.config.router_state_file);
    let fresh_registry = NodeRegistry::new(3, 10_000, 600_000, 60_000);
    let fresh_ledger = PaymentLedger::new();
    let fresh_stake = fedinfer_router::stake::StakeStore::new();
    let fresh_peers = PeerDirectory::new();
    fedinfer_router::persistence::restore_snapshot(reloaded, &fresh_registry, &fresh_ledger, &fresh_stake, &fresh_peers);

    let node = fresh_registry.get("n1").expect("node survives restart");
    assert_eq!(node.capacity.current_load, 3);
}

#[tokio::test]
async fn federation_caps_announce_is_rejected_when_the_signature_does_not_match_the_claimed_key() {
    use router_types::federation_proto::{CapabilityProfile, ControlMessageType, RouterControlMessage};

    let (state, _client) = test_state("caps-bad-sig", false, "http://127.0.0.1:1".into());
    let app = routes(state.clone());

    let peer_sk = SigningKey::generate(&mut rand::rngs::OsRng);
    let peer_identity = SigningIdentity::Ed25519(Box::new(peer_sk));
    let now = state.now_ms();

    let profile = CapabilityProfile {
        router_id: "peer-1".into(),
        key_id: peer_identity.key_id(),
        endpoint: "http://peer.local".into(),
        job_types: vec!["gpt-test".into()],
        price_sheet: vec![],
    };
    let mut message = RouterControlMessage::sign(
        ControlMessageType::CapsAnnounce,
        "peer-1".into(),
        "msg-1".into(),
        now,
        now + 60_000,
        profile,
        &peer_identity,
        None,
    )
    .unwrap();
    // Tamper with the signature after signing: the claimed `keyId` still belongs to
    // `peer_identity`, but the bytes no longer verify against it.
    message.sig = "00".repeat(64);

    let (status, body) = post_json(app, "/federation/caps", serde_json::to_value(&message).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "envelope-signature-invalid");
    assert!(state.peers.get("peer-1").is_none());
}
