//! Server startup: configuration, wiring every subsystem into an [`AppState`], background
//! timers, and graceful shutdown via a thin-`run`/thin-`main` split, `SigDown`, and
//! `axum::serve().with_graceful_shutdown()`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use router_types::SigningIdentity;
use tower_http::cors::{self, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::RouterConfig;
use crate::federation::peer_client::PeerClient;
use crate::federation::relay::{self, Relay};
use crate::federation::{BidCollector, PeerDirectory};
use crate::handlers;
use crate::ln_adapter::HttpLightningAdapter;
use crate::metrics::Metrics;
use crate::payment_engine::PaymentLedger;
use crate::persistence::{self, PersistenceWriter};
use crate::registry::NodeRegistry;
use crate::replaystore::FileReplayStore;
use crate::runner::HttpRunner;
use crate::sig_down::SigDown;
use crate::stake::StakeStore;
use crate::state::AppState;
use crate::workerpool::WorkerPool;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = match RouterConfig::load() {
        Ok(config) => config,
        Err(e) => {
            e.print().ok();
            std::process::exit(64);
        }
    };

    let signing_identity = SigningIdentity::load(&config.router_private_key_pem)
        .map_err(|e| format!("ROUTER_PRIVATE_KEY_PEM is invalid: {e}"))?;
    if signing_identity.key_id() != config.router_key_id {
        tracing::warn!(
            configured = %config.router_key_id,
            derived = %signing_identity.key_id(),
            "ROUTER_KEY_ID does not match the key derived from ROUTER_PRIVATE_KEY_PEM"
        );
    }

    let bid_collector = Arc::new(BidCollector::new());
    let peer_client = Arc::new(PeerClient::new(Duration::from_secs(30)));
    let offload_slots = Arc::new(tokio::sync::Semaphore::new(config.router_max_offloads as usize));

    let registry = Arc::new(NodeRegistry::new(
        config.router_cooldown_threshold,
        config.router_cooldown_base_ms,
        config.router_cooldown_cap_ms,
        config.router_heartbeat_ttl_ms,
    ));
    let ledger = Arc::new(PaymentLedger::new());
    let stake = Arc::new(StakeStore::new());
    let peers = Arc::new(PeerDirectory::new());
    let replay_store = Arc::new(FileReplayStore::load(&config.router_state_file.with_extension("replay.json")));
    let persistence = Arc::new(PersistenceWriter::new(config.router_state_file.clone()));
    let worker_pool = Arc::new(WorkerPool::new(config.worker_pool_size()));
    let metrics = Arc::new(Metrics::new());
    let runner = Arc::new(HttpRunner::new(
        std::env::var("RUNNER_URL").unwrap_or_else(|_| "http://127.0.0.1:9090".to_string()),
        Duration::from_secs(30),
    ));
    let ln_adapter = config
        .ln_adapter_url
        .as_ref()
        .map(|url| Arc::new(HttpLightningAdapter::new(url.clone())));
    let relays: Arc<Vec<Relay>> = Arc::new(
        config
            .router_relay_bootstrap
            .iter()
            .chain(config.router_relay_aggregators.iter())
            .map(|url| Relay::new(url.clone(), config.router_auction_timeout_ms.max(8_000)))
            .collect(),
    );

    let restored = persistence::PersistenceWriter::load(&config.router_state_file);
    persistence::restore_snapshot(restored, &registry, &ledger, &stake, &peers);

    let started_at_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as i64;

    let state = AppState {
        config: Arc::new(config.clone()),
        signing_identity: Arc::new(signing_identity),
        replay_store,
        registry,
        ledger,
        stake,
        peers,
        relays,
        bid_collector,
        peer_client,
        offload_slots,
        worker_pool,
        metrics,
        persistence,
        runner,
        ln_adapter,
        started_at_ms,
    };

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();

    spawn_persistence_timer(state.clone(), cancel.clone());
    spawn_cooldown_sweep(state.clone(), cancel.clone());
    spawn_relay_subscribers(state.clone(), cancel.clone());
    spawn_caps_announce(state.clone(), cancel.clone());
    spawn_status_announce(state.clone(), cancel.clone());
    spawn_price_announce(state.clone(), cancel.clone());

    let app = handlers::routes(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        )
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let addr = SocketAddr::new(config.router_host, config.router_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!(%addr, error = %e, "failed to bind"))?;
    tracing::info!(%addr, router_id = %config.router_id, "router listening");

    let shutdown = {
        let cancel = cancel.clone();
        async move { cancel.cancelled().await }
    };
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    let snapshot = persistence::build_snapshot(&state.registry, &state.ledger, &state.stake, &state.peers, state.now_ms());
    if let Err(e) = state.persistence.flush(snapshot).await {
        tracing::error!(error = %e, "failed to flush state on shutdown");
        std::process::exit(74);
    }

    Ok(())
}

/// Every `routerPersistIntervalMs`, debounce-writes a snapshot of mutable state to disk.
fn spawn_persistence_timer(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(state.config.router_persist_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let snapshot = persistence::build_snapshot(&state.registry, &state.ledger, &state.stake, &state.peers, state.now_ms());
                    if let Err(e) = state.persistence.write_debounced(snapshot).await {
                        tracing::warn!(error = %e, "debounced snapshot write failed");
                    }
                }
            }
        }
    });
}

/// Every heartbeat TTL, logs the current active-node gauge; cooldown expiry itself is
/// evaluated lazily on each scheduling/admission check rather than swept eagerly.
fn spawn_cooldown_sweep(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(state.config.router_heartbeat_ttl_ms.max(1_000) as u64));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    let now = state.now_ms();
                    let active = state.registry.active_nodes(now).len() as i64;
                    state.metrics.active_nodes.set(active);
                }
            }
        }
    });
}

/// One subscriber task per configured relay, forwarding inbound control-message frames
/// into the peer directory. Best-effort: a relay that never connects just never updates
/// the directory from that source.
fn spawn_relay_subscribers(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    for relay in state.relays.iter() {
        let url = relay.url.clone();
        let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<u8>>(64);
        let relay_for_loop = state.relays.clone();
        let relay_index = state.relays.iter().position(|r| r.url == url).unwrap_or(0);
        let cancel_loop = cancel.clone();
        tokio::spawn(async move {
            relay_for_loop[relay_index].subscribe_loop(tx, cancel_loop).await;
        });

        let state = state.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    frame = rx.recv() => {
                        match frame {
                            Some(bytes) => dispatch_control_frame(&state, &bytes),
                            None => return,
                        }
                    }
                }
            }
        });
    }
}

/// The key a control message from `router_id` must verify against: the key on file in
/// the peer directory (learned from that peer's own `CAPS_ANNOUNCE`), or `None` if this
/// router has never heard of them. A `CAPS_ANNOUNCE` itself is the one message type that
/// can still be checked when this returns `None` — see `verify_caps_announce`.
fn known_peer_key(state: &AppState, router_id: &str) -> Option<String> {
    state.peers.get(router_id)?.capability_profile.map(|p| p.key_id)
}

/// Verifies a `CAPS_ANNOUNCE`: trust-on-first-use against its own self-asserted `keyId`
/// if this router has no prior record of the peer, otherwise pinned to whatever key that
/// peer's first announce established (a later announce claiming a different key is
/// rejected rather than silently rotating trust).
fn verify_caps_announce(
    state: &AppState,
    message: &router_types::federation_proto::RouterControlMessage<router_types::federation_proto::CapabilityProfile>,
) -> bool {
    match known_peer_key(state, &message.router_id) {
        Some(pinned) => message.payload.key_id == pinned && message.verify_against(&pinned),
        None => message.verify_against(&message.payload.key_id),
    }
}

/// Dispatches an inbound relay frame by its `type` tag, updating the peer directory
/// (CAPS/PRICE/STATUS) or routing a `BID` to the auction waiting on its `jobId`. `RFB`
/// and `AWARD` are handled inline by the auction initiator/participant rather than here.
fn dispatch_control_frame(state: &AppState, bytes: &[u8]) {
    use router_types::federation_proto::{CapabilityProfile, JobBid, PriceSheetEntry, RouterControlMessage, StatusAnnouncePayload};

    let raw: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(_) => return,
    };
    let Some(kind) = raw.get("type").and_then(|v| v.as_str()) else { return };
    let now = state.now_ms();

    match kind {
        "CAPS_ANNOUNCE" => {
            let Ok(message) = serde_json::from_value::<RouterControlMessage<CapabilityProfile>>(raw) else { return };
            if !message.is_fresh(now) || !verify_caps_announce(state, &message) || !state.peers.dedup(&message.message_id) {
                return;
            }
            state.peers.upsert_with(&message.router_id, now, |peer| {
                peer.endpoint = message.payload.endpoint.clone();
                peer.price_sheet = message.payload.price_sheet.clone();
                peer.capability_profile = Some(message.payload.clone());
            });
        }
        "PRICE_ANNOUNCE" => {
            let Ok(message) = serde_json::from_value::<RouterControlMessage<Vec<PriceSheetEntry>>>(raw) else { return };
            let Some(key_id) = known_peer_key(state, &message.router_id) else { return };
            if !message.is_fresh(now) || !message.verify_against(&key_id) || !state.peers.dedup(&message.message_id) {
                return;
            }
            state.peers.upsert_with(&message.router_id, now, |peer| {
                peer.price_sheet = message.payload.clone();
            });
        }
        "STATUS_ANNOUNCE" => {
            let Ok(message) = serde_json::from_value::<RouterControlMessage<StatusAnnouncePayload>>(raw) else { return };
            let Some(key_id) = known_peer_key(state, &message.router_id) else { return };
            if !message.is_fresh(now) || !message.verify_against(&key_id) || !state.peers.dedup(&message.message_id) {
                return;
            }
            state.peers.upsert_with(&message.router_id, now, |peer| {
                peer.load_summary = Some(message.payload.load_summary);
            });
        }
        "BID" => {
            let Ok(message) = serde_json::from_value::<RouterControlMessage<JobBid>>(raw) else { return };
            let Some(key_id) = known_peer_key(state, &message.router_id) else { return };
            if !message.is_fresh(now) || !message.verify_against(&key_id) {
                return;
            }
            state.metrics.federation_bids_total.inc();
            state.bid_collector.dispatch(message.payload);
        }
        _ => {}
    }
}

/// Every `capsIntervalMs`, publishes a fresh `CAPS_ANNOUNCE` describing this router's
/// current job types and price sheet (§4.7). Job types are derived from the active
/// nodes' capabilities rather than configured separately, so the announce always
/// reflects what this router can actually schedule.
fn spawn_caps_announce(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(state.config.router_caps_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => publish_caps_announce(&state).await,
            }
        }
    });
}

async fn publish_caps_announce(state: &AppState) {
    use router_types::federation_proto::{CapabilityProfile, ControlMessageType, RouterControlMessage};

    let now = state.now_ms();
    let nodes = state.registry.active_nodes(now);
    let mut job_types: Vec<String> = nodes
        .iter()
        .flat_map(|n| n.capabilities.iter().map(|c| c.model_id.clone()))
        .collect();
    job_types.sort();
    job_types.dedup();
    let profile = CapabilityProfile {
        router_id: state.config.router_id.clone(),
        key_id: state.signing_identity.key_id(),
        endpoint: state.config.router_endpoint.clone(),
        job_types,
        price_sheet: price_sheet_for(&nodes),
    };
    let message = match RouterControlMessage::sign(
        ControlMessageType::CapsAnnounce,
        state.config.router_id.clone(),
        fresh_message_id(),
        now,
        now + state.config.router_caps_interval_ms as i64 * 2,
        profile,
        &state.signing_identity,
        None,
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to sign CAPS_ANNOUNCE");
            return;
        }
    };
    publish_control_message(state, &message).await;
}

/// Every `statusIntervalMs`, publishes this router's current load summary (§4.7).
fn spawn_status_announce(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(state.config.router_status_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => publish_status_announce(&state).await,
            }
        }
    });
}

async fn publish_status_announce(state: &AppState) {
    use router_types::federation_proto::{ControlMessageType, LoadSummary, RouterControlMessage, StatusAnnouncePayload};

    let now = state.now_ms();
    let nodes = state.registry.active_nodes(now);
    let load_summary = LoadSummary {
        load_factor: mean_node_load_f64(&nodes),
        active_nodes: nodes.len() as u32,
    };
    let message = match RouterControlMessage::sign(
        ControlMessageType::StatusAnnounce,
        state.config.router_id.clone(),
        fresh_message_id(),
        now,
        now + state.config.router_status_interval_ms as i64 * 4,
        StatusAnnouncePayload { load_summary },
        &state.signing_identity,
        None,
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to sign STATUS_ANNOUNCE");
            return;
        }
    };
    publish_control_message(state, &message).await;
}

/// Every `priceIntervalMs`, publishes this router's per-job-type price sheet (§4.7).
/// In a production deployment this would also fire immediately on a price change; a
/// fixed cadence is the simplification this implementation makes (see `DESIGN.md`).
fn spawn_price_announce(state: AppState, cancel: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(state.config.router_price_interval_ms));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => publish_price_announce(&state).await,
            }
        }
    });
}

async fn publish_price_announce(state: &AppState) {
    use router_types::federation_proto::{ControlMessageType, RouterControlMessage};

    let now = state.now_ms();
    let nodes = state.registry.active_nodes(now);
    let sheet = price_sheet_for(&nodes);
    let message = match RouterControlMessage::sign(
        ControlMessageType::PriceAnnounce,
        state.config.router_id.clone(),
        fresh_message_id(),
        now,
        now + state.config.router_price_interval_ms as i64 * 2,
        sheet,
        &state.signing_identity,
        None,
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, "failed to sign PRICE_ANNOUNCE");
            return;
        }
    };
    publish_control_message(state, &message).await;
}

fn price_sheet_for(nodes: &[router_types::model::Node]) -> Vec<router_types::federation_proto::PriceSheetEntry> {
    use router_types::federation_proto::PriceSheetEntry;
    use router_types::model::PricingUnit;
    use std::collections::HashMap;

    let mut cheapest: HashMap<String, f64> = HashMap::new();
    for node in nodes {
        for capability in &node.capabilities {
            let price_per_token = match capability.pricing.unit {
                PricingUnit::Token => capability.pricing.input_rate.max(capability.pricing.output_rate),
                PricingUnit::Second => capability.pricing.input_rate,
            };
            cheapest
                .entry(capability.model_id.clone())
                .and_modify(|existing| {
                    if price_per_token < *existing {
                        *existing = price_per_token;
                    }
                })
                .or_insert(price_per_token);
        }
    }
    let mut entries: Vec<PriceSheetEntry> = cheapest
        .into_iter()
        .map(|(job_type, price)| PriceSheetEntry {
            job_type,
            price_per_token_msat: price,
        })
        .collect();
    entries.sort_by(|a, b| a.job_type.cmp(&b.job_type));
    entries
}

fn mean_node_load_f64(nodes: &[router_types::model::Node]) -> f64 {
    if nodes.is_empty() {
        return 0.0;
    }
    nodes.iter().map(|n| n.capacity.load_factor()).sum::<f64>() / nodes.len() as f64
}

async fn publish_control_message<T: serde::Serialize>(
    state: &AppState,
    message: &router_types::federation_proto::RouterControlMessage<T>,
) {
    let Ok(bytes) = serde_json::to_vec(message) else { return };
    if !relay::publish_to_all(&state.relays, bytes).await {
        tracing::debug!(router_id = %state.config.router_id, "no relay accepted a federation announce");
    }
}

fn fresh_message_id() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}
