//! Router configuration: a flat environment-variable surface (§6), loaded once at startup.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

/// Router configuration, parsed from environment variables (and `.env`, loaded by `main`).
///
/// No per-network JSON configuration file: every knob named in the wire interfaces
/// section is a flat env var, so a single `clap::Parser` derive is the whole
/// configuration surface.
#[derive(Parser, Debug, Clone)]
#[command(name = "fedinfer-router")]
#[command(about = "Router control plane for a federated model-inference marketplace")]
pub struct RouterConfig {
    #[arg(long, env = "ROUTER_ID")]
    pub router_id: String,

    #[arg(long, env = "ROUTER_KEY_ID")]
    pub router_key_id: String,

    #[arg(long, env = "ROUTER_ENDPOINT")]
    pub router_endpoint: String,

    #[arg(long, env = "ROUTER_PORT", default_value_t = 8080)]
    pub router_port: u16,

    #[arg(long, env = "ROUTER_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub router_host: IpAddr,

    /// PEM-encoded Ed25519 or secp256k1 private key material for this router's signing
    /// identity. Loading/parsing happens in `main`; a missing key is a fatal config error
    /// (exit code 64), never a runtime error.
    #[arg(long, env = "ROUTER_PRIVATE_KEY_PEM")]
    pub router_private_key_pem: String,

    #[arg(long, env = "ROUTER_REQUIRE_PAYMENT", default_value_t = false)]
    pub router_require_payment: bool,

    #[arg(long, env = "ROUTER_STATE_FILE", default_value = "router-state.json")]
    pub router_state_file: PathBuf,

    #[arg(long, env = "ROUTER_REPLAY_WINDOW_MS", default_value_t = 300_000)]
    pub router_replay_window_ms: i64,

    #[arg(long, env = "ROUTER_FEE_BPS", default_value_t = 100)]
    pub router_fee_bps: u32,

    #[arg(long, env = "ROUTER_OFFLOAD_THRESHOLD", default_value_t = 0.75)]
    pub router_offload_threshold: f64,

    #[arg(long, env = "ROUTER_MAX_OFFLOADS", default_value_t = 16)]
    pub router_max_offloads: u32,

    #[arg(long, env = "ROUTER_AUCTION_TIMEOUT_MS", default_value_t = 500)]
    pub router_auction_timeout_ms: u64,

    /// Comma-separated bootstrap relay URLs.
    #[arg(long, env = "ROUTER_RELAY_BOOTSTRAP", value_delimiter = ',')]
    pub router_relay_bootstrap: Vec<String>,

    /// Comma-separated aggregator relay URLs, queried for peer discovery.
    #[arg(long, env = "ROUTER_RELAY_AGGREGATORS", value_delimiter = ',')]
    pub router_relay_aggregators: Vec<String>,

    /// Comma-separated relay URLs whose announces are trusted without further vetting.
    #[arg(long, env = "ROUTER_RELAY_TRUST", value_delimiter = ',')]
    pub router_relay_trust: Vec<String>,

    #[arg(long, env = "LN_ADAPTER_URL")]
    pub ln_adapter_url: Option<String>,

    #[arg(long, env = "ROUTER_PERSIST_INTERVAL_MS", default_value_t = 5_000)]
    pub router_persist_interval_ms: u64,

    #[arg(long, env = "ROUTER_HEARTBEAT_TTL_MS", default_value_t = 60_000)]
    pub router_heartbeat_ttl_ms: i64,

    #[arg(long, env = "ROUTER_COOLDOWN_BASE_MS", default_value_t = 10_000)]
    pub router_cooldown_base_ms: i64,

    #[arg(long, env = "ROUTER_COOLDOWN_CAP_MS", default_value_t = 600_000)]
    pub router_cooldown_cap_ms: i64,

    #[arg(long, env = "ROUTER_COOLDOWN_THRESHOLD", default_value_t = 3)]
    pub router_cooldown_threshold: u32,

    #[arg(long, env = "ROUTER_PAYMENT_TTL_MS", default_value_t = 60_000)]
    pub router_payment_ttl_ms: i64,

    #[arg(long, env = "ROUTER_CAPS_INTERVAL_MS", default_value_t = 30_000)]
    pub router_caps_interval_ms: u64,

    #[arg(long, env = "ROUTER_STATUS_INTERVAL_MS", default_value_t = 5_000)]
    pub router_status_interval_ms: u64,

    #[arg(long, env = "ROUTER_PRICE_INTERVAL_MS", default_value_t = 60_000)]
    pub router_price_interval_ms: u64,

    #[arg(long, env = "ROUTER_WORKER_POOL_SIZE")]
    pub router_worker_pool_size: Option<usize>,
}

impl RouterConfig {
    /// Loads configuration from the process environment, exiting with code 64 (config
    /// error, per §6) on a parse failure rather than panicking.
    pub fn load() -> Result<Self, clap::Error> {
        RouterConfig::try_parse()
    }

    pub fn worker_pool_size(&self) -> usize {
        self.router_worker_pool_size
            .unwrap_or_else(|| std::cmp::max(2, num_cpus()))
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
}
