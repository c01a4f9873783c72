//! TOML file configuration structures.
//!
//! These structs directly map to the `gvp-config.toml` file format.

use serde::Deserialize;
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    pub stream: StreamSection,
    pub ledger: LedgerSection,
    #[serde(default)]
    pub reconciler: ReconcilerSection,
    pub cache: CacheSection,
}

/// Server configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Push-stream connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamSection {
    /// WebSocket URL of the donation push stream.
    pub url: String,
    /// Stream carrying donations for every campaign.
    #[serde(default = "default_global_stream")]
    pub global_stream_id: String,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_global_stream() -> String {
    "donations".to_string()
}

fn default_ping_interval() -> u64 {
    20
}

fn default_pong_timeout() -> u64 {
    45
}

fn default_reconnect_base() -> u64 {
    500
}

fn default_reconnect_max() -> u64 {
    30_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

/// Settlement-ledger RPC settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerSection {
    /// JSON-RPC endpoint of the settlement gateway.
    pub rpc_url: String,
    /// Donation contract address, scoping parameter for event fetches.
    pub contract_address: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_request_timeout() -> u64 {
    10
}

/// Reconciliation sweep settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerSection {
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_orphan_timeout")]
    pub orphan_timeout_secs: u64,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            orphan_timeout_secs: default_orphan_timeout(),
        }
    }
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_orphan_timeout() -> u64 {
    300
}

/// Redis cache/broker settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Entries kept per recent-donation feed.
    #[serde(default = "default_feed_cap")]
    pub feed_cap: i64,
    /// TTL of the cached campaign view, in seconds.
    #[serde(default = "default_campaign_ttl")]
    pub campaign_ttl_secs: u64,
    /// Decimals of the donation token, used for leaderboard scores.
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
}

fn default_key_prefix() -> String {
    "gvp".to_string()
}

fn default_feed_cap() -> i64 {
    50
}

fn default_campaign_ttl() -> u64 {
    30
}

fn default_token_decimals() -> u32 {
    18
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let toml_str = r#"
[stream]
url = "wss://stream.example.com/v1"

[ledger]
rpc_url = "https://rpc.example.com"
contract_address = "0xcontract"

[cache]
redis_url = "redis://localhost:6379"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.stream.global_stream_id, "donations");
        assert_eq!(config.stream.max_reconnect_attempts, 10);
        assert_eq!(config.reconciler.interval_secs, 60);
        assert_eq!(config.cache.feed_cap, 50);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[stream]
url = "wss://stream.example.com/v1"
ping_interval_secs = 5
pong_timeout_secs = 12

[ledger]
rpc_url = "https://rpc.example.com"
contract_address = "0xcontract"
poll_interval_secs = 2

[reconciler]
interval_secs = 30
orphan_timeout_secs = 120

[cache]
redis_url = "redis://localhost:6379"
feed_cap = 10
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.stream.ping_interval_secs, 5);
        assert_eq!(config.ledger.poll_interval_secs, 2);
        assert_eq!(config.reconciler.orphan_timeout_secs, 120);
        assert_eq!(config.cache.feed_cap, 10);
    }
}
