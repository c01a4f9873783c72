//! Configuration module for gvp-server.
//!
//! Handles loading configuration from the TOML file, CLI arguments and
//! environment variables, and converts it into the typed settings the
//! processors take at startup.

pub mod file;

use crate::config::file::FileConfig;
use gvp_core::processors::{ReconcilerConfig, StreamListenerConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        source: url::ParseError,
    },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Typed, validated configuration handed to `main` for wiring.
pub struct LoadedConfig {
    pub listen: SocketAddr,
    pub stream: StreamListenerConfig,
    pub ledger: LedgerSettings,
    pub reconciler: ReconcilerConfig,
    pub cache: CacheSettings,
    /// Viewer WebSocket keep-alive, shared with the stream settings.
    pub ws: WsSettings,
}

pub struct LedgerSettings {
    pub rpc_url: Url,
    pub contract_address: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

pub struct CacheSettings {
    pub redis_url: String,
    pub key_prefix: String,
    pub feed_cap: i64,
    pub campaign_ttl_secs: u64,
    pub token_decimals: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct WsSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Convert into typed settings
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        validate(&file_config)?;
        build_loaded_config(file_config)
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.stream.ping_interval_secs == 0 || config.stream.pong_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "stream keep-alive intervals must be non-zero".to_string(),
        ));
    }
    if config.stream.max_reconnect_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "stream.max_reconnect_attempts must be non-zero".to_string(),
        ));
    }
    if config.ledger.poll_interval_secs == 0 || config.ledger.request_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "ledger intervals must be non-zero".to_string(),
        ));
    }
    if config.reconciler.interval_secs == 0 || config.reconciler.orphan_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "reconciler intervals must be non-zero".to_string(),
        ));
    }
    // A sweep interval longer than the orphan timeout would leave stuck
    // donations invisible for longer than the timeout promises.
    if config.reconciler.interval_secs > config.reconciler.orphan_timeout_secs {
        return Err(ConfigError::ValidationError(format!(
            "reconciler.interval_secs ({}) must not exceed orphan_timeout_secs ({})",
            config.reconciler.interval_secs, config.reconciler.orphan_timeout_secs
        )));
    }
    if config.cache.feed_cap <= 0 {
        return Err(ConfigError::ValidationError(
            "cache.feed_cap must be positive".to_string(),
        ));
    }
    Ok(())
}

fn build_loaded_config(config: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let stream_url =
        Url::parse(&config.stream.url).map_err(|source| ConfigError::InvalidUrl {
            field: "stream.url",
            source,
        })?;
    let rpc_url =
        Url::parse(&config.ledger.rpc_url).map_err(|source| ConfigError::InvalidUrl {
            field: "ledger.rpc_url",
            source,
        })?;

    let ws = WsSettings {
        ping_interval: Duration::from_secs(config.stream.ping_interval_secs),
        pong_timeout: Duration::from_secs(config.stream.pong_timeout_secs),
    };

    Ok(LoadedConfig {
        listen: config.server.listen,
        stream: StreamListenerConfig {
            url: stream_url,
            global_stream_id: config.stream.global_stream_id,
            ping_interval: ws.ping_interval,
            pong_timeout: ws.pong_timeout,
            reconnect_base: Duration::from_millis(config.stream.reconnect_base_ms),
            reconnect_max: Duration::from_millis(config.stream.reconnect_max_ms),
            max_reconnect_attempts: config.stream.max_reconnect_attempts,
        },
        ledger: LedgerSettings {
            rpc_url,
            contract_address: config.ledger.contract_address,
            poll_interval: Duration::from_secs(config.ledger.poll_interval_secs),
            request_timeout: Duration::from_secs(config.ledger.request_timeout_secs),
        },
        reconciler: ReconcilerConfig {
            interval: Duration::from_secs(config.reconciler.interval_secs),
            orphan_timeout: Duration::from_secs(config.reconciler.orphan_timeout_secs),
        },
        cache: CacheSettings {
            redis_url: config.cache.redis_url,
            key_prefix: config.cache.key_prefix,
            feed_cap: config.cache.feed_cap,
            campaign_ttl_secs: config.cache.campaign_ttl_secs,
            token_decimals: config.cache.token_decimals,
        },
        ws,
    })
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(reconciler: &str) -> FileConfig {
        let toml_str = format!(
            r#"
[stream]
url = "wss://stream.example.com/v1"

[ledger]
rpc_url = "https://rpc.example.com"
contract_address = "0xcontract"

{reconciler}

[cache]
redis_url = "redis://localhost:6379"
"#
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[test]
    fn sweep_interval_must_fit_inside_orphan_timeout() {
        let config = base_config(
            "[reconciler]\ninterval_secs = 600\norphan_timeout_secs = 300",
        );
        assert!(matches!(
            validate(&config),
            Err(ConfigError::ValidationError(_))
        ));

        let config = base_config(
            "[reconciler]\ninterval_secs = 60\norphan_timeout_secs = 300",
        );
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn typed_config_converts_durations() {
        let config = base_config("");
        let loaded = build_loaded_config(config).unwrap();
        assert_eq!(loaded.stream.ping_interval, Duration::from_secs(20));
        assert_eq!(loaded.ledger.poll_interval, Duration::from_secs(5));
        assert_eq!(loaded.reconciler.interval, Duration::from_secs(60));
        assert_eq!(loaded.cache.key_prefix, "gvp");
    }

    #[test]
    fn bad_stream_url_is_rejected() {
        let mut config = base_config("");
        config.stream.url = "not a url".to_string();
        assert!(matches!(
            build_loaded_config(config),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }
}
