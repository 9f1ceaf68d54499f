//! Proxy server configuration settings

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the intercepting proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Server listening address
    pub listen_addr: SocketAddr,

    /// Log level configuration
    pub log_level: String,

    /// Path to the PEM-encoded signing CA certificate
    pub ca_cert_path: String,

    /// Path to the PEM-encoded signing CA private key
    pub ca_key_path: String,

    /// Path to the newline-separated parameter candidate list
    pub params_path: String,

    /// Capture store configuration
    pub store: StoreConfig,

    /// End-to-end HTTP forwarding timeout in seconds
    pub request_timeout: u64,

    /// TCP dial timeout for CONNECT tunnels in seconds
    pub dial_timeout: u64,

    /// TCP keepalive interval for origin connections in seconds
    pub tcp_keepalive: u64,
}

/// MongoDB capture store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Connection URI
    pub uri: String,

    /// Database name
    pub database: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".parse().unwrap(),
            log_level: "info".to_string(),
            ca_cert_path: "ca.crt".to_string(),
            ca_key_path: "ca.key".to_string(),
            params_path: "params.txt".to_string(),
            store: StoreConfig::default(),
            request_timeout: 30,
            dial_timeout: 10,
            tcp_keepalive: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "proxy_db".to_string(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from environment variables with fallback to defaults
    pub fn from_env() -> Self {
        use std::env;

        let mut config = ProxyConfig::default();

        if let Ok(addr_str) = env::var("PROXY_LISTEN_ADDR") {
            if let Ok(addr) = addr_str.parse() {
                config.listen_addr = addr;
            }
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            config.log_level = log_level;
        }

        if let Ok(cert_path) = env::var("CA_CERT_PATH") {
            config.ca_cert_path = cert_path;
        }

        if let Ok(key_path) = env::var("CA_KEY_PATH") {
            config.ca_key_path = key_path;
        }

        if let Ok(params_path) = env::var("PARAMS_PATH") {
            config.params_path = params_path;
        }

        if let Ok(uri) = env::var("MONGO_URI") {
            config.store.uri = uri;
        }

        if let Ok(database) = env::var("MONGO_DB") {
            config.store.database = database;
        }

        if let Ok(timeout) = env::var("PROXY_REQUEST_TIMEOUT") {
            if let Ok(timeout_val) = timeout.parse() {
                config.request_timeout = timeout_val;
            }
        }

        if let Ok(timeout) = env::var("PROXY_DIAL_TIMEOUT") {
            if let Ok(timeout_val) = timeout.parse() {
                config.dial_timeout = timeout_val;
            }
        }

        config
    }
}
