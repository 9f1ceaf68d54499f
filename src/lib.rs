//! Rust Intercept Proxy - an HTTP/HTTPS man-in-the-middle proxy
//!
//! Terminates TLS on both sides of CONNECT tunnels with dynamically minted
//! certificates, captures every request/response pair to a document store,
//! and probes origins for hidden parameters reflected in response bodies.

pub mod config;
pub mod error;
pub mod logging;
pub mod miner;
pub mod models;
pub mod parser;
pub mod proxy;
pub mod storage;
pub mod tls;
pub mod utils;

// Re-export commonly used items
pub use config::{ProxyConfig, StoreConfig};
pub use error::{Error, Result};
pub use logging::init_logger;
pub use miner::ParamMiner;
pub use models::{RequestRecord, ResponseRecord, Transaction};
pub use proxy::{ProxyServer, ProxyService};
pub use storage::{MongoRepository, TransactionStore};
pub use tls::ca::CertificateManager;
