//! Interception engine
//!
//! Accepts client traffic, dispatches plain-HTTP forwarding vs
//! CONNECT-tunnelled TLS, and drives capture, probing and relay.

pub mod http_client;
pub mod server;
pub mod tunnel;

pub use server::{ProxyServer, ProxyService};
