//! Shared upstream HTTP client
//!
//! One pooled client serves both the forwarding path and the parameter
//! prober, speaking plain HTTP and HTTPS to origins.

use hyper::client::HttpConnector;
use hyper::{Body, Client};

/// Upstream client capable of both plain-HTTP and TLS origins
pub type HttpsClient = Client<hyper_rustls::HttpsConnector<HttpConnector>, Body>;

/// Build the shared upstream client with system trust roots
pub fn build_https_client() -> HttpsClient {
    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_native_roots()
        .https_or_http()
        .enable_http1()
        .build();

    Client::builder().build(https)
}
