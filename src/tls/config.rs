//! rustls configuration for both sides of the MITM tunnel

use rustls::{ClientConfig, RootCertStore, ServerConfig};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::tls::ca::{CertificateManager, HostCertResolver};

/// Create the server configuration for client-side TLS termination
///
/// Certificates are resolved per handshake from the SNI via the
/// certificate manager; safe defaults give TLS 1.2 as the minimum
/// version.
pub fn create_server_config(manager: Arc<CertificateManager>) -> Arc<ServerConfig> {
    let mut config = ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(HostCertResolver::new(manager)));

    // the tunnel relays HTTP/1.1 only
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Arc::new(config)
}

/// Create the client configuration for origin-side TLS sessions
pub fn create_client_config() -> Arc<ClientConfig> {
    let mut root_store = RootCertStore::empty();

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let mut added = 0;
            for cert in certs {
                if root_store.add(&rustls::Certificate(cert.0)).is_ok() {
                    added += 1;
                }
            }
            debug!("loaded {} system root certificates", added);
        }
        Err(e) => {
            warn!("could not load system root certificates: {}", e);
        }
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
}
