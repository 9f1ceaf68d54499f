//! Proxy server: listener, dispatch and the plain-HTTP forwarding path

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use mongodb::bson::oid::ObjectId;
use rustls::{ClientConfig, ServerConfig};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::ProxyConfig;
use crate::miner::ParamMiner;
use crate::parser;
use crate::proxy::http_client::{build_https_client, HttpsClient};
use crate::proxy::tunnel;
use crate::storage::{MongoRepository, TransactionStore};
use crate::tls::ca::CertificateManager;
use crate::tls::config::{create_client_config, create_server_config};
use crate::utils::{build_error_response, is_hop_by_hop_header};

/// Top-level proxy server bound to the configured listen address
pub struct ProxyServer {
    config: ProxyConfig,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    /// Start the proxy server
    ///
    /// Fatal when the CA cannot be loaded or the capture store is
    /// unreachable; everything after startup is logged and non-fatal.
    pub async fn start(self) -> anyhow::Result<()> {
        let listen_addr = self.config.listen_addr;
        let service = Arc::new(ProxyService::init(self.config).await?);

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let service = service.clone();
            let remote_addr = conn.remote_addr();
            debug!("new connection from {}", remote_addr);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let service = service.clone();
                    async move { service.handle_request(req, remote_addr).await }
                }))
            }
        });

        let server = Server::bind(&listen_addr).serve(make_svc);
        info!("proxy server listening on {}", listen_addr);

        server.await?;
        Ok(())
    }
}

/// Shared state driving interception: store, prober, upstream client and
/// the TLS configurations for both sides of a MITM tunnel
pub struct ProxyService {
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) miner: Arc<ParamMiner>,
    pub(crate) client: HttpsClient,
    pub(crate) tls_server_config: Arc<ServerConfig>,
    pub(crate) tls_client_config: Arc<ClientConfig>,
    pub(crate) config: ProxyConfig,
}

impl ProxyService {
    /// Assemble the service from pre-built collaborators
    pub fn new(
        config: ProxyConfig,
        store: Arc<dyn TransactionStore>,
        cert_manager: Arc<CertificateManager>,
    ) -> Self {
        let client = build_https_client();
        let miner = Arc::new(ParamMiner::from_file(&config.params_path, client.clone()));
        if !miner.is_enabled() {
            info!("parameter prober disabled (no candidates loaded)");
        }

        Self {
            store,
            miner,
            client,
            tls_server_config: create_server_config(cert_manager),
            tls_client_config: create_client_config(),
            config,
        }
    }

    /// Load the CA, connect the capture store and assemble the service
    pub async fn init(config: ProxyConfig) -> anyhow::Result<Self> {
        let cert_manager = Arc::new(CertificateManager::from_files(
            &config.ca_cert_path,
            &config.ca_key_path,
        )?);
        let store: Arc<dyn TransactionStore> = Arc::new(
            MongoRepository::connect(&config.store.uri, &config.store.database).await?,
        );

        Ok(Self::new(config, store, cert_manager))
    }

    /// Handle an incoming proxy request
    pub async fn handle_request(
        self: Arc<Self>,
        req: Request<Body>,
        remote_addr: SocketAddr,
    ) -> Result<Response<Body>, Infallible> {
        info!("{} {} from {}", req.method(), req.uri(), remote_addr.ip());

        if req.method() == Method::CONNECT {
            tunnel::handle_connect(self, req, remote_addr).await
        } else {
            self.handle_http_request(req, remote_addr).await
        }
    }

    /// Forward a plain-HTTP request, capturing both sides
    async fn handle_http_request(
        &self,
        req: Request<Body>,
        remote_addr: SocketAddr,
    ) -> Result<Response<Body>, Infallible> {
        let (mut record, body_bytes, mut outbound) =
            match parser::parse_request(req, remote_addr).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("error parsing request: {}", e);
                    return Ok(build_error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Error parsing request",
                    ));
                }
            };

        if let Err(e) = self.store.save_request(&mut record).await {
            error!("error saving request to store: {}", e);
        }

        strip_hop_by_hop_headers(outbound.headers_mut());
        parser::reshape_request_gzip(&mut outbound, &body_bytes);

        let target_url = outbound.uri().to_string();
        info!("forwarding request to {}", target_url);

        if self.miner.is_enabled() {
            let miner = self.miner.clone();
            let method = outbound.method().clone();
            let headers = outbound.headers().clone();
            let url = target_url.clone();
            // probing must not delay the primary forward
            tokio::spawn(async move {
                miner.probe(method, &url, &headers).await;
            });
        }

        let timeout = Duration::from_secs(self.config.request_timeout);
        let response = match tokio::time::timeout(timeout, self.client.request(outbound)).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("error performing request to {}: {}", target_url, e);
                return Ok(build_error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Error forwarding request",
                ));
            }
            Err(_) => {
                error!("request to {} timed out", target_url);
                return Ok(build_error_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Error forwarding request",
                ));
            }
        };

        info!("received response from {}: {}", target_url, response.status());

        let request_id = record.id.unwrap_or_else(ObjectId::new);
        let (mut response_record, response_bytes, mut client_response) =
            match parser::parse_response(response, request_id).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("error parsing response from {}: {}", target_url, e);
                    return Ok(build_error_response(
                        StatusCode::SERVICE_UNAVAILABLE,
                        "Error forwarding request",
                    ));
                }
            };

        if let Err(e) = self.store.save_response(&mut response_record).await {
            error!("error saving response to store: {}", e);
        }

        parser::reshape_response_gzip(&mut client_response, &response_bytes);
        strip_hop_by_hop_headers(client_response.headers_mut());

        Ok(client_response)
    }
}

/// Drop headers that only apply to the incoming connection
fn strip_hop_by_hop_headers(headers: &mut hyper::HeaderMap) {
    let names: Vec<_> = headers
        .keys()
        .filter(|name| is_hop_by_hop_header(name.as_str()))
        .cloned()
        .collect();
    for name in names {
        headers.remove(&name);
    }
}
