//! CONNECT handling and MITM TLS tunnelling
//!
//! The client socket is taken over after the `200 Connection established`
//! reply; TLS is then terminated on both sides and decrypted bytes are
//! relayed until either peer closes.

use chrono::Utc;
use hyper::header::COOKIE;
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper::{Body, Request, Response, StatusCode};
use mongodb::bson::oid::ObjectId;
use rustls::ServerName;
use std::collections::HashMap;
use std::convert::Infallible;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tracing::{debug, error, info, warn};

use crate::models::{RequestRecord, ResponseRecord};
use crate::proxy::server::ProxyService;
use crate::utils::{build_error_response, headers_to_multimap, parse_cookies, parse_connect_target};

/// Handle a CONNECT request: capture it, open the tunnel, then MITM it
pub async fn handle_connect(
    service: Arc<ProxyService>,
    mut req: Request<Body>,
    remote_addr: SocketAddr,
) -> Result<Response<Body>, Infallible> {
    let target_host = match req.uri().authority() {
        Some(authority) => authority.to_string(),
        None => {
            error!("CONNECT request without target from {}", remote_addr);
            return Ok(build_error_response(
                StatusCode::BAD_REQUEST,
                "Invalid CONNECT target",
            ));
        }
    };

    info!("handling CONNECT request for {} from {}", target_host, remote_addr);

    let mut record = connect_request_record(&req, &target_host, remote_addr);
    if let Err(e) = service.store.save_request(&mut record).await {
        error!("error saving CONNECT request to store: {}", e);
    }
    let request_id = record.id.unwrap_or_else(ObjectId::new);

    let on_upgrade = match req.extensions_mut().remove::<OnUpgrade>() {
        Some(upgrade) => upgrade,
        None => {
            error!("connection from {} does not support tunnelling", remote_addr);
            return Ok(build_error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Hijacking not supported",
            ));
        }
    };

    tokio::spawn(async move {
        // the 200 reply is on the wire once the upgrade resolves; record
        // the opened tunnel either way
        let mut response_record = connect_response_record(request_id);
        if let Err(e) = service.store.save_response(&mut response_record).await {
            error!("error saving CONNECT response to store: {}", e);
        }

        match on_upgrade.await {
            Ok(upgraded) => {
                run_mitm_tunnel(service, upgraded, &target_host).await;
            }
            Err(e) => {
                error!("failed to take over CONNECT socket for {}: {}", target_host, e);
            }
        }
    });

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .body(Body::empty())
        .unwrap();
    // clients expect the RFC 7231 tunnel reply, not the canonical "OK"
    response
        .extensions_mut()
        .insert(hyper::ext::ReasonPhrase::from_static(b"Connection established"));
    Ok(response)
}

/// Terminate TLS on both sides of the tunnel and relay decrypted bytes
///
/// Any handshake or dial failure drops the connection; the client already
/// believes the tunnel is open, so errors are log-only.
async fn run_mitm_tunnel(service: Arc<ProxyService>, upgraded: Upgraded, target_host: &str) {
    let acceptor = TlsAcceptor::from(service.tls_server_config.clone());
    let client_tls = match acceptor.accept(upgraded).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("TLS handshake with client (for {}) failed: {}", target_host, e);
            return;
        }
    };
    debug!("TLS handshake with client successful for {}", target_host);

    let sni = client_tls
        .get_ref()
        .1
        .server_name()
        .map(|name| name.to_string());

    let (host, port) = match parse_connect_target(target_host) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("invalid CONNECT target {}: {}", target_host, e);
            return;
        }
    };
    let origin_name = sni.unwrap_or_else(|| host.clone());

    let dial_timeout = Duration::from_secs(service.config.dial_timeout);
    let tcp = match tokio::time::timeout(dial_timeout, TcpStream::connect((host.as_str(), port)))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("failed to connect to destination {}: {}", target_host, e);
            return;
        }
        Err(_) => {
            warn!("dial to destination {} timed out", target_host);
            return;
        }
    };

    if let Err(e) = set_tcp_keepalive(&tcp, Duration::from_secs(service.config.tcp_keepalive)) {
        debug!("failed to set TCP keepalive for {}: {}", target_host, e);
    }

    let server_name = match ServerName::try_from(origin_name.as_str()) {
        Ok(name) => name,
        Err(e) => {
            warn!("invalid origin server name {}: {}", origin_name, e);
            return;
        }
    };

    let connector = TlsConnector::from(service.tls_client_config.clone());
    let origin_tls = match connector.connect(server_name, tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(
                "failed to establish TLS connection to destination {}: {}",
                target_host, e
            );
            return;
        }
    };
    info!("TLS connection to destination {} established", target_host);

    relay(client_tls, origin_tls, target_host).await;
    debug!("tunnel for {} closed", target_host);
}

/// Copy bytes in both directions until each side terminates
///
/// The two directions run as independent tasks; finishing one direction
/// half-closes the peer and the other direction keeps running. Both are
/// awaited before the sockets are released.
async fn relay<C, O>(client: C, origin: O, target_host: &str)
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    O: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut origin_read, mut origin_write) = tokio::io::split(origin);

    let host = target_host.to_string();
    let client_to_origin = tokio::spawn(async move {
        match tokio::io::copy(&mut client_read, &mut origin_write).await {
            Ok(_) => {}
            Err(e) if is_clean_close(&e) => {}
            Err(e) => warn!("error copying client->dest for {}: {}", host, e),
        }
        let _ = origin_write.shutdown().await;
    });

    let host = target_host.to_string();
    let origin_to_client = tokio::spawn(async move {
        match tokio::io::copy(&mut origin_read, &mut client_write).await {
            Ok(_) => {}
            Err(e) if is_clean_close(&e) => {}
            Err(e) => warn!("error copying dest->client for {}: {}", host, e),
        }
        let _ = client_write.shutdown().await;
    });

    let _ = client_to_origin.await;
    let _ = origin_to_client.await;
}

/// EOF and torn-down sockets are normal tunnel termination
fn is_clean_close(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
    )
}

fn set_tcp_keepalive(stream: &TcpStream, interval: Duration) -> std::io::Result<()> {
    let socket = socket2::SockRef::from(stream);
    socket.set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(interval))
}

/// Synthetic capture record for the CONNECT request itself
fn connect_request_record(
    req: &Request<Body>,
    target_host: &str,
    remote_addr: SocketAddr,
) -> RequestRecord {
    let mut record = RequestRecord::new(
        req.method().to_string(),
        req.uri().path().to_string(),
        target_host.to_string(),
        remote_addr.to_string(),
    );
    record.headers = headers_to_multimap(req.headers());
    if let Some(cookie_header) = req.headers().get(COOKIE).and_then(|v| v.to_str().ok()) {
        record.cookies = parse_cookies(cookie_header);
    }
    record
}

/// Synthetic capture record for the tunnel-open reply
fn connect_response_record(request_id: ObjectId) -> ResponseRecord {
    ResponseRecord {
        id: None,
        request_id,
        status_code: 200,
        headers: HashMap::new(),
        body: "Connection established".to_string(),
        is_gzipped: false,
        content_type: "text/plain".to_string(),
        content_length: 22,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_records_capture_the_tunnel() {
        let req = Request::builder()
            .method("CONNECT")
            .uri("secure.test:443")
            .header("cookie", "session=abc")
            .header("user-agent", "curl/8.0")
            .body(Body::empty())
            .unwrap();
        let remote: SocketAddr = "10.0.0.7:52000".parse().unwrap();

        let record = connect_request_record(&req, "secure.test:443", remote);
        assert_eq!(record.method, "CONNECT");
        assert_eq!(record.path, "");
        assert_eq!(record.target_host, "secure.test:443");
        assert_eq!(record.client_ip, "10.0.0.7:52000");
        assert_eq!(record.cookies.get("session"), Some(&"abc".to_string()));
        assert!(record.headers.contains_key("user-agent"));
        assert!(record.query_params.is_empty());

        let request_id = ObjectId::new();
        let response = connect_response_record(request_id);
        assert_eq!(response.request_id, request_id);
        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "Connection established");
        assert_eq!(response.content_length, 22);
        assert_eq!(response.content_type, "text/plain");
    }

    #[test]
    fn clean_close_kinds() {
        assert!(is_clean_close(&std::io::Error::from(ErrorKind::UnexpectedEof)));
        assert!(is_clean_close(&std::io::Error::from(ErrorKind::BrokenPipe)));
        assert!(!is_clean_close(&std::io::Error::from(ErrorKind::PermissionDenied)));
    }
}
