//! HTTP message normalisation for capture
//!
//! Buffers request and response bodies fully so they can be persisted in
//! decoded form and replayed unchanged to the other side of the proxy.

use flate2::read::MultiGzDecoder;
use hyper::body::Bytes;
use hyper::header::{CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST};
use hyper::{Body, HeaderMap, Request, Response};
use mongodb::bson::oid::ObjectId;
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;

use crate::error::Result;
use crate::models::{RequestRecord, ResponseRecord};
use crate::utils::{headers_to_multimap, parse_cookies, parse_query_multimap};

/// Parse an intercepted request into a capture record
///
/// Returns the record, the raw body bytes as received on the wire, and a
/// rebuilt request whose body replays those bytes (the original body can
/// only be read once).
pub async fn parse_request(
    req: Request<Body>,
    client_addr: SocketAddr,
) -> Result<(RequestRecord, Bytes, Request<Body>)> {
    let (parts, body) = req.into_parts();
    let body_bytes = hyper::body::to_bytes(body).await?;

    let target_host = parts
        .uri
        .authority()
        .map(|a| a.to_string())
        .or_else(|| header_str(&parts.headers, HOST.as_str()))
        .unwrap_or_default();

    let is_gzipped = content_encoding_is_gzip(&parts.headers);

    let mut record = RequestRecord::new(
        parts.method.to_string(),
        parts.uri.path().to_string(),
        target_host,
        client_addr.to_string(),
    );
    record.query_params = parse_query_multimap(parts.uri.query());
    record.headers = headers_to_multimap(&parts.headers);
    if let Some(cookie_header) = header_str(&parts.headers, COOKIE.as_str()) {
        record.cookies = parse_cookies(&cookie_header);
    }
    record.is_gzipped = is_gzipped;
    record.body = decode_body(&body_bytes, is_gzipped);

    if let Some(content_type) = header_str(&parts.headers, CONTENT_TYPE.as_str()) {
        if content_type.starts_with("application/x-www-form-urlencoded") {
            record.form_params = parse_form_multimap(&body_bytes);
        }
    }

    let rebuilt = Request::from_parts(parts, Body::from(body_bytes.clone()));
    Ok((record, body_bytes, rebuilt))
}

/// Parse an upstream response into a capture record
///
/// Symmetric with [`parse_request`]: the response body is fully buffered
/// and a replayable response is returned for relaying to the client.
pub async fn parse_response(
    resp: Response<Body>,
    request_id: ObjectId,
) -> Result<(ResponseRecord, Bytes, Response<Body>)> {
    let (parts, body) = resp.into_parts();
    let body_bytes = hyper::body::to_bytes(body).await?;

    let is_gzipped = content_encoding_is_gzip(&parts.headers);
    let content_type = header_str(&parts.headers, CONTENT_TYPE.as_str()).unwrap_or_default();
    let content_length = header_str(&parts.headers, CONTENT_LENGTH.as_str())
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(-1);

    let record = ResponseRecord {
        id: None,
        request_id,
        status_code: parts.status.as_u16(),
        headers: headers_to_multimap(&parts.headers),
        body: decode_body(&body_bytes, is_gzipped),
        is_gzipped,
        content_type,
        content_length,
        timestamp: chrono::Utc::now(),
    };

    let rebuilt = Response::from_parts(parts, Body::from(body_bytes.clone()));
    Ok((record, body_bytes, rebuilt))
}

/// Replace a gzip-encoded request body with its decoded form
///
/// Invoked before forwarding upstream. No-op when the body is not gzip
/// or when decompression fails; the encoded stream is then forwarded
/// unchanged.
pub fn reshape_request_gzip(req: &mut Request<Body>, body_bytes: &Bytes) {
    if !content_encoding_is_gzip(req.headers()) {
        return;
    }
    if let Some(decoded) = decode_gzip(body_bytes) {
        req.headers_mut().remove(CONTENT_ENCODING);
        req.headers_mut()
            .insert(CONTENT_LENGTH, hyper::header::HeaderValue::from(decoded.len()));
        *req.body_mut() = Body::from(decoded);
    }
}

/// Replace a gzip-encoded response body with its decoded form
///
/// Invoked before relaying to the client, same fallback rules as
/// [`reshape_request_gzip`].
pub fn reshape_response_gzip(resp: &mut Response<Body>, body_bytes: &Bytes) {
    if !content_encoding_is_gzip(resp.headers()) {
        return;
    }
    if let Some(decoded) = decode_gzip(body_bytes) {
        resp.headers_mut().remove(CONTENT_ENCODING);
        resp.headers_mut()
            .insert(CONTENT_LENGTH, hyper::header::HeaderValue::from(decoded.len()));
        *resp.body_mut() = Body::from(decoded);
    }
}

fn content_encoding_is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Decode the stored body form: decompressed when possible, raw otherwise
fn decode_body(body_bytes: &Bytes, is_gzipped: bool) -> String {
    if is_gzipped {
        if let Some(decoded) = decode_gzip(body_bytes) {
            return String::from_utf8_lossy(&decoded).into_owned();
        }
    }
    String::from_utf8_lossy(body_bytes).into_owned()
}

fn decode_gzip(data: &[u8]) -> Option<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(data);
    let mut decoded = Vec::new();
    match decoder.read_to_end(&mut decoded) {
        Ok(_) => Some(decoded),
        Err(_) => None,
    }
}

fn parse_form_multimap(body: &[u8]) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (key, value) in form_urlencoded::parse(body) {
        map.entry(key.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    map
}
