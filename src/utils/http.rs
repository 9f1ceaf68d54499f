//! HTTP utility functions

use hyper::{Body, HeaderMap, Response, StatusCode};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Check if a header is a hop-by-hop header
pub fn is_hop_by_hop_header(name: &str) -> bool {
    let hop_by_hop_headers = [
        "connection",
        "keep-alive",
        "proxy-authenticate",
        "proxy-authorization",
        "proxy-connection",
        "te",
        "trailers",
        "transfer-encoding",
        "upgrade",
    ];

    hop_by_hop_headers.contains(&name.to_lowercase().as_str())
}

/// Convert a HeaderMap into a multi-value map, preserving value order
pub fn headers_to_multimap(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            map.entry(name.as_str().to_string())
                .or_default()
                .push(value_str.to_string());
        }
    }

    map
}

/// Parse a query string into a multi-value map, preserving value order
pub fn parse_query_multimap(query: Option<&str>) -> HashMap<String, Vec<String>> {
    let mut map: HashMap<String, Vec<String>> = HashMap::new();

    if let Some(query) = query {
        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            map.entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
    }

    map
}

/// Parse cookie header into key-value pairs; last write wins on duplicates
pub fn parse_cookies(cookie_header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for cookie in cookie_header.split(';') {
        let cookie = cookie.trim();
        if let Some(eq_pos) = cookie.find('=') {
            let name = cookie[..eq_pos].trim().to_string();
            let value = cookie[eq_pos + 1..].trim().to_string();
            cookies.insert(name, value);
        }
    }

    cookies
}

/// Parse host and port from a CONNECT target; port defaults to 443
pub fn parse_connect_target(target: &str) -> Result<(String, u16)> {
    let (host, port) = match target.rsplit_once(':') {
        Some((host, port)) if !port.contains(']') => {
            if host.is_empty() {
                return Err(Error::InvalidRequest(format!(
                    "invalid CONNECT target: {}",
                    target
                )));
            }
            let port = port.parse::<u16>().map_err(|_| {
                Error::InvalidRequest(format!("invalid port in CONNECT target: {}", target))
            })?;
            (host, port)
        }
        _ => (target, 443),
    };

    // IPv6 literals arrive bracketed
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok((host.to_string(), port))
}

/// Build a plain-text error response
pub fn build_error_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(Body::from(message.to_string()))
        .unwrap()
}
