//! Reflected-parameter discovery
//!
//! For each configured candidate name, a side request carrying a random
//! probe value is sent to the origin; when the value comes back in the
//! response body the origin accepted and reflected the hidden parameter.

use hyper::header::{CONTENT_LENGTH, TRANSFER_ENCODING};
use hyper::{Body, HeaderMap, Method, Request};
use rand::RngCore;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::proxy::http_client::HttpsClient;

/// Probes origins for hidden query parameters reflected in response bodies
pub struct ParamMiner {
    params: Vec<String>,
    client: HttpsClient,
}

impl ParamMiner {
    /// Create a miner over an explicit candidate list
    pub fn new(params: Vec<String>, client: HttpsClient) -> Self {
        Self { params, client }
    }

    /// Load the candidate list from a line-oriented file
    ///
    /// Blank lines are stripped and surrounding whitespace trimmed. A
    /// missing or unreadable file disables probing.
    pub fn from_file(path: impl AsRef<Path>, client: HttpsClient) -> Self {
        let path = path.as_ref();
        let params = match load_params(path) {
            Ok(params) => {
                info!("loaded {} parameters from {}", params.len(), path.display());
                params
            }
            Err(e) => {
                warn!("failed to load parameters from {}: {}", path.display(), e);
                Vec::new()
            }
        };

        Self::new(params, client)
    }

    /// Whether any candidates are configured
    pub fn is_enabled(&self) -> bool {
        !self.params.is_empty()
    }

    /// Probe every candidate against the given request's origin
    ///
    /// Returns the (name, probe value) pairs that were reflected. Failures
    /// are logged and skipped per candidate.
    pub async fn probe(
        &self,
        method: Method,
        url: &str,
        headers: &HeaderMap,
    ) -> Vec<(String, String)> {
        let mut findings = Vec::new();

        for param in &self.params {
            let value = random_probe_value();
            let probe_url = append_query_param(url, param, &value);

            debug!("testing parameter {} with URL: {}", param, probe_url);

            let mut probe_req = match Request::builder()
                .method(method.clone())
                .uri(&probe_url)
                .body(Body::empty())
            {
                Ok(req) => req,
                Err(e) => {
                    warn!("error creating probe request for {}: {}", probe_url, e);
                    continue;
                }
            };

            *probe_req.headers_mut() = headers.clone();
            // the probe carries no body
            probe_req.headers_mut().remove(CONTENT_LENGTH);
            probe_req.headers_mut().remove(TRANSFER_ENCODING);

            let response = match self.client.request(probe_req).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("error performing probe request to {}: {}", probe_url, e);
                    continue;
                }
            };

            let body = match hyper::body::to_bytes(response.into_body()).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("error reading probe response body: {}", e);
                    continue;
                }
            };

            if String::from_utf8_lossy(&body).contains(&value) {
                info!("FOUND REFLECTED PARAMETER: {}", param);
                info!("hidden parameter probe value: {}", value);
                findings.push((param.clone(), value));
            }
        }

        findings
    }
}

fn load_params(path: &Path) -> std::io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(contents
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .map(|line| line.to_string())
        .collect())
}

/// 16 random bytes, hex-encoded to 32 characters
fn random_probe_value() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Append `name=value` to a URL, respecting an existing query string
fn append_query_param(url: &str, name: &str, value: &str) -> String {
    if url.contains('?') {
        format!("{}&{}={}", url, name, value)
    } else {
        format!("{}?{}={}", url, name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::http_client::build_https_client;

    #[test]
    fn test_random_probe_value_shape() {
        let value = random_probe_value();
        assert_eq!(value.len(), 32);
        assert!(value.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(value, random_probe_value());
    }

    #[test]
    fn test_append_query_param() {
        assert_eq!(
            append_query_param("http://h.test/x", "debug", "1"),
            "http://h.test/x?debug=1"
        );
        assert_eq!(
            append_query_param("http://h.test/x?a=b", "debug", "1"),
            "http://h.test/x?a=b&debug=1"
        );
    }

    #[test]
    fn test_load_params_strips_blanks() {
        let path = std::env::temp_dir().join("miner_params_test.txt");
        fs::write(&path, "debug\n\n  admin  \n\ntrace\n").unwrap();

        let params = load_params(&path).unwrap();
        assert_eq!(params, vec!["debug", "admin", "trace"]);

        fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_missing_params_file_disables_miner() {
        let miner = ParamMiner::from_file("/nonexistent/params.txt", build_https_client());
        assert!(!miner.is_enabled());
    }
}
