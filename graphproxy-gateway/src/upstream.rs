//! Blocking HTTPS client for the Graph API server.
//!
//! Fetches run directly on the worker that needs them; a stalled upstream
//! suspends only that worker. Responses are returned whole (status,
//! headers, body) for the cache and gate to mirror.

use graphproxy_cache::engine::{GraphFetch, UpstreamResponse};
use graphproxy_core::error::ProxyError;
use std::time::Duration;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct GraphClient {
    server: String,
    client: reqwest::blocking::Client,
}

impl GraphClient {
    pub fn new(server: &str) -> Result<Self, ProxyError> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| ProxyError::Upstream(error.to_string()))?;
        Ok(Self {
            server: server.to_string(),
            client,
        })
    }

    fn url(&self, path: &str, query: &str) -> String {
        build_url(&self.server, path, query)
    }
}

fn build_url(server: &str, path: &str, query: &str) -> String {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    if query.is_empty() {
        format!("https://{server}{path}")
    } else {
        format!("https://{server}{path}?{query}")
    }
}

impl GraphFetch for GraphClient {
    fn fetch(
        &self,
        method: &str,
        path: &str,
        query: &str,
    ) -> Result<UpstreamResponse, ProxyError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|error| ProxyError::Upstream(error.to_string()))?;
        let url = self.url(path, query);
        debug!(method = %method, url = %url, "fetching from graph server");

        let response = self
            .client
            .request(method, &url)
            .send()
            .map_err(|error| ProxyError::Upstream(error.to_string()))?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .map_err(|error| ProxyError::Upstream(error.to_string()))?
            .to_vec();

        Ok(UpstreamResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            headers,
            body,
        })
    }
}
