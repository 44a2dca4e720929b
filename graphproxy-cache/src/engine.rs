//! Two-tier cache for Graph API responses.
//!
//! The outer LRU is keyed by `(path, app)`; each entry holds a
//! content-deduplicated map keyed by `(uid, canonical residual query)`.
//! Direct-user responses are stored as parsed field tables so any field
//! subset can be served from one superset fetch; connection responses are
//! stored raw.

use crate::dedup::DedupMap;
use crate::lru::Lru;
use graphproxy_core::app::App;
use graphproxy_core::error::ProxyError;
use graphproxy_core::query::{self, QueryPairs};
use graphproxy_core::reply::Reply;
use graphproxy_core::token::parse_access_token;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::debug;

// ── Upstream collaborator ─────────────────────────────────────

/// One upstream response, as the cache consumes it.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl UpstreamResponse {
    pub fn status_line(&self) -> String {
        format!("{} {}", self.status, self.reason)
    }
}

/// Capability to fetch an object from the Graph API server.
pub trait GraphFetch: Send + Sync {
    fn fetch(&self, method: &str, path: &str, query: &str)
        -> Result<UpstreamResponse, ProxyError>;
}

// ── Cached values ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum EntryBody {
    /// Parsed field table for a direct-user response.
    Table(Map<String, Value>),
    /// Verbatim body for a connection response.
    Raw(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status_line: String,
    pub headers: Vec<(String, String)>,
    pub body: EntryBody,
}

/// The two operations the rest of the proxy needs from a cache. The
/// request gate and the realtime endpoint only see this trait, so the
/// test suite can substitute a recording fake.
pub trait RequestCache: Send + Sync {
    /// Serve a request already judged cacheable, fetching from the
    /// upstream on a miss.
    fn handle_request(
        &self,
        query: QueryPairs,
        path: &str,
        raw_query: &str,
        app: &App,
        upstream: &dyn GraphFetch,
    ) -> Result<Reply, ProxyError>;

    /// Drop every cached view of `url` for the app and for the anonymous
    /// context. Missing keys are ignored.
    fn invalidate(&self, app_id: &str, url: &str);
}

// ── Helpers ───────────────────────────────────────────────────

/// Canonical cache-key form: leading slash, no trailing slash.
fn normalize_path(path: &str) -> String {
    format!("/{}", path.trim_matches('/'))
}

/// Single-segment paths address a user directly and get the field-table
/// treatment; two-segment paths address a connection.
fn is_user_path(normalized: &str) -> bool {
    !normalized.trim_start_matches('/').contains('/')
}

/// The stored projection is re-serialized, so the upstream length no
/// longer applies.
fn strip_content_length(headers: &mut Vec<(String, String)>) {
    headers.retain(|(name, _)| !name.eq_ignore_ascii_case("content-length"));
}

/// Parse a response body into a field table. Anything that is not a JSON
/// object yields an empty table; the failure is contained to this entry.
fn response_to_table(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Project the requested fields out of a table as JSON. With no explicit
/// fields, every key not starting with `_` is returned.
fn project_fields(table: &Map<String, Value>, fields: Option<&str>) -> Vec<u8> {
    let mut projection = Map::new();
    match fields {
        Some(list) => {
            for field in list.split(',') {
                if let Some(value) = table.get(field) {
                    projection.insert(field.to_string(), value.clone());
                }
            }
        }
        None => {
            for (key, value) in table {
                if !key.starts_with('_') {
                    projection.insert(key.clone(), value.clone());
                }
            }
        }
    }
    serde_json::to_vec(&projection).unwrap_or_else(|_| b"{}".to_vec())
}

// ── Engine ────────────────────────────────────────────────────

type SharedDedup = Arc<Mutex<DedupMap<CacheEntry>>>;

/// The production [`RequestCache`].
///
/// One mutex guards the outer LRU and first-time dedup-map installation;
/// it is released before any upstream fetch. Each dedup map carries its
/// own short-lived mutex, held only across map operations. Two workers
/// missing on the same fingerprint may both fetch; content hashing keeps
/// the outcome equivalent, so the race is accepted.
pub struct CacheEngine {
    cache: Mutex<Lru<String, SharedDedup>>,
}

impl CacheEngine {
    pub fn new(size: usize) -> Self {
        Self {
            cache: Mutex::new(Lru::new(size)),
        }
    }

    /// Outer-key existence test; does not touch the access order.
    pub fn contains(&self, outer_key: &str) -> bool {
        self.cache
            .lock()
            .unwrap()
            .contains_key(&outer_key.to_string())
    }

    /// Sub-key existence test under an outer key; does not touch the
    /// access order.
    pub fn contains_sub_key(&self, outer_key: &str, sub_key: &str) -> bool {
        let dedup = {
            let cache = self.cache.lock().unwrap();
            cache.peek(&outer_key.to_string()).map(Arc::clone)
        };
        match dedup {
            Some(dedup) => dedup.lock().unwrap().contains_key(sub_key),
            None => false,
        }
    }

    /// Number of outer entries.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up the dedup map for `key`, installing an empty one on first
    /// sight, and the cached entry for `sub_key` if present. The freshly
    /// installed map is reachable by concurrent readers as soon as the
    /// engine lock is released.
    fn lookup_or_install(&self, key: &str, sub_key: &str) -> (SharedDedup, Option<CacheEntry>) {
        let mut cache = self.cache.lock().unwrap();
        if let Some(dedup) = cache.get(&key.to_string()) {
            let dedup = Arc::clone(dedup);
            let cached = dedup.lock().unwrap().get(sub_key).cloned();
            (dedup, cached)
        } else {
            let dedup: SharedDedup = Arc::new(Mutex::new(DedupMap::new()));
            cache.insert(key.to_string(), Arc::clone(&dedup));
            (dedup, None)
        }
    }
}

impl RequestCache for CacheEngine {
    fn handle_request(
        &self,
        mut query: QueryPairs,
        path: &str,
        raw_query: &str,
        app: &App,
        upstream: &dyn GraphFetch,
    ) -> Result<Reply, ProxyError> {
        let token = query::remove_param(&mut query, "access_token");
        let pieces = token.as_deref().and_then(parse_access_token);
        let (app_id, uid) = match &pieces {
            Some(token) => (token.app_id.clone(), token.uid.clone()),
            None => ("0".to_string(), "0".to_string()),
        };

        let path = normalize_path(path);
        let use_table = is_user_path(&path);
        let fields = if use_table {
            query::remove_param(&mut query, "fields")
        } else {
            None
        };

        let key = format!("{}__{}", path, app_id);
        let sub_key = format!("{}__{}", uid, query::encode_canonical(&query));
        debug!(key = %key, sub_key = %sub_key, "cache handling request");

        let (dedup, cached) = self.lookup_or_install(&key, &sub_key);

        if let Some(entry) = cached {
            debug!(key = %key, sub_key = %sub_key, "cache hit");
            let CacheEntry {
                status_line,
                headers,
                body,
            } = entry;
            return Ok(match body {
                EntryBody::Table(table) => Reply::new(
                    status_line,
                    headers,
                    project_fields(&table, fields.as_deref()),
                ),
                EntryBody::Raw(raw) => Reply::new(status_line, headers, raw),
            });
        }

        if use_table {
            fetch_table(
                &dedup,
                &sub_key,
                &path,
                query,
                token,
                fields.as_deref(),
                app,
                upstream,
            )
        } else {
            fetch_connection(&dedup, &sub_key, &path, raw_query, upstream)
        }
    }

    fn invalidate(&self, app_id: &str, url: &str) {
        let path = normalize_path(url);
        debug!(path = %path, app_id = %app_id, "invalidating");
        let mut cache = self.cache.lock().unwrap();
        cache.remove(&format!("{}__{}", path, app_id));
        // the same object may also be cached in the anonymous context
        cache.remove(&format!("{}__0", path));
    }
}

/// Miss on a direct-user path: refetch with the app's whole subscription
/// so one body serves every field subset, then project the caller's view.
#[allow(clippy::too_many_arguments)]
fn fetch_table(
    dedup: &SharedDedup,
    sub_key: &str,
    path: &str,
    query: QueryPairs,
    token: Option<String>,
    fields: Option<&str>,
    app: &App,
    upstream: &dyn GraphFetch,
) -> Result<Reply, ProxyError> {
    let mut fetch_query = query;
    let mut good_fields: Vec<&str> = app.good_fields.iter().map(String::as_str).collect();
    good_fields.sort_unstable();
    fetch_query.push(("fields".to_string(), good_fields.join(",")));
    if let Some(token) = token {
        fetch_query.push(("access_token".to_string(), token));
    }

    let response = upstream.fetch("GET", path, &query::encode_canonical(&fetch_query))?;
    if response.status != 200 {
        // error: send the raw response instead of a table, uncached
        return Ok(Reply::new(
            response.status_line(),
            response.headers,
            response.body,
        ));
    }

    let entry = {
        let mut dedup = dedup.lock().unwrap();
        if !dedup.link(sub_key, &response.body) {
            // unseen content: parse once, store alongside the raw body
            let mut headers = response.headers.clone();
            strip_content_length(&mut headers);
            let entry = CacheEntry {
                status_line: response.status_line(),
                headers,
                body: EntryBody::Table(response_to_table(&response.body)),
            };
            dedup.insert(sub_key, entry, &response.body);
        }
        dedup.get(sub_key).cloned()
    };

    let entry = entry
        .ok_or_else(|| ProxyError::Internal("cache entry missing after store".to_string()))?;
    let CacheEntry {
        status_line,
        headers,
        body,
    } = entry;
    let body = match body {
        EntryBody::Table(table) => project_fields(&table, fields),
        EntryBody::Raw(raw) => raw,
    };
    Ok(Reply::new(status_line, headers, body))
}

/// Miss on a connection path: fetch with the original query string
/// verbatim and cache the raw body on 200.
fn fetch_connection(
    dedup: &SharedDedup,
    sub_key: &str,
    path: &str,
    raw_query: &str,
    upstream: &dyn GraphFetch,
) -> Result<Reply, ProxyError> {
    let response = upstream.fetch("GET", path, raw_query)?;
    if response.status == 200 {
        let entry = CacheEntry {
            status_line: response.status_line(),
            headers: response.headers.clone(),
            body: EntryBody::Raw(response.body.clone()),
        };
        dedup.lock().unwrap().insert(sub_key, entry, &response.body);
    }
    Ok(Reply::new(
        response.status_line(),
        response.headers,
        response.body,
    ))
}
