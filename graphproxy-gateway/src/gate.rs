//! Request gate for the proxy endpoint.
//!
//! Takes Graph API requests and either serves them from the cache engine
//! or passes them through to the upstream. A request bypasses the cache
//! when any of these hold:
//!
//! 1. It asks for a field outside the app's realtime subscription.
//! 2. It is not a GET.
//! 3. The app has never seen a request from the targeted user (only users
//!    known to have authorized the app are kept fresh by updates).
//! 4. The app's `check_request` verification fails.
//! 5. It is not for a user or a direct connection of a user.
//! 6. A validator is present and rejects it.
//!
//! Non-GETs also proactively invalidate cache entries they are likely to
//! affect before being passed through.

use crate::request::HttpRequest;
use graphproxy_cache::engine::{GraphFetch, RequestCache};
use graphproxy_core::app::{App, AppRegistry};
use graphproxy_core::query;
use graphproxy_core::reply::Reply;
use graphproxy_core::token::{parse_access_token, AccessToken};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default profile fields when the request names none.
pub const USER_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "name",
    "hometown",
    "location",
    "about",
    "bio",
    "relationship_status",
    "significant_other",
    "work",
    "education",
    "gender",
];

/// Connections the realtime API does not deliver updates for.
const CONNECTIONS_BLACKLIST: &[&str] = &[
    "home", "tagged", "posts", "likes", "photos", "albums", "videos", "groups", "notes",
    "events", "inbox", "outbox", "updates",
];

/// A write to a connection can change these sibling connections.
fn invalidate_siblings(conn: &str) -> Option<&'static [&'static str]> {
    match conn {
        "feed" => Some(&["statuses", "feed", "links"]),
        "links" => Some(&["feed", "links"]),
        _ => None,
    }
}

/// Opaque caller-authorization predicate.
pub type Validator = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

pub struct RequestGate {
    validator: Option<Validator>,
    cache: Option<Arc<dyn RequestCache>>,
    apps: Arc<AppRegistry>,
    upstream: Arc<dyn GraphFetch>,
}

impl RequestGate {
    pub fn new(
        validator: Option<Validator>,
        cache: Option<Arc<dyn RequestCache>>,
        apps: Arc<AppRegistry>,
        upstream: Arc<dyn GraphFetch>,
    ) -> Self {
        Self {
            validator,
            cache,
            apps,
            upstream,
        }
    }

    /// Fulfill one Graph API request.
    pub fn handle(&self, request: &HttpRequest) -> Reply {
        let mut uri_parts: Vec<String> = request
            .path
            .trim_matches('/')
            .split('/')
            .map(str::to_string)
            .collect();
        let query_parms = query::parse_query(&request.query);

        if let Some(validator) = &self.validator {
            if !validator(request) {
                return Reply::forbidden("Failed to validate request\n");
            }
        }

        // determine the viewer context and application, if an access
        // token exists; malformed tokens fall back to the default app
        let mut app = None;
        let mut token_pieces: Option<AccessToken> = None;
        if let Some(raw_token) = query::first_value(&query_parms, "access_token") {
            token_pieces = parse_access_token(raw_token);
            app = match &token_pieces {
                Some(pieces) => self.apps.get(&pieces.app_id),
                None => self.apps.default_app(),
            };
        }

        // /me is not a stable cache key: substitute the token's uid
        let uid = token_pieces
            .as_ref()
            .map(|pieces| pieces.uid.clone())
            .unwrap_or_default();
        if uri_parts[0].to_uppercase() == "ME" && !uid.is_empty() {
            uri_parts[0] = uid.clone();
        }
        let path = format!("/{}", uri_parts.join("/"));

        // last chance to load an app to handle this
        let app = match app.or_else(|| self.apps.default_app()) {
            Some(app) => app,
            None => {
                info!("bypassing cache due to missing application settings");
                return self.pass_through(request, &path);
            }
        };

        // non-GETs typically change the results of subsequent GETs, so
        // invalidate opportunistically before passing through
        if request.method != "GET" {
            self.invalidate_for_post(&app, &uri_parts);
            return self.pass_through(request, &path);
        }

        let fields: Vec<String> = match query::first_value(&query_parms, "fields") {
            Some(list) => list.split(',').map(str::to_string).collect(),
            None => USER_FIELDS.iter().map(|s| s.to_string()).collect(),
        };

        if !app.check_user(&uid, &uri_parts[0], self.apps.default_app().as_deref()) {
            info!(requestee = %uri_parts[0], "bypassing cache since user not known to be app user");
            return self.pass_through(request, &path);
        }
        if cannot_cache(&request.method, &uri_parts) {
            info!(path = %path, "bypassing cache because the URI is not cacheable");
            return self.pass_through(request, &path);
        }
        if !app.check_request(&uri_parts, &fields) {
            info!("bypassing cache since the app rejected the request");
            return self.pass_through(request, &path);
        }

        match &self.cache {
            Some(cache) => match cache.handle_request(
                query_parms,
                &path,
                &request.query,
                &app,
                self.upstream.as_ref(),
            ) {
                Ok(reply) => reply,
                Err(error) => {
                    warn!(error = %error, "cache request failed");
                    Reply::internal_error()
                }
            },
            None => {
                warn!("cache does not exist, passing request through");
                self.pass_through(request, &path)
            }
        }
    }

    /// Forward the request to the upstream verbatim.
    fn pass_through(&self, request: &HttpRequest, path: &str) -> Reply {
        match self.upstream.fetch(&request.method, path, &request.query) {
            Ok(response) => Reply::new(response.status_line(), response.headers, response.body),
            Err(error) => {
                warn!(error = %error, "upstream fetch failed");
                Reply::internal_error()
            }
        }
    }

    /// Invalidate URLs a non-GET to a connection is likely to affect.
    fn invalidate_for_post(&self, app: &App, uri_parts: &[String]) {
        let Some(cache) = &self.cache else { return };
        if uri_parts.len() != 2 {
            return;
        }
        let Some(siblings) = invalidate_siblings(&uri_parts[1]) else {
            return;
        };
        for sibling in siblings {
            debug!(user = %uri_parts[0], connection = %sibling, "invalidating after write");
            cache.invalidate(&app.id, &format!("/{}/{}", uri_parts[0], sibling));
        }
    }
}

/// Simple rules ruling out whole request shapes from caching.
fn cannot_cache(method: &str, uri_parts: &[String]) -> bool {
    // only GETs can be cached; everything else is assumed to have
    // side effects
    if method != "GET" {
        return true;
    }
    // must be an item directly, or a non-blacklisted connection of one
    if uri_parts.len() > 2 {
        return true;
    }
    if uri_parts.len() == 2 && CONNECTIONS_BLACKLIST.contains(&uri_parts[1].as_str()) {
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphproxy_cache::engine::UpstreamResponse;
    use graphproxy_core::config::AppConfig;
    use graphproxy_core::error::ProxyError;
    use graphproxy_core::query::QueryPairs;
    use std::sync::Mutex;

    // ── Recording fakes ──────────────────────────────────────────

    #[derive(Default)]
    struct RecordingCache {
        handled: Mutex<Vec<(String, String)>>,
        invalidations: Mutex<Vec<(String, String)>>,
    }

    impl RequestCache for RecordingCache {
        fn handle_request(
            &self,
            _query: QueryPairs,
            path: &str,
            raw_query: &str,
            _app: &App,
            _upstream: &dyn GraphFetch,
        ) -> Result<Reply, ProxyError> {
            self.handled
                .lock()
                .unwrap()
                .push((path.to_string(), raw_query.to_string()));
            Ok(Reply::ok_text("cached"))
        }

        fn invalidate(&self, app_id: &str, url: &str) {
            self.invalidations
                .lock()
                .unwrap()
                .push((app_id.to_string(), url.to_string()));
        }
    }

    #[derive(Default)]
    struct RecordingUpstream {
        calls: Mutex<Vec<(String, String, String)>>,
    }

    impl GraphFetch for RecordingUpstream {
        fn fetch(
            &self,
            method: &str,
            path: &str,
            query: &str,
        ) -> Result<UpstreamResponse, ProxyError> {
            self.calls.lock().unwrap().push((
                method.to_string(),
                path.to_string(),
                query.to_string(),
            ));
            Ok(UpstreamResponse {
                status: 200,
                reason: "OK".to_string(),
                headers: vec![],
                body: b"upstream".to_vec(),
            })
        }
    }

    struct FailingUpstream;

    impl GraphFetch for FailingUpstream {
        fn fetch(
            &self,
            _method: &str,
            _path: &str,
            _query: &str,
        ) -> Result<UpstreamResponse, ProxyError> {
            Err(ProxyError::Upstream("connection refused".to_string()))
        }
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn registry(fields: &[&str], conns: &[&str]) -> Arc<AppRegistry> {
        Arc::new(AppRegistry::from_config(&[AppConfig {
            app_id: "42".to_string(),
            app_cred: None,
            app_secret: None,
            whitelist_fields: fields.iter().map(|s| s.to_string()).collect(),
            whitelist_connections: conns.iter().map(|s| s.to_string()).collect(),
            blacklist_fields: vec![],
            blacklist_connections: vec![],
        }]))
    }

    struct Harness {
        gate: RequestGate,
        cache: Arc<RecordingCache>,
        upstream: Arc<RecordingUpstream>,
    }

    fn harness(fields: &[&str], conns: &[&str]) -> Harness {
        harness_with_validator(fields, conns, None)
    }

    fn harness_with_validator(
        fields: &[&str],
        conns: &[&str],
        validator: Option<Validator>,
    ) -> Harness {
        let cache = Arc::new(RecordingCache::default());
        let upstream = Arc::new(RecordingUpstream::default());
        let gate = RequestGate::new(
            validator,
            Some(Arc::clone(&cache) as Arc<dyn RequestCache>),
            registry(fields, conns),
            Arc::clone(&upstream) as Arc<dyn GraphFetch>,
        );
        Harness {
            gate,
            cache,
            upstream,
        }
    }

    fn get(path: &str, query: &str) -> HttpRequest {
        HttpRequest::new("GET", path, query)
    }

    const TOKEN: &str = "access_token=42|sess-u1|sig";

    // ── Validator ────────────────────────────────────────────────

    #[test]
    fn validator_rejection_is_403() {
        let validator: Validator = Arc::new(|_request: &HttpRequest| false);
        let h = harness_with_validator(&["name"], &[], Some(validator));
        let reply = h.gate.handle(&get("/u1", TOKEN));
        assert_eq!(reply.status, "403 Forbidden");
        assert_eq!(reply.body, b"Failed to validate request\n");
        assert!(h.upstream.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn passing_validator_continues() {
        let validator: Validator = Arc::new(|_request: &HttpRequest| true);
        let h = harness_with_validator(&["name"], &[], Some(validator));
        let reply = h.gate.handle(&get("/u1", &format!("{TOKEN}&fields=name")));
        assert_eq!(reply.body, b"cached");
    }

    // ── Cache-eligible requests ──────────────────────────────────

    #[test]
    fn eligible_request_is_served_from_cache() {
        let h = harness(&["name"], &[]);
        let reply = h.gate.handle(&get("/u1", &format!("{TOKEN}&fields=name")));
        assert_eq!(reply.body, b"cached");
        let handled = h.cache.handled.lock().unwrap();
        assert_eq!(handled.len(), 1);
        assert_eq!(handled[0].0, "/u1");
        assert!(h.upstream.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn me_is_rewritten_to_token_uid() {
        let h = harness(&["name"], &[]);
        let reply = h.gate.handle(&get("/me", &format!("{TOKEN}&fields=name")));
        assert_eq!(reply.body, b"cached");
        assert_eq!(h.cache.handled.lock().unwrap()[0].0, "/u1");
    }

    #[test]
    fn default_fields_apply_when_none_requested() {
        let h = harness(USER_FIELDS, &[]);
        let reply = h.gate.handle(&get("/u1", TOKEN));
        assert_eq!(reply.body, b"cached");
    }

    // ── Bypass ladder ────────────────────────────────────────────

    #[test]
    fn unknown_requestee_passes_through_until_seen() {
        let h = harness(&["name"], &[]);
        // u2 asks for u1: u1 has never issued a request through us
        let other = "access_token=42|sess-u2|sig&fields=name";
        let reply = h.gate.handle(&get("/u1", other));
        assert_eq!(reply.body, b"upstream");
        assert!(h.cache.handled.lock().unwrap().is_empty());

        // u1 shows up, which teaches the app about them
        h.gate.handle(&get("/u1", &format!("{TOKEN}&fields=name")));
        // now u2's request for u1 is cacheable
        let reply = h.gate.handle(&get("/u1", other));
        assert_eq!(reply.body, b"cached");
    }

    #[test]
    fn unsubscribed_fields_pass_through() {
        let h = harness(&["name"], &[]);
        let reply = h
            .gate
            .handle(&get("/u1", &format!("{TOKEN}&fields=name,hometown")));
        assert_eq!(reply.body, b"upstream");
        assert!(h.cache.handled.lock().unwrap().is_empty());
    }

    #[test]
    fn blacklisted_connection_passes_through() {
        // photos is realtime-blacklisted even when whitelisted for the app
        let h = harness(&[], &["photos"]);
        let reply = h.gate.handle(&get("/u1/photos", TOKEN));
        assert_eq!(reply.body, b"upstream");
        assert!(h.cache.handled.lock().unwrap().is_empty());
    }

    #[test]
    fn deep_paths_pass_through() {
        let h = harness(&["name"], &["feed"]);
        let reply = h.gate.handle(&get("/u1/feed/item42", TOKEN));
        assert_eq!(reply.body, b"upstream");
        assert!(h.cache.handled.lock().unwrap().is_empty());
    }

    #[test]
    fn subscribed_connection_is_cacheable() {
        let h = harness(&["name"], &["feed"]);
        let reply = h.gate.handle(&get("/u1/feed", TOKEN));
        assert_eq!(reply.body, b"cached");
    }

    #[test]
    fn malformed_token_routes_through_default_app() {
        let h = harness(&["name"], &[]);
        // "abc" does not parse: anonymous request under the default app;
        // the requestee is unknown there, so it passes through
        let reply = h.gate.handle(&get("/u1", "access_token=abc&fields=name"));
        assert_eq!(reply.body, b"upstream");
        let calls = h.upstream.calls.lock().unwrap();
        assert_eq!(calls[0].1, "/u1");
        assert_eq!(calls[0].2, "access_token=abc&fields=name");
    }

    // ── Writes ───────────────────────────────────────────────────

    #[test]
    fn post_to_feed_invalidates_siblings_and_passes_through() {
        let h = harness(&["name"], &["feed"]);
        let request = HttpRequest::new("POST", "/u1/feed", TOKEN);
        let reply = h.gate.handle(&request);
        assert_eq!(reply.body, b"upstream");

        let invalidations = h.cache.invalidations.lock().unwrap();
        assert_eq!(
            *invalidations,
            vec![
                ("42".to_string(), "/u1/statuses".to_string()),
                ("42".to_string(), "/u1/feed".to_string()),
                ("42".to_string(), "/u1/links".to_string()),
            ]
        );
        assert!(h.cache.handled.lock().unwrap().is_empty());
    }

    #[test]
    fn post_elsewhere_invalidates_nothing() {
        let h = harness(&["name"], &[]);
        h.gate.handle(&HttpRequest::new("POST", "/u1", TOKEN));
        h.gate
            .handle(&HttpRequest::new("DELETE", "/u1/photos", TOKEN));
        assert!(h.cache.invalidations.lock().unwrap().is_empty());
        assert_eq!(h.upstream.calls.lock().unwrap().len(), 2);
    }

    // ── Degraded configurations ──────────────────────────────────

    #[test]
    fn missing_cache_passes_through_with_warning() {
        let upstream = Arc::new(RecordingUpstream::default());
        let gate = RequestGate::new(
            None,
            None,
            registry(&["name"], &[]),
            Arc::clone(&upstream) as Arc<dyn GraphFetch>,
        );
        let reply = gate.handle(&get("/u1", &format!("{TOKEN}&fields=name")));
        assert_eq!(reply.body, b"upstream");
        assert_eq!(upstream.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn upstream_failure_maps_to_internal_error() {
        let gate = RequestGate::new(
            None,
            None,
            registry(&["name"], &[]),
            Arc::new(FailingUpstream) as Arc<dyn GraphFetch>,
        );
        let reply = gate.handle(&HttpRequest::new("POST", "/u1", ""));
        assert_eq!(reply.status_code(), 500);
        assert_eq!(reply.body, b"An internal error occurred\n");
    }

    // ── cannot_cache rules ───────────────────────────────────────

    #[test]
    fn cannot_cache_rules() {
        let parts = |segments: &[&str]| -> Vec<String> {
            segments.iter().map(|s| s.to_string()).collect()
        };
        assert!(cannot_cache("POST", &parts(&["u1"])));
        assert!(cannot_cache("GET", &parts(&["u1", "feed", "x"])));
        assert!(cannot_cache("GET", &parts(&["u1", "home"])));
        assert!(!cannot_cache("GET", &parts(&["u1"])));
        assert!(!cannot_cache("GET", &parts(&["u1", "feed"])));
    }
}
