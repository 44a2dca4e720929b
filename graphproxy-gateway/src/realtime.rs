//! Realtime update endpoint.
//!
//! Two sub-protocols share this listener: GET performs the subscription
//! handshake (echoing `hub.challenge` once the verify token matches), and
//! POST delivers signed update batches. For each user entry in an update,
//! a change to any subscribed field invalidates the user's cached object,
//! and each changed subscribed connection is invalidated individually.

use crate::request::HttpRequest;
use graphproxy_cache::engine::RequestCache;
use graphproxy_core::app::AppRegistry;
use graphproxy_core::error::ProxyError;
use graphproxy_core::query;
use graphproxy_core::reply::Reply;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha1::Sha1;
use std::sync::Arc;
use tracing::{info, warn};

type HmacSha1 = Hmac<Sha1>;

pub struct RealtimeEndpoint {
    cache: Arc<dyn RequestCache>,
    apps: Arc<AppRegistry>,
    verify_token: String,
}

impl RealtimeEndpoint {
    /// The verify token is minted once per endpoint; subscriptions
    /// registered with it are validated against the same instance.
    pub fn new(cache: Arc<dyn RequestCache>, apps: Arc<AppRegistry>) -> Self {
        Self {
            cache,
            apps,
            verify_token: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn verify_token(&self) -> &str {
        &self.verify_token
    }

    pub fn handle(&self, request: &HttpRequest) -> Reply {
        match request.method.as_str() {
            "GET" => self.handle_validate(request),
            "POST" => self.handle_update(request).unwrap_or_else(reply_for),
            _ => Reply::forbidden("Request validation failed"),
        }
    }

    /// Subscription handshake: check the verify token, echo the challenge.
    fn handle_validate(&self, request: &HttpRequest) -> Reply {
        let query = query::parse_query(&request.query);
        info!("validating subscription");
        if query::first_value(&query, "hub.mode") != Some("subscribe") {
            return Reply::bad_request("expecting hub.mode");
        }
        match query::first_value(&query, "hub.verify_token") {
            Some(token) if token == self.verify_token => {}
            _ => return Reply::forbidden("Request validation failed"),
        }
        match query::first_value(&query, "hub.challenge") {
            Some(challenge) => Reply::ok_text(challenge),
            None => Reply::bad_request("Missing challenge"),
        }
    }

    /// Update delivery: verify the signature, then invalidate every
    /// cached view each entry affects.
    fn handle_update(&self, request: &HttpRequest) -> Result<Reply, ProxyError> {
        let app_id = request.path.trim_start_matches('/');
        let app = self
            .apps
            .get(app_id)
            .ok_or_else(|| ProxyError::AppNotFound(app_id.to_string()))?;
        if request.content_length().is_none() {
            return Err(ProxyError::MalformedUpdate("Missing content length".to_string()));
        }
        let body = &request.body;

        let signature = match request.header("X-Hub-Signature") {
            Some(value) if !value.is_empty() => value.strip_prefix("sha1=").unwrap_or(value),
            _ => {
                info!("received update with missing signature");
                return Err(ProxyError::MissingSignature);
            }
        };

        if let Some(secret) = &app.secret {
            let mut mac = HmacSha1::new_from_slice(secret.as_bytes())
                .expect("hmac accepts any key length");
            mac.update(body);
            let expected = hex::encode(mac.finalize().into_bytes());
            if signature != expected {
                warn!(got = %signature, "received update with invalid signature");
                return Err(ProxyError::InvalidSignature);
            }
        }

        let updates: Value = serde_json::from_slice(body)
            .map_err(|_| ProxyError::MalformedUpdate("Expected JSON.".to_string()))?;
        info!(app_id = %app_id, "received a realtime update");

        let missing_keys =
            || ProxyError::MalformedUpdate("Missing fields caused key error".to_string());
        let entries = updates
            .get("entry")
            .and_then(Value::as_array)
            .ok_or_else(missing_keys)?;
        for entry in entries {
            let uid = match entry.get("uid") {
                Some(Value::String(uid)) => uid.clone(),
                Some(Value::Number(uid)) => uid.to_string(),
                _ => return Err(missing_keys()),
            };
            let changed = entry
                .get("changed_fields")
                .and_then(Value::as_array)
                .ok_or_else(missing_keys)?;
            let changed: Vec<&str> = changed.iter().filter_map(Value::as_str).collect();

            if changed.iter().any(|field| app.good_fields.contains(*field)) {
                self.cache.invalidate(app_id, &uid);
            }
            for conn in changed.iter().filter(|conn| app.good_conns.contains(**conn)) {
                self.cache.invalidate(app_id, &format!("{}/{}", uid, conn));
            }
        }
        Ok(Reply::ok_text("Updates successfully handled"))
    }
}

/// Map a delivery error onto the wire.
fn reply_for(error: ProxyError) -> Reply {
    match error {
        ProxyError::AppNotFound(_) => {
            Reply::not_found("The requested application was not found on this server")
        }
        ProxyError::MissingSignature => Reply::forbidden("Request validation failed"),
        ProxyError::InvalidSignature => Reply::bad_request("Invalid signature."),
        ProxyError::MalformedUpdate(message) => Reply::bad_request(&message),
        _ => Reply::internal_error(),
    }
}
