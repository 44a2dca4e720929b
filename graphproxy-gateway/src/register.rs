//! Subscription registration with the Graph API server.
//!
//! For every configured app that carries a credential or secret, create a
//! `user`-object subscription pointing the upstream at our realtime
//! endpoint. Must run after the realtime listener is accepting
//! connections, since the upstream calls back immediately to verify.

use graphproxy_core::app::{App, AppRegistry};
use tracing::{info, warn};

/// Register every registerable app. Failures are logged and skipped; a
/// proxy without subscriptions still works, it just never invalidates.
pub fn register_apps(apps: &AppRegistry, endpoint: &str, server: &str, verify_token: &str) {
    for app in apps.iter() {
        register(app, &format!("{}{}", endpoint, app.id), server, verify_token);
    }
}

/// Register one app, if possible. Requires `cred` or `secret`.
pub fn register(app: &App, callback: &str, server: &str, verify_token: &str) -> bool {
    let mut subscribe_fields: Vec<&str> = app
        .good_fields
        .union(&app.good_conns)
        .map(String::as_str)
        .collect();
    subscribe_fields.sort_unstable();

    let token = match (&app.cred, &app.secret) {
        (Some(cred), _) => cred.clone(),
        (None, Some(secret)) => format!("{}|{}", app.id, secret),
        (None, None) => return false,
    };

    register_with_token(
        &app.id,
        &token,
        &subscribe_fields.join(","),
        callback,
        server,
        verify_token,
    )
}

/// POST the subscription for one app under a client-credential token.
fn register_with_token(
    app_id: &str,
    token: &str,
    fields: &str,
    callback: &str,
    server: &str,
    verify_token: &str,
) -> bool {
    let client = match reqwest::blocking::Client::builder().build() {
        Ok(client) => client,
        Err(error) => {
            warn!(error = %error, "could not build subscription client");
            return false;
        }
    };

    let url = format!("https://{}/{}/subscriptions", server, app_id);
    let result = client
        .post(&url)
        .query(&[("access_token", token)])
        .form(&[
            ("object", "user"),
            ("fields", fields),
            ("callback_url", callback),
            ("verify_token", verify_token),
        ])
        .send();

    match result {
        Ok(response) if response.status().is_success() => {
            info!(app_id = %app_id, fields = %fields, "subscribed for realtime updates");
            true
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            warn!(app_id = %app_id, status = %status, body = %body, "error subscribing");
            false
        }
        Err(error) => {
            warn!(app_id = %app_id, error = %error, "error subscribing");
            false
        }
    }
}
