//! Per-application policy: which fields and connections are realtime
//! subscribed (and therefore cache-safe), which users have been observed,
//! and the credentials used for subscription and signature checks.

use crate::config::AppConfig;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::info;

/// A registered Graph API application.
///
/// Serves two purposes: a repository of per-app settings, and the two
/// cache-eligibility checks used by the request gate. `check_user` records
/// the requestor as a known user and tests whether the requestee is one;
/// only users known to have authorized the app receive realtime updates,
/// so only their data is safe to cache. `check_request` restricts caching
/// to the fields and connections covered by the app's subscription.
#[derive(Debug)]
pub struct App {
    pub id: String,
    pub good_fields: HashSet<String>,
    pub good_conns: HashSet<String>,
    pub cred: Option<String>,
    pub secret: Option<String>,
    users: Mutex<HashSet<String>>,
}

impl App {
    pub fn from_config(config: &AppConfig) -> Self {
        let bad_fields: HashSet<String> = config.blacklist_fields.iter().cloned().collect();
        let bad_conns: HashSet<String> = config.blacklist_connections.iter().cloned().collect();
        let good_fields: HashSet<String> = config.whitelist_fields.iter().cloned().collect();
        let good_conns: HashSet<String> = config.whitelist_connections.iter().cloned().collect();
        Self {
            id: config.app_id.clone(),
            good_fields: &good_fields - &bad_fields,
            good_conns: &good_conns - &bad_conns,
            cred: config.app_cred.clone(),
            secret: config.app_secret.clone(),
            users: Mutex::new(HashSet::new()),
        }
    }

    fn synthetic(id: &str, good_fields: HashSet<String>, good_conns: HashSet<String>) -> Self {
        Self {
            id: id.to_string(),
            good_fields,
            good_conns,
            cred: None,
            secret: None,
            users: Mutex::new(HashSet::new()),
        }
    }

    /// Record the requestor as a known user and test the requestee.
    ///
    /// The requestor is also recorded on the distinct default app (for its
    /// side effect only) since updates for them arrive there too.
    pub fn check_user(&self, requestor: &str, requestee: &str, default: Option<&App>) -> bool {
        let ok = {
            let mut users = self.users.lock().unwrap();
            users.insert(requestor.to_string());
            users.contains(requestee)
        };

        if let Some(default_app) = default {
            if !std::ptr::eq(self, default_app) {
                default_app.check_user(requestor, requestee, None);
            }
        }

        ok
    }

    /// Whether a request for these path segments and fields is cacheable
    /// under this app's subscription.
    pub fn check_request(&self, path_parts: &[String], fields: &[String]) -> bool {
        if path_parts.len() == 1 {
            // direct profile fields
            if fields.iter().all(|field| self.good_fields.contains(field)) {
                return true;
            }
            info!(
                fields = ?fields,
                allowed = ?self.good_fields,
                "request fields outside app subscription"
            );
        } else if path_parts.len() == 2 {
            // a connection of a user
            return self.good_conns.contains(&path_parts[1]);
        }
        // not certain: fall back to pass-through behavior
        false
    }

    /// Number of users observed so far (test hook).
    pub fn known_users(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

/// Startup-frozen mapping of app id to [`App`].
#[derive(Debug)]
pub struct AppRegistry {
    apps: HashMap<String, Arc<App>>,
}

impl AppRegistry {
    /// Build the registry, synthesizing the `default` app when the config
    /// does not define one: its subscription is the intersection of every
    /// configured app's fields and connections.
    pub fn from_config(configs: &[AppConfig]) -> Self {
        let mut apps: HashMap<String, Arc<App>> = configs
            .iter()
            .map(|config| (config.app_id.clone(), Arc::new(App::from_config(config))))
            .collect();

        if !apps.contains_key("default") {
            let mut values = apps.values();
            let (good_fields, good_conns) = match values.next() {
                Some(first) => values.fold(
                    (first.good_fields.clone(), first.good_conns.clone()),
                    |(fields, conns), app| (&fields & &app.good_fields, &conns & &app.good_conns),
                ),
                None => (HashSet::new(), HashSet::new()),
            };
            apps.insert(
                "default".to_string(),
                Arc::new(App::synthetic("default", good_fields, good_conns)),
            );
        }

        Self { apps }
    }

    /// Exact lookup.
    pub fn get(&self, app_id: &str) -> Option<Arc<App>> {
        self.apps.get(app_id).cloned()
    }

    /// Exact lookup, falling back to the `default` app.
    pub fn get_or_default(&self, app_id: &str) -> Option<Arc<App>> {
        self.get(app_id).or_else(|| self.default_app())
    }

    pub fn default_app(&self) -> Option<Arc<App>> {
        self.get("default")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<App>> {
        self.apps.values()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}
