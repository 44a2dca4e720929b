use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Top-level configuration for graphproxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Outer cache capacity (number of (path, app) entries)
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,

    /// Graph API host the proxy fronts
    #[serde(default = "default_graph_server")]
    pub graph_server: String,

    /// Number of worker threads (0 = one per core)
    #[serde(default)]
    pub workers: usize,

    /// Hostname under which the realtime endpoint is publicly reachable
    #[serde(default = "default_public_hostname")]
    pub public_hostname: String,

    /// Proxy listener
    #[serde(default = "default_proxy_listener")]
    pub proxy: ListenerConfig,

    /// Realtime update listener
    #[serde(default = "default_realtime_listener")]
    pub realtime: ListenerConfig,

    /// Registered applications
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    pub interface: String,
    pub port: u16,
}

impl ListenerConfig {
    /// Bind address in `interface:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.interface, self.port)
    }
}

/// Per-application configuration record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application identifier
    pub app_id: String,

    /// Client-credential access token
    #[serde(default)]
    pub app_cred: Option<String>,

    /// Application secret (HMAC key for update signatures)
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Scalar fields the app subscribes to
    #[serde(default)]
    pub whitelist_fields: Vec<String>,

    /// Connections the app subscribes to
    #[serde(default)]
    pub whitelist_connections: Vec<String>,

    /// Fields excluded even if whitelisted
    #[serde(default)]
    pub blacklist_fields: Vec<String>,

    /// Connections excluded even if whitelisted
    #[serde(default)]
    pub blacklist_connections: Vec<String>,
}

impl ProxyConfig {
    /// Load configuration from YAML file + environment variables.
    pub fn load(config_path: Option<&str>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();

        if let Some(path) = config_path {
            figment = figment.merge(Yaml::file(path));
        } else {
            // Try default locations
            for default_path in &[
                "graphproxy.yaml",
                "/etc/graphproxy/graphproxy.yaml",
                "config/graphproxy.yaml",
            ] {
                if std::path::Path::new(default_path).exists() {
                    figment = figment.merge(Yaml::file(default_path));
                    break;
                }
            }
        }

        // Environment variables override: GRAPHPROXY_PROXY__PORT, etc.
        figment = figment.merge(Env::prefixed("GRAPHPROXY_").split("__"));

        let config: Self = figment.extract()?;
        Ok(config)
    }

    /// Worker thread count, resolving 0 to the core count.
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            cache_entries: default_cache_entries(),
            graph_server: default_graph_server(),
            workers: 0,
            public_hostname: default_public_hostname(),
            proxy: default_proxy_listener(),
            realtime: default_realtime_listener(),
            apps: vec![],
        }
    }
}

// Serde default functions

fn default_cache_entries() -> usize {
    10_000
}

fn default_graph_server() -> String {
    "graph.facebook.com".to_string()
}

fn default_public_hostname() -> String {
    "localhost".to_string()
}

fn default_proxy_listener() -> ListenerConfig {
    ListenerConfig {
        interface: "127.0.0.1".to_string(),
        port: 8080,
    }
}

fn default_realtime_listener() -> ListenerConfig {
    ListenerConfig {
        interface: "0.0.0.0".to_string(),
        port: 8081,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.cache_entries, 10_000);
        assert_eq!(cfg.proxy.port, 8080);
        assert_eq!(cfg.realtime.port, 8081);
        assert_eq!(cfg.graph_server, "graph.facebook.com");
        assert!(cfg.apps.is_empty());
        assert!(cfg.effective_workers() >= 1);
    }

    #[test]
    fn test_listener_addr() {
        let listener = ListenerConfig {
            interface: "10.0.0.1".to_string(),
            port: 9000,
        };
        assert_eq!(listener.addr(), "10.0.0.1:9000");
    }

    #[test]
    fn test_explicit_workers_win() {
        let cfg = ProxyConfig {
            workers: 3,
            ..ProxyConfig::default()
        };
        assert_eq!(cfg.effective_workers(), 3);
    }

    #[test]
    fn test_app_config_from_yaml() {
        let yaml = r#"
cache_entries: 64
apps:
  - app_id: "42"
    app_secret: topsecret
    whitelist_fields: [name, about]
    blacklist_connections: [home]
"#;
        let cfg: ProxyConfig = config_from_yaml(yaml);
        assert_eq!(cfg.cache_entries, 64);
        assert_eq!(cfg.apps.len(), 1);
        assert_eq!(cfg.apps[0].app_id, "42");
        assert_eq!(cfg.apps[0].app_secret.as_deref(), Some("topsecret"));
        assert_eq!(cfg.apps[0].whitelist_fields, vec!["name", "about"]);
        assert_eq!(cfg.apps[0].blacklist_connections, vec!["home"]);
        assert!(cfg.apps[0].app_cred.is_none());
    }

    fn config_from_yaml(yaml: &str) -> ProxyConfig {
        Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .expect("valid config YAML")
    }
}
