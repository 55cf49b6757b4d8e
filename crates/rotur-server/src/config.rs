//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use rotur_shared::constants::{
    DEFAULT_FLUSH_COALESCE_MS, DEFAULT_HTTP_PORT, DEFAULT_KEY_OWNERSHIP_CACHE_TTL_SECS,
    DEFAULT_SUBSCRIPTION_CHECK_INTERVAL_SECS,
};
use rotur_store::{BackgroundOptions, StorePaths};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:5602`
    pub http_addr: SocketAddr,

    /// Collection files and the OFSF root.
    /// Env: `DATA_DIR` for the base directory, then `USERS_FILE`,
    /// `POSTS_FILE`, `ITEMS_FILE`, `KEYS_FILE`, `FOLLOWERS_FILE`,
    /// `GROUPS_FILE`, `EVENTS_HISTORY_FILE`, `SYSTEMS_FILE`, `OFSF_ROOT`
    /// to override single paths.
    /// Default: `./data/<name>.json`, `./data/ofsf`
    pub paths: StorePaths,

    /// Time between subscription sweeps.
    /// Env: `SUBSCRIPTION_CHECK_INTERVAL` (seconds)
    /// Default: 3600
    pub subscription_check_interval: Duration,

    /// Lifetime of a cached key-ownership answer.
    /// Env: `KEY_OWNERSHIP_CACHE_TTL` (seconds)
    /// Default: 60
    pub key_ownership_cache_ttl: Duration,

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Key whose holders may write extended posts.
    /// Env: `PREMIUM_KEY`
    pub premium_key: Option<String>,

    /// Delay between the first mutation of a burst and its snapshot.
    /// Env: `FLUSH_COALESCE_MS`
    /// Default: 250
    pub flush_coalesce: Duration,

    /// Reload the users file when it changes on disk.
    /// Env: `USERS_WATCH` (true/false)
    /// Default: `true`
    pub users_watch: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            paths: StorePaths::in_dir(&PathBuf::from("./data")),
            subscription_check_interval: Duration::from_secs(
                DEFAULT_SUBSCRIPTION_CHECK_INTERVAL_SECS,
            ),
            key_ownership_cache_ttl: Duration::from_secs(DEFAULT_KEY_OWNERSHIP_CACHE_TTL_SECS),
            admin_token: None,
            premium_key: None,
            flush_coalesce: Duration::from_millis(DEFAULT_FLUSH_COALESCE_MS),
            users_watch: true,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(dir) = var("DATA_DIR") {
            config.paths = StorePaths::in_dir(&PathBuf::from(dir));
        }
        let paths = &mut config.paths;
        for (name, slot) in [
            ("USERS_FILE", &mut paths.users),
            ("POSTS_FILE", &mut paths.posts),
            ("ITEMS_FILE", &mut paths.items),
            ("KEYS_FILE", &mut paths.keys),
            ("FOLLOWERS_FILE", &mut paths.followers),
            ("GROUPS_FILE", &mut paths.groups),
            ("EVENTS_HISTORY_FILE", &mut paths.events_history),
            ("SYSTEMS_FILE", &mut paths.systems),
            ("OFSF_ROOT", &mut paths.ofsf_root),
        ] {
            if let Some(path) = var(name).filter(|p| !p.is_empty()) {
                *slot = PathBuf::from(path);
            }
        }

        if let Some(secs) = parse_number(&var, "SUBSCRIPTION_CHECK_INTERVAL") {
            if secs > 0 {
                config.subscription_check_interval = Duration::from_secs(secs);
            }
        }
        if let Some(secs) = parse_number(&var, "KEY_OWNERSHIP_CACHE_TTL") {
            config.key_ownership_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_number(&var, "FLUSH_COALESCE_MS") {
            config.flush_coalesce = Duration::from_millis(ms);
        }

        if let Some(token) = var("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(key) = var("PREMIUM_KEY") {
            if !key.is_empty() {
                config.premium_key = Some(key);
            }
        }

        if let Some(val) = var("USERS_WATCH") {
            config.users_watch = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn background_options(&self) -> BackgroundOptions {
        BackgroundOptions {
            coalesce: self.flush_coalesce,
            watch_users: self.users_watch,
        }
    }
}

fn parse_number(var: &impl Fn(&str) -> Option<String>, name: &str) -> Option<u64> {
    let raw = var(name)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(value = %raw, var = name, "Invalid number, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 5602).into());
        assert_eq!(config.paths.users, PathBuf::from("./data/users.json"));
        assert_eq!(config.subscription_check_interval, Duration::from_secs(3600));
        assert!(config.admin_token.is_none());
        assert!(config.users_watch);
    }

    #[test]
    fn test_data_dir_and_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("DATA_DIR", "/srv/rotur"),
            ("KEYS_FILE", "/elsewhere/keys.json"),
            ("SUBSCRIPTION_CHECK_INTERVAL", "60"),
            ("ADMIN_TOKEN", "secret"),
            ("USERS_WATCH", "false"),
        ]));
        assert_eq!(config.paths.posts, PathBuf::from("/srv/rotur/posts.json"));
        assert_eq!(config.paths.ofsf_root, PathBuf::from("/srv/rotur/ofsf"));
        assert_eq!(config.paths.keys, PathBuf::from("/elsewhere/keys.json"));
        assert_eq!(config.subscription_check_interval, Duration::from_secs(60));
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert!(!config.background_options().watch_users);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("HTTP_ADDR", "not an addr"),
            ("KEY_OWNERSHIP_CACHE_TTL", "soon"),
            ("ADMIN_TOKEN", ""),
        ]));
        assert_eq!(config.http_addr.port(), 5602);
        assert_eq!(config.key_ownership_cache_ttl, Duration::from_secs(60));
        assert!(config.admin_token.is_none());
    }
}
