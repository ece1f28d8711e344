//! Daemon configuration.
//!
//! Read from the TOML file named by the first argument or by
//! `HOLOSENS_CONFIG`. Every field is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use holosens_httpconn::{Credentials, PrivateProtocolHeader, TransportConfig};
use holosens_session::{CacheConfig, KeepaliveConfig, SessionConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "HOLOSENS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address devices push their registration to.
    pub bind: String,

    /// Digest credentials applied to every registered device. Empty
    /// username leaves devices unauthenticated (and evicted after the
    /// grace period).
    pub username: String,
    pub password: String,

    /// Expect the 8-byte prefix push-registering devices put before
    /// their responses.
    pub legacy_prefix: bool,

    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub keepalive_secs: u64,

    pub heartbeat_interval_secs: u64,
    pub heartbeat_failure_budget: u32,
    pub auth_grace_secs: u64,

    /// How often the cached devices are logged.
    pub summary_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8097".into(),
            username: "ApiAdmin".into(),
            password: String::new(),
            legacy_prefix: true,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            keepalive_secs: 60,
            heartbeat_interval_secs: 60,
            heartbeat_failure_budget: 3,
            auth_grace_secs: 60,
            summary_interval_secs: 60,
        }
    }
}

impl Config {
    /// Loads `path`, or the defaults when there is none.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            tracing::info!("no configuration file given, using defaults");
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        let config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration read");
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        if self.username.is_empty() {
            Credentials::none()
        } else {
            Credentials::digest(&self.username, &self.password)
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transport: TransportConfig {
                read_timeout: Duration::from_secs(self.read_timeout_secs),
                write_timeout: Duration::from_secs(self.write_timeout_secs),
                ..TransportConfig::default()
            },
            keepalive: KeepaliveConfig {
                period: Duration::from_secs(self.keepalive_secs),
            },
            response_header: self
                .legacy_prefix
                .then(PrivateProtocolHeader::legacy_registration),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            heartbeat_failure_budget: self.heartbeat_failure_budget,
            auth_grace_period: Duration::from_secs(self.auth_grace_secs),
            ..CacheConfig::default()
        }
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }
}

/// First CLI argument, else `HOLOSENS_CONFIG`.
pub fn config_path() -> Option<PathBuf> {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os(CONFIG_ENV))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_device_protocol() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0:8097");
        assert!(config.legacy_prefix);

        let session = config.session_config();
        assert_eq!(session.transport.read_timeout, Duration::from_secs(30));
        assert_eq!(session.keepalive.period, Duration::from_secs(60));
        assert_eq!(
            session.response_header.map(|h| h.response_prefix.len()),
            Some(8)
        );
        assert_eq!(config.cache_config(), CacheConfig::default());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            username = "ApiAdmin"
            password = "a1234567"
            legacy_prefix = false
            "#,
        )
        .unwrap();
        assert_eq!(config.bind, "0.0.0.0:8097");
        assert!(config.session_config().response_header.is_none());
        assert!(config.credentials().is_set());
        assert_eq!(config.heartbeat_failure_budget, 3);
    }

    #[test]
    fn empty_username_disables_authentication() {
        let config = Config {
            username: String::new(),
            ..Config::default()
        };
        assert!(!config.credentials().is_set());
    }

    #[test]
    fn load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("register-server.toml");
        std::fs::write(
            &path,
            "bind = \"127.0.0.1:9000\"\nheartbeat_interval_secs = 5\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bind, "127.0.0.1:9000");
        assert_eq!(
            config.cache_config().heartbeat_interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(Config::load(Some(&tmp.path().join("absent.toml"))).is_err());
        assert_eq!(Config::load(None).unwrap().bind, "0.0.0.0:8097");
    }
}
