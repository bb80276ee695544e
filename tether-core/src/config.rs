//! Host configuration from file and environment.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::address::{Address, AddressError};
use crate::engine::{
    DEFAULT_DUPLICATE_PEERS, DEFAULT_MAXIMUM_PACKET_SIZE, DEFAULT_MAXIMUM_WAITING_DATA,
    MAXIMUM_CHANNEL_COUNT,
};

/// Host configuration. File: ~/.config/tether/config.toml or /etc/tether/config.toml.
/// Env overrides: TETHER_BIND, TETHER_PEER_LIMIT, TETHER_CHANNEL_LIMIT.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Listen endpoint as "host:port". Unset binds an ephemeral port.
    #[serde(default)]
    pub bind: Option<String>,
    /// Connection slots (default 32).
    #[serde(default = "default_peer_limit")]
    pub peer_limit: usize,
    /// Channels per connection, 0 for the maximum (default 255).
    #[serde(default = "default_channel_limit")]
    pub channel_limit: u8,
    /// Bytes per second, 0 for unlimited.
    #[serde(default)]
    pub incoming_bandwidth: u32,
    #[serde(default)]
    pub outgoing_bandwidth: u32,
    #[serde(default = "default_maximum_packet_size")]
    pub maximum_packet_size: usize,
    #[serde(default = "default_maximum_waiting_data")]
    pub maximum_waiting_data: usize,
    #[serde(default = "default_duplicate_peers")]
    pub duplicate_peers: usize,
}

fn default_peer_limit() -> usize {
    32
}
fn default_channel_limit() -> u8 {
    MAXIMUM_CHANNEL_COUNT
}
fn default_maximum_packet_size() -> usize {
    DEFAULT_MAXIMUM_PACKET_SIZE
}
fn default_maximum_waiting_data() -> usize {
    DEFAULT_MAXIMUM_WAITING_DATA
}
fn default_duplicate_peers() -> usize {
    DEFAULT_DUPLICATE_PEERS
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: None,
            peer_limit: default_peer_limit(),
            channel_limit: default_channel_limit(),
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            maximum_packet_size: default_maximum_packet_size(),
            maximum_waiting_data: default_maximum_waiting_data(),
            duplicate_peers: default_duplicate_peers(),
        }
    }
}

impl HostConfig {
    /// Resolve `bind`, if set.
    pub fn bind_address(&self) -> Result<Option<Address>, AddressError> {
        self.bind.as_deref().map(Address::from_endpoint).transpose()
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(s) = var("TETHER_BIND") {
            self.bind = Some(s);
        }
        if let Some(s) = var("TETHER_PEER_LIMIT") {
            if let Ok(n) = s.parse::<usize>() {
                self.peer_limit = n;
            }
        }
        if let Some(s) = var("TETHER_CHANNEL_LIMIT") {
            if let Ok(n) = s.parse::<u8>() {
                self.channel_limit = n;
            }
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> HostConfig {
    let mut c = load_file().unwrap_or_default();
    c.apply_env(|name| std::env::var(name).ok());
    c
}

/// Load one explicit config file; env vars are not consulted.
pub fn from_file(path: impl AsRef<Path>) -> Result<HostConfig, ConfigError> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&s).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/tether/config.toml"));
    }
    out.push(PathBuf::from("/etc/tether/config.toml"));
    out
}

fn load_file() -> Option<HostConfig> {
    for p in config_paths() {
        if p.exists() {
            match from_file(&p) {
                Ok(c) => return Some(c),
                Err(err) => tracing::warn!(error = %err, "ignoring config file"),
            }
            break;
        }
    }
    None
}

/// Error loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults() {
        let c = HostConfig::default();
        assert_eq!(c.peer_limit, 32);
        assert_eq!(c.channel_limit, 255);
        assert_eq!(c.maximum_packet_size, 32 * 1024 * 1024);
        assert_eq!(c.duplicate_peers, 0xFFF);
        assert_eq!(c.bind_address().unwrap(), None);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind = \"127.0.0.1:7777\"\npeer_limit = 4").unwrap();
        let c = from_file(file.path()).unwrap();
        assert_eq!(c.peer_limit, 4);
        assert_eq!(c.channel_limit, 255);
        assert_eq!(c.bind_address().unwrap(), Some(Address::localhost(7777)));
    }

    #[test]
    fn unknown_field_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "proxy_port = 3128").unwrap();
        assert!(matches!(from_file(file.path()), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            from_file(dir.path().join("absent.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TETHER_BIND", "127.0.0.1:9000"),
            ("TETHER_PEER_LIMIT", "8"),
            ("TETHER_CHANNEL_LIMIT", "not a number"),
        ]
        .into_iter()
        .collect();
        let mut c = HostConfig::default();
        c.apply_env(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(c.bind.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(c.peer_limit, 8);
        assert_eq!(c.channel_limit, 255);
    }
}
