//! Server-only settings layered on top of `CoreConfig`.

use ringo_core::ConfigError;
use std::net::SocketAddr;

pub const ENV_BIND_ADDR: &str = "RINGO_BIND_ADDR";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw = lookup(ENV_BIND_ADDR)
            .filter(|addr| !addr.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = raw
            .trim()
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::InvalidValue {
                key: ENV_BIND_ADDR,
                message: format!("`{raw}`: {err}"),
            })?;
        Ok(Self { bind_addr })
    }
}

#[cfg(test)]
mod tests {
    use super::{ServerConfig, ENV_BIND_ADDR};
    use ringo_core::ConfigError;

    #[test]
    fn default_bind_addr_is_loopback() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
    }

    #[test]
    fn invalid_bind_addr_is_rejected() {
        let err = ServerConfig::from_lookup(|key| {
            (key == ENV_BIND_ADDR).then(|| "not-an-addr".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
