//! Session configuration.

use crate::protocol::decoder::DEFAULT_TEXT_CAPACITY;
use std::env::var;

/// Default server host
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port
pub const DEFAULT_PORT: u16 = 1984;

/// Default user and password
pub const DEFAULT_USER: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "admin";

/// Connection settings, fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Server host name or address
    pub host: String,
    /// Server port
    pub port: u16,
    /// User to log in as
    pub username: String,
    /// Password, only ever sent as a digest
    pub password: String,
    /// Starting capacity of the text decode buffer
    pub initial_buffer_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            initial_buffer_capacity: DEFAULT_TEXT_CAPACITY,
        }
    }
}

impl Config {
    /// Reads configuration from environment variables.
    ///
    /// It reads:
    /// - `BASEX_HOST`
    /// - `BASEX_PORT`
    /// - `BASEX_USER`
    /// - `BASEX_PASSWORD`
    ///
    /// Missing or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: var("BASEX_HOST").unwrap_or(defaults.host),
            port: var("BASEX_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            username: var("BASEX_USER").unwrap_or(defaults.username),
            password: var("BASEX_PASSWORD").unwrap_or(defaults.password),
            initial_buffer_capacity: defaults.initial_buffer_capacity,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    pub fn with_initial_buffer_capacity(mut self, capacity: usize) -> Self {
        self.initial_buffer_capacity = capacity;
        self
    }

    /// Returns the server address as `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.address(), "localhost:1984");
        assert_eq!(config.username, "admin");
        assert_eq!(config.password, "admin");
        assert_eq!(config.initial_buffer_capacity, 0x10000);
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_host("db.internal")
            .with_port(1985)
            .with_credentials("reader", "secret")
            .with_initial_buffer_capacity(16);
        assert_eq!(config.address(), "db.internal:1985");
        assert_eq!(config.username, "reader");
        assert_eq!(config.password, "secret");
        assert_eq!(config.initial_buffer_capacity, 16);
    }
}
