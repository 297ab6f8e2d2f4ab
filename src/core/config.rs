//! Connection configuration.

/// Endpoint configuration for a session or datagram channel.
///
/// Owned by whoever constructs the connection and not mutated after
/// connect.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Remote host name or IP address.
    pub hostname: String,
    /// Remote port.
    pub port: u16,
    /// Emit per-message debug traces.
    pub debug_logging: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 1337,
            debug_logging: false,
        }
    }
}

impl ConnectionConfig {
    /// Create a config for the given endpoint with debug logging off.
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            debug_logging: false,
        }
    }

    /// Enable or disable per-message debug traces.
    pub fn with_debug_logging(mut self, enabled: bool) -> Self {
        self.debug_logging = enabled;
        self
    }

    /// The `host:port` form used for socket address resolution.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.port, 1337);
        assert!(!config.debug_logging);
    }

    #[test]
    fn test_endpoint_format() {
        let config = ConnectionConfig::new("10.0.0.7", 9000);
        assert_eq!(config.endpoint(), "10.0.0.7:9000");
    }
}
