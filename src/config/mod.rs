//! Configuration management for portero

use crate::core::probe::DEFAULT_DATABASE_CEILING;
use crate::service::ServiceOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

pub use crate::error::ConfigError;

/// Main portero configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Redis transport configuration
    pub transport: TransportConfig,
    /// Database probe configuration
    pub probe: ProbeConfig,
    /// Saved connection storage
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    pub listen_addr: String,
}

/// Redis transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Upper bound for establishing a connection, handshake included
    pub connect_timeout_ms: u64,
    /// Upper bound for a single command
    pub command_timeout_ms: u64,
}

/// Database probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Database ceiling reported when `CONFIG GET databases` is refused
    pub default_database_ceiling: u32,
}

/// Saved connection storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// TOML file holding saved connections
    pub connections_file: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8081".to_string(),
            },
            transport: TransportConfig {
                connect_timeout_ms: 10_000,
                command_timeout_ms: 5_000,
            },
            probe: ProbeConfig {
                default_database_ceiling: DEFAULT_DATABASE_CEILING,
            },
            store: StoreConfig {
                connections_file: "connections.toml".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|_| {
                ConfigError::ValidationError(format!(
                    "Invalid listen address: {}",
                    self.server.listen_addr
                ))
            })?;

        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.transport.command_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "command_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.probe.default_database_ceiling == 0 {
            return Err(ConfigError::ValidationError(
                "default_database_ceiling must be greater than 0".to_string(),
            ));
        }

        if self.store.connections_file.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connections_file cannot be empty".to_string(),
            ));
        }

        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.transport.command_timeout_ms)
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            connect_timeout: self.connect_timeout(),
            default_database_ceiling: self.probe.default_database_ceiling,
        }
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, profile: &str) -> Result<(), ConfigError> {
        let config = match profile {
            "local" => Config::default(),
            "server" => Config {
                server: ServerConfig {
                    listen_addr: "0.0.0.0:8081".to_string(),
                },
                store: StoreConfig {
                    connections_file: "/var/lib/portero/connections.toml".to_string(),
                },
                logging: LoggingConfig {
                    level: "info".to_string(),
                    format: "json".to_string(),
                },
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Profile must be 'local' or 'server'".to_string(),
            )),
        };

        config.save_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.service_options().default_database_ceiling, 16);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.transport.command_timeout_ms = 0;
        assert!(config.validate().is_err());
        config.transport.command_timeout_ms = 5_000;

        config.server.listen_addr = "localhost".to_string();
        assert!(config.validate().is_err());
        config.server.listen_addr = "[::1]:8081".to_string();
        assert!(config.validate().is_ok());

        config.logging.format = "yaml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed_config: Config = toml::from_str(&toml_str).unwrap();
        assert!(parsed_config.validate().is_ok());
        assert_eq!(parsed_config.store.connections_file, "connections.toml");
    }

    #[test]
    fn test_config_file_operations() {
        let config = Config::default();
        let temp_file = NamedTempFile::new().unwrap();

        config.save_to_file(temp_file.path()).unwrap();
        let loaded_config = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded_config.server.listen_addr, config.server.listen_addr);
    }

    #[test]
    fn test_example_profiles() {
        let temp_file = NamedTempFile::new().unwrap();

        Config::create_example_config(temp_file.path(), "server").unwrap();
        let loaded = Config::load_from_file(temp_file.path()).unwrap();
        assert_eq!(loaded.logging.format, "json");

        assert!(Config::create_example_config(temp_file.path(), "cloud").is_err());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_from_file("/nonexistent/portero.toml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}
