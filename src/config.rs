//! Configuration module for the ws-echo server.
//!
//! The bind address, port and worker count come from the command line.
//! Session tuning and logging can additionally be set in a TOML file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use crate::session::{SessionOptions, DEFAULT_SERVER_HEADER};
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio_tungstenite::tungstenite::http::HeaderValue;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "ws-echo")]
#[command(version)]
#[command(about = "A concurrent WebSocket echo server", long_about = None)]
#[command(after_help = "Example:\n    ws-echo 0.0.0.0 8080 1")]
pub struct CliArgs {
    /// Address to bind to (e.g., 0.0.0.0)
    pub address: IpAddr,

    /// Port to bind to
    pub port: u16,

    /// Number of worker threads (at least 1)
    pub threads: usize,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            backlog: default_backlog(),
        }
    }
}

/// Per-session configuration
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    /// Upper bound on the opening handshake, in seconds
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Upper bound on each read or write, in seconds (0 = no limit)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Largest accepted message in bytes (0 = protocol library default)
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Value of the `Server` header in the handshake response
    #[serde(default = "default_server_header")]
    pub server_header: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_message_size: default_max_message_size(),
            server_header: default_server_header(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_backlog() -> i32 {
    1024
}

fn default_handshake_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_server_header() -> String {
    DEFAULT_SERVER_HEADER.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub threads: usize,
    pub backlog: i32,
    pub session: SessionOptions,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents =
                std::fs::read_to_string(config_path).map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let session = &toml_config.session;

        let server_header = HeaderValue::try_from(session.server_header.as_str())
            .map_err(|_| ConfigError::InvalidHeader(session.server_header.clone()))?;

        let idle_timeout = match session.idle_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let max_message_size = match session.max_message_size {
            0 => None,
            size => Some(size),
        };

        Ok(Config {
            listen: SocketAddr::new(cli.address, cli.port),
            threads: cli.threads.max(1),
            backlog: toml_config.server.backlog,
            session: SessionOptions {
                handshake_timeout: Duration::from_secs(session.handshake_timeout_secs),
                idle_timeout,
                max_message_size,
                server_header,
            },
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.backlog, 1024);
        assert_eq!(config.session.handshake_timeout_secs, 30);
        assert_eq!(config.session.idle_timeout_secs, 300);
        assert_eq!(config.logging.level, "info");
        assert!(config.session.server_header.ends_with(" websocket-server-async"));
    }

    #[test]
    fn test_positional_args() {
        let config = Config::merge(
            cli(&["ws-echo", "0.0.0.0", "8080", "4"]),
            TomlConfig::default(),
        )
        .unwrap();

        assert_eq!(config.listen, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.threads, 4);
        assert_eq!(config.session.idle_timeout, Some(Duration::from_secs(300)));
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_threads_clamped_to_one() {
        let config =
            Config::merge(cli(&["ws-echo", "::1", "9000", "0"]), TomlConfig::default()).unwrap();
        assert_eq!(config.threads, 1);
        assert!(config.listen.is_ipv6());
    }

    #[test]
    fn test_wrong_argument_count() {
        assert!(CliArgs::try_parse_from(["ws-echo"]).is_err());
        assert!(CliArgs::try_parse_from(["ws-echo", "0.0.0.0", "8080"]).is_err());
        assert!(CliArgs::try_parse_from(["ws-echo", "0.0.0.0", "8080", "1", "extra"]).is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            backlog = 128

            [session]
            handshake_timeout_secs = 5
            idle_timeout_secs = 0
            max_message_size = 0
            server_header = "echo-test"

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config =
            Config::merge(cli(&["ws-echo", "127.0.0.1", "0", "2"]), toml_config).unwrap();

        assert_eq!(config.backlog, 128);
        assert_eq!(config.session.handshake_timeout, Duration::from_secs(5));
        assert_eq!(config.session.idle_timeout, None);
        assert_eq!(config.session.max_message_size, None);
        assert_eq!(config.session.server_header, "echo-test");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_log_level_overrides_file() {
        let toml_config: TomlConfig = toml::from_str("[logging]\nlevel = \"debug\"").unwrap();
        let config = Config::merge(
            cli(&["ws-echo", "127.0.0.1", "0", "1", "--log-level", "warn"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_invalid_server_header() {
        let toml_config: TomlConfig =
            toml::from_str("[session]\nserver_header = \"bad\\nheader\"").unwrap();
        let err = Config::merge(cli(&["ws-echo", "127.0.0.1", "0", "1"]), toml_config)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidHeader(_)));
    }
}
