//! CLI arguments plus an optional TOML configuration file, merged the way
//! the teacher's own `Config::load` merges its two layers: command-line
//! flags win, the file supplies defaults, and both fall back to built-in
//! constants.

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;

use crate::client::BackendParams;

fn default_replicas() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Parser, Debug)]
#[command(name = "memc-redundant", about = "A redundant multi-server memcached binary-protocol client")]
pub struct CliArgs {
    /// `ip:port` pairs naming the backend servers, e.g. `127.0.0.1:11211`.
    pub servers: Vec<String>,

    /// Replication factor: how many of the servers to treat as replicas.
    #[arg(short = 'r', long = "replicas")]
    pub replicas: Option<usize>,

    /// Key to operate on.
    #[arg(short = 'k', long = "key")]
    pub key: Option<String>,

    /// Value to store (SET/REPLACE).
    #[arg(short = 'm', long = "value")]
    pub value: Option<String>,

    /// Perform a GET.
    #[arg(short = 'g', long = "get")]
    pub get: bool,

    /// Perform a SET.
    #[arg(short = 's', long = "set")]
    pub set: bool,

    /// Perform a DELETE.
    #[arg(short = 'd', long = "delete")]
    pub delete: bool,

    /// Perform a QUIT.
    #[arg(short = 'q', long = "quit")]
    pub quit: bool,

    /// Local bind host (client-side source address).
    #[arg(short = 'i', long = "bind-host")]
    pub bind_host: Option<String>,

    /// Local bind port.
    #[arg(short = 'p', long = "bind-port")]
    pub bind_port: Option<u16>,

    /// Optional TOML configuration file.
    #[arg(long = "config")]
    pub config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error.
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TomlBackend {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub backend: Vec<TomlBackend>,
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TomlConfig {
    fn default() -> Self {
        TomlConfig {
            backend: Vec::new(),
            replicas: default_replicas(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    NoServers,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "failed to read config file {}: {err}", path.display())
            }
            ConfigError::TomlParse(path, err) => {
                write!(f, "failed to parse config file {}: {err}", path.display())
            }
            ConfigError::NoServers => {
                write!(f, "no backend servers given on the command line or in the config file")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// The merged, ready-to-use configuration.
#[derive(Debug)]
pub struct Config {
    pub backends: Vec<BackendParams>,
    pub replicas: usize,
    pub bind_addr: Option<SocketAddr>,
    pub log_level: String,
    pub key: Option<String>,
    pub value: Option<String>,
    pub get: bool,
    pub set: bool,
    pub delete: bool,
    pub quit: bool,
}

impl Config {
    pub fn load(args: CliArgs) -> Result<Config, ConfigError> {
        let toml_config = match &args.config {
            Some(path) => load_toml(path)?,
            None => TomlConfig::default(),
        };

        let backends = if !args.servers.is_empty() {
            args.servers.iter().map(|s| parse_backend(s)).collect::<Vec<_>>()
        } else {
            toml_config
                .backend
                .iter()
                .map(|b| BackendParams {
                    host: b.host.clone(),
                    port: b.port,
                })
                .collect()
        };
        if backends.is_empty() {
            return Err(ConfigError::NoServers);
        }

        let replicas = args.replicas.unwrap_or(toml_config.replicas);
        let log_level = args.log_level.clone().unwrap_or(toml_config.log_level);

        let bind_addr = args
            .bind_host
            .as_ref()
            .map(|host| format!("{host}:{}", args.bind_port.unwrap_or(0)))
            .and_then(|s| s.parse().ok());

        Ok(Config {
            backends,
            replicas,
            bind_addr,
            log_level,
            key: args.key,
            value: args.value,
            get: args.get,
            set: args.set,
            delete: args.delete,
            quit: args.quit,
        })
    }
}

/// Best-effort `host:port` parse. A malformed entry becomes a backend with
/// port 0 rather than failing the whole run — address resolution at
/// `connect()` time is where a truly bad entry surfaces, per §1's "external
/// collaborators" scoping (URL-form parsing itself is out of scope here).
fn parse_backend(s: &str) -> BackendParams {
    match s.rsplit_once(':') {
        Some((host, port)) => BackendParams {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port: port.parse().unwrap_or(0),
        },
        None => BackendParams {
            host: s.to_string(),
            port: 0,
        },
    }
}

fn load_toml(path: &Path) -> Result<TomlConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&text).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_servers(servers: Vec<&str>) -> CliArgs {
        CliArgs {
            servers: servers.into_iter().map(String::from).collect(),
            replicas: None,
            key: None,
            value: None,
            get: false,
            set: false,
            delete: false,
            quit: false,
            bind_host: None,
            bind_port: None,
            config: None,
            log_level: None,
        }
    }

    #[test]
    fn parses_ipv4_host_port() {
        let b = parse_backend("127.0.0.1:11211");
        assert_eq!(b.host, "127.0.0.1");
        assert_eq!(b.port, 11211);
    }

    #[test]
    fn parses_bracketed_ipv6_host_port() {
        let b = parse_backend("[::1]:11211");
        assert_eq!(b.host, "::1");
        assert_eq!(b.port, 11211);
    }

    #[test]
    fn load_uses_cli_servers_and_defaults() {
        let config = Config::load(args_with_servers(vec!["127.0.0.1:11211"])).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.replicas, 1);
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn load_fails_with_no_servers_anywhere() {
        let err = Config::load(args_with_servers(vec![])).unwrap_err();
        assert!(matches!(err, ConfigError::NoServers));
    }

    #[test]
    fn toml_config_default_matches_builtin_constants() {
        let toml_config = TomlConfig::default();
        assert_eq!(toml_config.replicas, 1);
        assert_eq!(toml_config.log_level, "info");
    }
}
