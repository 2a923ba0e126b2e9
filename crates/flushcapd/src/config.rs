//! Daemon configuration.
//!
//! Layers, lowest precedence first: built-in defaults, the optional TOML
//! config file, `FLUSHCAP_*` environment variables, command line flags.
//! The last two are merged by clap.
//!
//! ```toml
//! listen = "0.0.0.0:8080"
//! canonical_url = "toilets.example.com:8080"
//! sensor_spec = "/etc/flushcap/circuits.toml"
//! forward = ["upstairs.local:8080"]
//! simulate = false
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::server::{ServerConfig, DEFAULT_LISTEN};

/// Command line interface of the daemon.
#[derive(Parser, Debug, Default)]
#[command(name = "flushcapd", version, about = "Flush Capacitor - occupancy sensor hub")]
pub struct Cli {
    /// Network address to listen on [default: localhost:8080]
    #[arg(long, env = "FLUSHCAP_LISTEN")]
    pub listen: Option<String>,

    /// Address browsers use to reach this instance [default: localhost:8080]
    #[arg(long, env = "FLUSHCAP_CANONICAL_URL")]
    pub canonical_url: Option<String>,

    /// Device spec file describing the GPIO circuits
    #[arg(long, env = "FLUSHCAP_SENSOR_SPEC")]
    pub sensor_spec: Option<PathBuf>,

    /// Forward events from another instance (repeatable)
    #[arg(long, env = "FLUSHCAP_FORWARD", value_delimiter = ',')]
    pub forward: Vec<String>,

    /// Register the random demo sensors L and R
    #[arg(long, env = "FLUSHCAP_SIMULATE")]
    pub simulate: bool,

    /// TOML config file
    #[arg(long, short = 'c', env = "FLUSHCAP_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Contents of the config file. Every key is optional.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub listen: Option<String>,
    pub canonical_url: Option<String>,
    pub sensor_spec: Option<PathBuf>,
    #[serde(default)]
    pub forward: Vec<String>,
    pub simulate: Option<bool>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Where the local sensors come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorSource {
    /// GPIO circuits from a device spec file.
    Spec(PathBuf),
    /// Random sensors `L` and `R`.
    Demo,
    /// No local sensors; only forwarded ones.
    None,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub sensors: SensorSource,
}

impl DaemonConfig {
    /// Resolves the layers, reading the config file named by `--config`.
    pub fn load(cli: Cli) -> Result<Self, ConfigError> {
        let file = match &cli.config {
            Some(path) => FileConfig::read(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(file, cli))
    }

    /// Applies `cli` on top of `file` on top of the defaults.
    pub fn merge(file: FileConfig, cli: Cli) -> Self {
        let listen = cli
            .listen
            .or(file.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let canonical_url = cli
            .canonical_url
            .or(file.canonical_url)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let forward = if cli.forward.is_empty() {
            file.forward
        } else {
            cli.forward
        };
        let sensor_spec = cli.sensor_spec.or(file.sensor_spec);
        let simulate = cli.simulate || file.simulate.unwrap_or(false);

        let sensors = match sensor_spec {
            Some(path) => {
                if simulate {
                    warn!(spec = %path.display(), "Both a sensor spec and simulation requested, using the spec");
                }
                SensorSource::Spec(path)
            }
            None if simulate => SensorSource::Demo,
            None if !forward.is_empty() => SensorSource::None,
            None => SensorSource::Demo,
        };

        Self {
            server: ServerConfig {
                listen,
                canonical_url,
                forward,
                ..ServerConfig::default()
            },
            sensors,
        }
    }
}

/// Errors that can occur while loading the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
