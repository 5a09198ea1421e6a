use log::LevelFilter;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

pub const CONFIG_PATH_VAR: &str = "HIVEWRITE_CONFIG";

/// Service configuration.
///
/// Loaded from an optional TOML file, then overridden by `HIVEWRITE_*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    addr: String,
    warehouse_dir: PathBuf,
    log_level: String,
    max_connections: usize,
    writer_threads: usize,
    file_write_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:9083".to_string(),
            warehouse_dir: PathBuf::from("warehouse"),
            log_level: "info".to_string(),
            max_connections: 64,
            writer_threads: std::thread::available_parallelism().map_or(4, |n| n.get()),
            file_write_attempts: 3,
        }
    }
}

impl Config {
    /// Reads `HIVEWRITE_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse config: {e}")))
    }

    /// Applies `HIVEWRITE_*` values returned by `lookup` over the current settings.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("HIVEWRITE_ADDR") {
            self.addr = addr;
        }
        if let Some(dir) = lookup("HIVEWRITE_WAREHOUSE_DIR") {
            self.warehouse_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup("HIVEWRITE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(value) = lookup("HIVEWRITE_MAX_CONNECTIONS") {
            self.max_connections = parse_var("HIVEWRITE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = lookup("HIVEWRITE_WRITER_THREADS") {
            self.writer_threads = parse_var("HIVEWRITE_WRITER_THREADS", &value)?;
        }
        if let Some(value) = lookup("HIVEWRITE_FILE_WRITE_ATTEMPTS") {
            self.file_write_attempts = parse_var("HIVEWRITE_FILE_WRITE_ATTEMPTS", &value)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.addr.parse::<SocketAddr>().map_err(|_| {
            Error::InvalidConfig(format!("Invalid listen address: {}", self.addr))
        })?;
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| Error::InvalidConfig(format!("Invalid log level: {}", self.log_level)))?;
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.writer_threads == 0 {
            return Err(Error::InvalidConfig(
                "writer_threads must be positive".to_string(),
            ));
        }
        if self.file_write_attempts == 0 {
            return Err(Error::InvalidConfig(
                "file_write_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn get_tcp_socket_addr(&self) -> &str {
        &self.addr
    }

    pub fn get_warehouse_dir(&self) -> &Path {
        &self.warehouse_dir
    }

    pub fn get_log_level(&self) -> LevelFilter {
        LevelFilter::from_str(&self.log_level).unwrap_or(LevelFilter::Info)
    }

    pub fn get_max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn get_writer_threads(&self) -> usize {
        self.writer_threads
    }

    pub fn get_file_write_attempts(&self) -> u32 {
        self.file_write_attempts
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("Invalid {key} value: {value}")))
}
