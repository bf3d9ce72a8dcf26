//! Configuration resolution for ffbridge.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (`<config dir>/ffbridge/settings.json`)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables (`FFBRIDGE_*`)
//! 5. CLI arguments (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Complete ffbridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Kind of local endpoint a bridge listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Filesystem-domain socket (`unix:/path/to.sock`).
    Unix,
    /// Loopback TCP with an OS-assigned port (`tcp://127.0.0.1:PORT`).
    Tcp,
}

impl Default for Transport {
    fn default() -> Self {
        if cfg!(unix) { Self::Unix } else { Self::Tcp }
    }
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unix => "unix",
            Self::Tcp => "tcp",
        }
    }

    /// Whether this transport can be bound on the current platform.
    pub const fn is_supported(self) -> bool {
        match self {
            Self::Unix => cfg!(unix),
            Self::Tcp => true,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unix" => Ok(Self::Unix),
            "tcp" => Ok(Self::Tcp),
            other => Err(Error::Config(format!(
                "Unknown transport '{other}' (expected 'unix' or 'tcp')"
            ))),
        }
    }
}

/// Bridge endpoint and pump settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub transport: Transport,
    /// Directory for unix socket files. Defaults to the system temp dir.
    pub socket_dir: Option<PathBuf>,
    /// Seconds to wait for the first connection. `0` waits forever.
    pub connect_timeout_secs: u64,
    /// Size of the pump buffer in bytes.
    pub buffer_size: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            transport: Transport::default(),
            socket_dir: None,
            connect_timeout_secs: 60,
            buffer_size: 64 * 1024,
        }
    }
}

impl BridgeSettings {
    pub const fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connect_timeout_secs))
        }
    }

    /// Directory new socket files are created in.
    pub fn resolved_socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// Check values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<()> {
        if self.bridge.buffer_size == 0 {
            return Err(Error::Config("buffer_size must be greater than zero".into()));
        }
        if !self.bridge.transport.is_supported() {
            return Err(Error::Config(format!(
                "Transport '{}' is not available on this platform",
                self.bridge.transport
            )));
        }
        Ok(())
    }
}

/// Load configuration with hierarchical resolution.
///
/// `explicit` must exist when given; the global file is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        let global = load_config_file(&global_path)?;
        merge_config(&mut config, global);
    }

    if let Some(path) = explicit {
        let file = load_config_file(path)?;
        merge_config(&mut config, file);
    }

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.validate()?;

    Ok(config)
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("ffbridge").join("settings.json"))
}

/// A settings file as written: only the keys it names are `Some`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    bridge: BridgeFile,
    logging: LoggingFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BridgeFile {
    transport: Option<Transport>,
    socket_dir: Option<PathBuf>,
    connect_timeout_secs: Option<u64>,
    buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LoggingFile {
    level: Option<String>,
    json: Option<bool>,
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Overwrite only the keys `overlay` actually set.
fn merge_config(base: &mut Config, overlay: ConfigFile) {
    let ConfigFile { bridge, logging } = overlay;

    if let Some(transport) = bridge.transport {
        base.bridge.transport = transport;
    }
    if bridge.socket_dir.is_some() {
        base.bridge.socket_dir = bridge.socket_dir;
    }
    if let Some(secs) = bridge.connect_timeout_secs {
        base.bridge.connect_timeout_secs = secs;
    }
    if let Some(size) = bridge.buffer_size {
        base.bridge.buffer_size = size;
    }

    if let Some(level) = logging.level {
        base.logging.level = level;
    }
    if let Some(json) = logging.json {
        base.logging.json = json;
    }
}

/// Apply `FFBRIDGE_*` overrides, reading variables through `lookup`.
///
/// Unparseable values are logged and ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("FFBRIDGE_TRANSPORT") {
        match val.parse() {
            Ok(transport) => config.bridge.transport = transport,
            Err(e) => tracing::warn!(error = %e, "Ignoring FFBRIDGE_TRANSPORT"),
        }
    }
    if let Some(val) = lookup("FFBRIDGE_SOCKET_DIR")
        && !val.is_empty()
    {
        config.bridge.socket_dir = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("FFBRIDGE_CONNECT_TIMEOUT") {
        match val.parse() {
            Ok(n) => config.bridge.connect_timeout_secs = n,
            Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring FFBRIDGE_CONNECT_TIMEOUT"),
        }
    }
    if let Some(val) = lookup("FFBRIDGE_BUFFER_SIZE") {
        match val.parse() {
            Ok(n) => config.bridge.buffer_size = n,
            Err(e) => tracing::warn!(value = %val, error = %e, "Ignoring FFBRIDGE_BUFFER_SIZE"),
        }
    }
    if let Some(val) = lookup("FFBRIDGE_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Some(val) = lookup("FFBRIDGE_LOG_JSON") {
        config.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn default_config_has_60s_connect_timeout() {
        let config = Config::default();
        assert_eq!(config.bridge.connect_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.bridge.buffer_size, 64 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let settings = BridgeSettings {
            connect_timeout_secs: 0,
            ..Default::default()
        };
        assert!(settings.connect_timeout().is_none());
    }

    #[test]
    fn transport_parses_case_insensitively() {
        assert_eq!("TCP".parse::<Transport>().unwrap(), Transport::Tcp);
        assert_eq!(" unix ".parse::<Transport>().unwrap(), Transport::Unix);
        assert!("pipe".parse::<Transport>().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("FFBRIDGE_TRANSPORT", "tcp"),
                ("FFBRIDGE_SOCKET_DIR", "/run/ffbridge"),
                ("FFBRIDGE_CONNECT_TIMEOUT", "5"),
                ("FFBRIDGE_BUFFER_SIZE", "4096"),
                ("FFBRIDGE_LOG_LEVEL", "debug"),
                ("FFBRIDGE_LOG_JSON", "true"),
            ]),
        );
        assert_eq!(config.bridge.transport, Transport::Tcp);
        assert_eq!(config.bridge.socket_dir, Some(PathBuf::from("/run/ffbridge")));
        assert_eq!(config.bridge.connect_timeout_secs, 5);
        assert_eq!(config.bridge.buffer_size, 4096);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            lookup_from(&[
                ("FFBRIDGE_TRANSPORT", "carrier-pigeon"),
                ("FFBRIDGE_CONNECT_TIMEOUT", "soon"),
            ]),
        );
        assert_eq!(config.bridge.transport, Transport::default());
        assert_eq!(config.bridge.connect_timeout_secs, 60);
    }

    #[test]
    fn file_overlay_keeps_socket_dir_when_unset() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"bridge": {"transport": "tcp", "socket_dir": null, "connect_timeout_secs": 10, "buffer_size": 1024}}"#,
        )
        .unwrap();

        let mut config = Config::default();
        config.bridge.socket_dir = Some(PathBuf::from("/srv/sockets"));
        merge_config(&mut config, load_config_file(&path).unwrap());

        assert_eq!(config.bridge.transport, Transport::Tcp);
        assert_eq!(config.bridge.socket_dir, Some(PathBuf::from("/srv/sockets")));
        assert_eq!(config.bridge.connect_timeout_secs, 10);
        assert_eq!(config.bridge.buffer_size, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_overlay_keeps_earlier_layers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"logging": {"level": "debug"}}"#).unwrap();

        // Stands in for values read from the global settings file.
        let mut config = Config::default();
        config.bridge.transport = Transport::Tcp;
        config.bridge.connect_timeout_secs = 5;
        config.logging.json = true;

        merge_config(&mut config, load_config_file(&path).unwrap());

        assert_eq!(config.bridge.transport, Transport::Tcp);
        assert_eq!(config.bridge.connect_timeout_secs, 5);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: Config = serde_json::from_str(r#"{"bridge": {"transport": "tcp"}}"#).unwrap();
        assert_eq!(config.bridge.transport, Transport::Tcp);
        assert_eq!(config.bridge.buffer_size, 64 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("nope.json"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_buffer_fails_validation() {
        let mut config = Config::default();
        config.bridge.buffer_size = 0;
        assert!(config.validate().is_err());
    }
}
