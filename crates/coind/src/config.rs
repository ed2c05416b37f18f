//! Configuration file support for coind
//!
//! Loads and validates coind configuration from TOML files.
//! Default location: /etc/coin/coind.toml

use crate::error::{CoinError, Result};
use coin_types::MacAddress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/coin/coind.toml";

/// Operating mode of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// IP uplink bonding
    Bonding,
    /// Multi-homing through NAT mirrors
    Nat,
}

impl OperatingMode {
    /// Human readable description, reported by `get_mode`.
    pub fn description(&self) -> &'static str {
        match self {
            OperatingMode::Bonding => "IP Uplink Bonding",
            OperatingMode::Nat => "Multi-Homed (NATed)",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingMode::Bonding => write!(f, "bonding"),
            OperatingMode::Nat => write!(f, "nat"),
        }
    }
}

impl FromStr for OperatingMode {
    type Err = CoinError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bonding" => Ok(OperatingMode::Bonding),
            "nat" => Ok(OperatingMode::Nat),
            other => Err(CoinError::Config(format!("Unknown mode: {}", other))),
        }
    }
}

/// State store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

/// OpenFlow listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenFlowConfig {
    /// Address the switch connects to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Interval between ECHO_REQUESTs in seconds
    #[serde(default = "default_echo_interval")]
    pub echo_interval_secs: u64,

    /// Silence in seconds after which a session is closed
    #[serde(default = "default_echo_timeout")]
    pub echo_timeout_secs: u64,
}

/// JSON control socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Unix socket path
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Remove a stale socket file before binding
    #[serde(default)]
    pub force_bind: bool,
}

/// Datapath configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FabricConfig {
    /// Datapath name
    #[serde(default = "default_datapath")]
    pub datapath: String,

    /// Create the datapath at startup and delete it at shutdown
    #[serde(default = "default_create_datapath")]
    pub create_datapath: bool,
}

/// State store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

/// Operating mode section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    #[serde(default = "default_mode")]
    pub name: OperatingMode,
}

/// NAT mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatConfig {
    /// Primary interfaces mirrored at startup
    #[serde(default)]
    pub interfaces: Vec<String>,

    /// Address of the local client interface
    #[serde(default = "default_inner_addr")]
    pub inner_addr: Ipv4Addr,

    /// Prefix length of the inner network
    #[serde(default = "default_inner_prefix_len")]
    pub inner_prefix_len: u8,

    /// Gateway address on the inner network
    #[serde(default = "default_inner_gateway")]
    pub inner_gateway: Ipv4Addr,

    /// Hardware address pinned for the inner gateway; defaults to the
    /// switch side of the local interface pair
    #[serde(default)]
    pub gateway_mac: Option<MacAddress>,

    /// Probe attempts before giving up
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,

    /// Delay between probe attempts in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

/// Complete coind configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoindConfig {
    #[serde(default)]
    pub openflow: OpenFlowConfig,

    #[serde(default)]
    pub control: ControlConfig,

    #[serde(default)]
    pub fabric: FabricConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub mode: ModeConfig,

    #[serde(default)]
    pub nat: NatConfig,
}

// Default functions
fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 6633))
}

fn default_echo_interval() -> u64 {
    15
}

fn default_echo_timeout() -> u64 {
    45
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/etc/coin.sock")
}

fn default_datapath() -> String {
    "dp0".to_string()
}

fn default_create_datapath() -> bool {
    true
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_mode() -> OperatingMode {
    OperatingMode::Bonding
}

fn default_inner_addr() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 1)
}

fn default_inner_prefix_len() -> u8 {
    24
}

fn default_inner_gateway() -> Ipv4Addr {
    Ipv4Addr::new(192, 168, 4, 254)
}

fn default_max_retry() -> u32 {
    10
}

fn default_retry_delay() -> u64 {
    1000
}

// Default implementations
impl Default for OpenFlowConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            echo_interval_secs: default_echo_interval(),
            echo_timeout_secs: default_echo_timeout(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            force_bind: false,
        }
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            datapath: default_datapath(),
            create_datapath: default_create_datapath(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            redis_url: default_redis_url(),
        }
    }
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            name: default_mode(),
        }
    }
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            inner_addr: default_inner_addr(),
            inner_prefix_len: default_inner_prefix_len(),
            inner_gateway: default_inner_gateway(),
            gateway_mac: None,
            max_retry: default_max_retry(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

impl CoindConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                CoinError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(CoinError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn echo_interval(&self) -> Duration {
        Duration::from_secs(self.openflow.echo_interval_secs)
    }

    pub fn echo_timeout(&self) -> Duration {
        Duration::from_secs(self.openflow.echo_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.nat.retry_delay_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.openflow.echo_interval_secs == 0 {
            return Err(CoinError::Config(
                "echo_interval_secs must be > 0".to_string(),
            ));
        }

        if self.openflow.echo_timeout_secs <= self.openflow.echo_interval_secs {
            return Err(CoinError::Config(
                "echo_timeout_secs must exceed echo_interval_secs".to_string(),
            ));
        }

        if self.control.socket_path.as_os_str().is_empty() {
            return Err(CoinError::Config("socket_path is empty".to_string()));
        }

        if self.fabric.datapath.is_empty() || self.fabric.datapath.len() > 15 {
            return Err(CoinError::Config(
                "datapath name must be 1-15 characters".to_string(),
            ));
        }

        if self.store.backend == StoreBackend::Redis && self.store.redis_url.is_empty() {
            return Err(CoinError::Config(
                "redis_url is required for the redis backend".to_string(),
            ));
        }

        if self.nat.max_retry == 0 {
            return Err(CoinError::Config("max_retry must be > 0".to_string()));
        }

        if self.nat.inner_prefix_len > 32 {
            return Err(CoinError::Config(
                "inner_prefix_len must be 0-32".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CoindConfig::default();
        assert_eq!(config.openflow.listen, "0.0.0.0:6633".parse().unwrap());
        assert_eq!(config.control.socket_path, PathBuf::from("/etc/coin.sock"));
        assert_eq!(config.fabric.datapath, "dp0");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.mode.name, OperatingMode::Bonding);
        assert_eq!(config.nat.max_retry, 10);
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(CoindConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_echo_timeout() {
        let mut config = CoindConfig::default();
        config.openflow.echo_timeout_secs = config.openflow.echo_interval_secs;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_datapath_name() {
        let mut config = CoindConfig::default();
        config.fabric.datapath = "a-datapath-name-too-long".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_max_retry() {
        let mut config = CoindConfig::default();
        config.nat.max_retry = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[control]
socket_path = "/run/coin.sock"
force_bind = true

[mode]
name = "nat"

[nat]
interfaces = ["eth1", "wlan0"]
gateway_mac = "02:00:00:00:00:fe"
"#;
        let config: CoindConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.control.socket_path, PathBuf::from("/run/coin.sock"));
        assert!(config.control.force_bind);
        assert_eq!(config.mode.name, OperatingMode::Nat);
        assert_eq!(config.nat.interfaces, vec!["eth1", "wlan0"]);
        assert_eq!(
            config.nat.gateway_mac,
            Some("02:00:00:00:00:fe".parse().unwrap())
        );
        // Unspecified values should use defaults
        assert_eq!(config.nat.inner_gateway, Ipv4Addr::new(192, 168, 4, 254));
        assert_eq!(config.fabric.datapath, "dp0");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[store]\nbackend = \"redis\"\nredis_url = \"redis://10.0.0.1/2\"").unwrap();

        let config = CoindConfig::load_or_default(file.path()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.redis_url, "redis://10.0.0.1/2");
    }

    #[test]
    fn test_load_malformed_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mode]\nname = \"bridge\"").unwrap();

        let err = CoindConfig::load_or_default(file.path()).unwrap_err();
        assert!(matches!(err, CoinError::Config(_)));
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = CoindConfig::load_or_default("/nonexistent/coind.toml").unwrap();
        assert_eq!(config.fabric.datapath, "dp0");
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("NAT".parse::<OperatingMode>().unwrap(), OperatingMode::Nat);
        assert_eq!(
            "bonding".parse::<OperatingMode>().unwrap(),
            OperatingMode::Bonding
        );
        assert!("bridge".parse::<OperatingMode>().is_err());
        assert_eq!(OperatingMode::Nat.description(), "Multi-Homed (NATed)");
    }
}
