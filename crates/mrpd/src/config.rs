//! Configuration loading and validation for the MRP daemon

use mrp::types::{DomainId, InMode, OuiType, PortConf, RecoveryProfile};
use mrp::{Capabilities, InRole, InstanceConf, InstanceId, MacAddr, PortNo, RingRole};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV: &str = "MRPD_CONFIG";

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Instance {id}: unknown interface '{name}'")]
    UnknownInterface { id: InstanceId, name: String },

    #[error("Instance {id}: {msg}")]
    InvalidInstance { id: InstanceId, msg: String },

    #[error("Duplicate instance ID {0}")]
    DuplicateInstance(InstanceId),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSettings,

    /// Interfaces taking part in MRP. Port numbers are 1-based positions
    /// in this list.
    #[serde(default)]
    pub ports: Vec<String>,

    #[serde(default)]
    pub capabilities: CapabilitySettings,

    #[serde(default)]
    pub runtime: RuntimeSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub instances: Vec<InstanceSettings>,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.node.validate()?;
        self.capabilities.validate()?;
        self.runtime.validate()?;
        for inst in &self.instances {
            inst.validate()?;
        }
        Ok(())
    }
}

/// Node-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NodeSettings {
    /// Linux bridge the ring ports are enslaved to
    #[validate(length(min = 1, max = 15))]
    pub bridge: String,

    /// Bridge address used in MRP PDUs; the bridge MAC when unset
    #[validate(custom = "validate_mac")]
    pub mac: Option<String>,
}

/// Platform capabilities advertised to the engine
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CapabilitySettings {
    #[validate(range(min = 1, max = 64))]
    pub instance_cnt_max: u32,

    pub fastest_recovery_profile: RecoveryProfile,
}

/// Event loop settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RuntimeSettings {
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_link_poll_interval")]
    pub link_poll_interval: Duration,

    /// Period of the status log line; zero disables it
    #[serde(with = "humantime_serde")]
    pub status_interval: Duration,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// One MRP instance, with interface names instead of port numbers
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct InstanceSettings {
    #[validate(range(min = 1, max = 64))]
    pub id: u32,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub name: String,

    pub role: RingRole,
    pub ring_port1: String,
    pub ring_port2: String,

    #[serde(default)]
    #[validate(range(max = 4095))]
    pub vlan: u16,

    #[serde(default = "default_profile")]
    pub recovery_profile: RecoveryProfile,

    pub manager_priority: Option<u16>,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub domain_name: String,

    /// UUID notation; the IEC default domain when unset
    #[validate(custom = "validate_domain_id")]
    pub domain_id: Option<String>,

    #[serde(default = "default_true")]
    pub react_on_link_change: bool,

    #[serde(default)]
    pub oui: OuiType,

    #[serde(default)]
    pub in_role: InRole,

    #[serde(default)]
    pub in_mode: InMode,

    pub in_port: Option<String>,

    #[serde(default)]
    #[validate(range(max = 4095))]
    pub in_vlan: u16,

    #[serde(default)]
    pub in_id: u16,

    #[serde(default)]
    #[validate(length(max = 32))]
    pub in_name: String,

    #[serde(default = "default_profile")]
    pub in_recovery_profile: RecoveryProfile,
}

fn default_true() -> bool {
    true
}

fn default_profile() -> RecoveryProfile {
    RecoveryProfile::Ms500
}

// Default implementations

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            bridge: "br0".to_string(),
            mac: None,
        }
    }
}

impl Default for CapabilitySettings {
    fn default() -> Self {
        let caps = Capabilities::default();
        Self {
            instance_cnt_max: caps.instance_cnt_max,
            fastest_recovery_profile: caps.fastest_recovery_profile,
        }
    }
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            link_poll_interval: Duration::from_millis(10),
            status_interval: Duration::from_secs(60),
        }
    }
}

// Custom validators

fn validate_mac(mac: &str) -> Result<(), ValidationError> {
    mac.parse::<MacAddr>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("mac_invalid"))
}

fn validate_domain_id(id: &str) -> Result<(), ValidationError> {
    id.parse::<DomainId>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("domain_id_invalid"))
}

fn validate_link_poll_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(1..=1_000).contains(&millis) {
        return Err(ValidationError::new("link_poll_interval_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from `MRPD_CONFIG` or the default search paths
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            let path = PathBuf::from(path);
            if !path.is_file() {
                return Err(ConfigError::FileNotFound);
            }
            return Self::load_from_file(&path);
        }

        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/mrpd/mrpd.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./mrpd.yaml"));

        paths.into_iter().find(|p: &PathBuf| p.exists() && p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/mrpd/mrpd.yaml"))
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            instance_cnt_max: self.capabilities.instance_cnt_max,
            fastest_recovery_profile: self.capabilities.fastest_recovery_profile,
            ..Capabilities::default()
        }
    }

    pub fn node_mac(&self) -> Option<MacAddr> {
        self.node.mac.as_deref().and_then(|m| m.parse().ok())
    }

    /// Port number of an interface
    pub fn port_of(&self, ifname: &str) -> Option<PortNo> {
        self.ports
            .iter()
            .position(|p| p == ifname)
            .map(|i| i as PortNo + 1)
    }

    /// Engine configuration of every instance, in file order
    pub fn instance_confs(&self) -> Result<Vec<(InstanceId, InstanceConf)>, ConfigError> {
        let mut seen = Vec::new();
        let mut confs = Vec::with_capacity(self.instances.len());

        for inst in &self.instances {
            if seen.contains(&inst.id) {
                return Err(ConfigError::DuplicateInstance(inst.id));
            }
            seen.push(inst.id);
            confs.push((inst.id, self.instance_conf(inst)?));
        }
        Ok(confs)
    }

    fn instance_conf(&self, inst: &InstanceSettings) -> Result<InstanceConf, ConfigError> {
        let port = |name: &str| -> Result<PortConf, ConfigError> {
            self.port_of(name)
                .map(PortConf::link)
                .ok_or_else(|| ConfigError::UnknownInterface {
                    id: inst.id,
                    name: name.to_string(),
                })
        };

        let domain_id = match &inst.domain_id {
            Some(id) => id
                .parse()
                .map_err(|msg| ConfigError::InvalidInstance { id: inst.id, msg })?,
            None => DomainId::default(),
        };
        let in_port = match (&inst.in_port, inst.in_role) {
            (Some(name), _) => port(name)?,
            (None, InRole::None) => PortConf::default(),
            (None, _) => {
                return Err(ConfigError::InvalidInstance {
                    id: inst.id,
                    msg: "interconnection role without in_port".to_string(),
                });
            }
        };
        let manager_priority = inst.manager_priority.unwrap_or(match inst.role {
            RingRole::AutoManager => 0xA000,
            _ => 0x8000,
        });

        Ok(InstanceConf {
            admin_active: inst.enabled,
            name: inst.name.clone(),
            domain_name: inst.domain_name.clone(),
            domain_id,
            role: inst.role,
            ring_port1: port(&inst.ring_port1)?,
            ring_port2: port(&inst.ring_port2)?,
            vlan: inst.vlan,
            recovery_profile: inst.recovery_profile,
            manager_priority,
            react_on_link_change: inst.react_on_link_change,
            oui: inst.oui,
            in_role: inst.in_role,
            in_mode: inst.in_mode,
            in_port,
            in_vlan: inst.in_vlan,
            in_id: inst.in_id,
            in_name: inst.in_name.clone(),
            in_recovery_profile: inst.in_recovery_profile,
        })
    }
}
