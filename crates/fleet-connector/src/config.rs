//! Coordinator configuration, loaded from TOML with per-section defaults.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use fleet_protocol::{
    FleetError, RobotIdentity, BROADCAST_INTERVAL_SECS, DEFAULT_BROADCAST_PORT, DEFAULT_PORT,
    DOWNLINK_PORT_OFFSET, LIVENESS_PORT_OFFSET, LIVENESS_TIMEOUT_SECS, LIVENESS_TOKEN_LEN,
    SWEEP_INTERVAL_SECS,
};
use fleet_state::{CandidateTier, HandoffPolicy};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub network: NetworkConfig,
    pub liveness: LivenessConfig,
    pub fleet: FleetConfig,
    pub handoff: HandoffConfig,
    pub operator: OperatorConfig,
    pub logging: LoggingConfig,
}

/// Listener and discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the three TCP listeners bind to.
    pub bind_addr: String,
    /// Address advertised in the discovery beacon.
    pub advertise_ip: String,
    /// Uplink port; downlink and liveness use the next two. `0` binds each
    /// listener to an ephemeral port.
    pub port: u16,
    pub broadcast_port: u16,
    pub broadcast_interval_secs: u64,
    /// Connection cap per listener.
    pub max_connections: usize,
    /// Whether to run the UDP discovery beacon.
    pub discovery: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            advertise_ip: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            broadcast_port: DEFAULT_BROADCAST_PORT,
            broadcast_interval_secs: BROADCAST_INTERVAL_SECS,
            max_connections: 64,
            discovery: true,
        }
    }
}

impl NetworkConfig {
    fn addr_at(&self, offset: u16) -> String {
        let port = if self.port == 0 { 0 } else { self.port + offset };
        format!("{}:{}", self.bind_addr, port)
    }

    pub fn uplink_addr(&self) -> String {
        self.addr_at(0)
    }

    pub fn downlink_addr(&self) -> String {
        self.addr_at(DOWNLINK_PORT_OFFSET)
    }

    pub fn liveness_addr(&self) -> String {
        self.addr_at(LIVENESS_PORT_OFFSET)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Bytes read per liveness frame.
    pub token_len: usize,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: LIVENESS_TIMEOUT_SECS,
            sweep_interval_secs: SWEEP_INTERVAL_SECS,
            token_len: LIVENESS_TOKEN_LEN,
        }
    }
}

impl LivenessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Binding from operator ids to robot addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RobotEntry {
    pub id: u32,
    pub ip: RobotIdentity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub robots: Vec<RobotEntry>,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let robots = [(1, [192, 168, 203, 18]), (2, [192, 168, 203, 37]), (3, [192, 168, 203, 47])]
            .into_iter()
            .map(|(id, octets)| RobotEntry {
                id,
                ip: RobotIdentity::new(std::net::IpAddr::from(octets)),
            })
            .collect();
        Self { robots }
    }
}

impl FleetConfig {
    pub fn identity_for(&self, id: u32) -> Option<RobotIdentity> {
        self.robots.iter().find(|r| r.id == id).map(|r| r.ip)
    }

    pub fn roster(&self) -> HashMap<u32, RobotIdentity> {
        self.robots.iter().map(|r| (r.id, r.ip)).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Candidate tiers in evaluation order.
    pub tiers: Vec<CandidateTier>,
    /// Operator id of the substitute of last resort. Robot 2 unless set.
    pub fallback_robot: Option<u32>,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            tiers: CandidateTier::default_order(),
            fallback_robot: Some(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub enabled: bool,
    /// Bare token -> list of `"<selector> <command>"` lines.
    pub shortcuts: BTreeMap<String, Vec<String>>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        let mut shortcuts = BTreeMap::new();
        let keypad = [
            ("1", "1 /task 2"),
            ("2", "1 /task 3"),
            ("3", "1 /task 4"),
            (".", "1 /task 5"),
            ("4", "2 /task 2"),
            ("5", "2 /task 3"),
            ("6", "2 /task 4"),
            ("+", "2 /task 5"),
            ("7", "3 /task 2"),
            ("8", "3 /task 3"),
            ("9", "3 /task 4"),
            ("-", "3 /task 5"),
            ("/power_low", "2 /task 6"),
        ];
        for (token, line) in keypad {
            shortcuts.insert(token.to_string(), vec![line.to_string()]);
        }
        shortcuts.insert(
            "/ID".to_string(),
            vec!["3 /task 3".into(), "2 /task 4".into(), "1 /task 7".into()],
        );
        Self {
            enabled: true,
            shortcuts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CoordinatorConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, FleetError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn from_toml_str(text: &str) -> Result<Self, FleetError> {
        toml::from_str(text).map_err(|e| FleetError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), FleetError> {
        let liveness = &self.liveness;
        if liveness.timeout_secs == 0 || liveness.sweep_interval_secs == 0 {
            return Err(FleetError::Config("liveness intervals must be non-zero".into()));
        }
        if liveness.sweep_interval_secs >= liveness.timeout_secs {
            return Err(FleetError::Config(format!(
                "sweep interval ({}s) must be shorter than the timeout ({}s)",
                liveness.sweep_interval_secs, liveness.timeout_secs
            )));
        }
        if liveness.token_len == 0 {
            return Err(FleetError::Config("liveness token_len must be non-zero".into()));
        }
        if self.network.port.checked_add(LIVENESS_PORT_OFFSET).is_none() {
            return Err(FleetError::Config(format!(
                "port {} leaves no room for downlink and liveness ports",
                self.network.port
            )));
        }
        if self.network.max_connections == 0 {
            return Err(FleetError::Config("max_connections must be non-zero".into()));
        }

        let mut ids = HashSet::new();
        let mut ips = HashSet::new();
        for robot in &self.fleet.robots {
            if !ids.insert(robot.id) {
                return Err(FleetError::Config(format!("duplicate robot id {}", robot.id)));
            }
            if !ips.insert(robot.ip) {
                return Err(FleetError::Config(format!("duplicate robot ip {}", robot.ip)));
            }
        }

        if let Some(id) = self.handoff.fallback_robot {
            if self.fleet.identity_for(id).is_none() {
                return Err(FleetError::Config(format!(
                    "fallback robot {id} is not listed in [fleet].robots"
                )));
            }
        }
        Ok(())
    }

    pub fn handoff_policy(&self) -> HandoffPolicy {
        let fallback = self
            .handoff
            .fallback_robot
            .and_then(|id| self.fleet.identity_for(id));
        HandoffPolicy::new(self.handoff.tiers.clone(), fallback)
    }
}
