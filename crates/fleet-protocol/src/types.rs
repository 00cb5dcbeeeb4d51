use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Network identity of a robot: the IP address its connections come from.
///
/// Stable for the life of a connection session and used as the registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RobotIdentity(IpAddr);

impl RobotIdentity {
    pub fn new(ip: IpAddr) -> Self {
        Self(ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.0
    }
}

impl From<IpAddr> for RobotIdentity {
    fn from(ip: IpAddr) -> Self {
        Self(ip)
    }
}

impl FromStr for RobotIdentity {
    type Err = std::net::AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<IpAddr>().map(Self)
    }
}

impl fmt::Display for RobotIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse, coordinator-side availability of a robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OperatingState {
    Idle,
    Cruising,
    OnTask,
    Carrying,
    Charging,
    #[default]
    /// Safe default; also forced by the liveness timeout.
    Unknown,
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Cruising => "cruising",
            Self::OnTask => "on-task",
            Self::Carrying => "carrying",
            Self::Charging => "charging",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Fine-grained state as reported by the robot firmware.
///
/// Serialized with the firmware names; the descriptive names are accepted
/// on input as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum InternalRobotState {
    #[serde(rename = "IDLE", alias = "Idle")]
    Idle,
    #[serde(rename = "CRUISE", alias = "Cruising", alias = "CRUISING")]
    Cruising,
    #[serde(rename = "TASK", alias = "OnTask", alias = "ON_TASK")]
    OnTask,
    #[serde(rename = "CARRYING", alias = "Carrying")]
    Carrying,
    #[serde(rename = "INIT", alias = "Initializing", alias = "INITIALIZING")]
    Initializing,
    #[serde(rename = "POWER", alias = "Charging", alias = "CHARGING")]
    Charging,
    #[default]
    #[serde(rename = "UNKNOWN", alias = "Unknown")]
    Unknown,
}

impl InternalRobotState {
    /// The single mapping from reported state to coordinator state.
    ///
    /// `Initializing` counts as `Idle`. `Charging` maps to `Charging` here;
    /// whether the record actually enters `Charging` is decided by the
    /// power-management rule, which may keep an idle robot idle.
    pub fn operating_state(self) -> OperatingState {
        match self {
            Self::Idle | Self::Initializing => OperatingState::Idle,
            Self::Cruising => OperatingState::Cruising,
            Self::OnTask => OperatingState::OnTask,
            Self::Carrying => OperatingState::Carrying,
            Self::Charging => OperatingState::Charging,
            Self::Unknown => OperatingState::Unknown,
        }
    }
}

/// Battery level bucket reported by a robot.
///
/// Deliberately not `Ord`: `Unknown` must never compare as safe, so tiers
/// are only inspected through the predicates below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BatteryTier {
    #[serde(rename = "FULL", alias = "Full")]
    Full,
    /// Above half charge.
    #[serde(rename = "ENOUGH", alias = "Enough")]
    Enough,
    /// At or below half charge.
    #[serde(rename = "ATTENTION", alias = "Attention")]
    Attention,
    /// Critical.
    #[serde(rename = "LOW", alias = "Low")]
    Low,
    #[default]
    #[serde(rename = "UNKNOW", alias = "UNKNOWN", alias = "Unknown")]
    Unknown,
}

impl BatteryTier {
    /// Enough charge to take over another robot's work.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Full | Self::Enough)
    }
}

impl fmt::Display for BatteryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Full => "full",
            Self::Enough => "enough",
            Self::Attention => "attention",
            Self::Low => "low",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Entry of a robot's task queue. Firmware sends either numbered stops or
/// named tasks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskRef {
    Number(i64),
    Name(String),
}

/// The logical task/navigation state of a robot: what gets handed to a
/// substitute during a handoff.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub current_point: Option<serde_json::Value>,
    pub current_state: InternalRobotState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub last_state: InternalRobotState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub current_path: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cruise_index: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub task_queue: Vec<TaskRef>,
}

/// Body of an uplink `/info` report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub snapshot: StateSnapshot,
    /// Absent or null when the robot had no reading for this report.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_level: Option<BatteryTier>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
