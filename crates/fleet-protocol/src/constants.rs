/// Default uplink port. Downlink and liveness listen on the next two ports.
pub const DEFAULT_PORT: u16 = 8888;
pub const DOWNLINK_PORT_OFFSET: u16 = 1;
pub const LIVENESS_PORT_OFFSET: u16 = 2;

/// Silence longer than this demotes a robot to `Unknown`.
pub const LIVENESS_TIMEOUT_SECS: u64 = 15;
/// Interval between two liveness sweeps.
pub const SWEEP_INTERVAL_SECS: u64 = 2;
/// Bytes read per frame on the liveness channel.
pub const LIVENESS_TOKEN_LEN: usize = 6;

pub const DEFAULT_BROADCAST_PORT: u16 = 9999;
pub const BROADCAST_INTERVAL_SECS: u64 = 1;
/// Prefix of the discovery beacon: `SERVER:<ip>:<port>`.
pub const DISCOVERY_PREFIX: &str = "SERVER";

/// Operator selector addressing every tracked robot.
pub const BROADCAST_SELECTOR: &str = "-1";

// Wire commands.
pub const CMD_INFO: &str = "/info";
pub const CMD_POWER_LOW: &str = "/power_low";
pub const CMD_TASK: &str = "/task";
pub const CMD_GO_POWER: &str = "/go_power";
