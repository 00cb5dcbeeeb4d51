//! The newline-delimited text protocol spoken over the robot sockets.
//!
//! Every line is `<command>` or `<command> <payload>`, split at the first
//! space. Uplink lines come from robots; downlink lines go to them.

use std::fmt;
use std::str::FromStr;

use crate::constants::*;
use crate::error::FleetError;
use crate::types::{StateSnapshot, StatusReport};

/// Split a line into its command word and optional payload.
pub fn split_command(line: &str) -> (&str, Option<&str>) {
    match line.split_once(' ') {
        Some((cmd, rest)) => (cmd, Some(rest)),
        None => (line, None),
    }
}

/// A message received on a robot's uplink.
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkMessage {
    /// `/info <json>`: full status report.
    Status(StatusReport),
    /// `/power_low`: the robot's battery went critical.
    PowerLow,
    /// Anything else. Only counts as a sign of life.
    Other(String),
}

impl UplinkMessage {
    pub fn parse(line: &str) -> Result<Self, FleetError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(FleetError::MalformedPayload("empty line".into()));
        }

        match split_command(line) {
            (CMD_INFO, Some(payload)) => serde_json::from_str::<StatusReport>(payload)
                .map(UplinkMessage::Status)
                .map_err(|e| FleetError::MalformedPayload(format!("{CMD_INFO}: {e}"))),
            (CMD_INFO, None) => Err(FleetError::MalformedPayload(format!(
                "{CMD_INFO} without payload"
            ))),
            (CMD_POWER_LOW, _) => Ok(UplinkMessage::PowerLow),
            _ => Ok(UplinkMessage::Other(line.to_string())),
        }
    }
}

/// A command sent to a robot over its downlink.
#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkCommand {
    /// `/task <n>`: run numbered task `n`.
    Task(u32),
    /// `/go_power`: drive to the charger.
    GoPower,
    /// `/info <json>`: adopt the given task/navigation state.
    AdoptState(StateSnapshot),
    /// Operator text forwarded verbatim.
    Raw(String),
}

impl DownlinkCommand {
    /// Text of the command without the line terminator.
    pub fn encode(&self) -> Result<String, FleetError> {
        Ok(match self {
            Self::Task(n) => format!("{CMD_TASK} {n}"),
            Self::GoPower => CMD_GO_POWER.to_string(),
            Self::AdoptState(snapshot) => {
                let body = serde_json::to_string(snapshot)
                    .map_err(|e| FleetError::MalformedPayload(e.to_string()))?;
                format!("{CMD_INFO} {body}")
            }
            Self::Raw(text) => text.clone(),
        })
    }

    /// Encoded command followed by `\n`, ready for the socket.
    pub fn frame(&self) -> Result<String, FleetError> {
        let mut line = self.encode()?;
        line.push('\n');
        Ok(line)
    }
}

impl FromStr for DownlinkCommand {
    type Err = FleetError;

    /// Parse operator input. Known commands become typed variants; any other
    /// non-trivial text is kept as `Raw`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() || text == "/" {
            return Err(FleetError::InvalidCommand(format!("'{text}'")));
        }

        let parsed = match split_command(text) {
            (CMD_GO_POWER, None) => Self::GoPower,
            (CMD_TASK, Some(arg)) => match arg.trim().parse::<u32>() {
                Ok(n) => Self::Task(n),
                Err(_) => Self::Raw(text.to_string()),
            },
            (CMD_INFO, Some(body)) => match serde_json::from_str::<StateSnapshot>(body) {
                Ok(snapshot) => Self::AdoptState(snapshot),
                Err(_) => Self::Raw(text.to_string()),
            },
            _ => Self::Raw(text.to_string()),
        };
        Ok(parsed)
    }
}

impl fmt::Display for DownlinkCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(n) => write!(f, "{CMD_TASK} {n}"),
            Self::GoPower => write!(f, "{CMD_GO_POWER}"),
            Self::AdoptState(_) => write!(f, "{CMD_INFO} <state>"),
            Self::Raw(text) => write!(f, "{text}"),
        }
    }
}

/// Which robots an operator command is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetSelector {
    /// A robot by its configured operator id.
    Robot(u32),
    /// Every tracked robot.
    All,
}

impl FromStr for TargetSelector {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == BROADCAST_SELECTOR {
            return Ok(Self::All);
        }
        s.parse::<u32>()
            .map(Self::Robot)
            .map_err(|_| FleetError::UnknownTarget(s.to_string()))
    }
}

impl fmt::Display for TargetSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Robot(id) => write!(f, "{id}"),
            Self::All => write!(f, "{BROADCAST_SELECTOR}"),
        }
    }
}
