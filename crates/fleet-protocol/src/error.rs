use crate::types::RobotIdentity;

/// Errors surfaced by the coordination core.
///
/// None of these are fatal: each is handled by the component that detects
/// it and reported through logging.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FleetError {
    #[error("connection to {robot} lost: {reason}")]
    ConnectionLost { robot: RobotIdentity, reason: String },

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("send to {robot} failed: {reason}")]
    SendFailure { robot: RobotIdentity, reason: String },

    #[error("no substitute found for {robot}")]
    HandoffExhausted { robot: RobotIdentity },

    #[error("unknown target: {0}")]
    UnknownTarget(String),

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("configuration error: {0}")]
    Config(String),
}
