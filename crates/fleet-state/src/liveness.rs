//! Staleness audit over every tracked robot.

use std::time::{Duration, Instant};

use fleet_protocol::{OperatingState, RobotIdentity};

use crate::registry::FleetRegistry;

/// A robot that just went silent for longer than the timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOfContact {
    pub robot: RobotIdentity,
    pub silent_for: Duration,
    pub previous_state: OperatingState,
    pub detected_at: chrono::DateTime<chrono::Utc>,
}

/// Demote every robot silent for longer than `timeout` to `Unknown`.
///
/// Each record is checked and demoted under its own lock, so a status
/// report racing the sweep either lands before (and the robot is fresh) or
/// after (and promotes it again). Robots already `Unknown` are not
/// reported twice. This never promotes a state.
pub async fn sweep(registry: &FleetRegistry, timeout: Duration, now: Instant) -> Vec<LossOfContact> {
    let mut lost = Vec::new();

    for (identity, record) in registry.records().await {
        let mut rec = record.lock().await;
        let silent_for = rec.silent_for(now);
        if silent_for <= timeout || rec.operating_state == OperatingState::Unknown {
            continue;
        }

        let previous_state = rec.operating_state;
        rec.set_operating_state(OperatingState::Unknown);
        rec.charge_directed = false;
        lost.push(LossOfContact {
            robot: identity,
            silent_for,
            previous_state,
            detected_at: chrono::Utc::now(),
        });
    }

    lost
}
