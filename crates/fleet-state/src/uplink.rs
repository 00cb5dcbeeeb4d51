//! Per-line processing for the uplink and liveness channels.

use std::sync::Arc;
use std::time::Instant;

use fleet_protocol::{FleetError, RobotIdentity, UplinkMessage};

use crate::handoff::{HandoffCoordinator, HandoffOutcome};
use crate::power::{self, PowerDecision};
use crate::registry::FleetRegistry;

/// What one uplink line did.
#[derive(Debug, Clone, PartialEq)]
pub enum UplinkOutcome {
    Status {
        decision: PowerDecision,
        handoff: Option<HandoffOutcome>,
    },
    PowerLow {
        handoff: Option<HandoffOutcome>,
    },
    /// Unrecognised line, counted as a heartbeat only.
    Heartbeat,
    /// Line could not be parsed; the connection stays open.
    Ignored(FleetError),
}

/// Applies uplink traffic to the registry and fires handoffs.
#[derive(Debug, Clone)]
pub struct UplinkHandler {
    registry: Arc<FleetRegistry>,
    handoff: Arc<HandoffCoordinator>,
}

impl UplinkHandler {
    pub fn new(registry: Arc<FleetRegistry>, handoff: Arc<HandoffCoordinator>) -> Self {
        Self { registry, handoff }
    }

    pub fn registry(&self) -> &Arc<FleetRegistry> {
        &self.registry
    }

    /// Record a sign of life from `robot`.
    pub async fn heartbeat(&self, robot: RobotIdentity, now: Instant) {
        self.registry.update(robot, |rec| rec.touch(now)).await;
    }

    /// Process one uplink line from `robot`.
    ///
    /// Any line refreshes liveness, even one that fails to parse.
    pub async fn handle_line(&self, robot: RobotIdentity, line: &str, now: Instant) -> UplinkOutcome {
        tracing::debug!(target: "uplink", robot = %robot, line = %line, "Uplink message");

        let message = match UplinkMessage::parse(line) {
            Ok(m) => m,
            Err(e) => {
                self.heartbeat(robot, now).await;
                tracing::warn!(target: "uplink", robot = %robot, error = %e, "Ignoring malformed uplink message");
                return UplinkOutcome::Ignored(e);
            }
        };

        match message {
            UplinkMessage::Status(report) => {
                let decision = self
                    .registry
                    .update(robot, |rec| {
                        rec.touch(now);
                        power::apply_status(rec, report)
                    })
                    .await;
                if decision.charge_started {
                    tracing::info!(target: "uplink", robot = %robot, "Robot started charging");
                }
                if decision.charge_complete {
                    tracing::info!(target: "uplink", robot = %robot, "Charge complete, robot released to the pool");
                }
                let handoff = match decision.handoff {
                    Some(urgency) => Some(self.handoff.trigger(&self.registry, robot, urgency).await),
                    None => None,
                };
                UplinkOutcome::Status { decision, handoff }
            }
            UplinkMessage::PowerLow => {
                let decision = self
                    .registry
                    .update(robot, |rec| {
                        rec.touch(now);
                        power::apply_power_low(rec)
                    })
                    .await;
                let handoff = match decision.handoff {
                    Some(urgency) => {
                        tracing::warn!(target: "uplink", robot = %robot, "Battery critical");
                        Some(self.handoff.trigger(&self.registry, robot, urgency).await)
                    }
                    None => None,
                };
                UplinkOutcome::PowerLow { handoff }
            }
            UplinkMessage::Other(_) => {
                self.heartbeat(robot, now).await;
                UplinkOutcome::Heartbeat
            }
        }
    }
}
