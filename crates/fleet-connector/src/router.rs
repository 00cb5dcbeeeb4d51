//! Command router: resolves an operator target selector to robots and
//! delivers a downlink command to each.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_protocol::{DownlinkCommand, FleetError, RobotIdentity, TargetSelector};
use fleet_state::{FleetRegistry, SharedRecord};

/// Per-target result of one routed command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    pub delivered: Vec<RobotIdentity>,
    pub failed: Vec<(RobotIdentity, FleetError)>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct CommandRouter {
    registry: Arc<FleetRegistry>,
    roster: HashMap<u32, RobotIdentity>,
}

impl CommandRouter {
    pub fn new(registry: Arc<FleetRegistry>, roster: HashMap<u32, RobotIdentity>) -> Self {
        Self { registry, roster }
    }

    /// Records the selector addresses.
    pub async fn resolve(
        &self,
        selector: TargetSelector,
    ) -> Result<Vec<(RobotIdentity, SharedRecord)>, FleetError> {
        match selector {
            TargetSelector::All => {
                let records = self.registry.records().await;
                if records.is_empty() {
                    return Err(FleetError::UnknownTarget(format!(
                        "{selector}: no robots connected"
                    )));
                }
                Ok(records)
            }
            TargetSelector::Robot(id) => {
                let identity = self.roster.get(&id).copied().ok_or_else(|| {
                    FleetError::UnknownTarget(format!("robot {id} is not configured"))
                })?;
                let record = self.registry.get(identity).await.ok_or_else(|| {
                    FleetError::UnknownTarget(format!("robot {id} ({identity}) has not connected"))
                })?;
                Ok(vec![(identity, record)])
            }
        }
    }

    /// Deliver `command` to every robot `selector` resolves to. A failed send
    /// to one robot does not stop delivery to the rest.
    pub async fn route(
        &self,
        selector: TargetSelector,
        command: &DownlinkCommand,
    ) -> Result<DispatchReport, FleetError> {
        let targets = self.resolve(selector).await?;
        let mut report = DispatchReport::default();

        for (identity, record) in targets {
            let result = record.lock().await.send(command);
            match result {
                Ok(()) => {
                    tracing::debug!(target: "downlink", robot = %identity, command = %command, "Command queued");
                    report.delivered.push(identity);
                }
                Err(e) => {
                    tracing::warn!(target: "downlink", robot = %identity, error = %e, "Command not delivered");
                    report.failed.push((identity, e));
                }
            }
        }

        Ok(report)
    }

    /// Parse operator text and route it.
    pub async fn route_text(&self, selector: &str, command: &str) -> Result<DispatchReport, FleetError> {
        let command: DownlinkCommand = command.parse()?;
        let selector: TargetSelector = selector.parse()?;
        self.route(selector, &command).await
    }
}
