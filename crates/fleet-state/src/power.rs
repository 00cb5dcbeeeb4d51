//! Charging / power-management rule.
//!
//! Runs on every status report and `/power_low` alert, under the record's
//! lock. It updates the record and says whether a handoff is needed; the
//! handoff itself runs afterwards, once the lock is released.

use fleet_protocol::{BatteryTier, InternalRobotState, OperatingState, StatusReport};

use crate::record::RobotRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffUrgency {
    /// Battery dropped to `Attention`: find a substitute before it is critical.
    Proactive,
    /// Battery is critical.
    Urgent,
}

impl std::fmt::Display for HandoffUrgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proactive => write!(f, "proactive"),
            Self::Urgent => write!(f, "urgent"),
        }
    }
}

/// Effect of one report on a robot's power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerDecision {
    pub charge_started: bool,
    pub charge_complete: bool,
    pub handoff: Option<HandoffUrgency>,
}

/// Apply a `/info` status report to `record`.
pub fn apply_status(record: &mut RobotRecord, report: StatusReport) -> PowerDecision {
    let mut decision = PowerDecision::default();
    let previous_battery = record.battery;
    if let Some(tier) = report.power_level {
        record.battery = tier;
    }

    let reported = report.snapshot.current_state;
    record.snapshot = report.snapshot;

    if reported == InternalRobotState::Charging {
        record.charge_directed = false;
        if record.operating_state != OperatingState::Idle {
            decision.charge_started = record.set_operating_state(OperatingState::Charging);
            if record.battery == BatteryTier::Full {
                decision.charge_complete = record.set_operating_state(OperatingState::Idle);
            }
        }
        // Physically on the charger: nothing to hand off.
        return decision;
    }

    let mapped = reported.operating_state();
    let en_route = record.charge_directed
        && record.operating_state == OperatingState::Charging
        && mapped != OperatingState::Unknown;
    if !en_route {
        record.charge_directed = false;
        record.set_operating_state(mapped);
    }

    if record.operating_state != OperatingState::Charging {
        decision.handoff = match record.battery {
            BatteryTier::Attention => Some(HandoffUrgency::Proactive),
            BatteryTier::Low if previous_battery != BatteryTier::Low => Some(HandoffUrgency::Urgent),
            _ => None,
        };
    }

    decision
}

/// Apply a `/power_low` alert. A repeat alert while already `Low` is a no-op.
pub fn apply_power_low(record: &mut RobotRecord) -> PowerDecision {
    let mut decision = PowerDecision::default();
    if record.operating_state != OperatingState::Charging && record.battery != BatteryTier::Low {
        record.battery = BatteryTier::Low;
        decision.handoff = Some(HandoffUrgency::Urgent);
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use fleet_protocol::StateSnapshot;

    fn record() -> RobotRecord {
        RobotRecord::new("10.0.0.1".parse().unwrap(), Instant::now())
    }

    fn report(state: InternalRobotState, power: Option<BatteryTier>) -> StatusReport {
        StatusReport {
            snapshot: StateSnapshot {
                current_state: state,
                ..StateSnapshot::default()
            },
            power_level: power,
        }
    }

    #[test]
    fn test_status_maps_state() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::Initializing, None));
        assert_eq!(rec.operating_state, OperatingState::Idle);
        apply_status(&mut rec, report(InternalRobotState::Carrying, None));
        assert_eq!(rec.operating_state, OperatingState::Carrying);
        assert_eq!(rec.previous_operating_state, OperatingState::Idle);
    }

    #[test]
    fn test_missing_power_level_keeps_tier() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::OnTask, Some(BatteryTier::Enough)));
        apply_status(&mut rec, report(InternalRobotState::OnTask, None));
        assert_eq!(rec.battery, BatteryTier::Enough);
    }

    #[test]
    fn test_charging_report_enters_charging() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::OnTask, None));
        let d = apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Low)));
        assert!(d.charge_started);
        assert_eq!(rec.operating_state, OperatingState::Charging);
        assert_eq!(d.handoff, None);
    }

    #[test]
    fn test_idle_robot_on_charger_stays_idle() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::Idle, None));
        let d = apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Attention)));
        assert_eq!(rec.operating_state, OperatingState::Idle);
        assert_eq!(d, PowerDecision::default());
    }

    #[test]
    fn test_full_while_charging_releases_once() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::OnTask, None));
        apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Attention)));
        let first = apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Full)));
        assert!(first.charge_complete);
        assert_eq!(rec.operating_state, OperatingState::Idle);
        let second = apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Full)));
        assert!(!second.charge_complete);
        assert_eq!(rec.operating_state, OperatingState::Idle);
    }

    #[test]
    fn test_attention_triggers_proactive_handoff() {
        let mut rec = record();
        let d = apply_status(&mut rec, report(InternalRobotState::Cruising, Some(BatteryTier::Attention)));
        assert_eq!(d.handoff, Some(HandoffUrgency::Proactive));
    }

    #[test]
    fn test_low_triggers_only_on_transition() {
        let mut rec = record();
        let d = apply_status(&mut rec, report(InternalRobotState::OnTask, Some(BatteryTier::Low)));
        assert_eq!(d.handoff, Some(HandoffUrgency::Urgent));
        let d = apply_status(&mut rec, report(InternalRobotState::OnTask, Some(BatteryTier::Low)));
        assert_eq!(d.handoff, None);
    }

    #[test]
    fn test_en_route_robot_holds_charging() {
        let mut rec = record();
        rec.set_operating_state(OperatingState::Charging);
        rec.charge_directed = true;
        let d = apply_status(&mut rec, report(InternalRobotState::OnTask, Some(BatteryTier::Attention)));
        assert_eq!(rec.operating_state, OperatingState::Charging);
        assert_eq!(d.handoff, None);

        apply_status(&mut rec, report(InternalRobotState::Charging, Some(BatteryTier::Attention)));
        assert!(!rec.charge_directed);
    }

    #[test]
    fn test_power_low_duplicate_suppressed() {
        let mut rec = record();
        apply_status(&mut rec, report(InternalRobotState::OnTask, Some(BatteryTier::Enough)));
        assert_eq!(apply_power_low(&mut rec).handoff, Some(HandoffUrgency::Urgent));
        assert_eq!(rec.battery, BatteryTier::Low);
        assert_eq!(apply_power_low(&mut rec).handoff, None);
    }

    #[test]
    fn test_power_low_ignored_while_charging() {
        let mut rec = record();
        rec.set_operating_state(OperatingState::Charging);
        assert_eq!(apply_power_low(&mut rec), PowerDecision::default());
        assert_eq!(rec.battery, BatteryTier::Unknown);
    }
}
