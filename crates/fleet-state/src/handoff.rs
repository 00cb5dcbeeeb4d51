//! Battery-aware task handoff.
//!
//! When a robot has to go charging, its task/navigation state is handed to
//! a substitute so the fleet's committed work continues. The substitute is
//! picked by an ordered list of candidate tiers evaluated over a registry
//! snapshot; the first tier with a match wins, and within a tier the first
//! match in registry order wins. A configured fallback robot is the last
//! resort.
//!
//! The transfer:
//! 1. send the substitute `/info <snapshot>` (adopt state)
//! 2. apply the same serialized snapshot to the substitute's record
//! 3. send the source `/go_power` and mark it `Charging`
//!
//! At most one handoff per source is in flight; a second trigger for the
//! same source while one is resolving is suppressed.

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use fleet_protocol::{DownlinkCommand, FleetError, OperatingState, RobotIdentity};

use crate::power::HandoffUrgency;
use crate::record::{HandoffSummary, RobotView};
use crate::registry::FleetRegistry;

/// One ranked rule of the candidate search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateTier {
    /// Robot is idle.
    Idle,
    /// Battery is `Enough` or `Full`, whatever the robot is doing.
    HealthyBattery,
    /// Robot is cruising; interrupting it is acceptable.
    Cruising,
}

impl CandidateTier {
    pub fn matches(&self, view: &RobotView) -> bool {
        match self {
            Self::Idle => view.operating_state == OperatingState::Idle,
            Self::HealthyBattery => view.battery.is_healthy(),
            Self::Cruising => view.operating_state == OperatingState::Cruising,
        }
    }

    pub fn default_order() -> Vec<CandidateTier> {
        vec![Self::Idle, Self::HealthyBattery, Self::Cruising]
    }
}

impl fmt::Display for CandidateTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::HealthyBattery => "healthy_battery",
            Self::Cruising => "cruising",
        };
        write!(f, "{s}")
    }
}

/// Which rule picked the substitute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectedBy {
    Tier(CandidateTier),
    Fallback,
}

impl fmt::Display for SelectedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tier(tier) => write!(f, "{tier}"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub substitute: RobotIdentity,
    pub selected_by: SelectedBy,
}

impl Selection {
    /// Whether the substitute still qualifies under the rule that picked it.
    pub fn still_holds(&self, view: &RobotView) -> bool {
        if view.identity != self.substitute || !view.has_downlink {
            return false;
        }
        match self.selected_by {
            SelectedBy::Tier(tier) => ranked_eligible(view) && tier.matches(view),
            SelectedBy::Fallback => true,
        }
    }
}

/// Ranked tiers skip robots that are offline or already charging.
fn ranked_eligible(view: &RobotView) -> bool {
    view.has_downlink
        && !matches!(
            view.operating_state,
            OperatingState::Unknown | OperatingState::Charging
        )
}

/// Candidate selection rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPolicy {
    /// Tiers in evaluation order.
    pub tiers: Vec<CandidateTier>,
    /// Substitute of last resort.
    pub fallback: Option<RobotIdentity>,
}

impl Default for HandoffPolicy {
    fn default() -> Self {
        Self {
            tiers: CandidateTier::default_order(),
            fallback: None,
        }
    }
}

impl HandoffPolicy {
    pub fn new(tiers: Vec<CandidateTier>, fallback: Option<RobotIdentity>) -> Self {
        Self { tiers, fallback }
    }

    /// Pick a substitute for `source` from `candidates`.
    ///
    /// Deterministic for a given snapshot. Ranked tiers only consider robots
    /// that are reachable over a downlink and neither offline nor charging;
    /// the fallback only needs to be tracked and reachable.
    pub fn select(&self, source: RobotIdentity, candidates: &[RobotView]) -> Option<Selection> {
        let eligible: Vec<&RobotView> = candidates
            .iter()
            .filter(|v| v.identity != source && ranked_eligible(v))
            .collect();

        for tier in &self.tiers {
            if let Some(view) = eligible.iter().find(|v| tier.matches(v)) {
                return Some(Selection {
                    substitute: view.identity,
                    selected_by: SelectedBy::Tier(*tier),
                });
            }
        }

        let fallback = self.fallback.filter(|id| *id != source)?;
        candidates
            .iter()
            .find(|v| v.identity == fallback && v.has_downlink)
            .map(|v| Selection {
                substitute: v.identity,
                selected_by: SelectedBy::Fallback,
            })
    }
}

/// Result of one handoff trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    Transferred {
        substitute: RobotIdentity,
        selected_by: SelectedBy,
    },
    /// The source is already part of another handoff, as source or substitute.
    Suppressed,
    /// The source is already charging.
    NotNeeded,
    /// No tier produced a substitute; retried on the next trigger.
    Exhausted,
    /// The transfer could not be carried out; the source keeps its work.
    Aborted(FleetError),
}

/// Runs handoffs and keeps each robot in at most one of them at a time.
#[derive(Debug, Default)]
pub struct HandoffCoordinator {
    policy: HandoffPolicy,
    in_flight: Mutex<HashSet<RobotIdentity>>,
}

/// Releases a robot's in-flight slot when the handoff finishes.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<RobotIdentity>>,
    robot: RobotIdentity,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.robot);
    }
}

impl HandoffCoordinator {
    pub fn new(policy: HandoffPolicy) -> Self {
        Self {
            policy,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn policy(&self) -> &HandoffPolicy {
        &self.policy
    }

    /// Whether a handoff for `robot` is currently resolving.
    pub fn is_in_flight(&self, robot: RobotIdentity) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        set.contains(&robot)
    }

    fn reserved(&self) -> HashSet<RobotIdentity> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn begin(&self, robot: RobotIdentity) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(robot) {
            return None;
        }
        Some(InFlightGuard {
            in_flight: &self.in_flight,
            robot,
        })
    }

    /// Find a substitute for `source` and move its work there.
    pub async fn trigger(
        &self,
        registry: &FleetRegistry,
        source: RobotIdentity,
        urgency: HandoffUrgency,
    ) -> HandoffOutcome {
        let Some(_guard) = self.begin(source) else {
            tracing::debug!(robot = %source, "Handoff already in flight, trigger suppressed");
            return HandoffOutcome::Suppressed;
        };

        let Some(source_record) = registry.get(source).await else {
            return HandoffOutcome::Aborted(FleetError::UnknownTarget(source.to_string()));
        };

        // Re-validate right before acting; the trigger may be stale.
        let snapshot = {
            let rec = source_record.lock().await;
            if rec.operating_state == OperatingState::Charging {
                return HandoffOutcome::NotNeeded;
            }
            rec.snapshot.clone()
        };

        let payload = match serde_json::to_string(&snapshot) {
            Ok(p) => p,
            Err(e) => {
                return HandoffOutcome::Aborted(FleetError::MalformedPayload(e.to_string()));
            }
        };

        // Robots passed over this round: reserved by another handoff, or no
        // longer eligible once their record was locked.
        let mut passed_over = HashSet::new();
        let (selection, _substitute_guard) = loop {
            let reserved = self.reserved();
            let mut candidates = registry.snapshot().await;
            candidates.retain(|v| {
                !passed_over.contains(&v.identity)
                    && (v.identity == source || !reserved.contains(&v.identity))
            });

            let Some(selection) = self.policy.select(source, &candidates) else {
                tracing::warn!(
                    robot = %source,
                    urgency = %urgency,
                    passed_over = passed_over.len(),
                    error = %FleetError::HandoffExhausted { robot: source },
                    "Handoff deferred until the next trigger"
                );
                return HandoffOutcome::Exhausted;
            };
            let substitute = selection.substitute;

            // The substitute must not be handing off its own work meanwhile.
            let Some(guard) = self.begin(substitute) else {
                passed_over.insert(substitute);
                continue;
            };
            let Some(substitute_record) = registry.get(substitute).await else {
                passed_over.insert(substitute);
                continue;
            };

            let mut sub = substitute_record.lock().await;
            if !selection.still_holds(&sub.view()) {
                tracing::debug!(robot = %source, substitute = %substitute, "Substitute changed since selection");
                passed_over.insert(substitute);
                continue;
            }
            if let Err(e) = sub.send(&DownlinkCommand::AdoptState(snapshot.clone())) {
                tracing::warn!(
                    robot = %source,
                    substitute = %substitute,
                    error = %e,
                    "Adopt-state delivery failed, handoff abandoned"
                );
                return HandoffOutcome::Aborted(e);
            }
            if let Err(e) = sub.adopt_state_payload(&payload) {
                return HandoffOutcome::Aborted(e);
            }
            break (selection, guard);
        };

        {
            let mut rec = source_record.lock().await;
            if let Err(e) = rec.send(&DownlinkCommand::GoPower) {
                tracing::warn!(robot = %source, error = %e, "Charge directive not delivered");
            }
            rec.set_operating_state(OperatingState::Charging);
            rec.charge_directed = true;
            rec.last_handoff = Some(HandoffSummary {
                substitute: selection.substitute,
                tier: selection.selected_by.to_string(),
                at: chrono::Utc::now(),
            });
        }

        tracing::info!(
            robot = %source,
            substitute = %selection.substitute,
            tier = %selection.selected_by,
            urgency = %urgency,
            "Task state handed off, source sent to charge"
        );

        HandoffOutcome::Transferred {
            substitute: selection.substitute,
            selected_by: selection.selected_by,
        }
    }
}
