use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use fleet_protocol::{
    BatteryTier, DownlinkCommand, FleetError, OperatingState, RobotIdentity, StateSnapshot,
};

/// Sending side of a robot's downlink.
///
/// The downlink worker owns the socket and drains the other end of the
/// channel, so sending never blocks and never touches the network from
/// the caller's task.
#[derive(Debug, Clone)]
pub struct DownlinkHandle {
    tx: mpsc::UnboundedSender<String>,
    peer: Option<SocketAddr>,
}

impl DownlinkHandle {
    pub fn new(tx: mpsc::UnboundedSender<String>, peer: Option<SocketAddr>) -> Self {
        Self { tx, peer }
    }

    /// Create a handle together with the receiver a downlink worker drains.
    pub fn channel(peer: Option<SocketAddr>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, peer), rx)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Whether the worker behind this handle has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn send(&self, robot: RobotIdentity, command: &DownlinkCommand) -> Result<(), FleetError> {
        let frame = command.frame()?;
        self.tx.send(frame).map_err(|_| FleetError::SendFailure {
            robot,
            reason: "downlink worker has exited".into(),
        })
    }
}

/// What the last handoff away from a robot did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffSummary {
    pub substitute: RobotIdentity,
    pub tier: String,
    pub at: chrono::DateTime<chrono::Utc>,
}

/// Everything the coordinator tracks about one robot.
#[derive(Debug, Clone)]
pub struct RobotRecord {
    pub identity: RobotIdentity,
    pub first_seen_at: Instant,
    pub last_heartbeat_at: Instant,
    pub operating_state: OperatingState,
    pub previous_operating_state: OperatingState,
    pub snapshot: StateSnapshot,
    pub battery: BatteryTier,
    pub uplink_peer: Option<SocketAddr>,
    pub liveness_peer: Option<SocketAddr>,
    pub downlink: Option<DownlinkHandle>,
    /// Set once the robot was sent `/go_power`; it holds `Charging` while
    /// the robot drives to the charger.
    pub charge_directed: bool,
    pub last_handoff: Option<HandoffSummary>,
}

impl RobotRecord {
    pub fn new(identity: RobotIdentity, now: Instant) -> Self {
        Self {
            identity,
            first_seen_at: now,
            last_heartbeat_at: now,
            operating_state: OperatingState::Unknown,
            previous_operating_state: OperatingState::Unknown,
            snapshot: StateSnapshot::default(),
            battery: BatteryTier::Unknown,
            uplink_peer: None,
            liveness_peer: None,
            downlink: None,
            charge_directed: false,
            last_handoff: None,
        }
    }

    /// Refresh liveness.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_heartbeat_at {
            self.last_heartbeat_at = now;
        }
    }

    pub fn silent_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at)
    }

    /// Move to `state`, remembering the state it replaces. Returns whether
    /// anything changed.
    pub fn set_operating_state(&mut self, state: OperatingState) -> bool {
        if self.operating_state == state {
            return false;
        }
        self.previous_operating_state = self.operating_state;
        self.operating_state = state;
        true
    }

    /// Install a new downlink, dropping the previous one so its worker exits.
    pub fn attach_downlink(&mut self, handle: DownlinkHandle) {
        self.downlink = Some(handle);
    }

    pub fn has_downlink(&self) -> bool {
        self.downlink.as_ref().is_some_and(|d| !d.is_closed())
    }

    pub fn send(&self, command: &DownlinkCommand) -> Result<(), FleetError> {
        match &self.downlink {
            Some(handle) => handle.send(self.identity, command),
            None => Err(FleetError::SendFailure {
                robot: self.identity,
                reason: "no downlink connected".into(),
            }),
        }
    }

    /// Apply an adopt-state payload (the JSON body of a downlink `/info`).
    ///
    /// Point, path, cruise index, queue and reported states are replaced;
    /// the battery tier stays this robot's own. The coordinator state
    /// follows the adopted work unless that would mark the robot offline
    /// or charging.
    pub fn adopt_state_payload(&mut self, payload: &str) -> Result<(), FleetError> {
        let snapshot: StateSnapshot = serde_json::from_str(payload)
            .map_err(|e| FleetError::MalformedPayload(format!("adopt-state: {e}")))?;
        let adopted = snapshot.current_state.operating_state();
        self.snapshot = snapshot;
        if !matches!(adopted, OperatingState::Unknown | OperatingState::Charging) {
            self.set_operating_state(adopted);
        }
        Ok(())
    }

    pub fn view(&self) -> RobotView {
        RobotView {
            identity: self.identity,
            operating_state: self.operating_state,
            previous_operating_state: self.previous_operating_state,
            battery: self.battery,
            last_heartbeat_at: self.last_heartbeat_at,
            has_downlink: self.has_downlink(),
            snapshot: self.snapshot.clone(),
        }
    }
}

/// Point-in-time copy of a record, safe to inspect without holding a lock.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotView {
    pub identity: RobotIdentity,
    pub operating_state: OperatingState,
    pub previous_operating_state: OperatingState,
    pub battery: BatteryTier,
    pub last_heartbeat_at: Instant,
    pub has_downlink: bool,
    pub snapshot: StateSnapshot,
}
