//! Fleet State - the coordination engine
//!
//! Owns every robot's tracked record and the rules that mutate it:
//! uplink status handling, the liveness sweep, the charging rule, and the
//! tiered task handoff that moves work off a robot that needs to charge.

pub mod handoff;
pub mod liveness;
pub mod power;
pub mod record;
pub mod registry;
pub mod uplink;

pub use handoff::{
    CandidateTier, HandoffCoordinator, HandoffOutcome, HandoffPolicy, SelectedBy, Selection,
};
pub use liveness::{sweep, LossOfContact};
pub use power::{HandoffUrgency, PowerDecision};
pub use record::{DownlinkHandle, HandoffSummary, RobotRecord, RobotView};
pub use registry::{FleetRegistry, SharedRecord};
pub use uplink::{UplinkHandler, UplinkOutcome};
