//! Fleet Connector - the coordinator process
//!
//! Binds the uplink, downlink and liveness listeners, runs the liveness
//! monitor and discovery beacon, and routes operator commands to robots.

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod monitor;
pub mod operator_console;
pub mod router;
pub mod server;

pub use config::CoordinatorConfig;
pub use coordinator::{BoundListeners, Coordinator};
pub use router::{CommandRouter, DispatchReport};
