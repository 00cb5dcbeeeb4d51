//! Fleet Protocol - Core types and message definitions
//!
//! Defines the vocabulary shared by the coordinator and the robots: robot
//! identities, the reported and coordinator-side state enumerations, the
//! newline-delimited uplink/downlink text protocol, and the error taxonomy.

pub mod constants;
pub mod error;
pub mod messages;
pub mod types;

pub use constants::*;
pub use error::*;
pub use messages::*;
pub use types::*;
