//! Membership and failure detection (spec §4.2, §4.6): the scheduler
//! topology tree, the registration protocol that grows and shrinks it, and
//! the ping/pong observer+driver pair that detects a dead parent or child.

mod driver;
mod observer;
mod registration;
mod retry;
pub mod topology;

pub use driver::{spawn_driver, spawn_timeout_sweeper, DriverHandle, DriverMsg};
pub use observer::{spawn_observer, HeartbeatObserverConfig, ObserverHandle, PingTransport};
pub use registration::{
    spawn_registration_service, RegisterCode, RegisterRequest, RegisteredResponse,
    RegistrationHandle, RegistrationMsg, TOPOLOGY_KEY,
};
pub use retry::{retry_register, RegisterRetryConfig};
pub use topology::{Node, NodeState, Topology};
