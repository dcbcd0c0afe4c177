//! Control sessions: the TCP accept loop and the per-session command handler.

pub mod server;
pub mod session;

use cityhub_services::{ClientSet, CommandDispatcher, DeviceRegistry};

use crate::discovery::DiscoveryBroadcaster;

pub use server::ControlServer;
pub use session::ControlSession;

/// Everything a control session needs, cloned into each session task.
#[derive(Clone)]
pub struct SessionContext {
    pub registry: DeviceRegistry,
    pub clients: ClientSet,
    pub dispatcher: CommandDispatcher,
    /// `None` when the gateway could not create its DISCOVERY sender.
    pub discovery: Option<DiscoveryBroadcaster>,
}
