//! cityhubd — the city IoT gateway.
//!
//! Devices announce themselves on a UDP multicast discovery group and push
//! readings to the data port. Operators connect over TCP, watch the live
//! feed and send commands, which the gateway relays to the device's own
//! command port.

pub mod control;
pub mod data;
pub mod discovery;
pub mod gateway;
pub mod shutdown;

pub use gateway::{Gateway, GatewayAddrs};
pub use shutdown::{Shutdown, ShutdownTrigger};
