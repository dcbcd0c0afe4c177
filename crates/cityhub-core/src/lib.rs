//! cityhub-core — wire envelope, control line protocol, configuration and
//! error types shared by every cityhub crate.

pub mod config;
pub mod control;
pub mod error;
pub mod wire;

pub use control::{ControlRequest, Notice};
pub use error::{ErrorKind, GatewayError, LookupError, ProtocolError};
pub use wire::{DeviceKind, Message, MessageKind, WireError};
