//! cityhub-services — shared gateway state and the services built on it.
//!
//! [`DeviceRegistry`] and [`ClientSet`] are the only mutable state in the
//! gateway. Both synchronize internally; tasks hold clones and call their
//! methods, never the maps underneath.

pub mod clients;
pub mod dispatcher;
pub mod registry;

pub use clients::{ClientHandle, ClientSet, SessionId};
pub use dispatcher::CommandDispatcher;
pub use registry::{DeviceRecord, DeviceRegistry, Upsert};
