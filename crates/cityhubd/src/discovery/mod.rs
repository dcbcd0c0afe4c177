//! Device discovery over the multicast group: the listener that maintains
//! the registry, and the broadcaster that solicits re-announcement.

pub mod broadcast;
pub mod listener;

pub use broadcast::{solicit_loop, DiscoveryBroadcaster, DiscoverySchedule};
pub use listener::DiscoveryListener;
