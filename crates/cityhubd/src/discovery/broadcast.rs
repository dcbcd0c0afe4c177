//! DISCOVERY solicitation.
//!
//! The gateway asks every live device to re-announce itself by sending a
//! DISCOVERY envelope to the discovery multicast group. It does so on a
//! bounded schedule after startup (devices may still be booting on the first
//! attempt) and on demand from control sessions.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use cityhub_core::config::DiscoveryConfig;
use cityhub_core::Message;

use crate::shutdown::Shutdown;

/// Upper bound on the spacing between two attempts.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Bounded retry schedule: attempt 1 fires immediately, attempt 2 after
/// `initial_delay`, each later one after the previous delay times
/// `backoff_factor`.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoverySchedule {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl DiscoverySchedule {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            attempts: config.attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay to wait before each attempt, relative to the previous attempt.
    /// Computed lazily, one item per attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        // Factors below 1 (or NaN) would shrink the spacing; treat as fixed.
        let factor = if self.backoff_factor.is_finite() && self.backoff_factor >= 1.0 {
            self.backoff_factor
        } else {
            1.0
        };

        let mut next = self.initial_delay.min(MAX_DELAY);
        (0..self.attempts).map(move |attempt| {
            if attempt == 0 {
                return Duration::ZERO;
            }
            let current = next;
            next = scale_capped(next, factor);
            current
        })
    }
}

/// `delay * factor`, saturating at [`MAX_DELAY`].
fn scale_capped(delay: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(delay.as_secs_f64() * factor).map_or(MAX_DELAY, |d| d.min(MAX_DELAY))
}

/// Sends DISCOVERY envelopes to the discovery group. Cheap to clone.
#[derive(Clone)]
pub struct DiscoveryBroadcaster {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    payload: Arc<Vec<u8>>,
}

impl DiscoveryBroadcaster {
    pub fn new(socket: UdpSocket, target: SocketAddr, origin_id: &str) -> Self {
        let payload = Message::Discovery {
            origin_id: origin_id.to_string(),
        }
        .encode_to_vec();
        Self {
            socket: Arc::new(socket),
            target,
            payload: Arc::new(payload),
        }
    }

    /// Create a sender socket for the given multicast interface.
    pub fn bind(target: SocketAddr, interface: Ipv4Addr, origin_id: &str) -> Result<Self> {
        let socket = make_multicast_socket(interface)
            .context("failed to create discovery broadcast socket")?;
        let socket =
            UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;
        Ok(Self::new(socket, target, origin_id))
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Fire one DISCOVERY. Fire-and-forget: devices answer with REGISTRO on
    /// the discovery channel, not to this socket.
    pub async fn solicit(&self) -> io::Result<usize> {
        self.socket.send_to(&self.payload, self.target).await
    }
}

/// Run `schedule` to completion or until shutdown, whichever comes first.
pub async fn solicit_loop(
    broadcaster: DiscoveryBroadcaster,
    schedule: DiscoverySchedule,
    mut shutdown: Shutdown,
) -> Result<()> {
    let total = schedule.attempts;

    for (i, delay) in schedule.delays().enumerate() {
        tokio::select! {
            _ = shutdown.wait() => {
                tracing::debug!("discovery schedule cancelled");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match broadcaster.solicit().await {
            Ok(n) => tracing::info!(
                attempt = i + 1,
                of = total,
                target = %broadcaster.target(),
                bytes = n,
                "DISCOVERY sent"
            ),
            Err(e) => tracing::warn!(attempt = i + 1, error = %e, "DISCOVERY send failed"),
        }
    }
    Ok(())
}

/// Create a UDP socket suitable for sending IPv4 multicast.
fn make_multicast_socket(interface: Ipv4Addr) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_multicast_if_v4(&interface).context("IP_MULTICAST_IF")?;
    // TTL 1: devices live on the gateway's own link
    socket.set_multicast_ttl_v4(1).context("IP_MULTICAST_TTL")?;
    socket.set_multicast_loop_v4(true).context("IP_MULTICAST_LOOP")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())
        .context("bind()")?;

    Ok(socket.into())
}
