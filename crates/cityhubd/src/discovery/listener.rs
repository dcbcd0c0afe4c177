//! Discovery listener.
//!
//! Joins the discovery multicast group and processes REGISTRO / DESREGISTRO
//! announcements from devices. Every registry change is pushed to the
//! connected control sessions.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use cityhub_core::wire::MAX_DATAGRAM;
use cityhub_core::{Message, Notice};
use cityhub_services::{ClientSet, DeviceRecord, DeviceRegistry};

use crate::shutdown::Shutdown;

pub struct DiscoveryListener {
    socket: UdpSocket,
    registry: DeviceRegistry,
    clients: ClientSet,
    shutdown: Shutdown,
}

impl DiscoveryListener {
    pub fn new(
        socket: UdpSocket,
        registry: DeviceRegistry,
        clients: ClientSet,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            socket,
            registry,
            clients,
            shutdown,
        }
    }

    /// Receive announcements until shutdown. A bad datagram or a failed
    /// receive never ends the loop.
    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(addr = ?self.socket.local_addr().ok(), "discovery listener starting");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::info!("discovery listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "discovery recv_from failed");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }
    }

    pub(crate) async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let msg = match Message::decode(data) {
            Ok(m) => m,
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping undecodable discovery datagram");
                return;
            }
        };

        match msg {
            Message::Register {
                origin_id,
                port,
                kind,
            } => {
                let record = DeviceRecord {
                    id: origin_id,
                    addr: from.ip(),
                    command_port: port,
                    kind,
                };
                let notice = record.notice();
                let device = record.id.clone();
                let status = self.registry.upsert(record);
                tracing::info!(
                    device = %device,
                    addr = %from.ip(),
                    port,
                    kind = %kind,
                    status = status.as_str(),
                    "device registered"
                );
                self.clients.notify(&notice).await;
            }

            Message::Deregister { origin_id } => {
                if self.registry.remove(&origin_id).is_some() {
                    tracing::info!(device = %origin_id, "device deregistered");
                    self.clients
                        .notify(&Notice::Deregistered {
                            device_id: origin_id,
                        })
                        .await;
                } else {
                    tracing::debug!(device = %origin_id, "deregistration for unknown device");
                }
            }

            // Our own DISCOVERY loops back through the group; devices never
            // send DADOS or COMANDO here.
            other => {
                tracing::trace!(kind = %other.kind(), origin = other.origin_id(), "ignoring envelope on discovery channel");
            }
        }
    }
}

/// Bind the discovery port and join the multicast group.
///
/// Failing to bind is fatal; failing to join the group is not, the socket
/// still receives announcements sent straight to the port.
pub fn bind_socket(
    bind_addr: Ipv4Addr,
    port: u16,
    group: Ipv4Addr,
    interface: Ipv4Addr,
) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;
    socket
        .bind(&SocketAddrV4::new(bind_addr, port).into())
        .with_context(|| format!("bind({bind_addr}:{port})"))?;

    match socket.join_multicast_v4(&group, &interface) {
        Ok(()) => tracing::info!(%group, %interface, "joined discovery multicast group"),
        Err(e) => tracing::warn!(%group, %interface, error = %e, "failed to join discovery multicast group"),
    }

    UdpSocket::from_std(socket.into()).context("failed to convert to tokio UdpSocket")
}
