//! Data listener.
//!
//! Receives DADOS datagrams from sensors, registers senders the gateway has
//! not heard of, and forwards each reading as a text line to every control
//! session.

use std::net::SocketAddr;

use anyhow::Result;
use tokio::net::UdpSocket;

use cityhub_core::wire::MAX_DATAGRAM;
use cityhub_core::{Message, Notice};
use cityhub_services::{ClientSet, DeviceRecord, DeviceRegistry};

use crate::shutdown::Shutdown;

pub struct DataListener {
    socket: UdpSocket,
    registry: DeviceRegistry,
    clients: ClientSet,
    shutdown: Shutdown,
}

impl DataListener {
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

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        tracing::info!(addr = ?self.socket.local_addr().ok(), "data listener starting");

        loop {
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::info!("data listener shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, from) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "data recv_from failed");
                            continue;
                        }
                    };
                    self.handle_datagram(&buf[..len], from).await;
                }
            }
        }
    }

    pub(crate) async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let (origin_id, reading) = match Message::decode(data) {
            Ok(Message::Data { origin_id, reading }) => (origin_id, reading),
            Ok(other) => {
                tracing::trace!(kind = %other.kind(), %from, "ignoring non-DADOS envelope on data channel");
                return;
            }
            Err(e) => {
                tracing::trace!(%from, error = %e, "dropping undecodable data datagram");
                return;
            }
        };

        let record = DeviceRecord::auto_registered(origin_id.as_str(), from.ip());
        let registration = record.notice();
        if self.registry.insert_if_absent(record) {
            tracing::info!(device = %origin_id, addr = %from.ip(), "device auto-registered from data");
            self.clients.notify(&registration).await;
        }

        let line = Notice::Reading {
            device_id: origin_id,
            reading,
        };
        tracing::debug!(%from, "{line}");
        self.clients.notify(&line).await;
    }
}
