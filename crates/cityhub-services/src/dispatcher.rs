//! Command dispatcher. Relays one control-session command to a device.
//!
//! Each command opens its own short-lived TCP connection to the device's
//! advertised command port, writes one COMANDO envelope and closes. Devices
//! never answer on this channel, so delivery is fire-and-forget: the outcome
//! is logged here and never reported back to the session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use cityhub_core::wire::Command;
use cityhub_core::{ErrorKind, GatewayError, LookupError, Message};

use crate::registry::DeviceRegistry;

#[derive(Clone)]
pub struct CommandDispatcher {
    registry: DeviceRegistry,
    origin_id: String,
    timeout: Duration,
}

impl CommandDispatcher {
    /// `origin_id` is stamped on every envelope; `timeout` bounds the connect
    /// and the write separately.
    pub fn new(registry: DeviceRegistry, origin_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            registry,
            origin_id: origin_id.into(),
            timeout,
        }
    }

    /// Resolve a device id to its command endpoint without touching the network.
    pub fn resolve(&self, device_id: &str) -> Result<SocketAddr, LookupError> {
        let record = self
            .registry
            .get(device_id)
            .ok_or_else(|| LookupError::UnknownDevice(device_id.to_string()))?;
        record
            .command_addr()
            .ok_or_else(|| LookupError::NoCommandChannel(device_id.to_string()))
    }

    /// Deliver one command. Returns the endpoint it was written to.
    ///
    /// The connection is closed before returning, whatever the outcome.
    pub async fn dispatch(
        &self,
        device_id: &str,
        action: &str,
        param: &str,
    ) -> Result<SocketAddr, GatewayError> {
        let target = self.resolve(device_id)?;

        let payload = Message::Command {
            origin_id: self.origin_id.clone(),
            command: Command {
                action: action.to_string(),
                param: param.to_string(),
            },
        }
        .encode_to_vec();

        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(target))
            .await
            .map_err(|_| GatewayError::timed_out("connect"))??;

        let sent = tokio::time::timeout(self.timeout, stream.write_all(&payload)).await;
        // Best-effort FIN; the stream is dropped (and closed) either way.
        let _ = stream.shutdown().await;
        sent.map_err(|_| GatewayError::timed_out("send"))??;

        Ok(target)
    }

    /// Dispatch and log the outcome. Used by control sessions, which only
    /// ever acknowledge "sent".
    pub async fn deliver(&self, device_id: &str, action: &str, param: &str) {
        match self.dispatch(device_id, action, param).await {
            Ok(target) => {
                tracing::info!(device = device_id, %target, action, param, "command delivered");
            }
            Err(e) => match e.kind() {
                ErrorKind::Lookup => {
                    tracing::info!(device = device_id, action, error = %e, "command not dispatched");
                }
                _ => {
                    tracing::warn!(device = device_id, action, error = %e, "command delivery failed");
                }
            },
        }
    }
}
