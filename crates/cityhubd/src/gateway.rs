//! Gateway assembly: binds every endpoint up front, then runs the listeners,
//! the control server and the startup discovery schedule until shutdown.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, UdpSocket};

use cityhub_core::config::HubConfig;
use cityhub_services::{ClientSet, CommandDispatcher, DeviceRegistry};

use crate::control::{ControlServer, SessionContext};
use crate::data::DataListener;
use crate::discovery::{listener, solicit_loop, DiscoveryBroadcaster, DiscoveryListener, DiscoverySchedule};
use crate::shutdown::Shutdown;

/// Addresses the gateway actually bound. With port 0 in the config these
/// carry the OS-assigned ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayAddrs {
    pub discovery: SocketAddr,
    pub data: SocketAddr,
    pub control: SocketAddr,
}

pub struct Gateway {
    discovery_socket: UdpSocket,
    data_socket: UdpSocket,
    control_listener: TcpListener,
    addrs: GatewayAddrs,
    registry: DeviceRegistry,
    clients: ClientSet,
    dispatcher: CommandDispatcher,
    broadcaster: Option<DiscoveryBroadcaster>,
    schedule: DiscoverySchedule,
}

impl Gateway {
    /// Bind all three endpoints. Any bind failure aborts startup; failing to
    /// create the DISCOVERY sender only disables solicitation.
    pub async fn bind(config: &HubConfig) -> Result<Self> {
        let net = &config.network;

        let discovery_socket = listener::bind_socket(
            net.bind_addr,
            net.discovery_port,
            net.multicast_group,
            net.multicast_interface,
        )
        .context("failed to bind discovery socket")?;

        let data_socket = UdpSocket::bind((net.bind_addr, net.data_port))
            .await
            .with_context(|| format!("failed to bind data socket on port {}", net.data_port))?;

        let control_listener = TcpListener::bind((net.bind_addr, net.control_port))
            .await
            .with_context(|| format!("failed to bind control listener on port {}", net.control_port))?;

        let addrs = GatewayAddrs {
            discovery: discovery_socket.local_addr()?,
            data: data_socket.local_addr()?,
            control: control_listener.local_addr()?,
        };

        let target = SocketAddr::from((net.multicast_group, addrs.discovery.port()));
        let broadcaster = match DiscoveryBroadcaster::bind(target, net.multicast_interface, &config.gateway.id) {
            Ok(b) => Some(b),
            Err(e) => {
                tracing::warn!(error = %e, "DISCOVERY sender unavailable, solicitation disabled");
                None
            }
        };

        let registry = DeviceRegistry::new();
        let clients = ClientSet::new(config.control.write_timeout());
        let dispatcher =
            CommandDispatcher::new(registry.clone(), config.gateway.id.as_str(), config.dispatch.timeout());

        tracing::info!(
            discovery = %addrs.discovery,
            data = %addrs.data,
            control = %addrs.control,
            group = %net.multicast_group,
            "gateway endpoints bound"
        );

        Ok(Self {
            discovery_socket,
            data_socket,
            control_listener,
            addrs,
            registry,
            clients,
            dispatcher,
            broadcaster,
            schedule: DiscoverySchedule::from_config(&config.discovery),
        })
    }

    pub fn addrs(&self) -> GatewayAddrs {
        self.addrs
    }

    pub fn registry(&self) -> DeviceRegistry {
        self.registry.clone()
    }

    pub fn clients(&self) -> ClientSet {
        self.clients.clone()
    }

    /// Whether DISCOVERY can be sent, on schedule or on request.
    pub fn can_solicit(&self) -> bool {
        self.broadcaster.is_some()
    }

    /// Run until `shutdown` is triggered, then wait for every task to release
    /// its socket. A trigger raised before this is first polled still counts.
    pub async fn run(self, shutdown: Shutdown) {
        let discovery = DiscoveryListener::new(
            self.discovery_socket,
            self.registry.clone(),
            self.clients.clone(),
            shutdown.clone(),
        );
        let data = DataListener::new(
            self.data_socket,
            self.registry.clone(),
            self.clients.clone(),
            shutdown.clone(),
        );
        let ctx = SessionContext {
            registry: self.registry,
            clients: self.clients,
            dispatcher: self.dispatcher,
            discovery: self.broadcaster.clone(),
        };
        let control = ControlServer::new(self.control_listener, ctx, shutdown.clone());

        let discovery_task = tokio::spawn(discovery.run());
        let data_task = tokio::spawn(data.run());
        let control_task = tokio::spawn(control.run());
        let (broadcaster, schedule) = (self.broadcaster, self.schedule);
        let solicit_task = tokio::spawn(async move {
            match broadcaster {
                Some(broadcaster) => solicit_loop(broadcaster, schedule, shutdown).await,
                None => Ok(()),
            }
        });

        let (discovery, data, control, solicit) =
            tokio::join!(discovery_task, data_task, control_task, solicit_task);

        for (name, result) in [
            ("discovery listener", discovery),
            ("data listener", data),
            ("control server", control),
            ("discovery schedule", solicit),
        ] {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "task failed"),
                Err(e) => tracing::error!(task = name, error = %e, "task panicked"),
            }
        }

        tracing::info!("gateway stopped");
    }
}
