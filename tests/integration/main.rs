//! cityhub integration test harness.
//!
//! Every test starts its own gateway in-process on 127.0.0.1 with
//! OS-assigned ports, so tests run in parallel without interfering.
//! Devices are simulated by sending datagrams straight to the gateway's
//! discovery and data ports; operators by plain TCP clients.
//!
//!   cargo test --test integration

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::task::JoinHandle;

use cityhub_core::config::HubConfig;
use cityhub_core::wire::Reading;
use cityhub_core::{DeviceKind, Message};
use cityhub_services::{ClientSet, DeviceRegistry};
use cityhubd::{Gateway, GatewayAddrs, ShutdownTrigger};

mod control;
mod discovery;

/// How long a test waits for a line it expects.
pub const LINE_TIMEOUT: Duration = Duration::from_secs(3);

pub const BANNER: &str = "Conectado. Use: ID:ACAO:PARAM";
pub const FORMAT_ERROR: &str = "Formato invalido. Use: ID:ACAO:PARAM";

// ── Gateway ───────────────────────────────────────────────────────────────────

pub struct TestGateway {
    pub addrs: GatewayAddrs,
    pub registry: DeviceRegistry,
    pub clients: ClientSet,
    trigger: ShutdownTrigger,
    task: JoinHandle<()>,
}

/// Loopback-only config with no startup discovery schedule.
pub fn test_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.network.bind_addr = "127.0.0.1".parse().unwrap();
    config.network.discovery_port = 0;
    config.network.data_port = 0;
    config.network.control_port = 0;
    config.discovery.attempts = 0;
    config.dispatch.timeout_ms = 1000;
    config.control.write_timeout_ms = 1000;
    config
}

pub async fn start_gateway() -> Result<TestGateway> {
    start_gateway_with(test_config()).await
}

pub async fn start_gateway_with(config: HubConfig) -> Result<TestGateway> {
    let gateway = Gateway::bind(&config).await?;
    let addrs = gateway.addrs();
    let registry = gateway.registry();
    let clients = gateway.clients();
    let (trigger, shutdown) = cityhubd::shutdown::channel();
    let task = tokio::spawn(gateway.run(shutdown));
    Ok(TestGateway {
        addrs,
        registry,
        clients,
        trigger,
        task,
    })
}

impl TestGateway {
    pub async fn connect(&self) -> Result<Client> {
        Client::connect(self.addrs.control).await
    }

    /// Connect, consume the banner and sync once, so the session is already
    /// receiving fan-out when this returns. The registry must be empty.
    pub async fn connect_ready(&self) -> Result<Client> {
        let mut client = self.connect().await?;
        client.expect(BANNER).await?;
        client.sync().await?;
        Ok(client)
    }

    pub async fn announce(&self, id: &str, port: u16, kind: DeviceKind) -> Result<()> {
        send_datagram(self.addrs.discovery, &register_bytes(id, port, kind)).await
    }

    pub async fn withdraw(&self, id: &str) -> Result<()> {
        send_datagram(self.addrs.discovery, &deregister_bytes(id)).await
    }

    pub async fn report(&self, id: &str, value: f64, unit: &str, kind: &str) -> Result<()> {
        send_datagram(self.addrs.data, &reading_bytes(id, value, unit, kind)).await
    }

    /// Signal shutdown and wait for every gateway task to finish.
    pub async fn stop(self) -> Result<()> {
        self.trigger.trigger();
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .context("gateway did not stop within 2s")?
            .context("gateway task panicked")
    }
}

// ── Control client ────────────────────────────────────────────────────────────

pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Client {
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("failed to connect to control port {addr}"))?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
        })
    }

    pub async fn send(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    /// Next line from the gateway, or an error on timeout or close.
    pub async fn next_line(&mut self) -> Result<String> {
        match tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line()).await {
            Ok(Ok(Some(line))) => Ok(line),
            Ok(Ok(None)) => bail!("gateway closed the session"),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => bail!("no line within {LINE_TIMEOUT:?}"),
        }
    }

    pub async fn expect(&mut self, expected: &str) -> Result<()> {
        let line = self.next_line().await?;
        if line != expected {
            bail!("expected {expected:?}, got {line:?}");
        }
        Ok(())
    }

    /// Round-trip a line the gateway always rejects. Everything the gateway
    /// sent to this client before it has been read once this returns, so a
    /// test can assert that nothing else arrived.
    pub async fn sync(&mut self) -> Result<()> {
        self.send("sync").await?;
        self.expect(FORMAT_ERROR).await
    }

    /// True once the gateway has closed the session.
    pub async fn closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(LINE_TIMEOUT, self.lines.next_line()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }
}

// ── Simulated devices ─────────────────────────────────────────────────────────

pub async fn send_datagram(to: SocketAddr, payload: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(payload, to).await?;
    Ok(())
}

pub fn register_bytes(id: &str, port: u16, kind: DeviceKind) -> Vec<u8> {
    Message::Register {
        origin_id: id.into(),
        port,
        kind,
    }
    .encode_to_vec()
}

pub fn deregister_bytes(id: &str) -> Vec<u8> {
    Message::Deregister {
        origin_id: id.into(),
    }
    .encode_to_vec()
}

pub fn reading_bytes(id: &str, value: f64, unit: &str, kind: &str) -> Vec<u8> {
    Message::Data {
        origin_id: id.into(),
        reading: Reading {
            value,
            unit: unit.into(),
            reading_type: kind.into(),
        },
    }
    .encode_to_vec()
}

/// Poll `cond` until it holds or the line timeout elapses.
pub async fn wait_until(mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + LINE_TIMEOUT;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {LINE_TIMEOUT:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
