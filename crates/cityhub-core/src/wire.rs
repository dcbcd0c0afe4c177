//! cityhub wire format: the envelope shared by the gateway and every device.
//!
//! This module IS the cross-process contract. Devices in the field encode the
//! same Protocol Buffers schema, so field numbers and kind strings must never
//! change:
//!
//! ```text
//! message Registro { uint32 porta = 1; string tipo_dispositivo = 2; }
//! message Dados    { double valor = 1; string unidade = 2; string tipo_leitura = 3; }
//! message Comando  { string acao = 1; string param = 2; }
//! message Mensagem {
//!   string   id_origem     = 1;
//!   string   tipo_mensagem = 2;
//!   Registro registro      = 3;
//!   Dados    dados         = 4;
//!   Comando  comando       = 5;
//! }
//! ```
//!
//! The raw prost structs mirror the schema one-to-one. Everything above this
//! module works with [`Message`], which only exists for envelopes whose kind
//! and payload agree.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use prost::Message as _;

// ── Raw envelope ──────────────────────────────────────────────────────────────

/// Registration payload carried by REGISTRO (and ignored on DESREGISTRO).
#[derive(Clone, PartialEq, prost::Message)]
pub struct Registration {
    /// TCP port on which the device accepts COMANDO envelopes. 0 = none.
    #[prost(uint32, tag = "1")]
    pub port: u32,
    /// Device kind string: "SENSOR", "ATUADOR" or "MISTO".
    #[prost(string, tag = "2")]
    pub device_kind: String,
}

/// A single sensor reading carried by DADOS.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Reading {
    #[prost(double, tag = "1")]
    pub value: f64,
    #[prost(string, tag = "2")]
    pub unit: String,
    #[prost(string, tag = "3")]
    pub reading_type: String,
}

/// A directive delivered to a device's command port.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Command {
    #[prost(string, tag = "1")]
    pub action: String,
    #[prost(string, tag = "2")]
    pub param: String,
}

/// The envelope exactly as it appears on the wire.
///
/// Only the sub-message matching `kind` is meaningful. Use [`Message::decode`]
/// rather than reading this directly.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Envelope {
    #[prost(string, tag = "1")]
    pub origin_id: String,
    #[prost(string, tag = "2")]
    pub kind: String,
    #[prost(message, optional, tag = "3")]
    pub registration: Option<Registration>,
    #[prost(message, optional, tag = "4")]
    pub reading: Option<Reading>,
    #[prost(message, optional, tag = "5")]
    pub command: Option<Command>,
}

// ── Kinds ─────────────────────────────────────────────────────────────────────

/// Envelope discriminator. Travels as an upper-case string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Register,
    Deregister,
    Discovery,
    Data,
    Command,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Register => "REGISTRO",
            MessageKind::Deregister => "DESREGISTRO",
            MessageKind::Discovery => "DISCOVERY",
            MessageKind::Data => "DADOS",
            MessageKind::Command => "COMANDO",
        }
    }
}

impl FromStr for MessageKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REGISTRO" => Ok(MessageKind::Register),
            "DESREGISTRO" => Ok(MessageKind::Deregister),
            "DISCOVERY" => Ok(MessageKind::Discovery),
            "DADOS" => Ok(MessageKind::Data),
            "COMANDO" => Ok(MessageKind::Command),
            other => Err(WireError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a device is able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Only emits readings.
    Sensor,
    /// Only accepts commands.
    Actuator,
    /// Emits readings and accepts commands.
    Mixed,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceKind::Sensor => "SENSOR",
            DeviceKind::Actuator => "ATUADOR",
            DeviceKind::Mixed => "MISTO",
        }
    }
}

impl FromStr for DeviceKind {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENSOR" => Ok(DeviceKind::Sensor),
            "ATUADOR" => Ok(DeviceKind::Actuator),
            "MISTO" => Ok(DeviceKind::Mixed),
            other => Err(WireError::UnknownDeviceKind(other.to_string())),
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Typed message ─────────────────────────────────────────────────────────────

/// A validated envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Register {
        origin_id: String,
        port: u16,
        kind: DeviceKind,
    },
    Deregister {
        origin_id: String,
    },
    Discovery {
        origin_id: String,
    },
    Data {
        origin_id: String,
        reading: Reading,
    },
    Command {
        origin_id: String,
        command: Command,
    },
}

impl Message {
    /// Decode and validate one datagram or stream payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Envelope::decode(bytes)?.try_into()
    }

    /// Encode to the protobuf wire form.
    pub fn encode_to_vec(&self) -> Vec<u8> {
        Envelope::from(self.clone()).encode_to_vec()
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Register { .. } => MessageKind::Register,
            Message::Deregister { .. } => MessageKind::Deregister,
            Message::Discovery { .. } => MessageKind::Discovery,
            Message::Data { .. } => MessageKind::Data,
            Message::Command { .. } => MessageKind::Command,
        }
    }

    pub fn origin_id(&self) -> &str {
        match self {
            Message::Register { origin_id, .. }
            | Message::Deregister { origin_id }
            | Message::Discovery { origin_id }
            | Message::Data { origin_id, .. }
            | Message::Command { origin_id, .. } => origin_id,
        }
    }
}

impl TryFrom<Envelope> for Message {
    type Error = WireError;

    fn try_from(env: Envelope) -> Result<Self, Self::Error> {
        let kind: MessageKind = env.kind.parse()?;

        // Device-originated kinds are keyed on origin_id; the gateway's own
        // DISCOVERY and COMANDO envelopes may leave it empty.
        let needs_origin = matches!(
            kind,
            MessageKind::Register | MessageKind::Deregister | MessageKind::Data
        );
        if needs_origin && env.origin_id.is_empty() {
            return Err(WireError::MissingOrigin(kind));
        }

        let origin_id = env.origin_id;
        match kind {
            MessageKind::Register => {
                let reg = env.registration.ok_or(WireError::MissingPayload(kind))?;
                let port = u16::try_from(reg.port).map_err(|_| WireError::PortOutOfRange(reg.port))?;
                Ok(Message::Register {
                    origin_id,
                    port,
                    kind: reg.device_kind.parse()?,
                })
            }
            MessageKind::Deregister => Ok(Message::Deregister { origin_id }),
            MessageKind::Discovery => Ok(Message::Discovery { origin_id }),
            MessageKind::Data => Ok(Message::Data {
                origin_id,
                reading: env.reading.ok_or(WireError::MissingPayload(kind))?,
            }),
            MessageKind::Command => Ok(Message::Command {
                origin_id,
                command: env.command.ok_or(WireError::MissingPayload(kind))?,
            }),
        }
    }
}

impl From<Message> for Envelope {
    fn from(msg: Message) -> Self {
        let kind = msg.kind().as_str().to_string();
        let mut env = Envelope {
            origin_id: String::new(),
            kind,
            registration: None,
            reading: None,
            command: None,
        };
        match msg {
            Message::Register { origin_id, port, kind } => {
                env.origin_id = origin_id;
                env.registration = Some(Registration {
                    port: u32::from(port),
                    device_kind: kind.as_str().to_string(),
                });
            }
            Message::Deregister { origin_id } | Message::Discovery { origin_id } => {
                env.origin_id = origin_id;
            }
            Message::Data { origin_id, reading } => {
                env.origin_id = origin_id;
                env.reading = Some(reading);
            }
            Message::Command { origin_id, command } => {
                env.origin_id = origin_id;
                env.command = Some(command);
            }
        }
        env
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// IPv4 multicast group shared by the gateway and all devices.
pub const DEFAULT_MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 1, 1, 1);

/// UDP port of the discovery group.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5007;

/// UDP port on which the gateway ingests DADOS.
pub const DEFAULT_DATA_PORT: u16 = 9001;

/// TCP port for control sessions.
pub const DEFAULT_CONTROL_PORT: u16 = 9000;

/// Receive buffer size for one datagram. Envelopes are far smaller.
pub const MAX_DATAGRAM: usize = 2048;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] prost::DecodeError),

    #[error("unknown message kind: {0:?}")]
    UnknownKind(String),

    #[error("unknown device kind: {0:?}")]
    UnknownDeviceKind(String),

    #[error("{0} envelope has no origin id")]
    MissingOrigin(MessageKind),

    #[error("{0} envelope is missing its payload")]
    MissingPayload(MessageKind),

    #[error("port {0} does not fit in 16 bits")]
    PortOutOfRange(u32),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
