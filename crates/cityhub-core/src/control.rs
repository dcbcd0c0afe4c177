//! Control-session line protocol.
//!
//! Clients send one command per newline-terminated line; the gateway answers
//! and pushes events as plain text lines. [`ControlRequest`] is the parsed
//! client side, [`Notice`] renders every line the gateway writes.

use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;
use crate::wire::{DeviceKind, Reading};

/// Usage hint shared by the banner and the format-error reply.
pub const USAGE: &str = "ID:ACAO:PARAM";

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// `LISTAR`: replay the registry snapshot.
    List,
    /// `DISCOVERY`: solicit re-announcement from every device.
    Discover,
    /// `id:action:param`: relay one command to a device.
    Command {
        device_id: String,
        action: String,
        param: String,
    },
}

impl FromStr for ControlRequest {
    type Err = ProtocolError;

    /// Parse one line. Surrounding whitespace is ignored; the param field
    /// may be empty but the id and action may not.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        match line {
            "LISTAR" => return Ok(ControlRequest::List),
            "DISCOVERY" => return Ok(ControlRequest::Discover),
            _ => {}
        }

        let fields: Vec<&str> = line.split(':').collect();
        let [device_id, action, param] = fields.as_slice() else {
            return Err(ProtocolError::FieldCount {
                fields: fields.len(),
            });
        };
        if device_id.is_empty() {
            return Err(ProtocolError::EmptyField("id"));
        }
        if action.is_empty() {
            return Err(ProtocolError::EmptyField("action"));
        }

        Ok(ControlRequest::Command {
            device_id: device_id.to_string(),
            action: action.to_string(),
            param: param.to_string(),
        })
    }
}

/// A line written to control sessions. `Display` yields the text without
/// the trailing newline.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Banner,
    Registered {
        device_id: String,
        kind: DeviceKind,
        port: u16,
    },
    Deregistered {
        device_id: String,
    },
    Reading {
        device_id: String,
        reading: Reading,
    },
    CommandSent {
        device_id: String,
    },
    DiscoverySent,
    FormatError,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Banner => write!(f, "Conectado. Use: {USAGE}"),
            Notice::Registered {
                device_id,
                kind,
                port,
            } => write!(f, "[REGISTRO] {device_id}:{kind}:{port}"),
            Notice::Deregistered { device_id } => write!(f, "[DESREGISTRO] {device_id}"),
            Notice::Reading { device_id, reading } => {
                write!(f, "[{device_id}] {}: ", reading.reading_type)?;
                // Terminal clients expect lowercase `nan`, like `inf`.
                if reading.value.is_nan() {
                    f.write_str("nan")?;
                } else {
                    write!(f, "{:.1}", reading.value)?;
                }
                write!(f, " {}", reading.unit)
            }
            Notice::CommandSent { device_id } => write!(f, "[OK] Comando enviado para {device_id}"),
            Notice::DiscoverySent => f.write_str("[OK] DISCOVERY enviado"),
            Notice::FormatError => write!(f, "Formato invalido. Use: {USAGE}"),
        }
    }
}
