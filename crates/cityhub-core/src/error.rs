//! Gateway error taxonomy.
//!
//! Every failure the gateway can observe falls into one of four kinds, and
//! each kind has a fixed handling policy:
//!
//! | kind      | example                         | policy                               |
//! |-----------|---------------------------------|--------------------------------------|
//! | Transport | refused, timed out, reset       | log at warn, keep running            |
//! | Decode    | garbage datagram                | drop, trace only                     |
//! | Protocol  | `a:b` on the control channel    | reply to the session, keep it open   |
//! | Lookup    | command for an unknown device   | log, client only sees "sent"         |

use crate::wire::WireError;

/// Coarse classification used to route an error to its policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    Decode,
    Protocol,
    Lookup,
}

/// A malformed control-session line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("expected ID:ACAO:PARAM, got {fields} field(s)")]
    FieldCount { fields: usize },

    #[error("empty {0} field")]
    EmptyField(&'static str),
}

/// A command that named a device the registry cannot deliver to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LookupError {
    #[error("unknown device {0:?}")]
    UnknownDevice(String),

    #[error("device {0:?} has no command channel")]
    NoCommandChannel(String),
}

/// Umbrella error for gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("lookup error: {0}")]
    Lookup(#[from] LookupError),
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Transport(_) => ErrorKind::Transport,
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::Protocol(_) => ErrorKind::Protocol,
            GatewayError::Lookup(_) => ErrorKind::Lookup,
        }
    }

    /// Build a transport error for an operation that ran out of time.
    pub fn timed_out(what: &str) -> Self {
        GatewayError::Transport(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }
}
