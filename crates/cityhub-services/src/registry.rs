//! Device registry: the gateway's authoritative map of device id to
//! command location and kind.
//!
//! Written by the discovery and data listeners, read by control sessions and
//! the command dispatcher. Callers only see whole-record operations; the
//! underlying map never leaves this module.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use cityhub_core::{DeviceKind, Notice};

/// Where and what a device is, as last announced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub id: String,
    /// Source address of the announcing datagram.
    pub addr: IpAddr,
    /// TCP port for COMANDO delivery. 0 = sensor-only, no command channel.
    pub command_port: u16,
    pub kind: DeviceKind,
}

impl DeviceRecord {
    /// Record for a device first seen through a DADOS datagram.
    pub fn auto_registered(id: impl Into<String>, addr: IpAddr) -> Self {
        Self {
            id: id.into(),
            addr,
            command_port: 0,
            kind: DeviceKind::Sensor,
        }
    }

    /// Command endpoint, if the device has one.
    pub fn command_addr(&self) -> Option<SocketAddr> {
        (self.command_port != 0).then(|| SocketAddr::new(self.addr, self.command_port))
    }

    /// The `[REGISTRO]` line control sessions see for this record.
    pub fn notice(&self) -> Notice {
        Notice::Registered {
            device_id: self.id.clone(),
            kind: self.kind,
            port: self.command_port,
        }
    }
}

/// Whether an upsert created a record or replaced one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    New,
    Reannounced,
}

impl Upsert {
    pub fn as_str(self) -> &'static str {
        match self {
            Upsert::New => "new",
            Upsert::Reannounced => "re-announced",
        }
    }
}

/// The device registry. Cheap to clone, shared by every gateway task.
///
/// At most one record per id; the last write to arrive wins.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<DashMap<String, DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the record for `record.id`.
    pub fn upsert(&self, record: DeviceRecord) -> Upsert {
        match self.devices.insert(record.id.clone(), record) {
            None => Upsert::New,
            Some(_) => Upsert::Reannounced,
        }
    }

    /// Insert `record` only if its id is unknown. Returns true if inserted.
    ///
    /// The check and the insert happen under the same shard lock, so a
    /// concurrent REGISTRO is never overwritten by an auto-registration.
    pub fn insert_if_absent(&self, record: DeviceRecord) -> bool {
        match self.devices.entry(record.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Remove a device. Returns the removed record, or None if unknown.
    pub fn remove(&self, id: &str) -> Option<DeviceRecord> {
        self.devices.remove(id).map(|(_, record)| record)
    }

    pub fn get(&self, id: &str) -> Option<DeviceRecord> {
        self.devices.get(id).map(|r| r.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Point-in-time copy of every record, ordered by id.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let mut records: Vec<DeviceRecord> =
            self.devices.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
