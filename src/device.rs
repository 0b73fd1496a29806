//! Device identity and the in-memory device table (spec §3, §4.E).
//!
//! Grounded on `housetuya_device.c`'s `struct DeviceMap` and the linear
//! `Devices[]` array, adapted to an owned `Vec<Device>` with no fd
//! indirection (spec §9 redesign note): TCP I/O for a device runs in an
//! ephemeral task spawned by the engine rather than living on this row, and
//! each row's `io_epoch` counter invalidates replies from a superseded
//! session instead of a socket→device map tracking live fds.

use std::net::Ipv4Addr;

/// Identity and crypto material for one device (spec §3).
#[derive(Debug, Clone)]
pub struct DeviceSecret {
    /// Device-reported `gwId`.
    pub id: String,
    /// 16-byte shared AES key. Absent until config or discovery supplies it.
    pub key: Option<[u8; 16]>,
    /// Protocol version string; defaults to "3.3".
    pub version: String,
}

impl DeviceSecret {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: None,
            version: crate::protocol::DEFAULT_VERSION.to_string(),
        }
    }
}

/// One row of the device table (spec §3).
pub struct Device {
    pub name: String,
    pub secret: DeviceSecret,
    pub model: String,
    pub description: Option<String>,
    pub address: Option<Ipv4Addr>,
    pub host: String,
    pub encrypted: bool,
    /// Timestamp of the last beacon; 0 means never/lost (spec §3 invariant 6).
    pub detected: u64,
    /// Timestamp of the last QUERY emission.
    pub last_sense: u64,
    /// Resolved lazily via the model registry; 0 means unresolved/unknown.
    pub control_dps: u32,
    pub status: bool,
    pub commanded: bool,
    /// Deadline for an in-flight command; 0 means idle (invariant 3).
    pub pending: u64,
    /// Pulse expiry; 0 means not pulsing (invariant 4).
    pub deadline: u64,
    /// Identifies the one TCP session currently authorized to mutate this
    /// device's state (invariant 5: "at most one open TCP socket per
    /// device"). The session itself is an ephemeral task spawned by the
    /// engine (see `engine.rs`), not a field on this row; bumping this
    /// counter is this crate's equivalent of closing the previous socket
    /// before opening a new one — a reply tagged with a stale epoch is
    /// from a superseded session and is dropped on arrival.
    pub io_epoch: u64,
    pub sequence: u32,
}

impl Device {
    fn blank(name: String, secret: DeviceSecret) -> Self {
        Device {
            name,
            secret,
            model: String::new(),
            description: None,
            address: None,
            host: String::new(),
            encrypted: false,
            detected: 0,
            last_sense: 0,
            control_dps: 0,
            status: false,
            commanded: false,
            pending: 0,
            deadline: 0,
            io_epoch: 0,
            sequence: 0,
        }
    }

    /// Start a new I/O session, superseding any session still in flight
    /// (invariant 5). Returns the epoch the caller should tag its spawned
    /// task's eventual reply with.
    pub fn start_io_session(&mut self) -> u64 {
        self.io_epoch = self.io_epoch.wrapping_add(1);
        self.io_epoch
    }

    pub fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }
}

/// The in-memory device table (spec §4.E): append-only by id, linear
/// lookup. Owned exclusively by the engine actor — see `engine.rs`.
#[derive(Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
    auto_name_counter: u64,
    /// Set on any mutation caused by discovery (not config load); cleared
    /// by whoever reads it to trigger persistence (spec §4.E).
    changed: bool,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.secret.id == id)
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.secret.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.name == name)
    }

    pub fn find_by_name_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.name == name)
    }

    /// Insert a device identified only by config (name/id/model known up
    /// front, never seen on the wire yet). Idempotent on id.
    pub fn insert_from_config(
        &mut self,
        name: String,
        secret: DeviceSecret,
        model: String,
        description: Option<String>,
        host: Option<String>,
    ) {
        if self.find_by_id(&secret.id).is_some() {
            return;
        }
        let mut device = Device::blank(name, secret);
        device.model = model;
        device.description = description;
        if let Some(host) = host {
            device.address = host.parse().ok();
            device.host = host;
        }
        self.devices.push(device);
    }

    /// Insert a device first seen via a beacon, auto-naming it `new_<n>`
    /// (spec §4.F). Idempotent on id — returns the existing row if present.
    pub fn get_or_create_discovered(&mut self, id: &str) -> &mut Device {
        if self.devices.iter().any(|d| d.secret.id == id) {
            return self.find_by_id_mut(id).unwrap();
        }
        let name = format!("new_{}", self.auto_name_counter);
        self.auto_name_counter += 1;
        self.devices.push(Device::blank(name, DeviceSecret::new(id)));
        self.devices.last_mut().unwrap()
    }

    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    /// Read and clear the changed flag (spec §4.E: "the background task
    /// reads and clears the flag to trigger persistence").
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_devices_get_sequential_auto_names() {
        let mut table = DeviceTable::new();
        table.get_or_create_discovered("a");
        table.get_or_create_discovered("b");
        assert_eq!(table.find_by_id("a").unwrap().name, "new_0");
        assert_eq!(table.find_by_id("b").unwrap().name, "new_1");
    }

    #[test]
    fn get_or_create_discovered_is_idempotent_on_id() {
        let mut table = DeviceTable::new();
        table.get_or_create_discovered("a");
        table.get_or_create_discovered("a");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn config_insert_is_idempotent_on_id() {
        let mut table = DeviceTable::new();
        table.insert_from_config(
            "lamp".into(),
            DeviceSecret::new("dev-1"),
            "keyA".into(),
            None,
            None,
        );
        table.insert_from_config(
            "lamp-dup".into(),
            DeviceSecret::new("dev-1"),
            "keyA".into(),
            None,
            None,
        );
        assert_eq!(table.len(), 1);
        assert_eq!(table.find_by_id("dev-1").unwrap().name, "lamp");
    }

    #[test]
    fn changed_flag_is_cleared_on_read() {
        let mut table = DeviceTable::new();
        table.mark_changed();
        assert!(table.take_changed());
        assert!(!table.take_changed());
    }

    #[test]
    fn starting_an_io_session_yields_increasing_distinct_epochs() {
        let mut table = DeviceTable::new();
        table.get_or_create_discovered("a");
        let dev = table.find_by_id_mut("a").unwrap();
        let first = dev.start_io_session();
        let second = dev.start_io_session();
        assert!(second > first);
    }
}
