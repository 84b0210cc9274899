//! The live-worker table.
//!
//! Fixed `max_connections` slots; each holds what the dispatcher needs to
//! find the worker's host, job slot and message again at reap time.

use afd_core::ids::MsgName;

/// One live worker.
#[derive(Clone, Debug, PartialEq)]
pub struct Connection {
    /// Destination host record index.
    pub host_index: usize,
    /// Job slot occupied on that host.
    pub job_slot: usize,
    /// Worker pid.
    pub pid: i32,
    /// Message being delivered; `None` for retrieve workers.
    pub msg_name: Option<MsgName>,
    /// Directory record index for retrieve workers.
    pub dir_index: Option<usize>,
    /// Worker runs against the temp-toggled (secondary) hostname.
    pub temp_toggle: bool,
    /// Operator-requested resend.
    pub resend: bool,
}

/// The fixed-size table.
#[derive(Debug)]
pub struct ConnectionTable {
    slots: Vec<Option<Connection>>,
}

impl ConnectionTable {
    /// A table with `max_connections` slots.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            slots: vec![None; max_connections],
        }
    }

    /// Total slots.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live workers right now.
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// First free slot index, if any.
    #[must_use]
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Installs a connection, returning its slot index.
    pub fn install(&mut self, connection: Connection) -> Option<usize> {
        let slot = self.free_slot()?;
        self.slots[slot] = Some(connection);
        Some(slot)
    }

    /// The connection in `slot`.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<&Connection> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Mutable access to the connection in `slot`.
    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Connection> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    /// Finds the slot a pid lives in.
    #[must_use]
    pub fn slot_of_pid(&self, pid: i32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|c| c.pid == pid))
    }

    /// Releases a slot, returning what was in it.
    pub fn release(&mut self, slot: usize) -> Option<Connection> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Iterates live connections with their slot indices.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|c| (i, c)))
    }

    /// Live workers attached to one host.
    #[must_use]
    pub fn active_on_host(&self, host_index: usize) -> usize {
        self.iter().filter(|(_, c)| c.host_index == host_index).count()
    }
}
