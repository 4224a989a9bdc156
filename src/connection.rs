use crate::command::Command;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Per-client connection state.
#[derive(Debug)]
pub struct ClientState {
    pub id: u64,
    /// Pending commands. `Some` while a MULTI is open.
    pub queued: Option<Vec<Command>>,
    /// Set while EXEC runs the queued commands.
    pub in_exec: bool,
    /// Announced with REPLCONF listening-port before PSYNC.
    pub listening_port: Option<u16>,
}

impl ClientState {
    pub fn new() -> Self {
        ClientState {
            id: NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed),
            queued: None,
            in_exec: false,
            listening_port: None,
        }
    }

    pub fn is_queuing(&self) -> bool {
        self.queued.is_some()
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}
