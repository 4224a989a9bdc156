pub mod master;
pub mod replica;

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicationRole {
    Master,
    Replica,
}

impl ReplicationRole {
    /// Name reported by INFO replication.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Master => "master",
            ReplicationRole::Replica => "slave",
        }
    }
}

/// A connected replica, from the master's side.
#[derive(Debug)]
pub struct ReplicaInfo {
    pub id: u64,
    pub addr: String,
    /// Port announced with REPLCONF listening-port, if any.
    pub listening_port: Option<u16>,
    /// Offset the replica last acknowledged with REPLCONF ACK.
    pub ack_offset: u64,
    pub tx: mpsc::UnboundedSender<Bytes>,
}

impl ReplicaInfo {
    /// `ip=..,port=..,state=online,offset=..` for INFO. The port is the one the
    /// replica announced, falling back to its connection's port.
    fn info_fields(&self) -> String {
        let (ip, peer_port) = self.addr.rsplit_once(':').unwrap_or((self.addr.as_str(), ""));
        let port = self
            .listening_port
            .map_or_else(|| peer_port.to_string(), |p| p.to_string());
        format!("ip={ip},port={port},state=online,offset={}", self.ack_offset)
    }
}

/// The replication state shared across the server.
///
/// On a master `master_repl_offset` counts the bytes shipped to replicas; on a
/// replica it counts the bytes consumed from the master link after the snapshot.
#[derive(Debug)]
pub struct ReplicationState {
    pub role: ReplicationRole,
    pub master_replid: String,
    pub master_repl_offset: u64,
    pub replicas: Vec<ReplicaInfo>,
    ack_tx: broadcast::Sender<u64>,
}

impl ReplicationState {
    pub fn new(role: ReplicationRole) -> Self {
        let (ack_tx, _) = broadcast::channel(64);
        ReplicationState {
            role,
            master_replid: generate_replid(),
            master_repl_offset: 0,
            replicas: Vec::new(),
            ack_tx,
        }
    }

    /// Ship an encoded command to every replica and advance the offset by its
    /// length. Does nothing unless this server is a master. Replicas whose
    /// channel is closed are dropped.
    pub fn propagate(&mut self, data: &[u8]) {
        if self.role != ReplicationRole::Master {
            return;
        }
        self.master_repl_offset += data.len() as u64;
        let data = Bytes::copy_from_slice(data);
        self.replicas.retain(|r| r.tx.send(data.clone()).is_ok());
    }

    pub fn register_replica(&mut self, info: ReplicaInfo) {
        debug!(id = info.id, addr = %info.addr, "replica registered");
        self.replicas.push(info);
    }

    pub fn remove_replica(&mut self, id: u64) {
        self.replicas.retain(|r| r.id != id);
    }

    /// Record a REPLCONF ACK and wake every WAIT in progress.
    pub fn record_ack(&mut self, id: u64, offset: u64) {
        if let Some(r) = self.replicas.iter_mut().find(|r| r.id == id) {
            r.ack_offset = r.ack_offset.max(offset);
        }
        // No receivers just means nobody is waiting.
        let _ = self.ack_tx.send(offset);
    }

    /// Replicas that have acknowledged at least `target` bytes.
    pub fn acked_replicas(&self, target: u64) -> usize {
        self.replicas.iter().filter(|r| r.ack_offset >= target).count()
    }

    pub fn subscribe_acks(&self) -> broadcast::Receiver<u64> {
        self.ack_tx.subscribe()
    }

    pub fn connected_slaves(&self) -> usize {
        self.replicas.len()
    }

    /// Lines of the INFO replication section.
    pub fn info_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("role:{}", self.role.as_str()),
            format!("connected_slaves:{}", self.connected_slaves()),
        ];
        for (i, replica) in self.replicas.iter().enumerate() {
            lines.push(format!("slave{i}:{}", replica.info_fields()));
        }
        lines.push(format!("master_replid:{}", self.master_replid));
        lines.push(format!("master_repl_offset:{}", self.master_repl_offset));
        lines
    }
}

/// Generate a 40-character hex replication ID.
fn generate_replid() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..20).map(|_| rng.r#gen()).collect();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub type SharedReplicationState = Arc<RwLock<ReplicationState>>;
