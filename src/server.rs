use crate::command::{self, Command, Verb};
use crate::config::Config;
use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::keywatcher::{KeyWatcher, SharedKeyWatcher};
use crate::replication::{ReplicationRole, ReplicationState, SharedReplicationState, master, replica};
use crate::resp::{RespDecoder, RespValue};
use crate::store::{Keyspace, SharedStore};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handles to everything a connection task shares with the rest of the server.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub config: Arc<Config>,
    pub store: SharedStore,
    pub key_watcher: SharedKeyWatcher,
    pub repl: SharedReplicationState,
}

impl ServerContext {
    pub fn new(config: Config, keyspace: Keyspace) -> Self {
        let role = if config.replicaof.is_some() {
            ReplicationRole::Replica
        } else {
            ReplicationRole::Master
        };
        ServerContext {
            config: Arc::new(config),
            store: Arc::new(RwLock::new(keyspace)),
            key_watcher: Arc::new(RwLock::new(KeyWatcher::new())),
            repl: Arc::new(RwLock::new(ReplicationState::new(role))),
        }
    }

    /// Forward a write to the replicas. Callers hold the keyspace write lock
    /// so the order replicas see matches the order writes were applied.
    pub async fn propagate<I, T>(&self, parts: I)
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        let frame = RespValue::command(parts).serialize();
        self.repl.write().await.propagate(&frame);
    }
}

pub async fn run_server(ctx: ServerContext) -> std::io::Result<()> {
    let addr = format!("{}:{}", ctx.config.bind, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("replikv listening on {addr}");

    let cancel = CancellationToken::new();
    if let Some((host, port)) = ctx.config.replicaof.clone() {
        info!("Replicating from {host}:{port}");
        let ctx = ctx.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            replica::replica_sync_loop(host, port, ctx, cancel).await;
        });
    }

    // Accept loop with graceful shutdown on ctrl-c
    loop {
        tokio::select! {
            result = listener.accept() => {
                let (stream, peer_addr) = result?;
                debug!("New connection from {peer_addr}");

                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, peer_addr.to_string(), ctx).await {
                        debug!("Connection error from {peer_addr}: {e}");
                    }
                    debug!("Connection closed: {peer_addr}");
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                cancel.cancel();
                return Ok(());
            }
        }
    }
}

/// Serve one client until it disconnects, sends a malformed frame, or turns
/// into a replica link with PSYNC.
pub async fn handle_connection<S>(stream: S, peer: String, ctx: ServerContext) -> KvResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut decoder = RespDecoder::new(reader);
    let mut client = ClientState::new();

    loop {
        let frame = match decoder.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(KvError::Protocol(msg)) => {
                warn!(client = client.id, "protocol error: {msg}");
                let reply = RespValue::error(KvError::Protocol(msg).to_resp_error());
                writer.write_all(&reply.serialize()).await?;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let cmd = match Command::from_frame(frame) {
            Ok(cmd) => cmd,
            Err(KvError::UnknownCommand(name)) => {
                warn!(client = client.id, "unknown command '{name}', ignoring");
                continue;
            }
            Err(e) => {
                writer
                    .write_all(&RespValue::error(e.to_resp_error()).serialize())
                    .await?;
                continue;
            }
        };

        if cmd.verb == Verb::Psync && !client.is_queuing() {
            return master::handle_psync(decoder, writer, &client, peer, &ctx).await;
        }

        let reply = command::dispatch(cmd, &ctx, &mut client).await;
        writer.write_all(&reply.serialize()).await?;
    }
}
