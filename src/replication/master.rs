use crate::connection::ClientState;
use crate::command::{deadline_after, sleep_until_deadline};
use crate::error::KvResult;
use crate::persistence::rdb;
use crate::replication::ReplicaInfo;
use crate::resp::{RespDecoder, RespValue};
use crate::server::ServerContext;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Take over a connection that sent PSYNC: send FULLRESYNC and a snapshot,
/// register it as a replica, then read its REPLCONF ACKs until it goes away.
///
/// The snapshot is taken and the replica registered under the keyspace lock,
/// so every later write reaches it exactly once.
pub async fn handle_psync<R, W>(
    mut decoder: RespDecoder<R>,
    mut writer: W,
    client: &ClientState,
    peer: String,
    ctx: &ServerContext,
) -> KvResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let replica_id = client.id;

    let snapshot_len = {
        let store = ctx.store.read().await;
        let snapshot = rdb::encode(&store);
        let mut repl = ctx.repl.write().await;

        let mut payload = format!(
            "+FULLRESYNC {} {}\r\n${}\r\n",
            repl.master_replid,
            repl.master_repl_offset,
            snapshot.len()
        )
        .into_bytes();
        payload.extend_from_slice(&snapshot);
        // Queued ahead of anything propagated after registration.
        let _ = tx.send(Bytes::from(payload));

        repl.register_replica(ReplicaInfo {
            id: replica_id,
            addr: peer.clone(),
            listening_port: client.listening_port,
            ack_offset: 0,
            tx,
        });
        snapshot.len()
    };
    info!("Full resync with replica {peer}, sent {snapshot_len} bytes snapshot");

    let forwarder = tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if writer.write_all(&data).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = match decoder.next_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                warn!("Replica {peer} link error: {e}");
                break;
            }
        };
        match parse_ack(&frame) {
            Some(offset) => ctx.repl.write().await.record_ack(replica_id, offset),
            None => debug!("Ignoring frame from replica {peer}: {frame:?}"),
        }
    }

    ctx.repl.write().await.remove_replica(replica_id);
    forwarder.abort();
    info!("Replica {peer} disconnected");
    Ok(())
}

/// The offset in a `REPLCONF ACK <offset>` frame.
fn parse_ack(frame: &RespValue) -> Option<u64> {
    let RespValue::Array(Some(items)) = frame else {
        return None;
    };
    let [cmd, sub, offset] = items.as_slice() else {
        return None;
    };
    let is_ack = cmd.as_bytes()?.eq_ignore_ascii_case(b"REPLCONF")
        && sub.as_bytes()?.eq_ignore_ascii_case(b"ACK");
    if !is_ack {
        return None;
    }
    offset.to_string_lossy()?.parse().ok()
}

/// Wait until `numreplicas` replicas have acknowledged every write made so
/// far, or until the timeout passes (0 waits forever). Returns how many had.
///
/// Before the first write there is nothing to acknowledge, so the number of
/// connected replicas is returned at once.
pub async fn wait_for_replicas(ctx: &ServerContext, numreplicas: usize, timeout_ms: u64) -> usize {
    let (target, mut acks) = {
        let mut repl = ctx.repl.write().await;
        let target = repl.master_repl_offset;
        if target == 0 {
            return repl.connected_slaves();
        }
        let already = repl.acked_replicas(target);
        if already >= numreplicas {
            return already;
        }
        let acks = repl.subscribe_acks();
        repl.propagate(&RespValue::command(["REPLCONF", "GETACK", "*"]).serialize());
        (target, acks)
    };

    let deadline = deadline_after(timeout_ms);
    loop {
        tokio::select! {
            event = acks.recv() => match event {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    let acked = ctx.repl.read().await.acked_replicas(target);
                    if acked >= numreplicas {
                        return acked;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = sleep_until_deadline(deadline) => break,
        }
    }
    ctx.repl.read().await.acked_replicas(target)
}

/// How many replicas have acknowledged every write so far, without asking
/// them for a fresh ACK.
pub async fn caught_up_replicas(ctx: &ServerContext) -> usize {
    let repl = ctx.repl.read().await;
    match repl.master_repl_offset {
        0 => repl.connected_slaves(),
        target => repl.acked_replicas(target),
    }
}
