use crate::command::{self, Command, Verb};
use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::persistence::rdb;
use crate::resp::{RespDecoder, RespValue};
use crate::server::ServerContext;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Run the replica synchronization loop.
/// Connects to the master, performs the handshake, loads the snapshot, then
/// applies the command stream. Retries dropped links with exponential
/// backoff; a rejected handshake or an unreadable snapshot stops it.
pub async fn replica_sync_loop(
    host: String,
    port: u16,
    ctx: ServerContext,
    cancel: CancellationToken,
) {
    let mut retry_delay = Duration::from_secs(1);
    let max_retry_delay = Duration::from_secs(30);

    loop {
        let addr = format!("{host}:{port}");
        info!("Connecting to master at {addr}...");

        let connect_result = tokio::select! {
            result = TcpStream::connect(&addr) => result,
            _ = cancel.cancelled() => {
                info!("Replica sync cancelled during connect");
                return;
            }
        };

        match connect_result {
            Ok(stream) => {
                retry_delay = Duration::from_secs(1);
                match run_sync(stream, &ctx, &cancel).await {
                    Ok(()) => {
                        info!("Replica sync ended cleanly");
                        return;
                    }
                    Err(e) if e.is_fatal_for_sync() => {
                        warn!("Replica sync stopped: {e}");
                        return;
                    }
                    Err(e) => warn!("Replica sync error: {e}"),
                }
            }
            Err(e) => {
                warn!("Failed to connect to master at {addr}: {e}");
            }
        }

        info!("Retrying in {}s...", retry_delay.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(retry_delay) => {},
            _ = cancel.cancelled() => return,
        }
        retry_delay = std::cmp::min(retry_delay * 2, max_retry_delay);
    }
}

/// One master link: handshake, snapshot, then the command stream. Returns
/// `Ok` only when cancelled.
pub async fn run_sync<S>(stream: S, ctx: &ServerContext, cancel: &CancellationToken) -> KvResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut decoder = RespDecoder::new(reader);

    let port = ctx.config.port.to_string();
    handshake_step(&mut decoder, &mut writer, &["PING"], "PONG").await?;
    handshake_step(
        &mut decoder,
        &mut writer,
        &["REPLCONF", "listening-port", port.as_str()],
        "OK",
    )
    .await?;
    handshake_step(&mut decoder, &mut writer, &["REPLCONF", "capa", "psync2"], "OK").await?;

    send_command(&mut writer, &["PSYNC", "?", "-1"]).await?;
    let (replid, offset) = match decoder.next_frame().await? {
        Some(RespValue::SimpleString(line)) => parse_fullresync(&line)?,
        other => {
            return Err(KvError::Handshake(format!(
                "expected FULLRESYNC after PSYNC, got {other:?}"
            )));
        }
    };

    let payload = decoder.read_snapshot_payload().await?;
    let keyspace = rdb::load_from_reader(&payload[..])?;
    info!(
        "Full resync from master {replid} at offset {offset}: {} bytes snapshot, {} keys",
        payload.len(),
        keyspace.len()
    );
    {
        let mut store = ctx.store.write().await;
        *store = keyspace;
        let mut repl = ctx.repl.write().await;
        repl.master_replid = replid;
        repl.master_repl_offset = offset;
    }

    receive_commands(&mut decoder, &mut writer, ctx, cancel).await
}

/// Apply everything the master sends. Commands run silently; only
/// `REPLCONF GETACK` is answered, with the offset reached before it.
async fn receive_commands<R, W>(
    decoder: &mut RespDecoder<R>,
    writer: &mut W,
    ctx: &ServerContext,
    cancel: &CancellationToken,
) -> KvResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    let mut client = ClientState::new();
    let mut consumed = decoder.consumed();

    loop {
        let frame = tokio::select! {
            frame = decoder.next_frame() => frame?,
            _ = cancel.cancelled() => return Ok(()),
        };
        let Some(frame) = frame else {
            return Err(KvError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "master closed the connection",
            )));
        };
        let frame_len = decoder.consumed() - consumed;
        consumed = decoder.consumed();

        match Command::from_frame(frame) {
            Ok(cmd) if is_getack(&cmd) => {
                let offset = ctx.repl.read().await.master_repl_offset;
                let ack = offset.to_string();
                send_command(writer, &["REPLCONF", "ACK", ack.as_str()]).await?;
            }
            Ok(cmd) => {
                debug!("Applying {:?} from master", cmd.verb);
                command::dispatch(cmd, ctx, &mut client).await;
            }
            Err(e) => warn!("Skipping command from master: {e}"),
        }

        ctx.repl.write().await.master_repl_offset += frame_len;
    }
}

fn is_getack(cmd: &Command) -> bool {
    cmd.verb == Verb::Replconf
        && cmd
            .args
            .first()
            .is_some_and(|sub| sub.eq_ignore_ascii_case(b"GETACK"))
}

async fn handshake_step<R, W>(
    decoder: &mut RespDecoder<R>,
    writer: &mut W,
    parts: &[&str],
    expected: &str,
) -> KvResult<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin,
{
    send_command(writer, parts).await?;
    match decoder.next_frame().await? {
        Some(RespValue::SimpleString(reply)) if reply.eq_ignore_ascii_case(expected) => Ok(()),
        other => Err(KvError::Handshake(format!(
            "expected +{expected} in reply to {}, got {other:?}",
            parts.join(" ")
        ))),
    }
}

/// `FULLRESYNC <replid> <offset>`
fn parse_fullresync(line: &str) -> KvResult<(String, u64)> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(replid), Some(offset)) if tag.eq_ignore_ascii_case("FULLRESYNC") => {
            let offset = offset
                .parse()
                .map_err(|_| KvError::Handshake(format!("invalid FULLRESYNC offset '{offset}'")))?;
            Ok((replid.to_string(), offset))
        }
        _ => Err(KvError::Handshake(format!(
            "expected FULLRESYNC after PSYNC, got '{line}'"
        ))),
    }
}

async fn send_command<W: AsyncWrite + Unpin>(writer: &mut W, parts: &[&str]) -> KvResult<()> {
    writer
        .write_all(&RespValue::command(parts.iter().map(|p| p.as_bytes())).serialize())
        .await?;
    Ok(())
}
