use crate::command::{arg_to_string, arg_to_u64};
use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::replication::master;
use crate::resp::RespValue;
use crate::server::ServerContext;

/// REPLCONF during the replica handshake. ACK and GETACK are only meaningful
/// on a replication link, which handles them before dispatch.
pub fn cmd_replconf(args: &[Vec<u8>], client: &mut ClientState) -> KvResult<RespValue> {
    let Some(sub) = args.first() else {
        return Err(KvError::WrongArgCount("replconf"));
    };

    match arg_to_string(sub).to_lowercase().as_str() {
        "listening-port" => {
            let [_, port] = args else {
                return Err(KvError::WrongArgCount("replconf"));
            };
            let port = u16::try_from(arg_to_u64(port)?).map_err(|_| KvError::NotInteger)?;
            client.listening_port = Some(port);
            Ok(RespValue::ok())
        }
        "capa" | "getack" | "ack" => Ok(RespValue::ok()),
        _ => Err(KvError::Syntax),
    }
}

/// WAIT numreplicas timeout
///
/// Inside EXEC it does not wait; it reports how many replicas have already
/// acknowledged every write.
pub async fn cmd_wait(
    args: &[Vec<u8>],
    ctx: &ServerContext,
    client: &ClientState,
) -> KvResult<RespValue> {
    let [numreplicas, timeout] = args else {
        return Err(KvError::WrongArgCount("wait"));
    };
    let numreplicas = arg_to_u64(numreplicas)? as usize;
    let timeout_ms = arg_to_u64(timeout)?;
    let acked = if client.in_exec {
        master::caught_up_replicas(ctx).await
    } else {
        master::wait_for_replicas(ctx, numreplicas, timeout_ms).await
    };
    Ok(RespValue::integer(acked as i64))
}
