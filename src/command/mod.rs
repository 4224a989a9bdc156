pub mod key;
pub mod replication;
pub mod server_cmd;
pub mod stream;
pub mod string;
pub mod transaction;

use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::Keyspace;
use std::time::Duration;
use tokio::time::Instant;

/// Every command the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Ping,
    Echo,
    Client,
    Set,
    Get,
    Incr,
    Type,
    Keys,
    Config,
    Info,
    Multi,
    Exec,
    Discard,
    Xadd,
    Xrange,
    Xread,
    Replconf,
    Psync,
    Wait,
}

const VERBS: &[(&str, Verb)] = &[
    ("ping", Verb::Ping),
    ("echo", Verb::Echo),
    ("client", Verb::Client),
    ("set", Verb::Set),
    ("get", Verb::Get),
    ("incr", Verb::Incr),
    ("type", Verb::Type),
    ("keys", Verb::Keys),
    ("config", Verb::Config),
    ("info", Verb::Info),
    ("multi", Verb::Multi),
    ("exec", Verb::Exec),
    ("discard", Verb::Discard),
    ("xadd", Verb::Xadd),
    ("xrange", Verb::Xrange),
    ("xread", Verb::Xread),
    ("replconf", Verb::Replconf),
    ("psync", Verb::Psync),
    ("wait", Verb::Wait),
];

impl Verb {
    /// Case-insensitive lookup.
    pub fn lookup(name: &[u8]) -> Option<Verb> {
        VERBS
            .iter()
            .find(|(n, _)| n.as_bytes().eq_ignore_ascii_case(name))
            .map(|(_, verb)| *verb)
    }

    /// Lowercase name, as used in error replies.
    pub fn name(self) -> &'static str {
        VERBS
            .iter()
            .find(|(_, verb)| *verb == self)
            .map_or("unknown", |(n, _)| *n)
    }
}

/// A decoded request: the verb plus its raw arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub verb: Verb,
    pub args: Vec<Vec<u8>>,
}

impl Command {
    /// Build a command from a request frame. Requests must be non-empty arrays
    /// of strings; an unknown verb yields `UnknownCommand`.
    pub fn from_frame(frame: RespValue) -> KvResult<Command> {
        let items = match frame {
            RespValue::Array(Some(items)) if !items.is_empty() => items,
            _ => {
                return Err(KvError::Protocol(
                    "expected a non-empty array of bulk strings".into(),
                ));
            }
        };

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            match item {
                RespValue::BulkString(Some(data)) => parts.push(data),
                RespValue::SimpleString(s) => parts.push(s.into_bytes()),
                _ => {
                    return Err(KvError::Protocol(
                        "expected a non-empty array of bulk strings".into(),
                    ));
                }
            }
        }

        let name = parts.remove(0);
        let verb = Verb::lookup(&name)
            .ok_or_else(|| KvError::UnknownCommand(String::from_utf8_lossy(&name).into_owned()))?;
        Ok(Command { verb, args: parts })
    }
}

/// Run a command for a client, honoring its transaction state. Errors are
/// rendered as error replies.
pub async fn dispatch(cmd: Command, ctx: &ServerContext, client: &mut ClientState) -> RespValue {
    let result = match cmd.verb {
        Verb::Multi => transaction::cmd_multi(client),
        Verb::Exec => transaction::cmd_exec(ctx, client).await,
        Verb::Discard => transaction::cmd_discard(client),
        _ => match client.queued.as_mut() {
            Some(queue) => {
                queue.push(cmd);
                Ok(RespValue::simple_string("QUEUED"))
            }
            None => execute(&cmd, ctx, client).await,
        },
    };
    result.unwrap_or_else(|e| RespValue::error(e.to_resp_error()))
}

/// Run one command directly, ignoring transaction state. Keyspace commands
/// take the keyspace lock for as long as they run.
pub async fn execute(
    cmd: &Command,
    ctx: &ServerContext,
    client: &mut ClientState,
) -> KvResult<RespValue> {
    let args = cmd.args.as_slice();
    match cmd.verb {
        // Reads
        Verb::Get => string::cmd_get(args, &*ctx.store.read().await),
        Verb::Type => key::cmd_type(args, &*ctx.store.read().await),
        Verb::Keys => key::cmd_keys(args, &*ctx.store.read().await),
        Verb::Xrange => stream::cmd_xrange(args, &*ctx.store.read().await),

        // Writes
        Verb::Set => string::cmd_set(args, &mut *ctx.store.write().await, ctx).await,
        Verb::Incr => string::cmd_incr(args, &mut *ctx.store.write().await, ctx).await,
        Verb::Xadd => stream::cmd_xadd(args, &mut *ctx.store.write().await, ctx).await,

        // Releases the keyspace while it waits
        Verb::Xread => stream::cmd_xread(args, ctx).await,

        _ => execute_without_keyspace(cmd, ctx, client).await,
    }
}

/// Run one command against a keyspace the caller already holds exclusively.
/// EXEC runs its whole batch this way, so no other connection can touch the
/// keyspace between queued commands. Nothing here waits: XREAD ignores BLOCK.
pub async fn execute_locked(
    cmd: &Command,
    store: &mut Keyspace,
    ctx: &ServerContext,
    client: &mut ClientState,
) -> KvResult<RespValue> {
    let args = cmd.args.as_slice();
    match cmd.verb {
        Verb::Get => string::cmd_get(args, store),
        Verb::Type => key::cmd_type(args, store),
        Verb::Keys => key::cmd_keys(args, store),
        Verb::Xrange => stream::cmd_xrange(args, store),
        Verb::Xread => stream::xread_once(args, store),
        Verb::Set => string::cmd_set(args, store, ctx).await,
        Verb::Incr => string::cmd_incr(args, store, ctx).await,
        Verb::Xadd => stream::cmd_xadd(args, store, ctx).await,
        _ => execute_without_keyspace(cmd, ctx, client).await,
    }
}

async fn execute_without_keyspace(
    cmd: &Command,
    ctx: &ServerContext,
    client: &mut ClientState,
) -> KvResult<RespValue> {
    let args = cmd.args.as_slice();
    match cmd.verb {
        Verb::Ping => string::cmd_ping(args),
        Verb::Echo => string::cmd_echo(args),
        Verb::Client => server_cmd::cmd_client(args, client),
        Verb::Config => server_cmd::cmd_config(args, ctx),
        Verb::Info => server_cmd::cmd_info(args, ctx).await,
        Verb::Replconf => replication::cmd_replconf(args, client),
        Verb::Wait => replication::cmd_wait(args, ctx, client).await,

        // MULTI/EXEC/DISCARD only get here from inside EXEC; PSYNC needs the
        // raw connection. Keyspace verbs are routed before this point.
        _ => Err(KvError::NotAllowed(cmd.verb.name())),
    }
}

/// The verb followed by its arguments, ready to re-encode as a command frame.
pub fn with_verb<'a>(verb: &'a str, args: &'a [Vec<u8>]) -> impl Iterator<Item = &'a [u8]> {
    std::iter::once(verb.as_bytes()).chain(args.iter().map(Vec::as_slice))
}

/// Resolve at `deadline`, or never when there is none.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A timeout argument in milliseconds, where 0 means wait forever.
pub fn deadline_after(timeout_ms: u64) -> Option<Instant> {
    (timeout_ms > 0).then(|| Instant::now() + Duration::from_millis(timeout_ms))
}

/// Extract a UTF-8 string from an argument.
pub fn arg_to_string(arg: &[u8]) -> String {
    String::from_utf8_lossy(arg).into_owned()
}

/// Extract an i64 from an argument.
pub fn arg_to_i64(arg: &[u8]) -> KvResult<i64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::NotInteger)
}

/// Extract a non-negative integer from an argument.
pub fn arg_to_u64(arg: &[u8]) -> KvResult<u64> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(KvError::NotInteger)
}
