use crate::command::{arg_to_i64, arg_to_string, with_verb};
use crate::error::{KvError, KvResult};
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::Keyspace;
use crate::types::Value;

pub fn cmd_ping(args: &[Vec<u8>]) -> KvResult<RespValue> {
    match args {
        [] => Ok(RespValue::simple_string("PONG")),
        [msg] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(KvError::WrongArgCount("ping")),
    }
}

pub fn cmd_echo(args: &[Vec<u8>]) -> KvResult<RespValue> {
    match args {
        [msg] => Ok(RespValue::bulk_string(msg.clone())),
        _ => Err(KvError::WrongArgCount("echo")),
    }
}

pub fn cmd_get(args: &[Vec<u8>], store: &Keyspace) -> KvResult<RespValue> {
    let [key] = args else {
        return Err(KvError::WrongArgCount("get"));
    };
    match store.get(&arg_to_string(key)) {
        Some(Value::String(s)) => Ok(RespValue::bulk_string(s.clone())),
        Some(_) => Err(KvError::WrongType),
        None => Ok(RespValue::null_bulk_string()),
    }
}

/// SET key value [EX seconds | PX milliseconds]
pub async fn cmd_set(
    args: &[Vec<u8>],
    store: &mut Keyspace,
    ctx: &ServerContext,
) -> KvResult<RespValue> {
    if args.len() < 2 {
        return Err(KvError::WrongArgCount("set"));
    }
    let key = arg_to_string(&args[0]);
    let value = args[1].clone();

    let mut ttl_ms = None;
    let mut i = 2;
    while i < args.len() {
        let opt = arg_to_string(&args[i]).to_uppercase();
        let amount = args.get(i + 1).ok_or(KvError::Syntax);
        match opt.as_str() {
            "PX" if ttl_ms.is_none() => ttl_ms = Some(arg_to_i64(amount?)?),
            "EX" if ttl_ms.is_none() => {
                let secs = arg_to_i64(amount?)?;
                ttl_ms = Some(secs.checked_mul(1000).ok_or(KvError::NotInteger)?);
            }
            _ => return Err(KvError::Syntax),
        }
        i += 2;
    }

    store.set(key, Value::String(value), ttl_ms);
    ctx.propagate(with_verb("SET", args)).await;
    Ok(RespValue::ok())
}

/// Increment the integer stored at key, counting from 0 for an absent key.
/// An existing expiry is kept.
pub async fn cmd_incr(
    args: &[Vec<u8>],
    store: &mut Keyspace,
    ctx: &ServerContext,
) -> KvResult<RespValue> {
    let [key] = args else {
        return Err(KvError::WrongArgCount("incr"));
    };
    let key = arg_to_string(key);

    let n = match store.get_entry_mut(&key) {
        Some(entry) => {
            let current = match &entry.value {
                Value::String(s) => arg_to_i64(s)?,
                _ => return Err(KvError::WrongType),
            };
            let n = current.checked_add(1).ok_or(KvError::NotInteger)?;
            entry.value = Value::String(n.to_string().into_bytes());
            n
        }
        None => {
            store.set(key.clone(), Value::String(b"1".to_vec()), None);
            1
        }
    };
    ctx.propagate(with_verb("INCR", args)).await;
    Ok(RespValue::integer(n))
}
