use crate::command::{arg_to_string, arg_to_u64, deadline_after, sleep_until_deadline};
use crate::error::{KvError, KvResult};
use crate::resp::RespValue;
use crate::server::ServerContext;
use crate::store::Keyspace;
use crate::types::Value;
use crate::types::stream::{IdSpec, Stream, StreamEntry, StreamEntryId, flatten};

/// Convert a stream entry into a RESP array: [id, [f1, v1, f2, v2, ...]]
fn entry_to_resp(id: &StreamEntryId, fields: &StreamEntry) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(id.to_string()),
        RespValue::array(flatten(fields).into_iter().map(RespValue::bulk_string).collect()),
    ])
}

/// Parse a range bound. "-" and "+" are the extremes; a bare millisecond
/// value covers every sequence number in that millisecond.
fn parse_range_bound(s: &str, is_min: bool) -> KvResult<StreamEntryId> {
    match s {
        "-" => Ok(StreamEntryId::MIN),
        "+" => Ok(StreamEntryId::MAX),
        other => StreamEntryId::parse(other)
            .or_else(|| {
                let ms = other.parse().ok()?;
                Some(StreamEntryId::new(ms, if is_min { 0 } else { u64::MAX }))
            })
            .ok_or(KvError::InvalidStreamId),
    }
}

/// Look up a stream for reading. Absent keys read as empty.
fn stream_at<'a>(store: &'a Keyspace, key: &str) -> KvResult<Option<&'a Stream>> {
    store
        .get(key)
        .map(|value| value.as_stream().ok_or(KvError::WrongType))
        .transpose()
}

/// XADD key id field value [field value ...]
pub async fn cmd_xadd(
    args: &[Vec<u8>],
    store: &mut Keyspace,
    ctx: &ServerContext,
) -> KvResult<RespValue> {
    if args.len() < 4 || args.len() % 2 != 0 {
        return Err(KvError::WrongArgCount("xadd"));
    }
    let key = arg_to_string(&args[0]);
    let spec = IdSpec::parse(&arg_to_string(&args[1]))?;
    let fields: StreamEntry = args[2..]
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let id = match store.get_entry_mut(&key) {
        Some(entry) => entry
            .value
            .as_stream_mut()
            .ok_or(KvError::WrongType)?
            .add(spec, fields)?,
        None => {
            let mut stream = Stream::new();
            let id = stream.add(spec, fields)?;
            store.set(key.clone(), Value::Stream(stream), None);
            id
        }
    };
    let id_str = id.to_string();

    ctx.key_watcher.write().await.notify(&key);
    // Replicas get the resolved ID so both sides store the same entry.
    let mut parts = vec![b"XADD".to_vec(), args[0].clone(), id_str.clone().into_bytes()];
    parts.extend_from_slice(&args[2..]);
    ctx.propagate(parts).await;

    Ok(RespValue::bulk_string(id_str))
}

/// XRANGE key start end [COUNT n]
pub fn cmd_xrange(args: &[Vec<u8>], store: &Keyspace) -> KvResult<RespValue> {
    let count = match args.len() {
        3 => None,
        5 if arg_to_string(&args[3]).eq_ignore_ascii_case("COUNT") => {
            Some(arg_to_u64(&args[4])? as usize)
        }
        5 => return Err(KvError::Syntax),
        _ => return Err(KvError::WrongArgCount("xrange")),
    };
    let key = arg_to_string(&args[0]);
    let start = parse_range_bound(&arg_to_string(&args[1]), true)?;
    let end = parse_range_bound(&arg_to_string(&args[2]), false)?;

    let Some(stream) = stream_at(store, &key)? else {
        return Ok(RespValue::array(vec![]));
    };
    let entries = stream
        .range(start, end)
        .into_iter()
        .take(count.unwrap_or(usize::MAX))
        .map(|(id, fields)| entry_to_resp(id, fields))
        .collect();
    Ok(RespValue::array(entries))
}

/// Parsed XREAD arguments.
struct XreadArgs {
    count: Option<usize>,
    block_ms: Option<u64>,
    keys: Vec<String>,
    ids: Vec<String>,
}

fn parse_xread(args: &[Vec<u8>]) -> KvResult<XreadArgs> {
    let mut count = None;
    let mut block_ms = None;
    let mut idx = 0;

    loop {
        let Some(opt) = args.get(idx) else {
            return Err(KvError::Syntax);
        };
        let value = args.get(idx + 1);
        match arg_to_string(opt).to_uppercase().as_str() {
            "COUNT" => count = Some(arg_to_u64(value.ok_or(KvError::Syntax)?)? as usize),
            "BLOCK" => block_ms = Some(arg_to_u64(value.ok_or(KvError::Syntax)?)?),
            "STREAMS" => {
                idx += 1;
                break;
            }
            _ => return Err(KvError::Syntax),
        }
        idx += 2;
    }

    // After STREAMS: keys then one ID per key.
    let remaining = &args[idx..];
    if remaining.is_empty() || remaining.len() % 2 != 0 {
        return Err(KvError::WrongArgCount("xread"));
    }
    let (keys, ids) = remaining.split_at(remaining.len() / 2);
    Ok(XreadArgs {
        count,
        block_ms,
        keys: keys.iter().map(|k| arg_to_string(k)).collect(),
        ids: ids.iter().map(|i| arg_to_string(i)).collect(),
    })
}

/// Entries after each start ID, as [[key, [entry, ...]], ...]. Streams with
/// nothing new are left out.
fn read_streams(
    store: &Keyspace,
    keys: &[String],
    starts: &[StreamEntryId],
    count: Option<usize>,
) -> KvResult<Vec<RespValue>> {
    let mut results = Vec::new();
    for (key, start) in keys.iter().zip(starts) {
        let Some(stream) = stream_at(store, key)? else {
            continue;
        };
        let entries: Vec<RespValue> = stream
            .after(*start)
            .into_iter()
            .take(count.unwrap_or(usize::MAX))
            .map(|(id, fields)| entry_to_resp(id, fields))
            .collect();
        if !entries.is_empty() {
            results.push(RespValue::array(vec![
                RespValue::bulk_string(key.as_str()),
                RespValue::array(entries),
            ]));
        }
    }
    Ok(results)
}

/// Start IDs for each key. `$` is the stream's last ID right now.
fn resolve_starts(store: &Keyspace, keys: &[String], ids: &[String]) -> KvResult<Vec<StreamEntryId>> {
    keys.iter()
        .zip(ids)
        .map(|(key, id)| {
            if id == "$" {
                Ok(stream_at(store, key)?.map_or(StreamEntryId::MIN, Stream::last_id))
            } else {
                parse_range_bound(id, true)
            }
        })
        .collect()
}

fn streams_reply(results: Vec<RespValue>) -> RespValue {
    if results.is_empty() {
        RespValue::null_array()
    } else {
        RespValue::array(results)
    }
}

/// One non-blocking pass over the requested streams.
fn read_now(store: &Keyspace, args: &XreadArgs) -> KvResult<RespValue> {
    let starts = resolve_starts(store, &args.keys, &args.ids)?;
    read_streams(store, &args.keys, &starts, args.count).map(streams_reply)
}

/// XREAD against a keyspace the caller already holds. BLOCK is ignored, which
/// is how XREAD behaves inside a transaction.
pub fn xread_once(args: &[Vec<u8>], store: &Keyspace) -> KvResult<RespValue> {
    read_now(store, &parse_xread(args)?)
}

/// XREAD [COUNT n] [BLOCK ms] STREAMS key [key ...] id [id ...]
///
/// `$` stands for the stream's last ID at the time of the call. With BLOCK the
/// call waits until one of the streams is appended to or the timeout passes
/// (0 waits forever).
pub async fn cmd_xread(args: &[Vec<u8>], ctx: &ServerContext) -> KvResult<RespValue> {
    let parsed = parse_xread(args)?;
    let Some(block_ms) = parsed.block_ms else {
        return read_now(&*ctx.store.read().await, &parsed);
    };
    let XreadArgs { count, keys, ids, .. } = parsed;
    let starts = resolve_starts(&*ctx.store.read().await, &keys, &ids)?;

    let deadline = deadline_after(block_ms);
    loop {
        // Register before looking so an append in between still wakes us.
        let waiter = ctx.key_watcher.write().await.register_many(&keys);
        let results = {
            let store = ctx.store.read().await;
            read_streams(&store, &keys, &starts, count)
        };
        if !matches!(&results, Ok(found) if found.is_empty()) {
            ctx.key_watcher.write().await.unregister_many(&keys, &waiter);
            return results.map(RespValue::array);
        }

        let woken = tokio::select! {
            _ = waiter.notified() => true,
            _ = sleep_until_deadline(deadline) => false,
        };
        ctx.key_watcher.write().await.unregister_many(&keys, &waiter);
        if !woken {
            return Ok(RespValue::null_array());
        }
    }
}
