use crate::command::arg_to_string;
use crate::error::{KvError, KvResult};
use crate::resp::RespValue;
use crate::store::Keyspace;

pub fn cmd_type(args: &[Vec<u8>], store: &Keyspace) -> KvResult<RespValue> {
    let [key] = args else {
        return Err(KvError::WrongArgCount("type"));
    };
    let name = store
        .get(&arg_to_string(key))
        .map_or("none", |v| v.type_name());
    Ok(RespValue::simple_string(name))
}

pub fn cmd_keys(args: &[Vec<u8>], store: &Keyspace) -> KvResult<RespValue> {
    let [pattern] = args else {
        return Err(KvError::WrongArgCount("keys"));
    };
    let mut keys = store.keys(&arg_to_string(pattern));
    keys.sort();
    Ok(RespValue::array(
        keys.into_iter().map(RespValue::bulk_string).collect(),
    ))
}

#[cfg(test)]
mod tests {
    use crate::command::tests::{ctx, run};
    use crate::connection::ClientState;
    use crate::resp::RespValue;

    #[tokio::test]
    async fn test_type() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["SET", "s", "v"]).await;
        run(&ctx, &mut client, &["XADD", "x", "1-1", "f", "v"]).await;
        assert_eq!(run(&ctx, &mut client, &["TYPE", "s"]).await, RespValue::simple_string("string"));
        assert_eq!(run(&ctx, &mut client, &["TYPE", "x"]).await, RespValue::simple_string("stream"));
        assert_eq!(run(&ctx, &mut client, &["TYPE", "nope"]).await, RespValue::simple_string("none"));
    }

    #[tokio::test]
    async fn test_keys_skips_expired() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["SET", "b", "1"]).await;
        run(&ctx, &mut client, &["SET", "a", "1"]).await;
        run(&ctx, &mut client, &["SET", "gone", "1", "PX", "0"]).await;
        assert_eq!(
            run(&ctx, &mut client, &["KEYS", "*"]).await,
            RespValue::array(vec![RespValue::bulk_string("a"), RespValue::bulk_string("b")])
        );
        assert_eq!(
            run(&ctx, &mut client, &["KEYS", "g*"]).await,
            RespValue::array(vec![])
        );
    }
}
