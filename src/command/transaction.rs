use crate::command::execute_locked;
use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::resp::RespValue;
use crate::server::ServerContext;

pub fn cmd_multi(client: &mut ClientState) -> KvResult<RespValue> {
    if client.is_queuing() {
        return Err(KvError::NestedMulti);
    }
    client.queued = Some(Vec::new());
    Ok(RespValue::ok())
}

/// Run every queued command in order while holding the keyspace, so the batch
/// is never interleaved with other connections. A failing command contributes
/// its error reply and the rest still run.
pub async fn cmd_exec(ctx: &ServerContext, client: &mut ClientState) -> KvResult<RespValue> {
    let queue = client.queued.take().ok_or(KvError::ExecWithoutMulti)?;

    let mut store = ctx.store.write().await;
    client.in_exec = true;
    let mut results = Vec::with_capacity(queue.len());
    for cmd in &queue {
        let result = execute_locked(cmd, &mut store, ctx, client)
            .await
            .unwrap_or_else(|e| RespValue::error(e.to_resp_error()));
        results.push(result);
    }
    client.in_exec = false;

    Ok(RespValue::array(results))
}

pub fn cmd_discard(client: &mut ClientState) -> KvResult<RespValue> {
    client.queued.take().ok_or(KvError::DiscardWithoutMulti)?;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use crate::command::tests::{ctx, run};
    use crate::connection::ClientState;
    use crate::resp::RespValue;
    use std::time::Duration;

    fn queued() -> RespValue {
        RespValue::simple_string("QUEUED")
    }

    #[tokio::test]
    async fn test_multi_exec_runs_in_order() {
        let ctx = ctx();
        let mut client = ClientState::new();
        assert_eq!(run(&ctx, &mut client, &["MULTI"]).await, RespValue::ok());
        assert_eq!(run(&ctx, &mut client, &["SET", "foo", "41"]).await, queued());
        assert_eq!(run(&ctx, &mut client, &["INCR", "foo"]).await, queued());
        assert_eq!(run(&ctx, &mut client, &["GET", "foo"]).await, queued());

        // nothing ran yet
        assert!(ctx.store.read().await.get("foo").is_none());

        assert_eq!(
            run(&ctx, &mut client, &["EXEC"]).await,
            RespValue::array(vec![
                RespValue::ok(),
                RespValue::integer(42),
                RespValue::bulk_string("42"),
            ])
        );
        assert!(!client.is_queuing());
    }

    #[tokio::test]
    async fn test_errors_do_not_abort_exec() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["MULTI"]).await;
        run(&ctx, &mut client, &["SET", "s", "abc"]).await;
        run(&ctx, &mut client, &["INCR", "s"]).await;
        run(&ctx, &mut client, &["SET", "t", "1"]).await;
        assert_eq!(
            run(&ctx, &mut client, &["EXEC"]).await,
            RespValue::array(vec![
                RespValue::ok(),
                RespValue::error("ERR value is not an integer or out of range"),
                RespValue::ok(),
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_transaction() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["MULTI"]).await;
        assert_eq!(run(&ctx, &mut client, &["EXEC"]).await, RespValue::array(vec![]));
    }

    #[tokio::test]
    async fn test_discard() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["MULTI"]).await;
        run(&ctx, &mut client, &["SET", "foo", "bar"]).await;
        assert_eq!(run(&ctx, &mut client, &["DISCARD"]).await, RespValue::ok());
        assert_eq!(run(&ctx, &mut client, &["GET", "foo"]).await, RespValue::null_bulk_string());
    }

    #[tokio::test]
    async fn test_without_multi() {
        let ctx = ctx();
        let mut client = ClientState::new();
        assert_eq!(
            run(&ctx, &mut client, &["EXEC"]).await,
            RespValue::error("ERR EXEC without MULTI")
        );
        assert_eq!(
            run(&ctx, &mut client, &["DISCARD"]).await,
            RespValue::error("ERR DISCARD without MULTI")
        );
    }

    #[tokio::test]
    async fn test_nested_multi() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["MULTI"]).await;
        assert_eq!(
            run(&ctx, &mut client, &["MULTI"]).await,
            RespValue::error("ERR MULTI calls can not be nested")
        );
        assert!(client.is_queuing());
    }

    #[tokio::test]
    async fn test_exec_is_not_interleaved_with_other_clients() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["MULTI"]).await;
        run(&ctx, &mut client, &["SET", "k", "mine"]).await;
        run(&ctx, &mut client, &["WAIT", "1", "200"]).await;
        run(&ctx, &mut client, &["GET", "k"]).await;

        // Hold the keyspace so EXEC and the competing SET both queue up on it.
        let reader = ctx.store.read().await;
        let exec_ctx = ctx.clone();
        let exec = tokio::spawn(async move {
            let reply = run(&exec_ctx, &mut client, &["EXEC"]).await;
            (reply, client)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other_ctx = ctx.clone();
        let other = tokio::spawn(async move {
            let mut other = ClientState::new();
            run(&other_ctx, &mut other, &["SET", "k", "theirs"]).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(reader);

        let (reply, client) = exec.await.unwrap();
        assert_eq!(
            reply,
            RespValue::array(vec![
                RespValue::ok(),
                RespValue::integer(0),
                RespValue::bulk_string("mine"),
            ])
        );
        assert!(!client.in_exec);
        assert_eq!(other.await.unwrap(), RespValue::ok());
        assert_eq!(
            run(&ctx, &mut ClientState::new(), &["GET", "k"]).await,
            RespValue::bulk_string("theirs")
        );
    }

    #[tokio::test]
    async fn test_wait_inside_exec_does_not_block() {
        let ctx = ctx();
        let mut client = ClientState::new();
        run(&ctx, &mut client, &["SET", "k", "v"]).await;
        run(&ctx, &mut client, &["MULTI"]).await;
        run(&ctx, &mut client, &["WAIT", "1", "0"]).await;
        let reply = tokio::time::timeout(
            Duration::from_millis(500),
            run(&ctx, &mut client, &["EXEC"]),
        )
        .await
        .expect("EXEC waited on WAIT");
        assert_eq!(reply, RespValue::array(vec![RespValue::integer(0)]));
    }
}
