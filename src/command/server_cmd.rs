use crate::command::arg_to_string;
use crate::connection::ClientState;
use crate::error::{KvError, KvResult};
use crate::glob::glob_match;
use crate::resp::RespValue;
use crate::server::ServerContext;

const CONFIG_PARAMS: &[&str] = &["bind", "port", "loglevel", "dir", "dbfilename", "replicaof"];

/// CONFIG GET pattern. Returns a flat [name, value, ...] array, empty when
/// nothing matches.
pub fn cmd_config(args: &[Vec<u8>], ctx: &ServerContext) -> KvResult<RespValue> {
    let Some(subcmd) = args.first() else {
        return Err(KvError::WrongArgCount("config"));
    };

    match arg_to_string(subcmd).to_uppercase().as_str() {
        "GET" => {
            let [_, pattern] = args else {
                return Err(KvError::WrongArgCount("config|get"));
            };
            let pattern = arg_to_string(pattern).to_lowercase();

            let mut result = Vec::new();
            for param in CONFIG_PARAMS {
                if glob_match(&pattern, param)
                    && let Some(val) = ctx.config.get(param)
                {
                    result.push(RespValue::bulk_string(*param));
                    result.push(RespValue::bulk_string(val));
                }
            }
            Ok(RespValue::array(result))
        }
        _ => Err(KvError::Syntax),
    }
}

/// The CLIENT subcommands client libraries send while connecting.
pub fn cmd_client(args: &[Vec<u8>], client: &ClientState) -> KvResult<RespValue> {
    let Some(subcmd) = args.first() else {
        return Err(KvError::WrongArgCount("client"));
    };
    match arg_to_string(subcmd).to_uppercase().as_str() {
        "SETINFO" | "SETNAME" => Ok(RespValue::ok()),
        "ID" => Ok(RespValue::integer(client.id as i64)),
        _ => Err(KvError::Syntax),
    }
}

/// INFO [section]. Only the replication section has content.
pub async fn cmd_info(args: &[Vec<u8>], ctx: &ServerContext) -> KvResult<RespValue> {
    if args.len() > 1 {
        return Err(KvError::WrongArgCount("info"));
    }
    let section = args
        .first()
        .map(|a| arg_to_string(a).to_lowercase())
        .unwrap_or_else(|| "replication".to_string());

    let body = match section.as_str() {
        "replication" | "all" | "default" | "everything" => {
            ctx.repl.read().await.info_lines().join("\n")
        }
        _ => String::new(),
    };
    Ok(RespValue::bulk_string(body))
}
