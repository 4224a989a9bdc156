#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("ERR Protocol error: {0}")]
    Protocol(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArgCount(&'static str),

    #[error("ERR syntax error")]
    Syntax,

    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,

    #[error("ERR The ID specified in XADD must be greater than 0-0")]
    StreamIdZero,

    #[error("ERR The ID specified in XADD is equal or smaller than the target stream top item")]
    StreamIdTooSmall,

    #[error("ERR Invalid stream ID specified as stream command argument")]
    InvalidStreamId,

    #[error("ERR EXEC without MULTI")]
    ExecWithoutMulti,

    #[error("ERR DISCARD without MULTI")]
    DiscardWithoutMulti,

    #[error("ERR MULTI calls can not be nested")]
    NestedMulti,

    #[error("ERR {0} is not allowed in this context")]
    NotAllowed(&'static str),

    #[error("unsupported snapshot string encoding {0:#04x}")]
    UnsupportedEncoding(u8),

    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl KvError {
    pub fn to_resp_error(&self) -> String {
        match self {
            KvError::Io(e) => format!("ERR {e}"),
            other => format!("{other}"),
        }
    }

    /// Whether the replica bootstrap should give up instead of reconnecting.
    pub fn is_fatal_for_sync(&self) -> bool {
        matches!(
            self,
            KvError::Handshake(_) | KvError::UnsupportedEncoding(_) | KvError::Snapshot(_)
        )
    }
}

pub type KvResult<T> = Result<T, KvError>;
