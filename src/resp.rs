use crate::cursor::ByteCursor;
use crate::error::{KvError, KvResult};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A RESP2 value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// +OK\r\n
    SimpleString(String),
    /// -ERR message\r\n
    Error(String),
    /// :1000\r\n
    Integer(i64),
    /// $6\r\nfoobar\r\n  or  $-1\r\n (null)
    BulkString(Option<Vec<u8>>),
    /// *2\r\n...  or  *-1\r\n (null)
    Array(Option<Vec<RespValue>>),
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    pub fn bulk_string(data: impl Into<Vec<u8>>) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null_bulk_string() -> Self {
        RespValue::BulkString(None)
    }

    pub fn null_array() -> Self {
        RespValue::Array(None)
    }

    pub fn array(items: Vec<RespValue>) -> Self {
        RespValue::Array(Some(items))
    }

    /// A command frame: an array of bulk strings.
    pub fn command<I, T>(parts: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        RespValue::array(
            parts
                .into_iter()
                .map(|p| RespValue::bulk_string(p.as_ref().to_vec()))
                .collect(),
        )
    }

    /// Serialize this value to RESP bytes.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Write RESP bytes into the given buffer.
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.push(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.push(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.push(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
            RespValue::Array(Some(items)) => {
                buf.push(b'*');
                buf.extend_from_slice(items.len().to_string().as_bytes());
                buf.extend_from_slice(b"\r\n");
                for item in items {
                    item.write_to(buf);
                }
            }
        }
    }

    /// Raw bytes of a string-like value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(Some(data)) => Some(data),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Convert to a UTF-8 string, if possible.
    pub fn to_string_lossy(&self) -> Option<String> {
        self.as_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Incremental RESP decoder over an async byte source.
///
/// Frames are decoded byte by byte through a [`ByteCursor`]. Any byte that
/// doesn't match the grammar is a [`KvError::Protocol`]; callers treat that as
/// fatal for the connection.
pub struct RespDecoder<R> {
    cursor: ByteCursor<R>,
}

impl<R: AsyncRead + Unpin + Send> RespDecoder<R> {
    pub fn new(reader: R) -> Self {
        RespDecoder {
            cursor: ByteCursor::new(reader),
        }
    }

    /// Bytes consumed from the source so far.
    pub fn consumed(&self) -> u64 {
        self.cursor.consumed()
    }

    /// Decode the next frame, or return `None` if the stream ended cleanly
    /// between frames.
    pub async fn next_frame(&mut self) -> KvResult<Option<RespValue>> {
        if self.cursor.peek().await?.is_none() {
            return Ok(None);
        }
        self.read_value().await.map(Some)
    }

    /// Decode one value. Arrays may nest, hence the boxed future.
    pub fn read_value(&mut self) -> Pin<Box<dyn Future<Output = KvResult<RespValue>> + Send + '_>> {
        Box::pin(async move {
            match self.next_byte().await? {
                b'*' => {
                    let len = self.read_length().await?;
                    if len < 0 {
                        return Ok(RespValue::Array(None));
                    }
                    let mut items = Vec::with_capacity(len.min(1024) as usize);
                    for _ in 0..len {
                        items.push(self.read_value().await?);
                    }
                    Ok(RespValue::Array(Some(items)))
                }
                b'$' => {
                    let len = self.read_length().await?;
                    if len < 0 {
                        return Ok(RespValue::BulkString(None));
                    }
                    let data = self.cursor.take(bulk_len(len)?).await.map_err(eof)?;
                    self.expect(b'\r').await?;
                    self.expect(b'\n').await?;
                    Ok(RespValue::BulkString(Some(data.to_vec())))
                }
                b'+' => Ok(RespValue::SimpleString(self.read_line().await?)),
                b'-' => Ok(RespValue::Error(self.read_line().await?)),
                b':' => {
                    let line = self.read_line().await?;
                    let n = line
                        .parse()
                        .map_err(|_| KvError::Protocol(format!("invalid integer '{line}'")))?;
                    Ok(RespValue::Integer(n))
                }
                other => Err(KvError::Protocol(format!(
                    "unexpected frame type byte '{}'",
                    other.escape_ascii()
                ))),
            }
        })
    }

    /// Read a snapshot transfer: `$<len>\r\n` followed by exactly `len` raw
    /// bytes with no trailing CRLF.
    pub async fn read_snapshot_payload(&mut self) -> KvResult<Bytes> {
        self.expect(b'$').await?;
        let len = self.read_length().await?;
        if len < 0 {
            return Err(KvError::Protocol(format!("invalid snapshot length {len}")));
        }
        Ok(self.cursor.take(bulk_len(len)?).await.map_err(eof)?)
    }

    async fn next_byte(&mut self) -> KvResult<u8> {
        self.cursor
            .next()
            .await?
            .ok_or_else(|| KvError::Protocol("unexpected end of stream".into()))
    }

    async fn expect(&mut self, expected: u8) -> KvResult<()> {
        let got = self.next_byte().await?;
        if got != expected {
            return Err(KvError::Protocol(format!(
                "expected '{}', got '{}'",
                expected.escape_ascii(),
                got.escape_ascii()
            )));
        }
        Ok(())
    }

    /// Bytes up to CRLF; a bare CR must be followed by LF.
    async fn read_line(&mut self) -> KvResult<String> {
        let mut line = Vec::new();
        loop {
            match self.next_byte().await? {
                b'\r' => {
                    self.expect(b'\n').await?;
                    return Ok(String::from_utf8_lossy(&line).into_owned());
                }
                b => line.push(b),
            }
        }
    }

    async fn read_length(&mut self) -> KvResult<i64> {
        let line = self.read_line().await?;
        line.parse()
            .map_err(|_| KvError::Protocol(format!("invalid length '{line}'")))
    }
}

/// Longest bulk string accepted, 512 MB.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

fn bulk_len(len: i64) -> KvResult<usize> {
    if len > MAX_BULK_LEN {
        return Err(KvError::Protocol("invalid bulk length".into()));
    }
    Ok(len as usize)
}

fn eof(e: std::io::Error) -> KvError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        KvError::Protocol("unexpected end of stream".into())
    } else {
        KvError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode_all(input: &'static [u8]) -> KvResult<Vec<RespValue>> {
        let mut decoder = RespDecoder::new(input);
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    #[tokio::test]
    async fn test_decode_command() {
        let frames = decode_all(b"*2\r\n$4\r\nECHO\r\n$3\r\nhey\r\n").await.unwrap();
        assert_eq!(frames, vec![RespValue::command(["ECHO", "hey"])]);
    }

    #[tokio::test]
    async fn test_decode_pipelined_commands() {
        let frames = decode_all(b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n")
            .await
            .unwrap();
        assert_eq!(frames.len(), 2);
    }

    #[tokio::test]
    async fn test_decode_binary_bulk_string() {
        let frames = decode_all(b"$4\r\na\r\nb\r\n").await.unwrap();
        assert_eq!(frames, vec![RespValue::bulk_string(b"a\r\nb".to_vec())]);
    }

    #[tokio::test]
    async fn test_decode_simple_string_and_integer() {
        let frames = decode_all(b"+FULLRESYNC abc 0\r\n:42\r\n-ERR no\r\n").await.unwrap();
        assert_eq!(
            frames,
            vec![
                RespValue::simple_string("FULLRESYNC abc 0"),
                RespValue::integer(42),
                RespValue::error("ERR no"),
            ]
        );
    }

    #[tokio::test]
    async fn test_decode_nested_and_null() {
        let frames = decode_all(b"*2\r\n*1\r\n:1\r\n$-1\r\n*-1\r\n").await.unwrap();
        assert_eq!(
            frames,
            vec![
                RespValue::array(vec![
                    RespValue::array(vec![RespValue::integer(1)]),
                    RespValue::null_bulk_string(),
                ]),
                RespValue::null_array(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reject_bad_terminator() {
        let err = decode_all(b"$5\r\nhello\r3").await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_reject_bare_cr_in_length() {
        let err = decode_all(b"*12\r34").await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_reject_non_numeric_length() {
        let err = decode_all(b"*x\r\n").await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_reject_oversized_bulk_length() {
        let err = decode_all(b"*1\r\n$99999999999999\r\nPING\r\n").await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(msg) if msg == "invalid bulk length"));

        let mut decoder = RespDecoder::new(&b"$536870913\r\nREDIS"[..]);
        let err = decoder.read_snapshot_payload().await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_reject_truncated_frame() {
        let err = decode_all(b"*2\r\n$3\r\nfoo\r\n").await.unwrap_err();
        assert!(matches!(err, KvError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_snapshot_payload_has_no_trailing_crlf() {
        let mut decoder = RespDecoder::new(&b"$3\r\nabc*1\r\n$4\r\nPING\r\n"[..]);
        let payload = decoder.read_snapshot_payload().await.unwrap();
        assert_eq!(&payload[..], b"abc");
        let consumed = decoder.consumed();
        let next = decoder.next_frame().await.unwrap().unwrap();
        assert_eq!(next, RespValue::command(["PING"]));
        assert_eq!(decoder.consumed() - consumed, 14);
    }

    #[test]
    fn test_serialize_simple_string() {
        assert_eq!(RespValue::ok().serialize(), b"+OK\r\n");
    }

    #[test]
    fn test_serialize_error() {
        assert_eq!(RespValue::error("ERR bad").serialize(), b"-ERR bad\r\n");
    }

    #[test]
    fn test_serialize_integer() {
        assert_eq!(RespValue::integer(-7).serialize(), b":-7\r\n");
    }

    #[test]
    fn test_serialize_bulk_strings() {
        assert_eq!(RespValue::bulk_string("hello").serialize(), b"$5\r\nhello\r\n");
        assert_eq!(RespValue::bulk_string("").serialize(), b"$0\r\n\r\n");
        assert_eq!(RespValue::null_bulk_string().serialize(), b"$-1\r\n");
    }

    #[test]
    fn test_serialize_arrays() {
        let val = RespValue::array(vec![RespValue::bulk_string("foo"), RespValue::integer(42)]);
        assert_eq!(val.serialize(), b"*2\r\n$3\r\nfoo\r\n:42\r\n");
        assert_eq!(RespValue::null_array().serialize(), b"*-1\r\n");
    }

    #[tokio::test]
    async fn test_serialized_command_decodes_back() {
        let original = RespValue::command(["SET", "key", "va\r\nl"]);
        let bytes: &'static [u8] = Box::leak(original.serialize().into_boxed_slice());
        assert_eq!(decode_all(bytes).await.unwrap(), vec![original]);
    }
}
