use bytes::{Buf, Bytes, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 64 * 1024;

/// Pull-based byte reader with one byte of lookahead.
///
/// Bytes are read from the underlying source in chunks and handed out one at a
/// time. `peek()` fills the buffer without consuming, so the following `next()`
/// returns the same byte instead of reading again. The cursor also counts every
/// byte it has handed out, which is how replicas measure their offset.
pub struct ByteCursor<R> {
    reader: R,
    buf: BytesMut,
    consumed: u64,
}

impl<R: AsyncRead + Unpin> ByteCursor<R> {
    pub fn new(reader: R) -> Self {
        ByteCursor {
            reader,
            buf: BytesMut::with_capacity(4096),
            consumed: 0,
        }
    }

    /// Consume and return the next byte, or `None` at end of stream.
    pub async fn next(&mut self) -> io::Result<Option<u8>> {
        if !self.fill(1).await? {
            return Ok(None);
        }
        self.consumed += 1;
        Ok(Some(self.buf.get_u8()))
    }

    /// Return the next byte without consuming it.
    pub async fn peek(&mut self) -> io::Result<Option<u8>> {
        if !self.fill(1).await? {
            return Ok(None);
        }
        Ok(Some(self.buf[0]))
    }

    /// Consume exactly `n` bytes. Running out of input first is an error.
    pub async fn take(&mut self, n: usize) -> io::Result<Bytes> {
        if !self.fill(n).await? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("stream ended before {n} bytes could be read"),
            ));
        }
        self.consumed += n as u64;
        Ok(self.buf.split_to(n).freeze())
    }

    /// Total number of bytes consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Read until at least `n` bytes are buffered. Returns false on EOF.
    /// The buffer grows with the data that actually arrives, not with `n`.
    async fn fill(&mut self, n: usize) -> io::Result<bool> {
        while self.buf.len() < n {
            self.buf.reserve((n - self.buf.len()).min(READ_CHUNK));
            if self.reader.read_buf(&mut self.buf).await? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_peek_does_not_consume() {
        let mut cursor = ByteCursor::new(&b"ab"[..]);
        assert_eq!(cursor.peek().await.unwrap(), Some(b'a'));
        assert_eq!(cursor.peek().await.unwrap(), Some(b'a'));
        assert_eq!(cursor.consumed(), 0);
        assert_eq!(cursor.next().await.unwrap(), Some(b'a'));
        assert_eq!(cursor.next().await.unwrap(), Some(b'b'));
        assert_eq!(cursor.consumed(), 2);
    }

    #[tokio::test]
    async fn test_end_of_stream() {
        let mut cursor = ByteCursor::new(&b"x"[..]);
        assert_eq!(cursor.next().await.unwrap(), Some(b'x'));
        assert_eq!(cursor.peek().await.unwrap(), None);
        assert_eq!(cursor.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_beyond_input_fails_without_preallocating() {
        let mut cursor = ByteCursor::new(&b"short"[..]);
        let err = cursor.take(usize::MAX / 2).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_take_exact() {
        let mut cursor = ByteCursor::new(&b"hello world"[..]);
        assert_eq!(&cursor.take(5).await.unwrap()[..], b"hello");
        assert_eq!(cursor.next().await.unwrap(), Some(b' '));
        assert_eq!(cursor.consumed(), 6);
        let err = cursor.take(10).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
