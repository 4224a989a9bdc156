//! Snapshot (RDB) support.
//!
//! Decoding follows the fixed section order of a snapshot: header, metadata
//! subsections, at most one database section, then the EOF marker and checksum.
//! Only string values are understood. Encoding produces the same layout and is
//! used for the payload a master sends with FULLRESYNC.

use crate::error::{KvError, KvResult};
use crate::store::Keyspace;
use crate::store::entry::{Entry, now_millis};
use crate::types::Value;
use std::io::{self, BufReader, Read};
use std::path::Path;

// RDB opcodes
const RDB_OPCODE_AUX: u8 = 0xFA;
const RDB_OPCODE_RESIZEDB: u8 = 0xFB;
const RDB_OPCODE_EXPIRETIME_MS: u8 = 0xFC;
const RDB_OPCODE_EXPIRETIME: u8 = 0xFD;
const RDB_OPCODE_SELECTDB: u8 = 0xFE;
const RDB_OPCODE_EOF: u8 = 0xFF;

// RDB type bytes
const RDB_TYPE_STRING: u8 = 0;

// Special string encodings (top two bits set)
const RDB_ENC_INT8: u8 = 0xC0;
const RDB_ENC_INT16: u8 = 0xC1;
const RDB_ENC_INT32: u8 = 0xC2;
const RDB_ENC_LZF: u8 = 0xC3;

const RDB_MAGIC: &[u8] = b"REDIS";
const RDB_VERSION: &[u8] = b"0011";

/// Load a snapshot file.
pub fn load(path: impl AsRef<Path>) -> KvResult<Keyspace> {
    let file = std::fs::File::open(path)?;
    load_from_reader(BufReader::new(file))
}

/// Load a snapshot from any reader.
pub fn load_from_reader(r: impl Read) -> KvResult<Keyspace> {
    SnapshotReader::new(r).read_snapshot()
}

/// Serialize the visible string keys of a keyspace.
pub fn encode(keyspace: &Keyspace) -> Vec<u8> {
    let now = now_millis();
    let live: Vec<(&String, &Entry, &[u8])> = keyspace
        .iter()
        .filter(|(_, entry)| !entry.is_expired_at(now))
        .filter_map(|(key, entry)| entry.value.as_string().map(|s| (key, entry, s)))
        .collect();

    let mut out = Vec::with_capacity(128);
    out.extend_from_slice(RDB_MAGIC);
    out.extend_from_slice(RDB_VERSION);

    out.push(RDB_OPCODE_AUX);
    write_string(&mut out, b"redis-ver");
    write_string(&mut out, b"7.2.0");

    if !live.is_empty() {
        out.push(RDB_OPCODE_SELECTDB);
        write_length(&mut out, 0);

        let expires = live.iter().filter(|(_, e, _)| e.expires_at.is_some()).count();
        out.push(RDB_OPCODE_RESIZEDB);
        write_length(&mut out, live.len() as u64);
        write_length(&mut out, expires as u64);

        for (key, entry, value) in live {
            if let Some(exp) = entry.expires_at {
                out.push(RDB_OPCODE_EXPIRETIME_MS);
                out.extend_from_slice(&exp.to_le_bytes());
            }
            out.push(RDB_TYPE_STRING);
            write_string(&mut out, key.as_bytes());
            write_string(&mut out, value);
        }
    }

    // Checksum is not computed; readers skip it.
    out.push(RDB_OPCODE_EOF);
    out.extend_from_slice(&[0u8; 8]);
    out
}

/// Byte reader with a single byte of lookahead for tag dispatch.
struct SnapshotReader<R> {
    inner: R,
    peeked: Option<u8>,
}

/// A length prefix, or one of the special encodings.
enum Length {
    Plain(usize),
    Special(u8),
}

impl<R: Read> SnapshotReader<R> {
    fn new(inner: R) -> Self {
        SnapshotReader {
            inner,
            peeked: None,
        }
    }

    fn read_snapshot(&mut self) -> KvResult<Keyspace> {
        self.read_header()?;
        self.skip_metadata()?;

        let keyspace = if self.peek_byte()? == RDB_OPCODE_EOF {
            Keyspace::new()
        } else {
            self.read_database()?
        };

        self.expect(RDB_OPCODE_EOF)?;
        // 8-byte CRC64, not validated
        self.read_array::<8>()?;
        Ok(keyspace)
    }

    fn read_header(&mut self) -> KvResult<()> {
        let magic = self.read_array::<5>()?;
        if magic != RDB_MAGIC {
            return Err(KvError::Snapshot("invalid magic".into()));
        }
        self.read_array::<4>()?;
        Ok(())
    }

    fn skip_metadata(&mut self) -> KvResult<()> {
        while self.peek_byte()? == RDB_OPCODE_AUX {
            self.next_byte()?;
            self.read_string()?;
            self.read_string()?;
        }
        Ok(())
    }

    fn read_database(&mut self) -> KvResult<Keyspace> {
        self.expect(RDB_OPCODE_SELECTDB)?;
        let index = self.read_plain_length()?;
        if index != 0 {
            return Err(KvError::Snapshot(format!(
                "database index {index} is not supported"
            )));
        }

        self.expect(RDB_OPCODE_RESIZEDB)?;
        let without_expiry = self.read_plain_length()?;
        let with_expiry = self.read_plain_length()?;

        let mut keyspace = Keyspace::new();
        for _ in 0..without_expiry.max(with_expiry) {
            let (key, entry) = self.read_entry()?;
            keyspace.insert_entry(key, entry);
        }
        Ok(keyspace)
    }

    fn read_entry(&mut self) -> KvResult<(String, Entry)> {
        let expires_at = match self.next_byte()? {
            RDB_TYPE_STRING => None,
            RDB_OPCODE_EXPIRETIME_MS => {
                let ms = u64::from_le_bytes(self.read_array()?);
                self.expect_string_type()?;
                Some(ms)
            }
            RDB_OPCODE_EXPIRETIME => {
                let secs = u32::from_le_bytes(self.read_array()?);
                self.expect_string_type()?;
                Some(u64::from(secs) * 1000)
            }
            other => {
                return Err(KvError::Snapshot(format!(
                    "unsupported entry type {other:#04x}"
                )));
            }
        };

        let key = String::from_utf8(self.read_string()?)
            .map_err(|_| KvError::Snapshot("key is not valid UTF-8".into()))?;
        let value = Value::String(self.read_string()?);
        let entry = match expires_at {
            Some(exp) => Entry::with_expiry(value, exp),
            None => Entry::new(value),
        };
        Ok((key, entry))
    }

    fn expect_string_type(&mut self) -> KvResult<()> {
        match self.next_byte()? {
            RDB_TYPE_STRING => Ok(()),
            other => Err(KvError::Snapshot(format!(
                "value type {other:#04x} is not string"
            ))),
        }
    }

    fn read_string(&mut self) -> KvResult<Vec<u8>> {
        match self.read_length()? {
            Length::Plain(len) => self.read_bytes(len),
            Length::Special(RDB_ENC_INT8) => {
                Ok((self.next_byte()? as i8).to_string().into_bytes())
            }
            Length::Special(RDB_ENC_INT16) => {
                Ok(i16::from_le_bytes(self.read_array()?).to_string().into_bytes())
            }
            Length::Special(RDB_ENC_INT32) => {
                Ok(i32::from_le_bytes(self.read_array()?).to_string().into_bytes())
            }
            Length::Special(enc) => Err(KvError::UnsupportedEncoding(enc)),
        }
    }

    fn read_plain_length(&mut self) -> KvResult<usize> {
        match self.read_length()? {
            Length::Plain(len) => Ok(len),
            Length::Special(enc) => Err(KvError::Snapshot(format!(
                "expected a length, found encoding {enc:#04x}"
            ))),
        }
    }

    fn read_length(&mut self) -> KvResult<Length> {
        let first = self.next_byte()?;
        let len = match first >> 6 {
            0 => (first & 0x3F) as u64,
            1 => (((first & 0x3F) as u64) << 8) | self.next_byte()? as u64,
            2 if first == 0x80 => u32::from_be_bytes(self.read_array()?) as u64,
            2 if first == 0x81 => u64::from_be_bytes(self.read_array()?),
            3 => return Ok(Length::Special(first)),
            _ => {
                return Err(KvError::Snapshot(format!(
                    "invalid length prefix {first:#04x}"
                )));
            }
        };
        usize::try_from(len)
            .map(Length::Plain)
            .map_err(|_| KvError::Snapshot(format!("length {len} too large")))
    }

    fn expect(&mut self, expected: u8) -> KvResult<()> {
        let got = self.next_byte()?;
        if got != expected {
            return Err(KvError::Snapshot(format!(
                "expected {expected:#04x}, found {got:#04x}"
            )));
        }
        Ok(())
    }

    fn peek_byte(&mut self) -> KvResult<u8> {
        if let Some(b) = self.peeked {
            return Ok(b);
        }
        let b = self.next_byte()?;
        self.peeked = Some(b);
        Ok(b)
    }

    fn next_byte(&mut self) -> KvResult<u8> {
        if let Some(b) = self.peeked.take() {
            return Ok(b);
        }
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    fn read_array<const N: usize>(&mut self) -> KvResult<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read `len` bytes. The buffer grows with the input, so a bogus length in
    /// a corrupt snapshot fails at end of input instead of being allocated.
    fn read_bytes(&mut self, len: usize) -> KvResult<Vec<u8>> {
        let mut buf = Vec::new();
        let mut remaining = len as u64;
        if remaining > 0
            && let Some(b) = self.peeked.take()
        {
            buf.push(b);
            remaining -= 1;
        }
        (&mut self.inner).take(remaining).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(KvError::Snapshot("unexpected end of snapshot".into()));
        }
        Ok(buf)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> KvResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let start = match self.peeked.take() {
            Some(b) => {
                buf[0] = b;
                1
            }
            None => 0,
        };
        self.inner.read_exact(&mut buf[start..]).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                KvError::Snapshot("unexpected end of snapshot".into())
            } else {
                KvError::Io(e)
            }
        })
    }
}

// --- Encoding helpers ---

fn write_length(out: &mut Vec<u8>, len: u64) {
    if len < 64 {
        out.push(len as u8);
    } else if len < 16384 {
        out.extend_from_slice(&[0x40 | (len >> 8) as u8, len as u8]);
    } else if len < (1 << 32) {
        out.push(0x80);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    } else {
        out.push(0x81);
        out.extend_from_slice(&len.to_be_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, data: &[u8]) {
    write_length(out, data.len() as u64);
    out.extend_from_slice(data);
}
