use crate::error::{KvError, KvResult};
use crate::store::entry::now_millis;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// A stream entry ID: milliseconds-sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct StreamEntryId {
    pub ms: u64,
    pub seq: u64,
}

impl StreamEntryId {
    pub const MIN: StreamEntryId = StreamEntryId { ms: 0, seq: 0 };
    pub const MAX: StreamEntryId = StreamEntryId {
        ms: u64::MAX,
        seq: u64::MAX,
    };

    pub fn new(ms: u64, seq: u64) -> Self {
        StreamEntryId { ms, seq }
    }

    /// Parse a fully explicit "1234-5".
    pub fn parse(s: &str) -> Option<Self> {
        let (ms, seq) = s.split_once('-')?;
        Some(StreamEntryId {
            ms: ms.parse().ok()?,
            seq: seq.parse().ok()?,
        })
    }
}

impl fmt::Display for StreamEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// How the caller of XADD asked for the new entry's ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSpec {
    /// "1234-5"
    Explicit(StreamEntryId),
    /// "1234-*": fixed milliseconds, generated sequence.
    AutoSeq(u64),
    /// "*": both parts generated.
    Auto,
}

impl IdSpec {
    pub fn parse(s: &str) -> KvResult<Self> {
        if s == "*" {
            return Ok(IdSpec::Auto);
        }
        if let Some(ms) = s.strip_suffix("-*") {
            let ms = ms.parse().map_err(|_| KvError::InvalidStreamId)?;
            return Ok(IdSpec::AutoSeq(ms));
        }
        StreamEntryId::parse(s)
            .map(IdSpec::Explicit)
            .ok_or(KvError::InvalidStreamId)
    }
}

/// A stream entry: fields and values
pub type StreamEntry = Vec<(Vec<u8>, Vec<u8>)>;

/// Append-only log of entries ordered by ID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stream {
    entries: BTreeMap<StreamEntryId, StreamEntry>,
    last_id: StreamEntryId,
}

impl Stream {
    pub fn new() -> Self {
        Stream {
            entries: BTreeMap::new(),
            last_id: StreamEntryId::MIN,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// ID of the newest entry, or 0-0 for an empty stream.
    pub fn last_id(&self) -> StreamEntryId {
        self.last_id
    }

    /// Append an entry. The resolved ID must be strictly greater than the
    /// current last ID; a literal 0-0 is rejected before anything else.
    pub fn add(&mut self, spec: IdSpec, fields: StreamEntry) -> KvResult<StreamEntryId> {
        self.add_at(spec, fields, now_millis())
    }

    pub fn add_at(&mut self, spec: IdSpec, fields: StreamEntry, now: u64) -> KvResult<StreamEntryId> {
        let id = self.resolve(spec, now)?;
        self.entries.insert(id, fields);
        self.last_id = id;
        Ok(id)
    }

    fn resolve(&self, spec: IdSpec, now: u64) -> KvResult<StreamEntryId> {
        let id = match spec {
            IdSpec::Explicit(id) if id == StreamEntryId::MIN => return Err(KvError::StreamIdZero),
            IdSpec::Explicit(id) => id,
            IdSpec::AutoSeq(ms) => self.next_in(ms)?,
            // A clock behind the last entry keeps generating in the last millisecond.
            IdSpec::Auto => self.next_in(now.max(self.last_id.ms))?,
        };
        if id <= self.last_id {
            return Err(KvError::StreamIdTooSmall);
        }
        Ok(id)
    }

    fn next_in(&self, ms: u64) -> KvResult<StreamEntryId> {
        if ms == self.last_id.ms {
            let seq = self
                .last_id
                .seq
                .checked_add(1)
                .ok_or(KvError::StreamIdTooSmall)?;
            Ok(StreamEntryId::new(ms, seq))
        } else {
            Ok(StreamEntryId::new(ms, 0))
        }
    }

    /// Return entries in the range [start, end] inclusive, ordered by ID.
    pub fn range(
        &self,
        start: StreamEntryId,
        end: StreamEntryId,
    ) -> Vec<(&StreamEntryId, &StreamEntry)> {
        if start > end {
            return Vec::new();
        }
        self.entries.range(start..=end).collect()
    }

    /// Entries with an ID strictly greater than `start`, ordered by ID.
    pub fn after(&self, start: StreamEntryId) -> Vec<(&StreamEntryId, &StreamEntry)> {
        self.entries
            .range((Bound::Excluded(start), Bound::Unbounded))
            .collect()
    }

    /// Range query over explicit "T-S" bounds, with each entry flattened to
    /// its ID string and a field/value list.
    pub fn search(&self, start: &str, stop: &str) -> KvResult<Vec<(String, Vec<Vec<u8>>)>> {
        let start = StreamEntryId::parse(start).ok_or(KvError::InvalidStreamId)?;
        let stop = StreamEntryId::parse(stop).ok_or(KvError::InvalidStreamId)?;
        Ok(self
            .range(start, stop)
            .into_iter()
            .map(|(id, fields)| (id.to_string(), flatten(fields)))
            .collect())
    }
}

/// [f1, v1, f2, v2, ...]
pub fn flatten(fields: &StreamEntry) -> Vec<Vec<u8>> {
    fields
        .iter()
        .flat_map(|(f, v)| [f.clone(), v.clone()])
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(f: &str, v: &str) -> StreamEntry {
        vec![(f.as_bytes().to_vec(), v.as_bytes().to_vec())]
    }

    fn explicit(s: &str) -> IdSpec {
        IdSpec::parse(s).unwrap()
    }

    #[test]
    fn test_parse_id_spec() {
        assert_eq!(IdSpec::parse("*").unwrap(), IdSpec::Auto);
        assert_eq!(IdSpec::parse("5-*").unwrap(), IdSpec::AutoSeq(5));
        assert_eq!(
            IdSpec::parse("5-3").unwrap(),
            IdSpec::Explicit(StreamEntryId::new(5, 3))
        );
        assert!(matches!(IdSpec::parse("abc"), Err(KvError::InvalidStreamId)));
        assert!(matches!(IdSpec::parse("x-*"), Err(KvError::InvalidStreamId)));
    }

    #[test]
    fn test_reject_zero_id() {
        let mut s = Stream::new();
        let err = s.add(explicit("0-0"), fields("a", "1")).unwrap_err();
        assert!(err.to_string().contains("ID specified in XADD must be greater than 0-0"));
        assert!(s.is_empty());
    }

    #[test]
    fn test_reject_id_not_greater_than_top() {
        let mut s = Stream::new();
        s.add(explicit("1-1"), fields("a", "1")).unwrap();
        for id in ["1-1", "1-0", "0-5"] {
            let err = s.add(explicit(id), fields("a", "1")).unwrap_err();
            assert!(
                err.to_string()
                    .contains("ID specified in XADD is equal or smaller than the target stream top item")
            );
        }
        assert_eq!(s.last_id(), StreamEntryId::new(1, 1));
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_auto_sequence() {
        let mut s = Stream::new();
        assert_eq!(s.add(IdSpec::AutoSeq(0), fields("a", "1")).unwrap(), StreamEntryId::new(0, 1));
        assert_eq!(s.add(IdSpec::AutoSeq(0), fields("a", "1")).unwrap(), StreamEntryId::new(0, 2));
        assert_eq!(s.add(IdSpec::AutoSeq(5), fields("a", "1")).unwrap(), StreamEntryId::new(5, 0));
        assert_eq!(s.add(IdSpec::AutoSeq(5), fields("a", "1")).unwrap(), StreamEntryId::new(5, 1));
    }

    #[test]
    fn test_fully_automatic_ids() {
        let mut s = Stream::new();
        assert_eq!(s.add_at(IdSpec::Auto, fields("a", "1"), 100).unwrap(), StreamEntryId::new(100, 0));
        assert_eq!(s.add_at(IdSpec::Auto, fields("a", "1"), 100).unwrap(), StreamEntryId::new(100, 1));
        assert_eq!(s.add_at(IdSpec::Auto, fields("a", "1"), 250).unwrap(), StreamEntryId::new(250, 0));
        // clock went backwards
        assert_eq!(s.add_at(IdSpec::Auto, fields("a", "1"), 90).unwrap(), StreamEntryId::new(250, 1));
    }

    #[test]
    fn test_range_is_inclusive_and_ordered() {
        let mut s = Stream::new();
        for ms in 0..3 {
            for seq in 0..3 {
                if ms == 0 && seq == 0 {
                    continue;
                }
                s.add(IdSpec::Explicit(StreamEntryId::new(ms, seq)), fields("n", "v")).unwrap();
            }
        }
        let ids: Vec<String> = s
            .search("0-2", "2-0")
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["0-2", "1-0", "1-1", "1-2", "2-0"]);
    }

    #[test]
    fn test_search_flattens_fields() {
        let mut s = Stream::new();
        for id in ["1-1", "1-2", "1-3", "2-1", "2-2", "2-3"] {
            s.add(explicit(id), vec![
                (b"temp".to_vec(), id.as_bytes().to_vec()),
                (b"hum".to_vec(), b"40".to_vec()),
            ])
            .unwrap();
        }
        let found = s.search("0-2", "2-2").unwrap();
        let ids: Vec<&str> = found.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["1-1", "1-2", "1-3", "2-1", "2-2"]);
        assert_eq!(
            found[0].1,
            vec![b"temp".to_vec(), b"1-1".to_vec(), b"hum".to_vec(), b"40".to_vec()]
        );
        assert!(s.search("3-0", "1-0").unwrap().is_empty());
        assert!(matches!(s.search("bogus", "1-0"), Err(KvError::InvalidStreamId)));
    }

    #[test]
    fn test_after_is_exclusive() {
        let mut s = Stream::new();
        for id in ["1-1", "1-2", "2-0"] {
            s.add(explicit(id), fields("a", "1")).unwrap();
        }
        let ids: Vec<StreamEntryId> = s
            .after(StreamEntryId::new(1, 1))
            .into_iter()
            .map(|(id, _)| *id)
            .collect();
        assert_eq!(ids, vec![StreamEntryId::new(1, 2), StreamEntryId::new(2, 0)]);
        assert!(s.after(s.last_id()).is_empty());
    }
}
