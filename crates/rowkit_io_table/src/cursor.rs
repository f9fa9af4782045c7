//! Keyset-paginated chunk iteration over ordered query sources.
//!
//! Every batch asks the source for records whose key is strictly greater than
//! the last key of the previous batch. No numeric offset is ever used.

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::error::{Result, TableIoError};
use crate::source::EnumRawRecord;

/// Unique orderable key of a query record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EnumKeyValue {
    /// Integer key (row id, serial).
    Int(i64),
    /// Text key (uuid, code).
    Text(String),
}

impl fmt::Display for EnumKeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

/// Record paired with its ordering key.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecKeyedRecord {
    /// Ordering key.
    pub key: EnumKeyValue,
    /// Record payload.
    pub record: EnumRawRecord,
}

/// Ordered, key-addressable data source.
pub trait QuerySource {
    /// Name of the unique ordering key; `None` when no usable key exists.
    fn key_column(&self) -> Option<String>;

    /// Fetch at most `limit` records with key strictly greater than `after`,
    /// ordered ascending by key. Any caller ordering or limit is ignored.
    fn fetch_after(
        &mut self,
        after: Option<&EnumKeyValue>,
        limit: usize,
    ) -> Result<Vec<SpecKeyedRecord>>;

    /// Next record of a single forward-only pull in the source's own order.
    fn pull(&mut self) -> Option<Result<EnumRawRecord>>;

    /// Caller-declared record limit; `None` means unlimited.
    fn limit(&self) -> Option<usize> {
        None
    }
}

/// Mutable cursor state of one chunked iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecChunkCursor {
    /// Key of the last record of the previous batch.
    pub last_seen_key: Option<EnumKeyValue>,
    /// Batch size.
    pub chunk_size: usize,
    /// Records yielded so far.
    pub rows_processed: usize,
    /// Total record limit.
    pub limit: Option<usize>,
}

impl SpecChunkCursor {
    /// Whether the limit has been satisfied.
    pub fn is_limit_reached(&self) -> bool {
        self.limit.is_some_and(|n| self.rows_processed >= n)
    }

    /// Size of the next request: chunk size clipped to the remaining limit.
    pub fn calculate_request_size(&self) -> usize {
        match self.limit {
            Some(n) => self.chunk_size.min(n.saturating_sub(self.rows_processed)),
            None => self.chunk_size,
        }
    }
}

/// Lazy record sequence backed by keyset-paginated fetches.
pub struct ChunkedCursorIter<'a> {
    source: Box<dyn QuerySource + 'a>,
    cursor: SpecChunkCursor,
    buffer: VecDeque<EnumRawRecord>,
    if_exhausted: bool,
    n_fetches: usize,
    l_batch_sizes: Vec<usize>,
}

impl<'a> ChunkedCursorIter<'a> {
    /// Start an iteration; `limit == Some(0)` is treated as unlimited.
    pub fn new(
        source: Box<dyn QuerySource + 'a>,
        chunk_size: usize,
        limit: Option<usize>,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(TableIoError::InvalidOption(
                "chunk_size must be > 0".to_string(),
            ));
        }
        let Some(c_key) = source.key_column() else {
            return Err(TableIoError::SourceUnavailable(
                "query source exposes no unique ordering key".to_string(),
            ));
        };
        debug!(key = %c_key, chunk_size, ?limit, "chunked cursor opened");
        Ok(Self {
            source,
            cursor: SpecChunkCursor {
                last_seen_key: None,
                chunk_size,
                rows_processed: 0,
                limit: limit.filter(|n| *n > 0),
            },
            buffer: VecDeque::with_capacity(chunk_size),
            if_exhausted: false,
            n_fetches: 0,
            l_batch_sizes: Vec::new(),
        })
    }

    /// Current cursor state.
    pub fn cursor(&self) -> &SpecChunkCursor {
        &self.cursor
    }

    /// Fetch calls issued, including a final empty one.
    pub fn n_fetches(&self) -> usize {
        self.n_fetches
    }

    /// Sizes of non-empty batches in fetch order.
    pub fn batch_sizes(&self) -> &[usize] {
        &self.l_batch_sizes
    }

    fn fetch_next_batch(&mut self) -> Result<()> {
        let n_request = self.cursor.calculate_request_size();
        let l_batch = self
            .source
            .fetch_after(self.cursor.last_seen_key.as_ref(), n_request)?;
        self.n_fetches += 1;

        if l_batch.len() > n_request {
            return Err(TableIoError::SourceUnavailable(format!(
                "source returned {} records for a batch of {n_request}",
                l_batch.len()
            )));
        }
        if l_batch.len() < n_request {
            self.if_exhausted = true;
        }

        let mut key_prev = self.cursor.last_seen_key.clone();
        for item in &l_batch {
            if key_prev.as_ref().is_some_and(|prev| item.key <= *prev) {
                return Err(TableIoError::SourceUnavailable(format!(
                    "ordering key is not strictly increasing at `{}`",
                    item.key
                )));
            }
            key_prev = Some(item.key.clone());
        }

        debug!(
            fetch = self.n_fetches,
            requested = n_request,
            received = l_batch.len(),
            after = ?self.cursor.last_seen_key,
            "chunk fetched"
        );
        if !l_batch.is_empty() {
            self.l_batch_sizes.push(l_batch.len());
        }
        self.cursor.last_seen_key = key_prev;
        self.buffer.extend(l_batch.into_iter().map(|item| item.record));
        Ok(())
    }
}

impl Iterator for ChunkedCursorIter<'_> {
    type Item = Result<EnumRawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor.is_limit_reached() {
            return None;
        }
        if self.buffer.is_empty() {
            if self.if_exhausted {
                return None;
            }
            if let Err(err) = self.fetch_next_batch() {
                self.if_exhausted = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }
        let record = self.buffer.pop_front()?;
        self.cursor.rows_processed += 1;
        Some(Ok(record))
    }
}

/// Forward-only pull over a query source, honoring its declared limit.
pub struct QueryPullIter<'a> {
    source: Box<dyn QuerySource + 'a>,
    limit: Option<usize>,
    n_yielded: usize,
}

impl<'a> QueryPullIter<'a> {
    /// Wrap `source` for a single pass.
    pub fn new(source: Box<dyn QuerySource + 'a>) -> Self {
        let limit = source.limit().filter(|n| *n > 0);
        Self {
            source,
            limit,
            n_yielded: 0,
        }
    }
}

impl Iterator for QueryPullIter<'_> {
    type Item = Result<EnumRawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.limit.is_some_and(|n| self.n_yielded >= n) {
            return None;
        }
        let item = self.source.pull()?;
        self.n_yielded += 1;
        Some(item)
    }
}

////////////////////////////////////////////////////////////////////////////////
// #region MemoryKeysetSource

/// In-memory keyed records exposed as a [`QuerySource`].
#[derive(Debug, Clone, Default)]
pub struct MemoryKeysetSource {
    c_key_column: Option<String>,
    l_records: Vec<SpecKeyedRecord>,
    limit: Option<usize>,
    n_pos: usize,
}

impl MemoryKeysetSource {
    /// Build from records in any order; keys are sorted ascending.
    pub fn new(key_column: impl Into<String>, mut records: Vec<SpecKeyedRecord>) -> Self {
        records.sort_by(|a, b| a.key.cmp(&b.key));
        Self {
            c_key_column: Some(key_column.into()),
            l_records: records,
            limit: None,
            n_pos: 0,
        }
    }

    /// Records without any usable ordering key.
    pub fn without_key(records: Vec<SpecKeyedRecord>) -> Self {
        Self {
            c_key_column: None,
            l_records: records,
            limit: None,
            n_pos: 0,
        }
    }

    /// Set caller limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl QuerySource for MemoryKeysetSource {
    fn key_column(&self) -> Option<String> {
        self.c_key_column.clone()
    }

    fn fetch_after(
        &mut self,
        after: Option<&EnumKeyValue>,
        limit: usize,
    ) -> Result<Vec<SpecKeyedRecord>> {
        let n_start = match after {
            Some(key) => self.l_records.partition_point(|item| item.key <= *key),
            None => 0,
        };
        Ok(self.l_records[n_start..]
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    fn pull(&mut self) -> Option<Result<EnumRawRecord>> {
        let item = self.l_records.get(self.n_pos)?;
        self.n_pos += 1;
        Some(Ok(item.record.clone()))
    }

    fn limit(&self) -> Option<usize> {
        self.limit
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::spec::EnumCellValue;

    fn make_records(n: usize) -> Vec<SpecKeyedRecord> {
        (1..=n as i64)
            .rev()
            .map(|id| SpecKeyedRecord {
                key: EnumKeyValue::Int(id),
                record: EnumRawRecord::Values(vec![EnumCellValue::Int(id)]),
            })
            .collect()
    }

    fn drain(iter: &mut ChunkedCursorIter<'_>) -> Vec<i64> {
        iter.by_ref()
            .map(|item| match item.expect("fetch should succeed") {
                EnumRawRecord::Values(v) => match v[0] {
                    EnumCellValue::Int(id) => id,
                    _ => panic!("unexpected cell"),
                },
                _ => panic!("unexpected record"),
            })
            .collect()
    }

    #[test]
    fn test_2500_records_in_chunks_of_1000() {
        let source = MemoryKeysetSource::new("id", make_records(2500));
        let mut iter = ChunkedCursorIter::new(Box::new(source), 1000, None).expect("cursor");
        let l_ids = drain(&mut iter);
        assert_eq!(l_ids.len(), 2500);
        assert_eq!(iter.n_fetches(), 3);
        assert_eq!(iter.batch_sizes(), &[1000, 1000, 500]);
        assert!(l_ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_limit_stops_without_extra_fetch() {
        let source = MemoryKeysetSource::new("id", make_records(2500));
        let mut iter = ChunkedCursorIter::new(Box::new(source), 1000, Some(1200)).expect("cursor");
        let l_ids = drain(&mut iter);
        assert_eq!(l_ids.len(), 1200);
        assert_eq!(iter.n_fetches(), 2);
        assert_eq!(iter.batch_sizes(), &[1000, 200]);
    }

    #[test]
    fn test_zero_limit_means_unlimited() {
        let source = MemoryKeysetSource::new("id", make_records(7));
        let mut iter = ChunkedCursorIter::new(Box::new(source), 3, Some(0)).expect("cursor");
        assert_eq!(drain(&mut iter).len(), 7);
    }

    #[test]
    fn test_forward_pull_honors_source_limit() {
        let source = MemoryKeysetSource::new("id", make_records(10)).with_limit(4);
        let n = QueryPullIter::new(Box::new(source)).count();
        assert_eq!(n, 4);
    }

    #[test]
    fn test_missing_key_is_source_unavailable() {
        let source = MemoryKeysetSource::without_key(make_records(3));
        let err = ChunkedCursorIter::new(Box::new(source), 10, None)
            .err()
            .expect("missing key must fail");
        assert!(matches!(err, TableIoError::SourceUnavailable(_)));
    }

    struct DuplicateKeySource;

    impl QuerySource for DuplicateKeySource {
        fn key_column(&self) -> Option<String> {
            Some("id".to_string())
        }

        fn fetch_after(
            &mut self,
            _after: Option<&EnumKeyValue>,
            _limit: usize,
        ) -> Result<Vec<SpecKeyedRecord>> {
            let rec = SpecKeyedRecord {
                key: EnumKeyValue::Int(1),
                record: EnumRawRecord::Values(Vec::new()),
            };
            Ok(vec![rec.clone(), rec])
        }

        fn pull(&mut self) -> Option<Result<EnumRawRecord>> {
            None
        }
    }

    #[test]
    fn test_non_increasing_key_fails_once() {
        let mut iter = ChunkedCursorIter::new(Box::new(DuplicateKeySource), 2, None).expect("cursor");
        assert!(matches!(
            iter.next(),
            Some(Err(TableIoError::SourceUnavailable(_)))
        ));
        assert!(iter.next().is_none());
    }

    proptest! {
        #[test]
        fn prop_batches_cover_all_records(n in 0usize..400, c in 1usize..64) {
            let source = MemoryKeysetSource::new("id", make_records(n));
            let mut iter = ChunkedCursorIter::new(Box::new(source), c, None).expect("cursor");
            let l_ids = drain(&mut iter);
            prop_assert_eq!(l_ids.len(), n);
            prop_assert_eq!(iter.batch_sizes().len(), n.div_ceil(c));
            if n > 0 {
                let n_last = if n % c == 0 { c } else { n % c };
                prop_assert_eq!(iter.batch_sizes().last().copied(), Some(n_last));
            }
        }

        #[test]
        fn prop_limit_is_exact(n in 1usize..400, c in 1usize..64, l in 1usize..400) {
            let source = MemoryKeysetSource::new("id", make_records(n));
            let mut iter = ChunkedCursorIter::new(Box::new(source), c, Some(l)).expect("cursor");
            let l_ids = drain(&mut iter);
            prop_assert_eq!(l_ids.len(), l.min(n));
            prop_assert!(iter.n_fetches() <= l.div_ceil(c).max(1) + usize::from(n <= l));
        }
    }
}
