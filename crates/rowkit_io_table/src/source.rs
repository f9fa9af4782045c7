//! Data source adapter: any supported source into one lazy record stream.

use serde::Serialize;
use tracing::debug;

use crate::capability::ExportDeclaration;
use crate::cursor::{ChunkedCursorIter, QueryPullIter, QuerySource};
use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::spec::EnumCellValue;

/// Lazy pull-based sequence of raw records.
pub type RecordStream<'a> = Box<dyn Iterator<Item = Result<EnumRawRecord>> + 'a>;

/// Raw record as produced by a data source, before transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumRawRecord {
    /// Already an ordered row.
    Row(Row),
    /// Plain positional values.
    Values(Vec<EnumCellValue>),
    /// Ordered `(field, value)` mapping.
    Map(Vec<(String, EnumCellValue)>),
    /// Arbitrary serialized object; fields keep declaration order.
    Object(serde_json::Value),
}

impl EnumRawRecord {
    /// Capture any serializable value as an [`EnumRawRecord::Object`].
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Object)
            .map_err(|err| TableIoError::codec("serialize_record", err))
    }
}

impl From<Row> for EnumRawRecord {
    fn from(value: Row) -> Self {
        Self::Row(value)
    }
}

impl From<Vec<EnumCellValue>> for EnumRawRecord {
    fn from(value: Vec<EnumCellValue>) -> Self {
        Self::Values(value)
    }
}

/// One of the four data source capabilities.
pub enum EnumDataSource<'a> {
    /// Fixed, already materialized collection.
    Collection(Vec<EnumRawRecord>),
    /// Ordered, key-addressable query.
    Query(Box<dyn QuerySource + 'a>),
    /// Plain array of value rows.
    Array(Vec<Vec<EnumCellValue>>),
    /// Lazy generator.
    Generator(RecordStream<'a>),
}

impl EnumDataSource<'_> {
    /// Short name for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Collection(_) => "collection",
            Self::Query(_) => "query",
            Self::Array(_) => "array",
            Self::Generator(_) => "generator",
        }
    }
}

/// Resolve a declaration's data source into a lazy record stream.
pub fn adapt<'a, D>(declaration: &'a D) -> Result<RecordStream<'a>>
where
    D: ExportDeclaration + ?Sized,
{
    let source = declaration
        .data_source()
        .ok_or(TableIoError::NoDataSourceCapability)?;
    adapt_data_source(source, declaration.chunk_size())
}

/// Normalize `source`; a query combined with `chunk_size` uses keyset chunking.
pub fn adapt_data_source<'a>(
    source: EnumDataSource<'a>,
    chunk_size: Option<usize>,
) -> Result<RecordStream<'a>> {
    debug!(kind = source.kind(), ?chunk_size, "adapting data source");
    let stream: RecordStream<'a> = match source {
        EnumDataSource::Collection(l_records) => Box::new(l_records.into_iter().map(Ok::<_, TableIoError>)),
        EnumDataSource::Array(l_rows) => {
            Box::new(l_rows.into_iter().map(|v| Ok::<_, TableIoError>(EnumRawRecord::Values(v))))
        }
        EnumDataSource::Generator(stream) => stream,
        EnumDataSource::Query(query) => match chunk_size {
            Some(n_chunk) => {
                let limit = query.limit();
                Box::new(ChunkedCursorIter::new(query, n_chunk, limit)?)
            }
            None => Box::new(QueryPullIter::new(query)),
        },
    };
    Ok(stream)
}
