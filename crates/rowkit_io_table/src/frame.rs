//! Polars `DataFrame` as an export data source.

use std::io::Cursor;
use std::sync::Arc;

use polars::prelude::{AnyValue, DataFrame, IpcReader, SerReader};

use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::source::{EnumDataSource, EnumRawRecord};
use crate::spec::EnumCellValue;

/// Row-by-row view over a `DataFrame`. Column names become row headings.
pub struct FrameSource {
    df: DataFrame,
    headings: Arc<[String]>,
    n_row: usize,
}

impl FrameSource {
    /// Wrap `df`.
    pub fn new(df: DataFrame) -> Self {
        let headings: Arc<[String]> = df
            .get_column_names_str()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        Self {
            df,
            headings,
            n_row: 0,
        }
    }

    /// Decode Arrow IPC bytes.
    pub fn from_ipc_bytes(v_ipc_df: &[u8]) -> Result<Self> {
        derive_dataframe_from_ipc_bytes(v_ipc_df).map(Self::new)
    }

    /// Column names in order.
    pub fn headings(&self) -> &[String] {
        &self.headings
    }

    /// Number of rows still to be yielded.
    pub fn remaining(&self) -> usize {
        self.df.height().saturating_sub(self.n_row)
    }

    /// Lazy data source yielding one record per frame row.
    pub fn into_data_source(self) -> EnumDataSource<'static> {
        EnumDataSource::Generator(Box::new(self))
    }

    fn derive_row(&self, n_row: usize) -> Result<Row> {
        let l_values = self
            .df
            .get_columns()
            .iter()
            .map(|col| {
                col.get(n_row)
                    .map(derive_cell_value_from_any_value)
                    .map_err(|err| TableIoError::codec("frame_cell", err))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(l_values).with_headings(self.headings.clone()))
    }
}

impl Iterator for FrameSource {
    type Item = Result<EnumRawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.n_row >= self.df.height() {
            return None;
        }
        let item = self.derive_row(self.n_row).map(EnumRawRecord::Row);
        self.n_row += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining();
        (n, Some(n))
    }
}

fn derive_dataframe_from_ipc_bytes(v_ipc_df: &[u8]) -> Result<DataFrame> {
    IpcReader::new(Cursor::new(v_ipc_df))
        .finish()
        .map_err(|err| TableIoError::codec("read_ipc_dataframe", err))
}

fn derive_cell_value_from_any_value(value: AnyValue<'_>) -> EnumCellValue {
    match value {
        AnyValue::Null => EnumCellValue::None,
        AnyValue::String(val) => EnumCellValue::String(val.to_string()),
        AnyValue::StringOwned(val) => EnumCellValue::String(val.to_string()),
        AnyValue::Boolean(val) => EnumCellValue::Bool(val),
        AnyValue::UInt8(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::UInt16(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::UInt32(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::UInt64(val) => {
            i64::try_from(val).map_or(EnumCellValue::Number(val as f64), EnumCellValue::Int)
        }
        AnyValue::Int8(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::Int16(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::Int32(val) => EnumCellValue::Int(i64::from(val)),
        AnyValue::Int64(val) => EnumCellValue::Int(val),
        AnyValue::Int128(val) => {
            i64::try_from(val).map_or(EnumCellValue::Number(val as f64), EnumCellValue::Int)
        }
        AnyValue::Float32(val) => EnumCellValue::Number(f64::from(val)),
        AnyValue::Float64(val) => EnumCellValue::Number(val),
        _ => EnumCellValue::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use polars::prelude::{IpcWriter, SerWriter};

    use super::*;
    use crate::source::adapt_data_source;

    fn frame() -> DataFrame {
        polars::df!(
            "id" => [1i64, 2, 3],
            "price" => [Some(1.5f64), None, Some(-2.0)],
            "active" => [true, false, true],
            "name" => ["a", "b", "c"],
        )
        .expect("frame")
    }

    #[test]
    fn test_rows_carry_column_names_and_typed_cells() {
        let l_records: Vec<EnumRawRecord> = adapt_data_source(FrameSource::new(frame()).into_data_source(), None)
            .expect("adapt")
            .collect::<Result<_>>()
            .expect("records");
        assert_eq!(l_records.len(), 3);
        let EnumRawRecord::Row(row) = &l_records[1] else {
            panic!("expected row record");
        };
        assert_eq!(row.headings().expect("headings"), &["id", "price", "active", "name"]);
        assert_eq!(row.get_by_name("id"), Some(&EnumCellValue::Int(2)));
        assert_eq!(row.get_by_name("price"), Some(&EnumCellValue::None));
        assert_eq!(row.get_by_name("active"), Some(&EnumCellValue::Bool(false)));
        assert_eq!(row.get_by_name("name"), Some(&EnumCellValue::String("b".to_string())));
    }

    #[test]
    fn test_ipc_bytes_decode() {
        let mut df = frame();
        let mut v_buf: Vec<u8> = Vec::new();
        IpcWriter::new(&mut v_buf).finish(&mut df).expect("ipc write");

        let source = FrameSource::from_ipc_bytes(&v_buf).expect("ipc read");
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.headings().len(), 4);

        let err = FrameSource::from_ipc_bytes(b"not ipc").err().expect("garbage");
        assert!(matches!(err, TableIoError::Codec { .. }));
    }
}
