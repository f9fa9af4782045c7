//! Delimited-text reader. Records are streamed; nothing is buffered past one record.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::conf::SpecCsvConfig;
use crate::error::{Result, TableIoError};
use crate::reader::{RawRowStream, TableReader};
use crate::row::Row;
use crate::spec::{EnumCellValue, EnumTableFormat, SpecReadOptions};

const BOM_UTF8: &[u8] = b"\xEF\xBB\xBF";

/// Streaming delimited-text reader. Every field is read as text; empty
/// fields become blank cells.
#[derive(Debug, Clone, Copy, Default)]
pub struct CsvReader;

impl TableReader for CsvReader {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Csv
    }

    fn read_raw(&self, path: &Path, options: &SpecReadOptions) -> Result<RawRowStream<'static>> {
        let reader = create_csv_reader(path, &options.csv)?;
        let path_owned: PathBuf = path.to_path_buf();
        Ok(Box::new(reader.into_records().map(move |record| {
            let record = record.map_err(|err| TableIoError::malformed(&path_owned, err))?;
            Ok::<_, TableIoError>(
                record
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            EnumCellValue::None
                        } else {
                            EnumCellValue::String(field.to_string())
                        }
                    })
                    .collect::<Row>(),
            )
        })))
    }

    fn row_count(&self, path: &Path, options: &SpecReadOptions) -> Result<Option<usize>> {
        let mut reader = create_csv_reader(path, &options.csv)?;
        let mut record = ::csv::ByteRecord::new();
        let mut n_rows = 0usize;
        while reader
            .read_byte_record(&mut record)
            .map_err(|err| TableIoError::malformed(path, err))?
        {
            n_rows += 1;
        }
        Ok(Some(n_rows))
    }

    fn sheets(&self, path: &Path) -> Result<BTreeMap<usize, String>> {
        let c_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(BTreeMap::from([(0, c_name)]))
    }
}

fn create_csv_reader(path: &Path, dialect: &SpecCsvConfig) -> Result<::csv::Reader<BufReader<File>>> {
    let (n_delimiter, n_quote, n_escape) = dialect.derive_dialect_bytes()?;
    let file = File::open(path).map_err(|err| TableIoError::io("open_csv", err))?;
    let mut source = BufReader::new(file);
    let if_bom = source
        .fill_buf()
        .map_err(|err| TableIoError::io("read_csv", err))?
        .starts_with(BOM_UTF8);
    if if_bom {
        source.consume(BOM_UTF8.len());
    }

    let mut builder = ::csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(n_delimiter)
        .quote(n_quote);
    if n_escape.is_some() {
        builder.double_quote(false).escape(n_escape);
    }
    Ok(builder.from_reader(source))
}
