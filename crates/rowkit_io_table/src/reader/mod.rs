//! Format readers and the shared slicing rules.
//!
//! - `csv`  : delimited text, streamed record by record
//! - `json` : structured-object text, parsed as one document
//! - `xlsx` : spreadsheets via `calamine`, one sheet range at a time

pub mod csv;
pub mod json;
pub mod xlsx;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, TableIoError};
use crate::heading::format_headings;
use crate::row::Row;
use crate::spec::{EnumHeadingFormat, EnumTableFormat, SpecReadOptions};
use crate::util::convert_column_letters_to_index;

pub use self::csv::CsvReader;
pub use self::json::JsonReader;
pub use self::xlsx::XlsxReader;

/// Raw rows of a document in source order, before slicing.
pub type RawRowStream<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// `(1-based row number, row)` pairs after slicing.
pub type NumberedRowStream<'a> = Box<dyn Iterator<Item = Result<(usize, Row)>> + 'a>;

/// Common reader contract.
pub trait TableReader {
    /// Input format.
    fn format(&self) -> EnumTableFormat;

    /// Raw rows of the selected sheet/document.
    fn read_raw(&self, path: &Path, options: &SpecReadOptions) -> Result<RawRowStream<'static>>;

    /// Rows after heading, start-row, end-column, limit and empty-row rules.
    fn read(&self, path: &Path, options: &SpecReadOptions) -> Result<NumberedRowStream<'static>> {
        let raw = self.read_raw(path, options)?;
        Ok(Box::new(SlicedRows::new(raw, options)?))
    }

    /// Raw row count of the selected sheet, when cheaply known.
    fn row_count(&self, path: &Path, options: &SpecReadOptions) -> Result<Option<usize>>;

    /// Sheet names by zero-based index.
    fn sheets(&self, path: &Path) -> Result<BTreeMap<usize, String>>;

    /// Whether the reader handles files with `extension`.
    fn supports(&self, extension: &str) -> bool {
        EnumTableFormat::from_extension(extension) == Some(self.format())
    }
}

/// Reader for `format`.
pub fn create_reader(format: EnumTableFormat) -> Result<Box<dyn TableReader>> {
    match format {
        EnumTableFormat::Csv => Ok(Box::new(CsvReader)),
        EnumTableFormat::Json => Ok(Box::new(JsonReader)),
        EnumTableFormat::Xlsx => Ok(Box::new(XlsxReader::try_new()?)),
    }
}

/// Reader chosen from the extension of `path`.
pub fn create_reader_for_path(path: &Path) -> Result<Box<dyn TableReader>> {
    let format = EnumTableFormat::from_path(path).ok_or_else(|| {
        TableIoError::UnsupportedFormat(
            path.extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default(),
        )
    })?;
    create_reader(format)
}

/// Applies [`SpecReadOptions`] slicing to a raw row stream.
///
/// Rows are numbered from 1. The heading row is consumed, never yielded.
/// Once `limit` rows are out, the inner stream is not polled again.
pub struct SlicedRows<'a> {
    inner: RawRowStream<'a>,
    n_row: usize,
    n_row_start: usize,
    n_cols_keep: Option<usize>,
    n_limit: usize,
    n_yielded: usize,
    heading_row: Option<usize>,
    heading_format: EnumHeadingFormat,
    headings: Option<Arc<[String]>>,
    if_skip_empty: bool,
}

impl<'a> SlicedRows<'a> {
    /// Wrap `inner` with the rules in `options`.
    pub fn new(inner: RawRowStream<'a>, options: &SpecReadOptions) -> Result<Self> {
        let n_cols_keep = match &options.end_column {
            Some(c_col) => Some(
                convert_column_letters_to_index(c_col)
                    .map(|n_idx| n_idx + 1)
                    .ok_or_else(|| {
                        TableIoError::InvalidOption(format!("Invalid end column: {c_col:?}"))
                    })?,
            ),
            None => None,
        };
        if options.heading_row == Some(0) || options.start_row == Some(0) {
            return Err(TableIoError::InvalidOption(
                "heading_row and start_row are 1-based.".to_string(),
            ));
        }
        Ok(Self {
            inner,
            n_row: 0,
            n_row_start: options
                .start_row
                .unwrap_or_else(|| options.heading_row.map_or(1, |n| n + 1)),
            n_cols_keep,
            n_limit: options.limit,
            n_yielded: 0,
            heading_row: options.heading_row,
            heading_format: options.heading_format,
            headings: None,
            if_skip_empty: options.skip_empty_rows,
        })
    }

    /// Formatted headings, once the heading row was read.
    pub fn headings(&self) -> Option<&[String]> {
        self.headings.as_deref()
    }
}

impl Iterator for SlicedRows<'_> {
    type Item = Result<(usize, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.n_limit > 0 && self.n_yielded >= self.n_limit {
                return None;
            }
            let mut row = match self.inner.next()? {
                Ok(row) => row,
                Err(err) => return Some(Err(err)),
            };
            self.n_row += 1;
            if let Some(n_cols) = self.n_cols_keep {
                row.truncate(n_cols);
            }

            if self.heading_row == Some(self.n_row) {
                let l_raw: Vec<String> = row.values().iter().map(|v| v.to_text()).collect();
                self.headings = Some(format_headings(&l_raw, self.heading_format).into());
                continue;
            }
            if self.n_row < self.n_row_start {
                continue;
            }
            if self.if_skip_empty && row.is_blank() {
                continue;
            }

            self.n_yielded += 1;
            let row = match &self.headings {
                Some(headings) => Row::new(row.into_values()).with_headings(headings.clone()),
                None => row,
            };
            return Some(Ok((self.n_row, row)));
        }
    }
}
