//! Spreadsheet reader backed by `calamine`.
//!
//! One worksheet range is loaded per call and then handed out row by row.
//! Rows and columns before the used range are padded with blank cells so row
//! numbers and column letters match what a spreadsheet viewer shows.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, TableIoError};
use crate::reader::{RawRowStream, TableReader};
use crate::spec::{EnumTableFormat, SpecReadOptions};

/// Spreadsheet reader; unavailable when the `xlsx` feature is off.
#[derive(Debug, Clone, Copy)]
pub struct XlsxReader {
    _private: (),
}

impl XlsxReader {
    /// Create the reader; fails when spreadsheet support is compiled out.
    pub fn try_new() -> Result<Self> {
        if !cfg!(feature = "xlsx") {
            return Err(TableIoError::OptionalCodecMissing {
                codec: "spreadsheet",
                feature: "xlsx",
            });
        }
        Ok(Self { _private: () })
    }
}

impl TableReader for XlsxReader {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Xlsx
    }

    fn read_raw(&self, path: &Path, options: &SpecReadOptions) -> Result<RawRowStream<'static>> {
        kernel::read_sheet_rows(path, &options.sheet)
    }

    fn row_count(&self, path: &Path, options: &SpecReadOptions) -> Result<Option<usize>> {
        kernel::count_sheet_rows(path, &options.sheet).map(Some)
    }

    fn sheets(&self, path: &Path) -> Result<BTreeMap<usize, String>> {
        kernel::list_sheets(path)
    }
}

#[cfg(feature = "xlsx")]
mod kernel {
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::io::BufReader;
    use std::path::Path;

    use calamine::{Data, Range, Reader, Sheets, open_workbook_auto};

    use crate::error::{Result, TableIoError};
    use crate::reader::RawRowStream;
    use crate::row::Row;
    use crate::spec::{EnumCellValue, EnumSheetSelector};
    use crate::util::{convert_excel_serial_to_datetime, parse_date_text};

    fn open_workbook(path: &Path) -> Result<Sheets<BufReader<File>>> {
        open_workbook_auto(path).map_err(|err| TableIoError::malformed(path, err))
    }

    fn derive_sheet_name(
        workbook: &Sheets<BufReader<File>>,
        path: &Path,
        selector: &EnumSheetSelector,
    ) -> Result<String> {
        let l_names = workbook.sheet_names();
        match selector {
            EnumSheetSelector::Index(n_idx) => l_names.get(*n_idx).cloned().ok_or_else(|| {
                TableIoError::InvalidOption(format!(
                    "Sheet index {n_idx} out of range for {} ({} sheet(s)).",
                    path.display(),
                    l_names.len()
                ))
            }),
            EnumSheetSelector::Name(c_name) => l_names
                .iter()
                .find(|name| *name == c_name)
                .cloned()
                .ok_or_else(|| {
                    TableIoError::InvalidOption(format!(
                        "Sheet {c_name:?} not found in {}.",
                        path.display()
                    ))
                }),
        }
    }

    fn load_range(path: &Path, selector: &EnumSheetSelector) -> Result<Range<Data>> {
        let mut workbook = open_workbook(path)?;
        let c_sheet = derive_sheet_name(&workbook, path, selector)?;
        workbook
            .worksheet_range(&c_sheet)
            .map_err(|err| TableIoError::malformed(path, err))
    }

    pub(super) fn read_sheet_rows(
        path: &Path,
        selector: &EnumSheetSelector,
    ) -> Result<RawRowStream<'static>> {
        let range = load_range(path, selector)?;
        let (n_row_offset, n_col_offset) = range
            .start()
            .map_or((0, 0), |(r, c)| (r as usize, c as usize));
        let (n_height, n_width) = range.get_size();

        let it_padding = (0..n_row_offset).map(|_| Ok::<_, TableIoError>(Row::default()));
        let it_body = (0..n_height).map(move |n_r| {
            let mut l_values = vec![EnumCellValue::None; n_col_offset];
            l_values.extend((0..n_width).map(|n_c| {
                range
                    .get((n_r, n_c))
                    .map_or(EnumCellValue::None, convert_data_to_cell)
            }));
            while l_values.last().is_some_and(|v| *v == EnumCellValue::None) {
                l_values.pop();
            }
            Ok::<_, TableIoError>(Row::new(l_values))
        });
        Ok(Box::new(it_padding.chain(it_body)))
    }

    pub(super) fn count_sheet_rows(path: &Path, selector: &EnumSheetSelector) -> Result<usize> {
        let range = load_range(path, selector)?;
        Ok(range.end().map_or(0, |(r, _)| r as usize + 1))
    }

    pub(super) fn list_sheets(path: &Path) -> Result<BTreeMap<usize, String>> {
        let workbook = open_workbook(path)?;
        Ok(workbook.sheet_names().into_iter().enumerate().collect())
    }

    /// Map one spreadsheet cell to a pipeline cell.
    pub(super) fn convert_data_to_cell(data: &Data) -> EnumCellValue {
        match data {
            Data::Empty => EnumCellValue::None,
            Data::Int(v) => EnumCellValue::Int(*v),
            Data::Float(v) => EnumCellValue::Number(*v),
            Data::Bool(v) => EnumCellValue::Bool(*v),
            Data::String(s) => EnumCellValue::String(s.clone()),
            Data::DateTime(dt) => convert_excel_serial_to_datetime(dt.as_f64())
                .unwrap_or(EnumCellValue::Number(dt.as_f64())),
            Data::DateTimeIso(s) => {
                parse_date_text(s).unwrap_or_else(|| EnumCellValue::String(s.clone()))
            }
            Data::DurationIso(s) => EnumCellValue::String(s.clone()),
            Data::Error(err) => EnumCellValue::String(err.to_string()),
        }
    }
}

#[cfg(not(feature = "xlsx"))]
mod kernel {
    use std::collections::BTreeMap;
    use std::path::Path;

    use crate::error::{Result, TableIoError};
    use crate::reader::RawRowStream;
    use crate::spec::EnumSheetSelector;

    fn derive_codec_missing() -> TableIoError {
        TableIoError::OptionalCodecMissing {
            codec: "spreadsheet",
            feature: "xlsx",
        }
    }

    pub(super) fn read_sheet_rows(
        _path: &Path,
        _selector: &EnumSheetSelector,
    ) -> Result<RawRowStream<'static>> {
        Err(derive_codec_missing())
    }

    pub(super) fn count_sheet_rows(_path: &Path, _selector: &EnumSheetSelector) -> Result<usize> {
        Err(derive_codec_missing())
    }

    pub(super) fn list_sheets(_path: &Path) -> Result<BTreeMap<usize, String>> {
        Err(derive_codec_missing())
    }
}
