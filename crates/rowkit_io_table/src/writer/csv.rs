//! Delimited-text writer. Constant memory per row.

use std::fmt::Write as _;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;

use crate::conf::{SpecCsvConfig, SpecLocaleConfig};
use crate::error::{Result, TableIoError};
use crate::spec::{EnumCellValue, EnumTableFormat, SpecExportOptions, SpecExportReport};
use crate::transform::RowStream;
use crate::writer::{StagedDestination, TableWriter};

const BOM_UTF8: &[u8] = b"\xEF\xBB\xBF";

/// Streaming delimited-text writer.
#[derive(Debug, Clone)]
pub struct CsvWriter {
    options: SpecExportOptions,
}

impl CsvWriter {
    /// Create a writer using the dialect in `options.csv`.
    pub fn new(options: SpecExportOptions) -> Self {
        Self { options }
    }
}

impl TableWriter for CsvWriter {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Csv
    }

    fn export(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        path: &Path,
    ) -> Result<SpecExportReport> {
        let staged = StagedDestination::create(path)?;
        let mut file = BufWriter::new(staged.file()?);
        if self.options.csv.add_bom {
            file.write_all(BOM_UTF8)
                .map_err(|err| TableIoError::destination(path, err))?;
        }

        let mut writer = create_csv_writer(&self.options.csv, file)?;
        let mut report = SpecExportReport::default();

        if self.options.include_headers && !headers.is_empty() {
            writer
                .write_record(headers)
                .map_err(|err| TableIoError::codec("write_csv_headers", err))?;
        }

        let mut l_fields: Vec<String> = Vec::with_capacity(headers.len());
        for row in rows {
            let row = row?;
            l_fields.clear();
            for value in row.values() {
                l_fields.push(render_cell_text(value, &self.options.locale)?);
            }
            writer
                .write_record(&l_fields)
                .map_err(|err| TableIoError::codec("write_csv", err))?;
            report.rows_written += 1;
        }

        writer
            .flush()
            .map_err(|err| TableIoError::destination(path, err))?;
        drop(writer);
        staged.commit()?;
        debug!(rows = report.rows_written, path = %path.display(), "csv written");
        Ok(report)
    }
}

fn create_csv_writer<W: Write>(dialect: &SpecCsvConfig, sink: W) -> Result<::csv::Writer<W>> {
    let (n_delimiter, n_quote, n_escape) = dialect.derive_dialect_bytes()?;
    let mut builder = ::csv::WriterBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(n_delimiter)
        .quote(n_quote);
    if let Some(n_escape) = n_escape {
        builder.double_quote(false).escape(n_escape);
    }
    if dialect.line_ending == "\r\n" {
        builder.terminator(::csv::Terminator::CRLF);
    } else {
        builder.terminator(::csv::Terminator::Any(b'\n'));
    }
    Ok(builder.from_writer(sink))
}

/// Text rendering of a cell for text formats.
pub(crate) fn render_cell_text(value: &EnumCellValue, locale: &SpecLocaleConfig) -> Result<String> {
    let mut c_out = String::new();
    let (if_ok, c_pattern) = match value {
        EnumCellValue::Date(d) => (
            write!(c_out, "{}", d.format(&locale.text_date_format)).is_ok(),
            &locale.text_date_format,
        ),
        EnumCellValue::DateTime(dt) => (
            write!(c_out, "{}", dt.format(&locale.text_datetime_format)).is_ok(),
            &locale.text_datetime_format,
        ),
        other => return Ok(other.to_text()),
    };
    if !if_ok {
        return Err(TableIoError::InvalidOption(format!(
            "cannot render {value:?} with date pattern {c_pattern:?}"
        )));
    }
    Ok(c_out)
}
