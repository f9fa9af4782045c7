//! Format writers and the shared writer contract.
//!
//! - `csv`  : delimited text, streaming
//! - `json` : structured-object text, streaming
//! - `xlsx` : spreadsheet variants selected by [`EnumWriterStrategy`]

pub mod csv;
pub mod json;
pub mod xlsx;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::capability::EnumWriterStrategy;
use crate::error::{Result, TableIoError};
use crate::spec::{EnumTableFormat, SpecExportOptions, SpecExportReport};
use crate::transform::RowStream;

pub use self::csv::CsvWriter;
pub use self::json::JsonWriter;
pub use self::xlsx::XlsxWriter;

/// Bytes of one streamed response chunk.
pub const N_STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// In-memory downloadable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecTransportResponse {
    /// Suggested file name.
    pub filename: String,
    /// MIME type.
    pub content_type: &'static str,
    /// Full body.
    pub body: Vec<u8>,
}

/// Chunked downloadable payload backed by an anonymous temporary file.
///
/// The temporary file has no path on disk and disappears once dropped.
#[derive(Debug)]
pub struct SpecStreamResponse {
    /// Suggested file name.
    pub filename: String,
    /// MIME type.
    pub content_type: &'static str,
    /// Total body length in bytes.
    pub content_length: u64,
    file: File,
    n_chunk_bytes: usize,
}

impl SpecStreamResponse {
    /// Change the chunk size yielded by the iterator.
    pub fn with_chunk_bytes(mut self, n_chunk_bytes: usize) -> Self {
        self.n_chunk_bytes = n_chunk_bytes.max(1);
        self
    }
}

impl Read for SpecStreamResponse {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Iterator for SpecStreamResponse {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut v_buf = vec![0u8; self.n_chunk_bytes];
        match self.file.read(&mut v_buf) {
            Ok(0) => None,
            Ok(n) => {
                v_buf.truncate(n);
                Some(Ok(v_buf))
            }
            Err(err) => Some(Err(err)),
        }
    }
}

/// Common writer contract.
///
/// Heading row comes before any data row, row order is preserved, and
/// temporary resources are released on every exit path.
pub trait TableWriter {
    /// Output format.
    fn format(&self) -> EnumTableFormat;

    /// Spreadsheet strategy, when the writer is a spreadsheet variant.
    fn strategy(&self) -> Option<EnumWriterStrategy> {
        None
    }

    /// Write `rows` under `headers` to `path`.
    fn export(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        path: &Path,
    ) -> Result<SpecExportReport>;

    /// Render to in-memory bytes.
    fn to_bytes(&self, rows: RowStream<'_>, headers: &[String]) -> Result<Vec<u8>> {
        let tmp = create_scratch_file(self.format())?;
        self.export(rows, headers, tmp.path())?;
        std::fs::read(tmp.path()).map_err(|err| TableIoError::io("read_scratch_file", err))
    }

    /// Render into a downloadable response.
    fn download(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        filename: &str,
    ) -> Result<SpecTransportResponse> {
        Ok(SpecTransportResponse {
            filename: filename.to_string(),
            content_type: self.format().content_type(),
            body: self.to_bytes(rows, headers)?,
        })
    }

    /// Render into a chunked response; the body lives in an unnamed temp file.
    fn stream(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        filename: &str,
    ) -> Result<SpecStreamResponse> {
        let tmp = create_scratch_file(self.format())?;
        self.export(rows, headers, tmp.path())?;
        // The export replaced the scratch path, so the old handle is stale.
        let mut file = tmp
            .reopen()
            .map_err(|err| TableIoError::io("reopen_scratch_file", err))?;
        let n_len = file
            .seek(SeekFrom::End(0))
            .and_then(|n| file.seek(SeekFrom::Start(0)).map(|_| n))
            .map_err(|err| TableIoError::io("rewind_scratch_file", err))?;
        Ok(SpecStreamResponse {
            filename: filename.to_string(),
            content_type: self.format().content_type(),
            content_length: n_len,
            file,
            n_chunk_bytes: N_STREAM_CHUNK_BYTES,
        })
    }
}

/// Build the writer for `options.format`, using `strategy` for spreadsheets.
pub fn create_writer(
    strategy: EnumWriterStrategy,
    options: SpecExportOptions,
) -> Result<Box<dyn TableWriter>> {
    match options.format {
        EnumTableFormat::Csv => Ok(Box::new(CsvWriter::new(options))),
        EnumTableFormat::Json => Ok(Box::new(JsonWriter::new(options))),
        EnumTableFormat::Xlsx => Ok(Box::new(XlsxWriter::try_new(strategy, options)?)),
    }
}

/// Output staged in a sibling temporary file.
///
/// Nothing appears at the destination until [`StagedDestination::commit`];
/// dropping an uncommitted stage deletes the partial output.
pub(crate) struct StagedDestination {
    tmp: NamedTempFile,
    path: PathBuf,
}

impl StagedDestination {
    /// Stage output for `path` in its parent directory.
    pub(crate) fn create(path: &Path) -> Result<Self> {
        let dir_parent = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".rowkit-")
            .suffix(".part")
            .tempfile_in(dir_parent)
            .map_err(|err| TableIoError::destination(path, err))?;
        Ok(Self {
            tmp,
            path: path.to_path_buf(),
        })
    }

    /// Write handle on the staged file.
    pub(crate) fn file(&self) -> Result<File> {
        self.tmp
            .as_file()
            .try_clone()
            .map_err(|err| TableIoError::destination(&self.path, err))
    }

    /// Move the staged file onto the destination path.
    pub(crate) fn commit(self) -> Result<()> {
        let path = self.path;
        self.tmp
            .persist(&path)
            .map(|_| ())
            .map_err(|err| TableIoError::destination(&path, err.error))
    }
}

fn create_scratch_file(format: EnumTableFormat) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix("rowkit-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile()
        .map_err(|err| TableIoError::io("create_scratch_file", err))
}
