//! Spreadsheet writer variants.
//!
//! One kernel serves all six strategies; a [`SpecXlsxProfile`] decides the
//! worksheet memory mode, styling depth and which document features apply.

#[cfg(feature = "xlsx")]
mod kernel;

use std::path::Path;

use crate::capability::EnumWriterStrategy;
use crate::error::{Result, TableIoError};
use crate::spec::{EnumTableFormat, SpecExportOptions, SpecExportReport};
use crate::transform::RowStream;
use crate::writer::TableWriter;

/// Worksheet memory mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumSheetMemoryMode {
    /// Whole sheet resident until save.
    Standard,
    /// Rows flushed to disk as soon as the next row starts.
    Constant,
    /// Like `Constant`, keeping the shared string table.
    Low,
}

/// Styling depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStyleLevel {
    /// No formats at all.
    None,
    /// Bold and font color on heading and body cells.
    Basic,
    /// Every format property, number formats included.
    Full,
}

/// Resolved behavior of one spreadsheet strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpecXlsxProfile {
    /// Worksheet memory mode.
    pub mode: EnumSheetMemoryMode,
    /// Styling depth.
    pub style: EnumStyleLevel,
    /// Rows buffered before they are written.
    pub n_buffer_rows: usize,
    /// Estimate column widths from content.
    pub if_autofit: bool,
    /// Formulas, merges, conditional formats, totals and events.
    pub if_document_features: bool,
    /// Spill rows to a scratch file before writing the workbook.
    pub if_two_phase: bool,
}

impl SpecXlsxProfile {
    /// Profile of `strategy`; `chunk_size` sizes the chunked buffer.
    pub fn from_strategy(strategy: EnumWriterStrategy, chunk_size: usize) -> Self {
        let streaming = Self {
            mode: EnumSheetMemoryMode::Constant,
            style: EnumStyleLevel::None,
            n_buffer_rows: 1,
            if_autofit: false,
            if_document_features: false,
            if_two_phase: false,
        };
        match strategy {
            EnumWriterStrategy::PlainStreaming | EnumWriterStrategy::Default => streaming,
            EnumWriterStrategy::StyledStreaming => Self {
                style: EnumStyleLevel::Basic,
                ..streaming
            },
            EnumWriterStrategy::Document => Self {
                mode: EnumSheetMemoryMode::Standard,
                style: EnumStyleLevel::Full,
                if_autofit: true,
                if_document_features: true,
                ..streaming
            },
            EnumWriterStrategy::ChunkedDocument => Self {
                mode: EnumSheetMemoryMode::Low,
                style: EnumStyleLevel::Full,
                n_buffer_rows: chunk_size.max(1),
                if_document_features: true,
                ..streaming
            },
            EnumWriterStrategy::Hybrid => Self {
                style: EnumStyleLevel::Full,
                if_document_features: true,
                if_two_phase: true,
                ..streaming
            },
        }
    }
}

/// Spreadsheet writer bound to one strategy.
#[derive(Debug, Clone)]
pub struct XlsxWriter {
    strategy: EnumWriterStrategy,
    options: SpecExportOptions,
}

impl XlsxWriter {
    /// Create the writer; fails when spreadsheet support is compiled out.
    pub fn try_new(strategy: EnumWriterStrategy, options: SpecExportOptions) -> Result<Self> {
        if !cfg!(feature = "xlsx") {
            return Err(derive_codec_missing());
        }
        Ok(Self { strategy, options })
    }

    /// Resolved profile.
    pub fn profile(&self) -> SpecXlsxProfile {
        SpecXlsxProfile::from_strategy(self.strategy, self.options.chunk_size)
    }
}

impl TableWriter for XlsxWriter {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Xlsx
    }

    fn strategy(&self) -> Option<EnumWriterStrategy> {
        Some(self.strategy)
    }

    #[cfg(feature = "xlsx")]
    fn export(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        path: &Path,
    ) -> Result<SpecExportReport> {
        kernel::export_workbook(self.strategy, &self.profile(), &self.options, rows, headers, path)
    }

    #[cfg(not(feature = "xlsx"))]
    fn export(
        &self,
        _rows: RowStream<'_>,
        _headers: &[String],
        _path: &Path,
    ) -> Result<SpecExportReport> {
        Err(derive_codec_missing())
    }
}

fn derive_codec_missing() -> TableIoError {
    TableIoError::OptionalCodecMissing {
        codec: "spreadsheet",
        feature: "xlsx",
    }
}
