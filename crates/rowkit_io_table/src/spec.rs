//! Shared specification models: cell values, columns, options and reports.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::capability::EnumWriterStrategy;
use crate::conf::{SpecCsvConfig, SpecJsonConfig, SpecLocaleConfig};

////////////////////////////////////////////////////////////////////////////////
// #region CellValue

/// Normalized scalar cell value flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EnumCellValue {
    /// Missing/blank value.
    #[default]
    None,
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Number(f64),
    /// Text value.
    String(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time without zone.
    DateTime(NaiveDateTime),
    /// Spreadsheet formula text, including leading `=`.
    Formula(String),
}

impl EnumCellValue {
    /// Whether the cell is blank (`None` or empty text).
    pub fn is_blank(&self) -> bool {
        match self {
            Self::None => true,
            Self::String(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Numeric view of the value, parsing text when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Number(v) => Some(*v),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Text rendering used by text formats and validators.
    pub fn to_text(&self) -> String {
        match self {
            Self::None => String::new(),
            Self::Bool(v) => if *v { "true" } else { "false" }.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Number(v) => v.to_string(),
            Self::String(s) | Self::Formula(s) => s.clone(),
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for EnumCellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<&str> for EnumCellValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for EnumCellValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for EnumCellValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for EnumCellValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for EnumCellValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<NaiveDate> for EnumCellValue {
    fn from(value: NaiveDate) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<EnumCellValue>> From<Option<T>> for EnumCellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

/// Missing/NaN/Inf replacement policy for spreadsheet cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecValuePolicy {
    /// Replacement text for missing value when keep-missing is enabled.
    pub missing_value_str: String,
    /// Replacement text for NaN.
    pub nan_str: String,
    /// Replacement text for positive infinity.
    pub posinf_str: String,
    /// Replacement text for negative infinity.
    pub neginf_str: String,
    /// Write replacement text instead of blank cells.
    pub keep_missing_values: bool,
}

impl Default for SpecValuePolicy {
    fn default() -> Self {
        Self {
            missing_value_str: "NA".to_string(),
            nan_str: "NaN".to_string(),
            posinf_str: "Inf".to_string(),
            neginf_str: "-Inf".to_string(),
            keep_missing_values: false,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellFormatSpecification

/// Cell format specification, merged right-to-left like CSS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SpecCellFormat {
    /// Font family name.
    pub font_name: Option<String>,
    /// Font size in points.
    pub font_size: Option<i64>,
    /// Bold style.
    pub bold: Option<bool>,
    /// Italic style.
    pub italic: Option<bool>,

    /// Horizontal alignment.
    pub align: Option<String>,
    /// Vertical alignment.
    pub valign: Option<String>,
    /// Border style for all sides.
    pub border: Option<i64>,
    /// Text wrap.
    pub text_wrap: Option<bool>,

    /// Number format code.
    pub num_format: Option<String>,
    /// Background fill color.
    pub bg_color: Option<String>,
    /// Font color.
    pub font_color: Option<String>,
}

impl SpecCellFormat {
    /// Return a new format by overlaying `patch` onto `self`.
    pub fn with_(&self, patch: SpecCellFormat) -> SpecCellFormat {
        self.merge(&patch)
    }

    /// Merge two formats with right-side non-`None` overwrite semantics.
    pub fn merge(&self, other: &SpecCellFormat) -> SpecCellFormat {
        SpecCellFormat {
            font_name: other.font_name.clone().or_else(|| self.font_name.clone()),
            font_size: other.font_size.or(self.font_size),
            bold: other.bold.or(self.bold),
            italic: other.italic.or(self.italic),
            align: other.align.clone().or_else(|| self.align.clone()),
            valign: other.valign.clone().or_else(|| self.valign.clone()),
            border: other.border.or(self.border),
            text_wrap: other.text_wrap.or(self.text_wrap),
            num_format: other.num_format.clone().or_else(|| self.num_format.clone()),
            bg_color: other.bg_color.clone().or_else(|| self.bg_color.clone()),
            font_color: other.font_color.clone().or_else(|| self.font_color.clone()),
        }
    }

    /// Keep only the properties a streaming writer may carry (bold, font color).
    pub fn to_basic(&self) -> SpecCellFormat {
        SpecCellFormat {
            bold: self.bold,
            font_color: self.font_color.clone(),
            ..Default::default()
        }
    }
}

/// Horizontal merge range within one heading row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetHorizontalMerge {
    /// Zero-based heading row.
    pub row_idx_start: usize,
    /// First merged column, inclusive.
    pub col_idx_start: usize,
    /// Last merged column, inclusive.
    pub col_idx_end: usize,
    /// Text shown in the merged range.
    pub text: String,
}

/// One worksheet's share of the data rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecSheetSlice {
    /// Worksheet name.
    pub sheet_name: String,
    /// First data row, inclusive.
    pub row_start_inclusive: usize,
    /// Last data row, exclusive.
    pub row_end_exclusive: usize,
}

/// Declared per-sheet styling (heading row and per-column body formats).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecSheetStyles {
    /// Patch applied over the preset heading format.
    pub header: Option<SpecCellFormat>,
    /// Body format patches by column key.
    pub columns: BTreeMap<String, SpecCellFormat>,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnSpecification

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumColumnType {
    /// Free text.
    #[default]
    String,
    /// Numeric value.
    Number,
    /// Calendar date or date-time.
    Date,
    /// Monetary amount.
    Currency,
    /// True/false flag.
    Boolean,
}

/// Column definition owned by an export declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecColumnDefinition {
    /// Heading key the definition applies to.
    pub key: String,
    /// Semantic type.
    pub column_type: EnumColumnType,
    /// Display format code; locale default for the type when `None`.
    pub format: Option<String>,
    /// Width hint in character units.
    pub width: Option<f64>,
}

impl SpecColumnDefinition {
    /// Create a definition with no explicit format or width.
    pub fn new(key: impl Into<String>, column_type: EnumColumnType) -> Self {
        Self {
            key: key.into(),
            column_type,
            format: None,
            width: None,
        }
    }

    /// Set display format code.
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Set width hint.
    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }
}

/// Conditional rule evaluated by the spreadsheet application.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumConditionalRule {
    /// Cell value strictly greater than.
    GreaterThan(f64),
    /// Cell value strictly less than.
    LessThan(f64),
    /// Cell value equal to.
    EqualTo(f64),
    /// Cell value within inclusive bounds.
    Between(f64, f64),
    /// Cell text contains substring.
    TextContains(String),
}

/// Conditional formatting rule bound to one column.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecConditionalFormat {
    /// Column key the rule applies to.
    pub column: String,
    /// Trigger rule.
    pub rule: EnumConditionalRule,
    /// Format applied when the rule matches.
    pub format: SpecCellFormat,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatSelection

/// On-disk tabular format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumTableFormat {
    /// Delimited text.
    #[default]
    Csv,
    /// Spreadsheet workbook.
    #[serde(alias = "spreadsheet", alias = "excel")]
    Xlsx,
    /// Structured-object text.
    #[serde(alias = "structured-object")]
    Json,
}

impl EnumTableFormat {
    /// Resolve format from a file extension (case-insensitive, no dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xls" | "ods" => Some(Self::Xlsx),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Resolve format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }

    /// Canonical file extension.
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
            Self::Json => "json",
        }
    }

    /// MIME type used in transport responses.
    pub const fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Json => "application/json",
        }
    }
}

/// Heading key formatting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnumHeadingFormat {
    /// `Full Name` -> `full_name`.
    #[default]
    Slug,
    /// `FullName` -> `full_name`.
    Snake,
    /// `full name` -> `fullName`.
    Camel,
    /// `full name` -> `FullName`.
    Studly,
    /// Keep heading text unchanged.
    None,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ExportOptions

/// Lifecycle events fired by document-family writers.
#[derive(Debug, Clone, PartialEq)]
pub enum EnumExportEvent<'a> {
    /// Before any output is produced.
    BeforeExport,
    /// Before a sheet receives its heading row.
    BeforeSheet {
        /// Sheet name.
        sheet_name: &'a str,
    },
    /// After a sheet received all rows.
    AfterSheet {
        /// Sheet name.
        sheet_name: &'a str,
        /// Data rows written into the sheet.
        rows: usize,
    },
    /// After output is complete.
    AfterExport {
        /// Final report.
        report: &'a SpecExportReport,
    },
}

/// Receiver of [`EnumExportEvent`]s.
pub trait ExportEventHandler: Send + Sync {
    /// Handle one event; an error aborts the export.
    fn handle(&self, event: &EnumExportEvent<'_>) -> anyhow::Result<()>;
}

/// Immutable configuration snapshot for one export call.
#[derive(Clone)]
pub struct SpecExportOptions {
    /// Target format.
    pub format: EnumTableFormat,
    /// Base sheet name for spreadsheet output.
    pub sheet_name: String,
    /// Write heading row before data.
    pub include_headers: bool,
    /// Optional group row written above the headings.
    pub heading_groups: Option<Vec<String>>,
    /// Declared column definitions.
    pub columns: Vec<SpecColumnDefinition>,
    /// Heading row format (preset merged with declared style).
    pub header_format: SpecCellFormat,
    /// Declared styles.
    pub styles: Option<SpecSheetStyles>,
    /// Declared conditional formatting.
    pub conditional_formats: Vec<SpecConditionalFormat>,
    /// Rows frozen at the top (usually the heading height).
    pub freeze_row: Option<usize>,
    /// Attach an auto-filter over the written range.
    pub auto_filter: bool,
    /// Column keys receiving a totals formula row.
    pub totals: Vec<String>,
    /// Chunk size for chunked writers.
    pub chunk_size: usize,
    /// Delimited-text dialect.
    pub csv: SpecCsvConfig,
    /// Structured-object output shape.
    pub json: SpecJsonConfig,
    /// Locale formatting defaults.
    pub locale: SpecLocaleConfig,
    /// Missing/NaN policy.
    pub value_policy: SpecValuePolicy,
    /// Lifecycle event handler.
    pub events: Option<Arc<dyn ExportEventHandler>>,
}

impl fmt::Debug for SpecExportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpecExportOptions")
            .field("format", &self.format)
            .field("sheet_name", &self.sheet_name)
            .field("include_headers", &self.include_headers)
            .field("heading_groups", &self.heading_groups)
            .field("columns", &self.columns)
            .field("styles", &self.styles)
            .field("conditional_formats", &self.conditional_formats)
            .field("freeze_row", &self.freeze_row)
            .field("auto_filter", &self.auto_filter)
            .field("totals", &self.totals)
            .field("chunk_size", &self.chunk_size)
            .field("events", &self.events.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for SpecExportOptions {
    fn default() -> Self {
        Self {
            format: EnumTableFormat::Csv,
            sheet_name: "Sheet1".to_string(),
            include_headers: true,
            heading_groups: None,
            columns: Vec::new(),
            header_format: SpecCellFormat::default(),
            styles: None,
            conditional_formats: Vec::new(),
            freeze_row: None,
            auto_filter: false,
            totals: Vec::new(),
            chunk_size: crate::conf::N_CHUNK_SIZE_DEFAULT,
            csv: SpecCsvConfig::default(),
            json: SpecJsonConfig::default(),
            locale: SpecLocaleConfig::default(),
            value_policy: SpecValuePolicy::default(),
            events: None,
        }
    }
}

impl SpecExportOptions {
    /// Find the column definition declared for `key`.
    pub fn column(&self, key: &str) -> Option<&SpecColumnDefinition> {
        self.columns.iter().find(|col| col.key == key)
    }

    /// Fire an event when a handler is attached.
    pub fn fire(&self, event: &EnumExportEvent<'_>) -> crate::Result<()> {
        let Some(handler) = &self.events else {
            return Ok(());
        };
        handler
            .handle(event)
            .map_err(|err| crate::TableIoError::io("export_event", format!("{err:#}")))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReadOptions

/// Worksheet selector for multi-sheet inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnumSheetSelector {
    /// Zero-based sheet index.
    Index(usize),
    /// Sheet name.
    Name(String),
}

impl Default for EnumSheetSelector {
    fn default() -> Self {
        Self::Index(0)
    }
}

/// Reader options shared by every reader variant.
#[derive(Debug, Clone, PartialEq)]
pub struct SpecReadOptions {
    /// 1-based heading row; `None` reads rows without headings.
    pub heading_row: Option<usize>,
    /// Heading key formatting.
    pub heading_format: EnumHeadingFormat,
    /// First 1-based row yielded; defaults to the row after the heading row.
    pub start_row: Option<usize>,
    /// Last column kept, letter-encoded (`"C"`), inclusive.
    pub end_column: Option<String>,
    /// Maximum data rows yielded; `0` means unlimited.
    pub limit: usize,
    /// Drop rows whose cells are all blank.
    pub skip_empty_rows: bool,
    /// Sheet to read from spreadsheet inputs.
    pub sheet: EnumSheetSelector,
    /// Delimited-text dialect.
    pub csv: SpecCsvConfig,
    /// Dotted path to the row collection in structured-object inputs.
    pub data_path: Option<String>,
}

impl Default for SpecReadOptions {
    fn default() -> Self {
        Self {
            heading_row: None,
            heading_format: EnumHeadingFormat::Slug,
            start_row: None,
            end_column: None,
            limit: 0,
            skip_empty_rows: false,
            sheet: EnumSheetSelector::default(),
            csv: SpecCsvConfig::default(),
            data_path: None,
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ReportSpecification

/// Per-export report.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpecExportReport {
    /// Writer strategy that produced the output.
    pub strategy: Option<EnumWriterStrategy>,
    /// Data rows written.
    pub rows_written: usize,
    /// Sheet names produced (spreadsheet output only).
    pub sheets: Vec<String>,
    /// Non-fatal warnings.
    pub warnings: Vec<String>,
}

impl SpecExportReport {
    /// Create an empty report for `strategy`.
    pub fn new(strategy: EnumWriterStrategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Default::default()
        }
    }

    /// Add a warning message.
    pub fn warn(&mut self, msg: impl AsRef<str>) {
        self.warnings.push(msg.as_ref().to_string());
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_format_merge_prefers_right_side() {
        let base = SpecCellFormat {
            bold: Some(false),
            font_color: Some("#000000".to_string()),
            ..Default::default()
        };
        let merged = base.with_(SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        });
        assert_eq!(merged.bold, Some(true));
        assert_eq!(merged.font_color.as_deref(), Some("#000000"));
    }

    #[test]
    fn test_basic_format_drops_rich_properties() {
        let fmt = SpecCellFormat {
            bold: Some(true),
            num_format: Some("0.00".to_string()),
            bg_color: Some("#FFFF00".to_string()),
            font_color: Some("#FF0000".to_string()),
            ..Default::default()
        };
        let basic = fmt.to_basic();
        assert_eq!(basic.bold, Some(true));
        assert_eq!(basic.font_color.as_deref(), Some("#FF0000"));
        assert!(basic.num_format.is_none());
        assert!(basic.bg_color.is_none());
    }

    #[test]
    fn test_table_format_from_extension() {
        assert_eq!(EnumTableFormat::from_extension("CSV"), Some(EnumTableFormat::Csv));
        assert_eq!(EnumTableFormat::from_extension(".xlsx"), Some(EnumTableFormat::Xlsx));
        assert_eq!(EnumTableFormat::from_extension("json"), Some(EnumTableFormat::Json));
        assert_eq!(EnumTableFormat::from_extension("pdf"), None);
        assert_eq!(
            EnumTableFormat::from_path(Path::new("out/report.xlsx")),
            Some(EnumTableFormat::Xlsx)
        );
    }

    #[test]
    fn test_cell_value_blank_and_numeric_views() {
        assert!(EnumCellValue::None.is_blank());
        assert!(EnumCellValue::from("   ").is_blank());
        assert!(!EnumCellValue::Int(0).is_blank());
        assert_eq!(EnumCellValue::from(" 2.5 ").as_f64(), Some(2.5));
        assert_eq!(EnumCellValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(EnumCellValue::from(None::<i64>), EnumCellValue::None);
    }
}
