//! Constants, configuration model and default preset factories.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{Result, TableIoError};
use crate::spec::{EnumTableFormat, SpecCellFormat, SpecExportOptions};

/// Excel worksheet maximum row count.
pub const N_NROWS_EXCEL_MAX: usize = 1_048_576;
/// Excel worksheet maximum column count.
pub const N_NCOLS_EXCEL_MAX: usize = 16_384;
/// Excel sheet name maximum length.
pub const N_LEN_EXCEL_SHEET_NAME_MAX: usize = 31;
/// Characters not allowed in sheet names.
pub const TUP_EXCEL_ILLEGAL: [&str; 7] = ["*", ":", "?", "/", "\\", "[", "]"];

/// Default batch size for chunked reads and writes.
pub const N_CHUNK_SIZE_DEFAULT: usize = 1_000;
/// Rows sampled per column by full-document autofit.
pub const N_AUTOFIT_SAMPLE_ROWS: usize = 2_000;
/// Column width used when no width hint is declared.
pub const N_COLUMN_WIDTH_DEFAULT: f64 = 12.0;
/// Upper bound for autofit width.
pub const N_COLUMN_WIDTH_MAX: f64 = 60.0;

////////////////////////////////////////////////////////////////////////////////
// #region ConfigSections

/// Delimited-text dialect.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecCsvConfig {
    /// Field delimiter.
    pub delimiter: char,
    /// Quote character.
    pub enclosure: char,
    /// Escape character; `None` doubles the quote.
    pub escape: Option<char>,
    /// Prepend UTF-8 byte-order mark.
    pub add_bom: bool,
    /// Record terminator (`"\n"` or `"\r\n"`).
    pub line_ending: String,
}

impl Default for SpecCsvConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            enclosure: '"',
            escape: None,
            add_bom: false,
            line_ending: "\n".to_string(),
        }
    }
}

impl SpecCsvConfig {
    /// Delimiter, quote and escape as single ASCII bytes.
    pub fn derive_dialect_bytes(&self) -> Result<(u8, u8, Option<u8>)> {
        let n_delimiter = cast_dialect_byte("csv.delimiter", self.delimiter)?;
        let n_quote = cast_dialect_byte("csv.enclosure", self.enclosure)?;
        let n_escape = self
            .escape
            .map(|ch| cast_dialect_byte("csv.escape", ch))
            .transpose()?;
        Ok((n_delimiter, n_quote, n_escape))
    }
}

fn cast_dialect_byte(c_name: &str, ch: char) -> Result<u8> {
    u8::try_from(ch)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            TableIoError::InvalidOption(format!(
                "{c_name} must be a single-byte ASCII character, got {ch:?}"
            ))
        })
}

/// Default spreadsheet writer behavior.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecExcelConfig {
    /// Base sheet name.
    pub sheet_name: String,
    /// Freeze the heading row when the declaration does not say otherwise.
    pub freeze_header: bool,
    /// Attach auto-filter when the declaration does not say otherwise.
    pub auto_filter: bool,
    /// Color negative values of numeric columns red.
    pub conditional_coloring: bool,
}

impl Default for SpecExcelConfig {
    fn default() -> Self {
        Self {
            sheet_name: "Sheet1".to_string(),
            freeze_header: false,
            auto_filter: false,
            conditional_coloring: false,
        }
    }
}

/// Structured-object writer shape.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecJsonConfig {
    /// Indented output.
    pub pretty_print: bool,
    /// Wrap the row array into an object under `data_key`.
    pub wrap_in_object: bool,
    /// Key holding rows when wrapped.
    pub data_key: String,
    /// Add a `meta` object (row count, headings, export time) when wrapped.
    pub include_metadata: bool,
}

impl Default for SpecJsonConfig {
    fn default() -> Self {
        Self {
            pretty_print: false,
            wrap_in_object: false,
            data_key: "data".to_string(),
            include_metadata: false,
        }
    }
}

/// Number/date/currency formatting defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecLocaleConfig {
    /// Spreadsheet number format for date columns.
    pub date_format: String,
    /// Spreadsheet number format for date-time values.
    pub datetime_format: String,
    /// Spreadsheet number format for currency columns.
    pub currency_format: String,
    /// Spreadsheet number format for number columns.
    pub number_format: String,
    /// `chrono` pattern used when dates are rendered as text.
    pub text_date_format: String,
    /// `chrono` pattern used when date-times are rendered as text.
    pub text_datetime_format: String,
}

impl Default for SpecLocaleConfig {
    fn default() -> Self {
        Self {
            date_format: "yyyy-mm-dd".to_string(),
            datetime_format: "yyyy-mm-dd hh:mm:ss".to_string(),
            currency_format: "#,##0.00".to_string(),
            number_format: "General".to_string(),
            text_date_format: "%Y-%m-%d".to_string(),
            text_datetime_format: "%Y-%m-%d %H:%M:%S".to_string(),
        }
    }
}

impl SpecLocaleConfig {
    /// Reject text patterns `chrono` cannot render.
    pub fn validate(&self) -> Result<()> {
        let Some(dt_sample) = NaiveDate::from_ymd_opt(2000, 1, 31).and_then(|d| d.and_hms_opt(13, 5, 9))
        else {
            return Err(TableIoError::InvalidOption("locale sample date".to_string()));
        };
        let mut c_out = String::new();
        if write!(c_out, "{}", dt_sample.date().format(&self.text_date_format)).is_err() {
            return Err(TableIoError::InvalidOption(format!(
                "locale.text_date_format is not a valid date pattern: {:?}",
                self.text_date_format
            )));
        }
        c_out.clear();
        if write!(c_out, "{}", dt_sample.format(&self.text_datetime_format)).is_err() {
            return Err(TableIoError::InvalidOption(format!(
                "locale.text_datetime_format is not a valid date-time pattern: {:?}",
                self.text_datetime_format
            )));
        }
        Ok(())
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region TableIoConfig

/// Explicit configuration value threaded into services.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SpecTableIoConfig {
    /// Output format when the caller does not specify one.
    pub default_format: EnumTableFormat,
    /// Default batch size for chunked reads and writes.
    pub chunk_size: usize,
    /// Delimited-text dialect.
    pub csv: SpecCsvConfig,
    /// Spreadsheet writer defaults.
    pub excel: SpecExcelConfig,
    /// Structured-object writer shape.
    pub json: SpecJsonConfig,
    /// Locale formatting defaults.
    pub locale: SpecLocaleConfig,
}

impl Default for SpecTableIoConfig {
    fn default() -> Self {
        Self {
            default_format: EnumTableFormat::Csv,
            chunk_size: N_CHUNK_SIZE_DEFAULT,
            csv: SpecCsvConfig::default(),
            excel: SpecExcelConfig::default(),
            json: SpecJsonConfig::default(),
            locale: SpecLocaleConfig::default(),
        }
    }
}

impl SpecTableIoConfig {
    /// Parse an already-loaded TOML document and validate it.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(text)
            .map_err(|err| TableIoError::InvalidOption(format!("config: {err}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values no writer or reader can honor.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(TableIoError::InvalidOption(
                "chunk_size must be > 0".to_string(),
            ));
        }
        self.csv.derive_dialect_bytes()?;
        if !matches!(self.csv.line_ending.as_str(), "\n" | "\r\n") {
            return Err(TableIoError::InvalidOption(format!(
                "csv.line_ending must be \\n or \\r\\n, got {:?}",
                self.csv.line_ending
            )));
        }
        if self.excel.sheet_name.trim().is_empty() {
            return Err(TableIoError::InvalidOption(
                "excel.sheet_name must not be empty".to_string(),
            ));
        }
        self.locale.validate()
    }

    /// Base export options snapshot for `format`, before declaration overrides.
    pub fn derive_export_options(&self, format: EnumTableFormat) -> SpecExportOptions {
        let dict_fmt = derive_default_xlsx_formats();
        SpecExportOptions {
            format,
            sheet_name: self.excel.sheet_name.clone(),
            header_format: dict_fmt.get("header").cloned().unwrap_or_default(),
            freeze_row: self.excel.freeze_header.then_some(1),
            auto_filter: self.excel.auto_filter,
            chunk_size: self.chunk_size,
            csv: self.csv.clone(),
            json: self.json.clone(),
            locale: self.locale.clone(),
            ..Default::default()
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatPresets

/// Build default named format presets used by spreadsheet writers.
pub fn derive_default_xlsx_formats() -> BTreeMap<String, SpecCellFormat> {
    let cfg_base_fmt_spec = SpecCellFormat {
        font_name: Some("Calibri".to_string()),
        font_size: Some(11),
        valign: Some("vcenter".to_string()),
        ..Default::default()
    };

    let mut dict_fmt = BTreeMap::new();
    dict_fmt.insert("text".to_string(), cfg_base_fmt_spec.clone());
    dict_fmt.insert(
        "header".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            align: Some("center".to_string()),
            border: Some(1),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "group".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            align: Some("center".to_string()),
            bg_color: Some("#D9E1F2".to_string()),
            border: Some(1),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "totals".to_string(),
        cfg_base_fmt_spec.with_(SpecCellFormat {
            bold: Some(true),
            ..Default::default()
        }),
    );
    dict_fmt.insert(
        "negative".to_string(),
        SpecCellFormat {
            font_color: Some("#C00000".to_string()),
            ..Default::default()
        },
    );

    dict_fmt
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_toml_overrides_sections() {
        let cfg = SpecTableIoConfig::from_toml_str(
            r#"
default_format = "spreadsheet"
chunk_size = 250

[csv]
delimiter = ";"
add_bom = true

[excel]
freeze_header = true

[json]
wrap_in_object = true
data_key = "rows"
"#,
        )
        .expect("config should parse");

        assert_eq!(cfg.default_format, EnumTableFormat::Xlsx);
        assert_eq!(cfg.chunk_size, 250);
        assert_eq!(cfg.csv.delimiter, ';');
        assert!(cfg.csv.add_bom);
        assert_eq!(cfg.csv.enclosure, '"');
        assert!(cfg.excel.freeze_header);
        assert_eq!(cfg.excel.sheet_name, "Sheet1");
        assert_eq!(cfg.json.data_key, "rows");
    }

    #[test]
    fn test_config_rejects_zero_chunk_size() {
        let err = SpecTableIoConfig::from_toml_str("chunk_size = 0")
            .expect_err("zero chunk size must fail");
        assert!(matches!(err, TableIoError::InvalidOption(_)));
    }

    #[test]
    fn test_config_rejects_multibyte_delimiter() {
        let mut cfg = SpecTableIoConfig::default();
        cfg.csv.delimiter = '§';
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_config_rejects_latin1_escape() {
        let mut cfg = SpecTableIoConfig::default();
        cfg.csv.escape = Some('é');
        let err = cfg.csv.derive_dialect_bytes().expect_err("non-ascii escape");
        assert!(matches!(err, TableIoError::InvalidOption(_)));
        assert_eq!(
            SpecCsvConfig::default().derive_dialect_bytes().expect("default dialect"),
            (b',', b'"', None)
        );
    }

    #[test]
    fn test_config_rejects_invalid_locale_patterns() {
        let err = SpecTableIoConfig::from_toml_str("[locale]\ntext_date_format = \"%Q\"")
            .expect_err("unknown specifier");
        assert!(matches!(err, TableIoError::InvalidOption(ref c) if c.contains("text_date_format")));

        // A time specifier cannot render a plain date.
        let err = SpecTableIoConfig::from_toml_str("[locale]\ntext_date_format = \"%H:%M\"")
            .expect_err("time on date");
        assert!(matches!(err, TableIoError::InvalidOption(_)));

        let err = SpecTableIoConfig::from_toml_str("[locale]\ntext_datetime_format = \"%Y-%\"")
            .expect_err("dangling percent");
        assert!(matches!(err, TableIoError::InvalidOption(ref c) if c.contains("text_datetime_format")));

        let cfg = SpecTableIoConfig::from_toml_str("[locale]\ntext_date_format = \"%d.%m.%Y\"")
            .expect("valid pattern");
        assert_eq!(cfg.locale.text_date_format, "%d.%m.%Y");
    }

    #[test]
    fn test_export_options_pick_up_excel_defaults() {
        let mut cfg = SpecTableIoConfig::default();
        cfg.excel.freeze_header = true;
        cfg.excel.sheet_name = "Orders".to_string();
        let opts = cfg.derive_export_options(EnumTableFormat::Xlsx);
        assert_eq!(opts.freeze_row, Some(1));
        assert_eq!(opts.sheet_name, "Orders");
        assert_eq!(opts.header_format.bold, Some(true));
    }
}
