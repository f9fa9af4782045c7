//! Structured-object writer. Rows are streamed one object at a time.

use std::io::{BufWriter, Write};
use std::path::Path;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{Result, TableIoError};
use crate::row::{Row, convert_cell_to_json};
use crate::spec::{EnumCellValue, EnumTableFormat, SpecExportOptions, SpecExportReport};
use crate::transform::RowStream;
use crate::writer::csv::render_cell_text;
use crate::writer::{StagedDestination, TableWriter};

/// Streaming structured-object writer.
///
/// Output is an array of objects keyed by heading, or an object holding that
/// array under `json.data_key` when `json.wrap_in_object` is set.
#[derive(Debug, Clone)]
pub struct JsonWriter {
    options: SpecExportOptions,
}

impl JsonWriter {
    /// Create a writer using the shape in `options.json`.
    pub fn new(options: SpecExportOptions) -> Self {
        Self { options }
    }

    fn convert_row_to_object(&self, row: &Row, headers: &[String]) -> Result<Map<String, Value>> {
        row.values()
            .iter()
            .enumerate()
            .map(|(n_idx, value)| {
                let c_key = headers
                    .get(n_idx)
                    .cloned()
                    .or_else(|| row.headings().and_then(|h| h.get(n_idx).cloned()))
                    .unwrap_or_else(|| n_idx.to_string());
                let value_json = match value {
                    EnumCellValue::Date(_) | EnumCellValue::DateTime(_) => {
                        Value::String(render_cell_text(value, &self.options.locale)?)
                    }
                    other => convert_cell_to_json(other),
                };
                Ok((c_key, value_json))
            })
            .collect()
    }

    fn write_value<W: Write>(&self, sink: &mut W, value: &Value, n_indent: usize) -> Result<()> {
        let c_text = if self.options.json.pretty_print {
            let c_pad = " ".repeat(n_indent);
            serde_json::to_string_pretty(value)
                .map(|s| s.replace('\n', &format!("\n{c_pad}")))
                .map(|s| format!("{c_pad}{s}"))
        } else {
            serde_json::to_string(value)
        }
        .map_err(|err| TableIoError::codec("serialize_json_row", err))?;
        sink.write_all(c_text.as_bytes())
            .map_err(|err| TableIoError::io("write_json", err))
    }
}

impl TableWriter for JsonWriter {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Json
    }

    fn export(
        &self,
        rows: RowStream<'_>,
        headers: &[String],
        path: &Path,
    ) -> Result<SpecExportReport> {
        let cfg = &self.options.json;
        let staged = StagedDestination::create(path)?;
        let mut sink = BufWriter::new(staged.file()?);
        let mut report = SpecExportReport::default();

        let c_nl = if cfg.pretty_print { "\n" } else { "" };
        let n_indent = match (cfg.pretty_print, cfg.wrap_in_object) {
            (false, _) => 0,
            (true, false) => 2,
            (true, true) => 4,
        };

        let mut c_prefix = String::new();
        if cfg.wrap_in_object {
            let c_key = serde_json::to_string(&cfg.data_key)
                .map_err(|err| TableIoError::codec("serialize_json_key", err))?;
            c_prefix.push('{');
            c_prefix.push_str(c_nl);
            if cfg.pretty_print {
                c_prefix.push_str("  ");
            }
            c_prefix.push_str(&c_key);
            c_prefix.push_str(if cfg.pretty_print { ": " } else { ":" });
        }
        c_prefix.push('[');
        write_text(&mut sink, &c_prefix)?;

        for row in rows {
            let row = row?;
            let dict_obj = self.convert_row_to_object(&row, headers)?;
            write_text(&mut sink, if report.rows_written == 0 { c_nl } else { "," })?;
            if report.rows_written > 0 {
                write_text(&mut sink, c_nl)?;
            }
            self.write_value(&mut sink, &Value::Object(dict_obj), n_indent)?;
            report.rows_written += 1;
        }

        if report.rows_written > 0 {
            write_text(&mut sink, c_nl)?;
            if cfg.pretty_print && cfg.wrap_in_object {
                write_text(&mut sink, "  ")?;
            }
        }
        write_text(&mut sink, "]")?;

        if cfg.wrap_in_object {
            if cfg.include_metadata {
                let meta = json!({
                    "rows": report.rows_written,
                    "headings": headers,
                    "exported_at": chrono::Utc::now().to_rfc3339(),
                });
                write_text(&mut sink, ",")?;
                write_text(&mut sink, c_nl)?;
                if cfg.pretty_print {
                    write_text(&mut sink, "  \"meta\": ")?;
                    self.write_value(&mut sink, &meta, 0)?;
                } else {
                    write_text(&mut sink, "\"meta\":")?;
                    self.write_value(&mut sink, &meta, 0)?;
                }
            }
            write_text(&mut sink, c_nl)?;
            write_text(&mut sink, "}")?;
        }
        write_text(&mut sink, c_nl)?;

        sink.flush()
            .map_err(|err| TableIoError::destination(path, err))?;
        drop(sink);
        staged.commit()?;
        debug!(rows = report.rows_written, path = %path.display(), "json written");
        Ok(report)
    }
}

fn write_text<W: Write>(sink: &mut W, text: &str) -> Result<()> {
    sink.write_all(text.as_bytes())
        .map_err(|err| TableIoError::io("write_json", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conf::SpecJsonConfig;

    fn export_to_value(json_cfg: SpecJsonConfig, headers: &[String]) -> Value {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.json");
        let options = SpecExportOptions {
            format: EnumTableFormat::Json,
            json: json_cfg,
            ..Default::default()
        };
        let rows: RowStream<'_> = Box::new(
            vec![
                Row::new(vec!["ada".into(), EnumCellValue::Int(36)]),
                Row::new(vec!["bob".into(), EnumCellValue::None]),
            ]
            .into_iter()
            .map(Ok::<_, TableIoError>),
        );
        JsonWriter::new(options)
            .export(rows, headers, &path)
            .expect("export");
        let c_text = std::fs::read_to_string(&path).expect("read back");
        serde_json::from_str(&c_text).expect("valid json")
    }

    fn headers() -> Vec<String> {
        vec!["name".to_string(), "age".to_string()]
    }

    #[test]
    fn test_plain_array_of_objects() {
        let value = export_to_value(SpecJsonConfig::default(), &headers());
        assert_eq!(
            value,
            json!([{"name": "ada", "age": 36}, {"name": "bob", "age": null}])
        );
    }

    #[test]
    fn test_wrapped_pretty_output_with_metadata_is_valid() {
        let value = export_to_value(
            SpecJsonConfig {
                pretty_print: true,
                wrap_in_object: true,
                data_key: "rows".to_string(),
                include_metadata: true,
            },
            &headers(),
        );
        assert_eq!(value["rows"][1]["name"], json!("bob"));
        assert_eq!(value["meta"]["rows"], json!(2));
        assert_eq!(value["meta"]["headings"], json!(["name", "age"]));
    }

    #[test]
    fn test_missing_headers_fall_back_to_positions() {
        let value = export_to_value(SpecJsonConfig::default(), &[]);
        assert_eq!(value[0]["0"], json!("ada"));
        assert_eq!(value[0]["1"], json!(36));
    }
}
