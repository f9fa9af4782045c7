//! Structured-object reader.
//!
//! The document is parsed once. A single object is one row; otherwise every
//! element of the resolved array is a row. Nested objects are flattened into
//! dotted keys and nested arrays stay as one text cell.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{Result, TableIoError};
use crate::reader::{NumberedRowStream, RawRowStream, SlicedRows, TableReader};
use crate::row::{Row, convert_json_to_cell};
use crate::spec::{EnumCellValue, EnumTableFormat, SpecReadOptions};

/// Structured-object reader. Rows carry their own keys, so `heading_row` is
/// not consulted.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonReader;

impl JsonReader {
    fn load_rows(&self, path: &Path, data_path: Option<&str>) -> Result<Vec<Value>> {
        let file = File::open(path).map_err(|err| TableIoError::io("open_json", err))?;
        let document: Value = serde_json::from_reader(BufReader::new(file))
            .map_err(|err| TableIoError::malformed(path, err))?;
        match resolve_data_path(document, data_path) {
            Some(Value::Array(l_items)) => Ok(l_items),
            Some(value @ Value::Object(_)) => Ok(vec![value]),
            Some(_) => Err(TableIoError::malformed(
                path,
                "resolved data path is neither an array nor an object",
            )),
            None => Err(TableIoError::malformed(
                path,
                format!("data path {:?} not found", data_path.unwrap_or_default()),
            )),
        }
    }
}

impl TableReader for JsonReader {
    fn format(&self) -> EnumTableFormat {
        EnumTableFormat::Json
    }

    fn read_raw(&self, path: &Path, options: &SpecReadOptions) -> Result<RawRowStream<'static>> {
        let l_items = self.load_rows(path, options.data_path.as_deref())?;
        Ok(Box::new(
            l_items
                .into_iter()
                .map(|item| Ok::<_, TableIoError>(convert_json_to_row(&item))),
        ))
    }

    fn read(&self, path: &Path, options: &SpecReadOptions) -> Result<NumberedRowStream<'static>> {
        let options_keyed = SpecReadOptions {
            heading_row: None,
            ..options.clone()
        };
        let raw = self.read_raw(path, &options_keyed)?;
        Ok(Box::new(SlicedRows::new(raw, &options_keyed)?))
    }

    fn row_count(&self, path: &Path, options: &SpecReadOptions) -> Result<Option<usize>> {
        Ok(Some(self.load_rows(path, options.data_path.as_deref())?.len()))
    }

    fn sheets(&self, path: &Path) -> Result<BTreeMap<usize, String>> {
        let c_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(BTreeMap::from([(0, c_name)]))
    }
}

/// Follow a dotted path (`"data.items"`); numeric segments index arrays.
fn resolve_data_path(document: Value, data_path: Option<&str>) -> Option<Value> {
    let Some(c_path) = data_path.filter(|p| !p.is_empty()) else {
        return Some(document);
    };
    let mut node = document;
    for c_seg in c_path.split('.') {
        node = match node {
            Value::Object(mut map) => map.remove(c_seg)?,
            Value::Array(mut l_items) => {
                let n_idx = c_seg.parse::<usize>().ok()?;
                if n_idx >= l_items.len() {
                    return None;
                }
                l_items.swap_remove(n_idx)
            }
            _ => return None,
        };
    }
    Some(node)
}

fn convert_json_to_row(item: &Value) -> Row {
    match item {
        Value::Object(map) => {
            let mut l_keys = Vec::new();
            let mut l_values = Vec::new();
            flatten_object(map, "", &mut l_keys, &mut l_values);
            let headings: Arc<[String]> = l_keys.into();
            Row::new(l_values).with_headings(headings)
        }
        Value::Array(l_items) => l_items.iter().map(convert_json_to_cell).collect(),
        scalar => Row::new(vec![convert_json_to_cell(scalar)]),
    }
}

fn flatten_object(
    map: &Map<String, Value>,
    prefix: &str,
    l_keys: &mut Vec<String>,
    l_values: &mut Vec<EnumCellValue>,
) {
    for (c_key, value) in map {
        let c_full = if prefix.is_empty() {
            c_key.clone()
        } else {
            format!("{prefix}.{c_key}")
        };
        match value {
            Value::Object(nested) => flatten_object(nested, &c_full, l_keys, l_values),
            other => {
                l_keys.push(c_full);
                l_values.push(convert_json_to_cell(other));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_json(text: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("in.json");
        std::fs::write(&path, text).expect("write");
        (dir, path)
    }

    fn read_all(path: &Path, options: &SpecReadOptions) -> Vec<(usize, Row)> {
        JsonReader
            .read(path, options)
            .expect("read")
            .collect::<Result<_>>()
            .expect("rows")
    }

    #[test]
    fn test_nested_objects_flatten_and_arrays_stay_text() {
        let (_dir, path) = write_json(
            r#"[{"name":"ada","address":{"city":"London","geo":{"lat":51.5}},"tags":["a","b"]}]"#,
        );
        let l_rows = read_all(&path, &SpecReadOptions::default());
        assert_eq!(l_rows.len(), 1);
        let row = &l_rows[0].1;
        assert_eq!(
            row.headings().expect("keys"),
            &["name", "address.city", "address.geo.lat", "tags"]
        );
        assert_eq!(
            row.get_by_name("address.city"),
            Some(&EnumCellValue::String("London".to_string()))
        );
        assert_eq!(
            row.get_by_name("tags"),
            Some(&EnumCellValue::String(r#"["a","b"]"#.to_string()))
        );
    }

    #[test]
    fn test_single_object_is_one_row_and_data_path_resolves() {
        let (_dir, path) = write_json(r#"{"meta":{"n":2},"data":{"items":[{"id":1},{"id":2},{"id":3}]}}"#);
        assert_eq!(read_all(&path, &SpecReadOptions::default()).len(), 1);

        let options = SpecReadOptions {
            data_path: Some("data.items".to_string()),
            heading_row: Some(1),
            limit: 2,
            ..Default::default()
        };
        let l_rows = read_all(&path, &options);
        assert_eq!(l_rows.len(), 2);
        assert_eq!(l_rows[0].0, 1);
        assert_eq!(l_rows[1].1.get_by_name("id"), Some(&EnumCellValue::Int(2)));
        assert_eq!(JsonReader.row_count(&path, &options).expect("count"), Some(3));
    }

    #[test]
    fn test_scalar_data_path_is_malformed() {
        let (_dir, path) = write_json(r#"{"data":{"items":7}}"#);
        let options = SpecReadOptions {
            data_path: Some("data.items".to_string()),
            ..Default::default()
        };
        let err = JsonReader.read(&path, &options).err().expect("scalar");
        assert!(matches!(err, TableIoError::MalformedDocument { .. }));
    }

    #[test]
    fn test_unparseable_document_is_malformed() {
        let (_dir, path) = write_json("[{\"id\": 1},");
        let err = JsonReader
            .read(&path, &SpecReadOptions::default())
            .err()
            .expect("broken");
        assert!(matches!(err, TableIoError::MalformedDocument { .. }));
    }
}
