//! Row model: ordered cells with optional shared headings.

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::spec::EnumCellValue;

/// One ordered set of cell values, optionally addressable by heading name.
///
/// Headings are shared between rows of one sequence via `Arc`; a row never
/// holds a reference to any other row.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<EnumCellValue>,
    headings: Option<Arc<[String]>>,
}

impl Row {
    /// Create a row without headings.
    pub fn new(values: Vec<EnumCellValue>) -> Self {
        Self {
            values,
            headings: None,
        }
    }

    /// Attach headings; values are padded with blank cells to the heading length.
    pub fn with_headings(mut self, headings: Arc<[String]>) -> Self {
        if self.values.len() < headings.len() {
            self.values.resize(headings.len(), EnumCellValue::None);
        }
        self.headings = Some(headings);
        self
    }

    /// Cell values in order.
    pub fn values(&self) -> &[EnumCellValue] {
        &self.values
    }

    /// Consume the row into its values.
    pub fn into_values(self) -> Vec<EnumCellValue> {
        self.values
    }

    /// Headings, when attached.
    pub fn headings(&self) -> Option<&[String]> {
        self.headings.as_deref()
    }

    /// Number of cells.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row has no cells.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether every cell is blank.
    pub fn is_blank(&self) -> bool {
        self.values.iter().all(EnumCellValue::is_blank)
    }

    /// Cell at zero-based `idx`.
    pub fn get(&self, idx: usize) -> Option<&EnumCellValue> {
        self.values.get(idx)
    }

    /// Cell under heading `name`.
    pub fn get_by_name(&self, name: &str) -> Option<&EnumCellValue> {
        let idx = self.headings.as_ref()?.iter().position(|h| h == name)?;
        self.values.get(idx)
    }

    /// Truncate to the first `n_cols` cells (headings kept untouched).
    pub fn truncate(&mut self, n_cols: usize) {
        self.values.truncate(n_cols);
    }

    /// Ordered `(heading, value)` pairs; positional keys (`"0"`, `"1"`, ...) without headings.
    pub fn to_pairs(&self) -> Vec<(String, EnumCellValue)> {
        self.values
            .iter()
            .enumerate()
            .map(|(idx, value)| {
                let c_key = self
                    .headings
                    .as_ref()
                    .and_then(|h| h.get(idx).cloned())
                    .unwrap_or_else(|| idx.to_string());
                (c_key, value.clone())
            })
            .collect()
    }

    /// Structured-object rendering (insertion ordered).
    pub fn to_json_object(&self) -> Map<String, Value> {
        self.to_pairs()
            .into_iter()
            .map(|(key, value)| (key, convert_cell_to_json(&value)))
            .collect()
    }
}

impl From<Vec<EnumCellValue>> for Row {
    fn from(values: Vec<EnumCellValue>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<EnumCellValue> for Row {
    fn from_iter<T: IntoIterator<Item = EnumCellValue>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Convert a cell into a JSON scalar.
pub fn convert_cell_to_json(value: &EnumCellValue) -> Value {
    match value {
        EnumCellValue::None => Value::Null,
        EnumCellValue::Bool(v) => Value::Bool(*v),
        EnumCellValue::Int(v) => Value::from(*v),
        EnumCellValue::Number(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        other => Value::String(other.to_text()),
    }
}

/// Convert a JSON scalar into a cell; nested values become JSON text.
pub fn convert_json_to_cell(value: &Value) -> EnumCellValue {
    match value {
        Value::Null => EnumCellValue::None,
        Value::Bool(v) => EnumCellValue::Bool(*v),
        Value::Number(n) => n
            .as_i64()
            .map(EnumCellValue::Int)
            .or_else(|| n.as_f64().map(EnumCellValue::Number))
            .unwrap_or(EnumCellValue::None),
        Value::String(s) => EnumCellValue::String(s.clone()),
        Value::Array(_) | Value::Object(_) => EnumCellValue::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headings(names: &[&str]) -> Arc<[String]> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_name_lookup_matches_index_lookup() {
        let row = Row::new(vec!["ada".into(), EnumCellValue::Int(36)])
            .with_headings(headings(&["name", "age"]));
        assert_eq!(row.get_by_name("name"), row.get(0));
        assert_eq!(row.get_by_name("age"), Some(&EnumCellValue::Int(36)));
        assert_eq!(row.get_by_name("missing"), None);
    }

    #[test]
    fn test_short_row_is_padded_to_headings() {
        let row = Row::new(vec!["x".into()]).with_headings(headings(&["a", "b", "c"]));
        assert_eq!(row.len(), 3);
        assert_eq!(row.get_by_name("c"), Some(&EnumCellValue::None));
    }

    #[test]
    fn test_pairs_use_positional_keys_without_headings() {
        let row = Row::new(vec![EnumCellValue::Bool(true), EnumCellValue::Number(1.5)]);
        let pairs = row.to_pairs();
        assert_eq!(pairs[0].0, "0");
        assert_eq!(pairs[1].0, "1");
        let obj = row.to_json_object();
        assert_eq!(obj.get("1"), Some(&Value::from(1.5)));
    }

    #[test]
    fn test_json_cell_conversion_keeps_nested_as_text() {
        let cell = convert_json_to_cell(&serde_json::json!([1, 2]));
        assert_eq!(cell, EnumCellValue::String("[1,2]".to_string()));
        assert_eq!(convert_json_to_cell(&serde_json::json!(7)), EnumCellValue::Int(7));
    }
}
