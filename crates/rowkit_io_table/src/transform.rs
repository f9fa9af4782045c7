//! Row transformer: raw records into final rows.

use std::sync::Arc;

use serde_json::Value;

use crate::capability::ExportDeclaration;
use crate::error::{Result, TableIoError};
use crate::row::{Row, convert_json_to_cell};
use crate::source::{EnumRawRecord, RecordStream};
use crate::spec::EnumCellValue;

/// Lazy pull-based sequence of rows.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// Applies the declaration's mapping, falling back to [`cast_record_to_row`].
pub struct RowTransformer<'d, D: ?Sized> {
    declaration: &'d D,
}

impl<'d, D: ExportDeclaration + ?Sized> RowTransformer<'d, D> {
    /// Bind to `declaration`.
    pub fn new(declaration: &'d D) -> Self {
        Self { declaration }
    }

    /// Transform one record. Holds no state between calls.
    pub fn transform(&self, record: EnumRawRecord) -> Result<Row> {
        match self.declaration.map_record(&record) {
            Some(mapped) => mapped.map_err(|err| TableIoError::io("map_record", format!("{err:#}"))),
            None => Ok(cast_record_to_row(record)),
        }
    }

    /// Transform a whole record stream lazily.
    pub fn transform_stream(self, records: RecordStream<'d>) -> RowStream<'d>
    where
        D: 'd,
    {
        Box::new(records.map(move |item| item.and_then(|record| self.transform(record))))
    }
}

/// Fallback ordered cast.
///
/// Rows pass as-is, value lists become rows, ordered mappings keep their key
/// order as headings, and objects are cast to their fields in declaration
/// order with nested values serialized to text.
pub fn cast_record_to_row(record: EnumRawRecord) -> Row {
    match record {
        EnumRawRecord::Row(row) => row,
        EnumRawRecord::Values(l_values) => Row::new(l_values),
        EnumRawRecord::Map(l_pairs) => {
            let (l_keys, l_values): (Vec<String>, Vec<EnumCellValue>) = l_pairs.into_iter().unzip();
            Row::new(l_values).with_headings(Arc::from(l_keys))
        }
        EnumRawRecord::Object(Value::Object(dict_fields)) => {
            let (l_keys, l_values): (Vec<String>, Vec<EnumCellValue>) = dict_fields
                .iter()
                .map(|(key, value)| (key.clone(), convert_json_to_cell(value)))
                .unzip();
            Row::new(l_values).with_headings(Arc::from(l_keys))
        }
        EnumRawRecord::Object(Value::Array(l_items)) => {
            l_items.iter().map(convert_json_to_cell).collect()
        }
        EnumRawRecord::Object(scalar) => Row::new(vec![convert_json_to_cell(&scalar)]),
    }
}
