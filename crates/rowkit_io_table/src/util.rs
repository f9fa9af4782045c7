//! Stateless helper utilities shared by writers and readers.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime};

use crate::conf::{N_LEN_EXCEL_SHEET_NAME_MAX, N_NROWS_EXCEL_MAX, TUP_EXCEL_ILLEGAL};
use crate::error::{Result, TableIoError};
use crate::spec::{
    EnumCellValue, EnumColumnType, SpecExportReport, SpecSheetHorizontalMerge, SpecSheetSlice,
    SpecValuePolicy,
};

////////////////////////////////////////////////////////////////////////////////
// #region CellValueConversion

/// Convert `NaN`/`Inf` to policy string; return error for finite values.
pub fn convert_nan_inf_to_str(
    x: f64,
    value_policy: &SpecValuePolicy,
) -> std::result::Result<String, String> {
    if x.is_nan() {
        return Ok(value_policy.nan_str.clone());
    }
    if x.is_infinite() {
        return Ok(if x.is_sign_positive() {
            value_policy.posinf_str.clone()
        } else {
            value_policy.neginf_str.clone()
        });
    }
    Err("Input is neither NaN nor Inf.".to_string())
}

/// Normalize a cell according to its declared column type and the value policy.
///
/// Text in typed columns is coerced when it parses cleanly; anything else is
/// kept as text.
pub fn convert_cell_value(
    value: &EnumCellValue,
    col_type: Option<EnumColumnType>,
    value_policy: &SpecValuePolicy,
) -> EnumCellValue {
    match value {
        EnumCellValue::None => {
            return if value_policy.keep_missing_values {
                EnumCellValue::String(value_policy.missing_value_str.clone())
            } else {
                EnumCellValue::None
            };
        }
        EnumCellValue::Number(n) if !n.is_finite() => {
            return if value_policy.keep_missing_values {
                EnumCellValue::String(
                    convert_nan_inf_to_str(*n, value_policy)
                        .unwrap_or_else(|_| value_policy.nan_str.clone()),
                )
            } else {
                EnumCellValue::None
            };
        }
        _ => {}
    }

    let EnumCellValue::String(s) = value else {
        return value.clone();
    };
    let c_trimmed = s.trim();
    match col_type {
        Some(EnumColumnType::Number | EnumColumnType::Currency) => {
            if let Ok(v) = c_trimmed.parse::<i64>() {
                EnumCellValue::Int(v)
            } else if let Ok(v) = c_trimmed.parse::<f64>()
                && v.is_finite()
            {
                EnumCellValue::Number(v)
            } else {
                value.clone()
            }
        }
        Some(EnumColumnType::Boolean) => {
            parse_bool_text(c_trimmed).map_or_else(|| value.clone(), EnumCellValue::Bool)
        }
        Some(EnumColumnType::Date) => parse_date_text(c_trimmed).unwrap_or_else(|| value.clone()),
        Some(EnumColumnType::String) | None => value.clone(),
    }
}

/// Parse common boolean spellings.
pub fn parse_bool_text(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

/// Parse ISO-like date or date-time text.
pub fn parse_date_text(s: &str) -> Option<EnumCellValue> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(EnumCellValue::Date(d));
    }
    for c_fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, c_fmt) {
            return Some(EnumCellValue::DateTime(dt));
        }
    }
    None
}

/// Excel serial day number (1900 date system) of `dt`.
pub fn convert_datetime_to_excel_serial(dt: &NaiveDateTime) -> f64 {
    let dt_epoch = NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let delta = *dt - dt_epoch;
    delta.num_milliseconds() as f64 / 86_400_000.0
}

/// Excel serial day number of `d`.
pub fn convert_date_to_excel_serial(d: &NaiveDate) -> f64 {
    d.and_hms_opt(0, 0, 0)
        .map_or(0.0, |dt| convert_datetime_to_excel_serial(&dt))
}

/// Inverse of [`convert_datetime_to_excel_serial`]; whole serials become dates.
pub fn convert_excel_serial_to_datetime(serial: f64) -> Option<EnumCellValue> {
    if !serial.is_finite() {
        return None;
    }
    let dt_epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let n_millis = (serial * 86_400_000.0).round() as i64;
    let dt = dt_epoch.checked_add_signed(chrono::TimeDelta::try_milliseconds(n_millis)?)?;
    if dt.time() == chrono::NaiveTime::MIN {
        Some(EnumCellValue::Date(dt.date()))
    } else {
        Some(EnumCellValue::DateTime(dt))
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ColumnUtils

/// Validate that `columns` has no duplicated names.
pub fn validate_unique_columns(columns: &[String]) -> Result<()> {
    if columns.len() == columns.iter().collect::<BTreeSet<_>>().len() {
        return Ok(());
    }

    let mut dict_pos: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (n_idx, c_name) in columns.iter().enumerate() {
        dict_pos.entry(c_name).or_default().push(n_idx);
    }

    let c_msg = dict_pos
        .iter()
        .filter_map(|(c_name, l_pos)| {
            if l_pos.len() > 1 {
                Some(format!("{c_name:?} x{} at indices {:?}", l_pos.len(), l_pos))
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("; ");

    Err(TableIoError::InvalidOption(format!(
        "Duplicate column names detected: {c_msg}"
    )))
}

/// Decode letter-encoded column (`"A"` -> 0, `"AA"` -> 26).
pub fn convert_column_letters_to_index(letters: &str) -> Option<usize> {
    let c_letters = letters.trim();
    if c_letters.is_empty() {
        return None;
    }
    let mut n_acc: usize = 0;
    for chr in c_letters.chars() {
        if !chr.is_ascii_alphabetic() {
            return None;
        }
        let n_digit = (chr.to_ascii_uppercase() as u8 - b'A') as usize + 1;
        n_acc = n_acc.checked_mul(26)?.checked_add(n_digit)?;
    }
    Some(n_acc - 1)
}

/// Encode zero-based column index as letters (0 -> `"A"`).
pub fn convert_index_to_column_letters(idx: usize) -> String {
    let mut v_chars = Vec::new();
    let mut n_rest = idx + 1;
    while n_rest > 0 {
        let n_rem = (n_rest - 1) % 26;
        v_chars.push((b'A' + n_rem as u8) as char);
        n_rest = (n_rest - 1) / 26;
    }
    v_chars.iter().rev().collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region SheetNormalization

/// Replace invalid chars and trim to valid Excel sheet name.
pub fn sanitize_sheet_name(name: &str, replace_to: &str) -> String {
    let mut c_name = name.to_string();
    for c_illegal in TUP_EXCEL_ILLEGAL {
        c_name = c_name.replace(c_illegal, replace_to);
    }
    c_name = c_name.trim().to_string();
    if c_name.is_empty() {
        c_name = "Sheet".to_string();
    }

    c_name.chars().take(N_LEN_EXCEL_SHEET_NAME_MAX).collect()
}

/// Data rows that fit one sheet below `height_header` heading rows and
/// `height_footer` trailing rows.
pub fn calculate_sheet_data_capacity(height_header: usize, height_footer: usize) -> Result<usize> {
    N_NROWS_EXCEL_MAX
        .checked_sub(height_header + height_footer)
        .filter(|n| *n > 0)
        .ok_or_else(|| {
            TableIoError::InvalidOption(format!(
                "Header too tall: height_header={height_header} exceeds Excel limit."
            ))
        })
}

/// Split `height_data` rows into Excel-compliant sheet slices.
pub fn plan_sheet_slices(
    height_data: usize,
    height_header: usize,
    height_footer: usize,
    sheet_name: &str,
    report: &mut SpecExportReport,
) -> Result<Vec<SpecSheetSlice>> {
    let n_rows_data_max = calculate_sheet_data_capacity(height_header, height_footer)?;

    let mut l_row_slices = Vec::new();
    let mut n_row_start = 0;
    while n_row_start < height_data {
        let n_row_end = usize::min(height_data, n_row_start + n_rows_data_max);
        l_row_slices.push((n_row_start, n_row_end));
        n_row_start = n_row_end;
    }
    if l_row_slices.is_empty() {
        l_row_slices.push((0, 0));
    }

    let n_parts_total = l_row_slices.len();
    let l_sheet_parts: Vec<SpecSheetSlice> = l_row_slices
        .into_iter()
        .enumerate()
        .map(|(n_idx, (row_start, row_end))| SpecSheetSlice {
            sheet_name: derive_sheet_part_name(sheet_name, n_idx + 1),
            row_start_inclusive: row_start,
            row_end_exclusive: row_end,
        })
        .collect();

    if n_parts_total > 1 {
        report.warn(format!(
            "Excel limit overflow: split into {n_parts_total} sheets."
        ));
    }

    Ok(l_sheet_parts)
}

/// Name of the `part_idx_1based`-th sheet: base name first, then `base_2`, `base_3`, ...
pub fn derive_sheet_part_name(base_name: &str, part_idx_1based: usize) -> String {
    if part_idx_1based <= 1 {
        base_name.to_string()
    } else {
        create_sheet_identifier(base_name, part_idx_1based)
    }
}

/// Create suffixed sheet name (`base_1`, `base_2`, ...), respecting length cap.
pub fn create_sheet_identifier(base_name: &str, part_idx_1based: usize) -> String {
    let c_sheet_name_suffix = format!("_{part_idx_1based}");
    let n_len_base_name_max = N_LEN_EXCEL_SHEET_NAME_MAX.saturating_sub(c_sheet_name_suffix.len());

    let c_sheet_name_base: String = base_name
        .chars()
        .take(usize::max(1, n_len_base_name_max))
        .collect();

    format!("{c_sheet_name_base}{c_sheet_name_suffix}")
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HeaderMergeUtils

/// Plan horizontal merges for repeated non-empty header text per row.
pub fn plan_horizontal_merges(
    header_grid: &[Vec<String>],
) -> BTreeMap<usize, Vec<SpecSheetHorizontalMerge>> {
    let mut dict_horizontal_merges_map = BTreeMap::new();

    for (_idx_row, v_str_current_row) in header_grid.iter().enumerate() {
        let n_cols = v_str_current_row.len();
        let mut n_col_idx = 0;

        while n_col_idx < n_cols {
            let c_cell_val = &v_str_current_row[n_col_idx];
            if c_cell_val.is_empty() {
                n_col_idx += 1;
                continue;
            }

            let mut n_col_idx_end = n_col_idx + 1;
            while n_col_idx_end < n_cols && v_str_current_row[n_col_idx_end] == *c_cell_val {
                n_col_idx_end += 1;
            }

            if n_col_idx_end - n_col_idx > 1 {
                dict_horizontal_merges_map
                    .entry(_idx_row)
                    .or_insert_with(Vec::new)
                    .push(SpecSheetHorizontalMerge {
                        row_idx_start: _idx_row,
                        col_idx_start: n_col_idx,
                        col_idx_end: n_col_idx_end - 1,
                        text: c_cell_val.clone(),
                    });
            }
            n_col_idx = n_col_idx_end;
        }
    }

    dict_horizontal_merges_map
}

/// Build lookup set for cells covered by a horizontal merge (excluding anchor).
pub fn derive_horizontal_merge_tracker(
    row_horizontal_merge_mapping: &BTreeMap<usize, Vec<SpecSheetHorizontalMerge>>,
) -> BTreeSet<(usize, usize)> {
    let mut set_merged_cells = BTreeSet::new();

    for (row_idx, horizontal_merges) in row_horizontal_merge_mapping {
        for merge in horizontal_merges {
            for col_idx in (merge.col_idx_start + 1)..=merge.col_idx_end {
                set_merged_cells.insert((*row_idx, col_idx));
            }
        }
    }

    set_merged_cells
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region WidthEstimation

/// Estimate displayed width units for one normalized cell value.
pub fn estimate_width_len(value: &EnumCellValue, value_policy: &SpecValuePolicy) -> usize {
    match value {
        EnumCellValue::None => {
            if value_policy.keep_missing_values {
                value_policy.missing_value_str.len()
            } else {
                0
            }
        }
        EnumCellValue::String(s) | EnumCellValue::Formula(s) => estimate_unicode_string_width(s),
        EnumCellValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{n:.0}").len()
            } else {
                format!("{n:.4}").len()
            }
        }
        EnumCellValue::Int(n) => n.to_string().len(),
        EnumCellValue::Bool(_) => 5,
        EnumCellValue::Date(_) => 10,
        EnumCellValue::DateTime(_) => 19,
    }
}

/// Width of `s` with non-ASCII glyphs counted as 1.6 units.
pub fn estimate_unicode_string_width(s: &str) -> usize {
    let n_ascii = s.chars().filter(|chr| chr.is_ascii()).count();
    let n_non_ascii = s.chars().count().saturating_sub(n_ascii);
    n_ascii + (n_non_ascii as f64 * 1.6).round() as usize
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters_decode() {
        assert_eq!(convert_column_letters_to_index("A"), Some(0));
        assert_eq!(convert_column_letters_to_index("Z"), Some(25));
        assert_eq!(convert_column_letters_to_index("AA"), Some(26));
        assert_eq!(convert_column_letters_to_index("az"), Some(51));
        assert_eq!(convert_column_letters_to_index(""), None);
        assert_eq!(convert_column_letters_to_index("A1"), None);
    }

    #[test]
    fn test_column_letters_encode_inverts_decode() {
        for n_idx in [0usize, 25, 26, 51, 701, 702, 16_383] {
            let c_letters = convert_index_to_column_letters(n_idx);
            assert_eq!(convert_column_letters_to_index(&c_letters), Some(n_idx));
        }
        assert_eq!(convert_index_to_column_letters(27), "AB");
    }

    #[test]
    fn test_excel_serial_round_trip() {
        let d = NaiveDate::from_ymd_opt(2024, 2, 29).expect("date");
        let n_serial = convert_date_to_excel_serial(&d);
        assert_eq!(n_serial, 45351.0);
        assert_eq!(convert_excel_serial_to_datetime(n_serial), Some(EnumCellValue::Date(d)));

        let dt = d.and_hms_opt(12, 30, 0).expect("datetime");
        assert_eq!(
            convert_excel_serial_to_datetime(convert_datetime_to_excel_serial(&dt)),
            Some(EnumCellValue::DateTime(dt))
        );
        assert_eq!(convert_excel_serial_to_datetime(f64::NAN), None);
    }

    #[test]
    fn test_sanitize_sheet_name_replaces_illegal_chars() {
        assert_eq!(sanitize_sheet_name("Q1/Q2: [draft]", "_"), "Q1_Q2_ _draft_");
        assert_eq!(sanitize_sheet_name("   ", "_"), "Sheet");
        assert_eq!(sanitize_sheet_name(&"x".repeat(40), "_").len(), 31);
    }

    #[test]
    fn test_sheet_part_names_keep_length_cap() {
        assert_eq!(derive_sheet_part_name("Orders", 1), "Orders");
        assert_eq!(derive_sheet_part_name("Orders", 2), "Orders_2");
        let c_long = derive_sheet_part_name(&"y".repeat(31), 12);
        assert_eq!(c_long.len(), 31);
        assert!(c_long.ends_with("_12"));
    }

    #[test]
    fn test_plan_sheet_slices_splits_at_row_limit() {
        let mut report = SpecExportReport::default();
        let n_capacity = calculate_sheet_data_capacity(1, 0).expect("capacity");
        let l_parts = plan_sheet_slices(n_capacity + 5, 1, 0, "Data", &mut report).expect("plan");
        assert_eq!(l_parts.len(), 2);
        assert_eq!(l_parts[0].sheet_name, "Data");
        assert_eq!(l_parts[1].sheet_name, "Data_2");
        assert_eq!(l_parts[1].row_end_exclusive - l_parts[1].row_start_inclusive, 5);
        assert_eq!(report.warnings.len(), 1);

        let l_empty = plan_sheet_slices(0, 1, 0, "Data", &mut report).expect("plan");
        assert_eq!(l_empty.len(), 1);
    }

    #[test]
    fn test_plan_horizontal_merges_groups_adjacent_equal_text() {
        let grid = vec![vec![
            "Person".to_string(),
            "Person".to_string(),
            String::new(),
            "Money".to_string(),
            "Money".to_string(),
            "Money".to_string(),
        ]];
        let dict_merges = plan_horizontal_merges(&grid);
        let l_row0 = &dict_merges[&0];
        assert_eq!(l_row0.len(), 2);
        assert_eq!((l_row0[0].col_idx_start, l_row0[0].col_idx_end), (0, 1));
        assert_eq!((l_row0[1].col_idx_start, l_row0[1].col_idx_end), (3, 5));

        let set_covered = derive_horizontal_merge_tracker(&dict_merges);
        assert!(set_covered.contains(&(0, 1)));
        assert!(!set_covered.contains(&(0, 0)));
        assert!(set_covered.contains(&(0, 5)));
    }

    #[test]
    fn test_convert_cell_value_coerces_typed_text() {
        let policy = SpecValuePolicy::default();
        assert_eq!(
            convert_cell_value(&"42".into(), Some(EnumColumnType::Number), &policy),
            EnumCellValue::Int(42)
        );
        assert_eq!(
            convert_cell_value(&"4.5".into(), Some(EnumColumnType::Currency), &policy),
            EnumCellValue::Number(4.5)
        );
        assert_eq!(
            convert_cell_value(&"yes".into(), Some(EnumColumnType::Boolean), &policy),
            EnumCellValue::Bool(true)
        );
        assert!(matches!(
            convert_cell_value(&"2024-02-29".into(), Some(EnumColumnType::Date), &policy),
            EnumCellValue::Date(_)
        ));
        assert_eq!(
            convert_cell_value(&"n/a".into(), Some(EnumColumnType::Number), &policy),
            EnumCellValue::from("n/a")
        );
    }

    #[test]
    fn test_convert_cell_value_applies_missing_policy() {
        let mut policy = SpecValuePolicy::default();
        assert_eq!(
            convert_cell_value(&EnumCellValue::Number(f64::NAN), None, &policy),
            EnumCellValue::None
        );
        policy.keep_missing_values = true;
        assert_eq!(
            convert_cell_value(&EnumCellValue::Number(f64::NEG_INFINITY), None, &policy),
            EnumCellValue::from("-Inf")
        );
        assert_eq!(
            convert_cell_value(&EnumCellValue::None, None, &policy),
            EnumCellValue::from("NA")
        );
    }

    #[test]
    fn test_excel_serial_dates() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        assert_eq!(convert_date_to_excel_serial(&d), 45292.0);
        let dt = d.and_hms_opt(12, 0, 0).expect("datetime");
        assert_eq!(convert_datetime_to_excel_serial(&dt), 45292.5);
    }

    #[test]
    fn test_validate_unique_columns_reports_duplicates() {
        let l_cols = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let err = validate_unique_columns(&l_cols).expect_err("duplicates must fail");
        assert!(err.to_string().contains("\"a\" x2"));
    }
}
