//! Workbook kernel behind every spreadsheet strategy.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::iter::Peekable;
use std::path::Path;

use rust_xlsxwriter::{
    ConditionalFormatCell, ConditionalFormatCellRule, ConditionalFormatText,
    ConditionalFormatTextRule, Format, FormatAlign, FormatBorder, Workbook, Worksheet, XlsxError,
};
use tracing::debug;

use super::{EnumSheetMemoryMode, EnumStyleLevel, SpecXlsxProfile};
use crate::capability::EnumWriterStrategy;
use crate::conf::{
    N_AUTOFIT_SAMPLE_ROWS, N_COLUMN_WIDTH_DEFAULT, N_COLUMN_WIDTH_MAX, N_NCOLS_EXCEL_MAX,
    SpecLocaleConfig, derive_default_xlsx_formats,
};
use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::spec::{
    EnumCellValue, EnumColumnType, EnumConditionalRule, EnumExportEvent, SpecCellFormat,
    SpecColumnDefinition, SpecExportOptions, SpecExportReport, SpecSheetSlice,
};
use crate::transform::RowStream;
use crate::util::{
    calculate_sheet_data_capacity, convert_cell_value, convert_date_to_excel_serial,
    convert_datetime_to_excel_serial, convert_index_to_column_letters,
    derive_horizontal_merge_tracker, derive_sheet_part_name, estimate_unicode_string_width,
    estimate_width_len, plan_horizontal_merges, plan_sheet_slices, sanitize_sheet_name,
    validate_unique_columns,
};
use crate::writer::csv::render_cell_text;
use crate::writer::StagedDestination;

////////////////////////////////////////////////////////////////////////////////
// #region Layout

struct SpecColumnPlan {
    col_type: Option<EnumColumnType>,
    fmt: Option<Format>,
    fmt_totals: Option<Format>,
    width: Option<f64>,
}

struct SpecSheetLayout {
    l_header_grid: Vec<Vec<String>>,
    n_rows_group: usize,
    fmt_header: Option<Format>,
    fmt_group: Option<Format>,
    fmt_totals: Option<Format>,
    fmt_date: Option<Format>,
    fmt_datetime: Option<Format>,
    l_cols: Vec<SpecColumnPlan>,
    col_fallback: SpecColumnPlan,
    l_totals_idx: Vec<usize>,
    l_conditionals: Vec<(usize, EnumConditionalRule, Format)>,
}

impl SpecSheetLayout {
    fn column(&self, n_idx_col: usize) -> &SpecColumnPlan {
        self.l_cols.get(n_idx_col).unwrap_or(&self.col_fallback)
    }

    fn n_rows_header(&self) -> usize {
        self.l_header_grid.len()
    }

    fn n_rows_footer(&self) -> usize {
        usize::from(!self.l_totals_idx.is_empty())
    }
}

fn derive_sheet_layout(
    headers: &[String],
    options: &SpecExportOptions,
    profile: &SpecXlsxProfile,
    report: &mut SpecExportReport,
) -> Result<SpecSheetLayout> {
    if headers.len() > N_NCOLS_EXCEL_MAX {
        return Err(TableIoError::InvalidOption(format!(
            "{} headings exceed the spreadsheet column limit of {N_NCOLS_EXCEL_MAX}.",
            headers.len()
        )));
    }
    validate_unique_columns(headers)?;

    let dict_fmt = derive_default_xlsx_formats();
    let fmt_preset = |key: &str| dict_fmt.get(key).cloned().unwrap_or_default();
    let styles = options.styles.clone().unwrap_or_default();
    let if_full = profile.style == EnumStyleLevel::Full;

    let spec_header = options
        .header_format
        .merge(&styles.header.clone().unwrap_or_default());
    let create_fmt = |spec: SpecCellFormat| -> Option<Format> {
        match profile.style {
            EnumStyleLevel::None => None,
            EnumStyleLevel::Basic => Some(derive_rust_xlsx_format(&spec.to_basic())),
            EnumStyleLevel::Full => Some(derive_rust_xlsx_format(&spec)),
        }
    };

    let mut l_header_grid = Vec::new();
    let mut n_rows_group = 0;
    if options.include_headers && !headers.is_empty() {
        if let Some(l_groups) = &options.heading_groups {
            if profile.if_document_features {
                let mut l_row = l_groups.clone();
                l_row.resize(headers.len(), String::new());
                l_header_grid.push(l_row);
                n_rows_group = 1;
            } else {
                report.warn("Heading groups ignored by streaming writer.");
            }
        }
        l_header_grid.push(headers.to_vec());
    }

    let spec_text = fmt_preset("text");
    let spec_totals = fmt_preset("totals");
    let l_cols = headers
        .iter()
        .map(|key| {
            let col_def = options.column(key);
            let spec_style = styles.columns.get(key).cloned().unwrap_or_default();
            let spec_body = if if_full {
                derive_column_cell_format(&spec_text, col_def, &options.locale).merge(&spec_style)
            } else {
                spec_style
            };
            let fmt = match profile.style {
                EnumStyleLevel::Basic if spec_body.to_basic() == SpecCellFormat::default() => None,
                _ => create_fmt(spec_body.clone()),
            };
            SpecColumnPlan {
                col_type: col_def.map(|col| col.column_type),
                fmt,
                fmt_totals: if_full.then(|| derive_rust_xlsx_format(&spec_body.merge(&spec_totals))),
                width: col_def.and_then(|col| col.width),
            }
        })
        .collect();

    let derive_index = |key: &str, c_what: &str, report: &mut SpecExportReport| {
        let n_idx = headers.iter().position(|h| h == key);
        if n_idx.is_none() {
            report.warn(format!("{c_what} column '{key}' not found among headings; skipped."));
        }
        n_idx
    };

    let mut l_totals_idx = Vec::new();
    let mut l_conditionals = Vec::new();
    if profile.if_document_features {
        for key in &options.totals {
            if let Some(n_idx) = derive_index(key, "Totals", report) {
                l_totals_idx.push(n_idx);
            }
        }
        for cond in &options.conditional_formats {
            if let Some(n_idx) = derive_index(&cond.column, "Conditional format", report) {
                l_conditionals.push((n_idx, cond.rule.clone(), derive_rust_xlsx_format(&cond.format)));
            }
        }
    } else if !options.totals.is_empty() || !options.conditional_formats.is_empty() {
        report.warn("Totals and conditional formats ignored by streaming writer.");
    }
    l_totals_idx.sort_unstable();
    l_totals_idx.dedup();

    Ok(SpecSheetLayout {
        fmt_header: create_fmt(fmt_preset("header").merge(&spec_header)),
        fmt_group: create_fmt(fmt_preset("group").merge(&spec_header.to_basic())),
        fmt_totals: if_full.then(|| derive_rust_xlsx_format(&spec_text.merge(&spec_totals))),
        fmt_date: if_full.then(|| {
            derive_rust_xlsx_format(&spec_text.with_(SpecCellFormat {
                num_format: Some(options.locale.date_format.clone()),
                ..Default::default()
            }))
        }),
        fmt_datetime: if_full.then(|| {
            derive_rust_xlsx_format(&spec_text.with_(SpecCellFormat {
                num_format: Some(options.locale.datetime_format.clone()),
                ..Default::default()
            }))
        }),
        col_fallback: SpecColumnPlan {
            col_type: None,
            fmt: if_full.then(|| derive_rust_xlsx_format(&spec_text)),
            fmt_totals: None,
            width: None,
        },
        l_header_grid,
        n_rows_group,
        l_cols,
        l_totals_idx,
        l_conditionals,
    })
}

/// Body format of one column: text preset, type-driven number format, then
/// the declared format string.
fn derive_column_cell_format(
    spec_text: &SpecCellFormat,
    col_def: Option<&SpecColumnDefinition>,
    locale: &SpecLocaleConfig,
) -> SpecCellFormat {
    let Some(col) = col_def else {
        return spec_text.clone();
    };
    let (num_format, align) = match col.column_type {
        EnumColumnType::Number => (Some(locale.number_format.clone()), None),
        EnumColumnType::Currency => (Some(locale.currency_format.clone()), Some("right")),
        EnumColumnType::Date => (Some(locale.date_format.clone()), None),
        EnumColumnType::Boolean => (None, Some("center")),
        EnumColumnType::String => (None, None),
    };
    spec_text.with_(SpecCellFormat {
        num_format: col.format.clone().or(num_format),
        align: align.map(str::to_string),
        ..Default::default()
    })
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Export

pub(super) fn export_workbook(
    strategy: EnumWriterStrategy,
    profile: &SpecXlsxProfile,
    options: &SpecExportOptions,
    rows: RowStream<'_>,
    headers: &[String],
    path: &Path,
) -> Result<SpecExportReport> {
    let staged = StagedDestination::create(path)?;
    let mut report = SpecExportReport::new(strategy);
    let layout = derive_sheet_layout(headers, options, profile, &mut report)?;
    if profile.if_document_features {
        options.fire(&EnumExportEvent::BeforeExport)?;
    }

    let mut workbook = Workbook::new();
    if profile.if_two_phase {
        let (spill, n_rows) = spill_rows(rows, &layout, options)?;
        debug!(rows = n_rows, "spreadsheet rows spilled");
        let l_slices = plan_sheet_slices(
            n_rows,
            layout.n_rows_header(),
            layout.n_rows_footer(),
            &sanitize_sheet_name(&options.sheet_name, "_"),
            &mut report,
        )?;
        let rows_spilled = iterate_spill(spill);
        write_sheets(
            &mut workbook, rows_spilled, Some(l_slices), &layout, profile, options, &mut report,
        )?;
    } else {
        write_sheets(&mut workbook, rows, None, &layout, profile, options, &mut report)?;
    }

    let mut file = staged.file()?;
    workbook
        .save_to_writer(&mut file)
        .map_err(|err| TableIoError::codec("save_workbook", derive_xlsx_error_text(err)))?;
    drop(file);
    staged.commit()?;
    if profile.if_document_features {
        options.fire(&EnumExportEvent::AfterExport { report: &report })?;
    }
    debug!(
        strategy = %strategy,
        rows = report.rows_written,
        sheets = report.sheets.len(),
        path = %path.display(),
        "spreadsheet written"
    );
    Ok(report)
}

/// Write all rows, rolling over to a new sheet whenever one is full.
///
/// With `l_slices` the sheet plan is fixed in advance; otherwise sheets are
/// opened on demand.
fn write_sheets<'r>(
    workbook: &mut Workbook,
    rows: RowStream<'r>,
    l_slices: Option<Vec<SpecSheetSlice>>,
    layout: &SpecSheetLayout,
    profile: &SpecXlsxProfile,
    options: &SpecExportOptions,
    report: &mut SpecExportReport,
) -> Result<()> {
    let mut rows: Peekable<RowStream<'r>> = rows.peekable();
    let c_base_name = sanitize_sheet_name(&options.sheet_name, "_");
    let n_capacity_max =
        calculate_sheet_data_capacity(layout.n_rows_header(), layout.n_rows_footer())?;
    let cell_writer = SpecCellWriter {
        layout,
        locale: &options.locale,
        if_typed_cells: profile.style == EnumStyleLevel::Full,
    };
    let mut l_buffer: Vec<Row> = Vec::with_capacity(profile.n_buffer_rows);

    let mut n_part = 0usize;
    loop {
        n_part += 1;
        let (c_sheet_name, n_capacity) = match &l_slices {
            Some(l_plan) => match l_plan.get(n_part - 1) {
                Some(slice) => (
                    slice.sheet_name.clone(),
                    slice.row_end_exclusive - slice.row_start_inclusive,
                ),
                None => break,
            },
            None => (derive_sheet_part_name(&c_base_name, n_part), n_capacity_max),
        };
        if n_part == 2 && l_slices.is_none() {
            report.warn("Spreadsheet row limit reached: rows continue on additional sheets.");
        }

        let worksheet = match profile.mode {
            EnumSheetMemoryMode::Standard => workbook.add_worksheet(),
            EnumSheetMemoryMode::Constant => workbook.add_worksheet_with_constant_memory(),
            EnumSheetMemoryMode::Low => workbook.add_worksheet_with_low_memory(),
        };
        worksheet
            .set_name(&c_sheet_name)
            .map_err(derive_xlsx_error)?;
        if profile.if_document_features {
            options.fire(&EnumExportEvent::BeforeSheet { sheet_name: &c_sheet_name })?;
        }

        let mut state = SpecSheetState::new(layout, profile);
        apply_column_setup(worksheet, layout, profile)?;
        write_header(worksheet, layout)?;
        state.observe_header(layout);

        let mut n_rows_sheet = 0usize;
        let mut if_input_done = false;
        while n_rows_sheet < n_capacity {
            l_buffer.clear();
            let n_take = usize::min(profile.n_buffer_rows, n_capacity - n_rows_sheet);
            while l_buffer.len() < n_take {
                match rows.next() {
                    Some(row) => l_buffer.push(row?),
                    None => {
                        if_input_done = true;
                        break;
                    }
                }
            }
            for row in &l_buffer {
                let n_row = layout.n_rows_header() + n_rows_sheet;
                for (n_idx_col, value) in row.values().iter().enumerate() {
                    let value = if profile.if_two_phase {
                        value.clone()
                    } else {
                        convert_cell_value(
                            value,
                            layout.column(n_idx_col).col_type,
                            &options.value_policy,
                        )
                    };
                    cell_writer.write(worksheet, n_row, n_idx_col, &value)?;
                    state.observe_cell(n_idx_col, &value, n_rows_sheet, options);
                }
                n_rows_sheet += 1;
            }
            if profile.n_buffer_rows > 1 && !l_buffer.is_empty() {
                debug!(rows = l_buffer.len(), sheet = %c_sheet_name, "spreadsheet chunk flushed");
            }
            if if_input_done {
                break;
            }
        }
        l_buffer.clear();

        finalize_sheet(worksheet, layout, profile, options, &state, n_rows_sheet)?;
        report.rows_written += n_rows_sheet;
        report.sheets.push(c_sheet_name.clone());
        if profile.if_document_features {
            options.fire(&EnumExportEvent::AfterSheet {
                sheet_name: &c_sheet_name,
                rows: n_rows_sheet,
            })?;
        }
        debug!(sheet = %c_sheet_name, rows = n_rows_sheet, "sheet finished");

        if l_slices.is_none() && (if_input_done || rows.peek().is_none()) {
            break;
        }
    }
    Ok(())
}

struct SpecSheetState {
    if_autofit: bool,
    l_width_by_col: Vec<usize>,
    n_cols_seen: usize,
}

impl SpecSheetState {
    fn new(layout: &SpecSheetLayout, profile: &SpecXlsxProfile) -> Self {
        Self {
            if_autofit: profile.if_autofit,
            l_width_by_col: vec![0; layout.l_cols.len()],
            n_cols_seen: layout.l_cols.len(),
        }
    }

    fn observe_header(&mut self, layout: &SpecSheetLayout) {
        if !self.if_autofit {
            return;
        }
        // Group cells span merged ranges; only headings drive widths.
        if let Some(l_row) = layout.l_header_grid.last() {
            for (n_idx_col, c_text) in l_row.iter().enumerate() {
                self.l_width_by_col[n_idx_col] =
                    self.l_width_by_col[n_idx_col].max(estimate_unicode_string_width(c_text));
            }
        }
    }

    fn observe_cell(
        &mut self,
        n_idx_col: usize,
        value: &EnumCellValue,
        n_row_local: usize,
        options: &SpecExportOptions,
    ) {
        self.n_cols_seen = self.n_cols_seen.max(n_idx_col + 1);
        if !self.if_autofit || n_row_local >= N_AUTOFIT_SAMPLE_ROWS {
            return;
        }
        if self.l_width_by_col.len() <= n_idx_col {
            self.l_width_by_col.resize(n_idx_col + 1, 0);
        }
        self.l_width_by_col[n_idx_col] = self.l_width_by_col[n_idx_col]
            .max(estimate_width_len(value, &options.value_policy));
    }
}

fn apply_column_setup(
    worksheet: &mut Worksheet,
    layout: &SpecSheetLayout,
    profile: &SpecXlsxProfile,
) -> Result<()> {
    for (n_idx_col, col) in layout.l_cols.iter().enumerate() {
        let n_col = cast_col_num(n_idx_col)?;
        let n_width = match (col.width, profile.mode) {
            (Some(n_width), _) => Some(n_width),
            (None, EnumSheetMemoryMode::Low) => Some(N_COLUMN_WIDTH_DEFAULT),
            (None, _) => None,
        };
        if let Some(n_width) = n_width {
            worksheet
                .set_column_width(n_col, n_width)
                .map_err(derive_xlsx_error)?;
        }
    }
    Ok(())
}

fn finalize_sheet(
    worksheet: &mut Worksheet,
    layout: &SpecSheetLayout,
    profile: &SpecXlsxProfile,
    options: &SpecExportOptions,
    state: &SpecSheetState,
    n_rows_sheet: usize,
) -> Result<()> {
    let n_rows_header = layout.n_rows_header();
    let n_cols = state.n_cols_seen;

    if profile.if_document_features && n_rows_sheet > 0 && !layout.l_totals_idx.is_empty() {
        write_totals_row(worksheet, layout, n_rows_header, n_rows_sheet)?;
    }

    if profile.mode == EnumSheetMemoryMode::Low {
        // Column formats go on once the true row count is known.
        for (n_idx_col, col) in layout.l_cols.iter().enumerate() {
            if let Some(fmt) = &col.fmt {
                worksheet
                    .set_column_format(cast_col_num(n_idx_col)?, fmt)
                    .map_err(derive_xlsx_error)?;
            }
        }
    }

    if state.if_autofit {
        for (n_idx_col, n_width_recorded) in state.l_width_by_col.iter().enumerate() {
            if layout.column(n_idx_col).width.is_some() || *n_width_recorded == 0 {
                continue;
            }
            let n_width_final = f64::min(N_COLUMN_WIDTH_MAX, (*n_width_recorded + 2) as f64);
            worksheet
                .set_column_width(cast_col_num(n_idx_col)?, n_width_final)
                .map_err(derive_xlsx_error)?;
        }
    }

    if profile.if_document_features && n_rows_sheet > 0 {
        let n_row_first = cast_row_num(n_rows_header)?;
        let n_row_last = cast_row_num(n_rows_header + n_rows_sheet - 1)?;
        for (n_idx_col, rule, fmt) in &layout.l_conditionals {
            let n_col = cast_col_num(*n_idx_col)?;
            add_conditional_format(worksheet, (n_row_first, n_col, n_row_last, n_col), rule, fmt)?;
        }
    }

    if let Some(n_row_freeze) = options.freeze_row
        && n_row_freeze > 0
    {
        worksheet
            .set_freeze_panes(cast_row_num(n_row_freeze + layout.n_rows_group)?, 0)
            .map_err(derive_xlsx_error)?;
    }

    if options.auto_filter && n_rows_header > 0 && n_cols > 0 {
        let n_row_heading = n_rows_header - 1;
        worksheet
            .autofilter(
                cast_row_num(n_row_heading)?,
                0,
                cast_row_num(n_row_heading + n_rows_sheet)?,
                cast_col_num(n_cols - 1)?,
            )
            .map_err(derive_xlsx_error)?;
    }
    Ok(())
}

fn write_totals_row(
    worksheet: &mut Worksheet,
    layout: &SpecSheetLayout,
    n_rows_header: usize,
    n_rows_sheet: usize,
) -> Result<()> {
    let n_row = n_rows_header + n_rows_sheet;
    let fmt_default = Format::new();
    if !layout.l_totals_idx.contains(&0) {
        worksheet
            .write_string_with_format(
                cast_row_num(n_row)?,
                0,
                "Total",
                layout.fmt_totals.as_ref().unwrap_or(&fmt_default),
            )
            .map_err(derive_xlsx_error)?;
    }
    for n_idx_col in &layout.l_totals_idx {
        let c_col = convert_index_to_column_letters(*n_idx_col);
        let c_formula = format!(
            "=SUM({c_col}{}:{c_col}{})",
            n_rows_header + 1,
            n_rows_header + n_rows_sheet
        );
        let fmt = layout
            .column(*n_idx_col)
            .fmt_totals
            .as_ref()
            .unwrap_or(&fmt_default);
        worksheet
            .write_formula_with_format(cast_row_num(n_row)?, cast_col_num(*n_idx_col)?, c_formula.as_str(), fmt)
            .map_err(derive_xlsx_error)?;
    }
    Ok(())
}

fn add_conditional_format(
    worksheet: &mut Worksheet,
    range: (u32, u16, u32, u16),
    rule: &EnumConditionalRule,
    fmt: &Format,
) -> Result<()> {
    let (n_row_first, n_col_first, n_row_last, n_col_last) = range;
    let derive_cell_rule = |rule_cell: ConditionalFormatCellRule<f64>| {
        ConditionalFormatCell::new()
            .set_rule(rule_cell)
            .set_format(fmt)
    };
    let result = match rule {
        EnumConditionalRule::GreaterThan(v) => worksheet.add_conditional_format(
            n_row_first,
            n_col_first,
            n_row_last,
            n_col_last,
            &derive_cell_rule(ConditionalFormatCellRule::GreaterThan(*v)),
        ),
        EnumConditionalRule::LessThan(v) => worksheet.add_conditional_format(
            n_row_first,
            n_col_first,
            n_row_last,
            n_col_last,
            &derive_cell_rule(ConditionalFormatCellRule::LessThan(*v)),
        ),
        EnumConditionalRule::EqualTo(v) => worksheet.add_conditional_format(
            n_row_first,
            n_col_first,
            n_row_last,
            n_col_last,
            &derive_cell_rule(ConditionalFormatCellRule::EqualTo(*v)),
        ),
        EnumConditionalRule::Between(v_min, v_max) => worksheet.add_conditional_format(
            n_row_first,
            n_col_first,
            n_row_last,
            n_col_last,
            &derive_cell_rule(ConditionalFormatCellRule::Between(*v_min, *v_max)),
        ),
        EnumConditionalRule::TextContains(c_text) => worksheet.add_conditional_format(
            n_row_first,
            n_col_first,
            n_row_last,
            n_col_last,
            &ConditionalFormatText::new()
                .set_rule(ConditionalFormatTextRule::Contains(c_text.clone()))
                .set_format(fmt),
        ),
    };
    result.map(|_| ()).map_err(derive_xlsx_error)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region HybridSpill

/// Phase one of the two-phase writer: normalize rows and park them in an
/// unnamed scratch file as one JSON array per line.
fn spill_rows(
    rows: RowStream<'_>,
    layout: &SpecSheetLayout,
    options: &SpecExportOptions,
) -> Result<(File, usize)> {
    let file = tempfile::tempfile().map_err(|err| TableIoError::io("create_spill_file", err))?;
    let mut sink = BufWriter::new(file);
    let mut n_rows = 0usize;
    for row in rows {
        let row = row?;
        let l_values: Vec<EnumCellValue> = row
            .values()
            .iter()
            .enumerate()
            .map(|(n_idx_col, value)| {
                convert_cell_value(value, layout.column(n_idx_col).col_type, &options.value_policy)
            })
            .collect();
        serde_json::to_writer(&mut sink, &l_values)
            .map_err(|err| TableIoError::codec("spill_row", err))?;
        sink.write_all(b"\n")
            .map_err(|err| TableIoError::io("spill_row", err))?;
        n_rows += 1;
    }
    let mut file = sink
        .into_inner()
        .map_err(|err| TableIoError::io("flush_spill_file", err.error()))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|err| TableIoError::io("rewind_spill_file", err))?;
    Ok((file, n_rows))
}

fn iterate_spill(file: File) -> RowStream<'static> {
    Box::new(BufReader::new(file).lines().map(|line| {
        let c_line = line.map_err(|err| TableIoError::io("read_spill_file", err))?;
        serde_json::from_str::<Vec<EnumCellValue>>(&c_line)
            .map(Row::new)
            .map_err(|err| TableIoError::codec("read_spill_row", err))
    }))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region CellWrites

struct SpecCellWriter<'a> {
    layout: &'a SpecSheetLayout,
    locale: &'a SpecLocaleConfig,
    if_typed_cells: bool,
}

impl SpecCellWriter<'_> {
    fn write(
        &self,
        worksheet: &mut Worksheet,
        row_idx: usize,
        col_idx: usize,
        value: &EnumCellValue,
    ) -> Result<()> {
        let col = self.layout.column(col_idx);
        let fmt = col.fmt.as_ref();
        let if_date_col = col.col_type == Some(EnumColumnType::Date);
        match value {
            EnumCellValue::Date(d) if self.if_typed_cells => write_cell_with_format(
                worksheet,
                row_idx,
                col_idx,
                &EnumCellValue::Number(convert_date_to_excel_serial(d)),
                if if_date_col { fmt } else { self.layout.fmt_date.as_ref() },
            ),
            EnumCellValue::DateTime(dt) if self.if_typed_cells => write_cell_with_format(
                worksheet,
                row_idx,
                col_idx,
                &EnumCellValue::Number(convert_datetime_to_excel_serial(dt)),
                self.layout.fmt_datetime.as_ref(),
            ),
            EnumCellValue::Formula(c_formula) if self.if_typed_cells => {
                let fmt_default = Format::new();
                worksheet
                    .write_formula_with_format(
                        cast_row_num(row_idx)?,
                        cast_col_num(col_idx)?,
                        c_formula.as_str(),
                        fmt.unwrap_or(&fmt_default),
                    )
                    .map(|_| ())
                    .map_err(derive_xlsx_error)
            }
            EnumCellValue::Date(_) | EnumCellValue::DateTime(_) => write_cell_with_format(
                worksheet,
                row_idx,
                col_idx,
                &EnumCellValue::String(render_cell_text(value, self.locale)?),
                fmt,
            ),
            other => write_cell_with_format(worksheet, row_idx, col_idx, other, fmt),
        }
    }
}

fn write_header(worksheet: &mut Worksheet, layout: &SpecSheetLayout) -> Result<()> {
    let header_grid = &layout.l_header_grid;
    let dict_horizontal_merges_by_row = plan_horizontal_merges(&header_grid[..layout.n_rows_group]);
    let set_horizontal_merge_tracker =
        derive_horizontal_merge_tracker(&dict_horizontal_merges_by_row);
    let fmt_default = Format::new();

    for (row_idx, row_values) in header_grid.iter().enumerate() {
        let fmt_row = if row_idx < layout.n_rows_group {
            layout.fmt_group.as_ref()
        } else {
            layout.fmt_header.as_ref()
        };
        let l_merges = dict_horizontal_merges_by_row.get(&row_idx);
        for (col_idx, cell_value) in row_values.iter().enumerate() {
            let if_merge_anchor =
                l_merges.is_some_and(|l| l.iter().any(|m| m.col_idx_start == col_idx));
            if if_merge_anchor || set_horizontal_merge_tracker.contains(&(row_idx, col_idx)) {
                continue;
            }
            write_cell_with_format(
                worksheet,
                row_idx,
                col_idx,
                &EnumCellValue::String(cell_value.clone()),
                fmt_row,
            )?;
        }

        for merge in l_merges.into_iter().flatten() {
            worksheet
                .merge_range(
                    cast_row_num(row_idx)?,
                    cast_col_num(merge.col_idx_start)?,
                    cast_row_num(row_idx)?,
                    cast_col_num(merge.col_idx_end)?,
                    &merge.text,
                    fmt_row.unwrap_or(&fmt_default),
                )
                .map_err(derive_xlsx_error)?;
        }
    }

    Ok(())
}

fn write_cell_with_format(
    worksheet: &mut Worksheet,
    row_idx: usize,
    col_idx: usize,
    value: &EnumCellValue,
    format: Option<&Format>,
) -> Result<()> {
    let (n_row, n_col) = (cast_row_num(row_idx)?, cast_col_num(col_idx)?);
    let result = match (value, format) {
        (EnumCellValue::None, Some(fmt)) => worksheet.write_blank(n_row, n_col, fmt),
        (EnumCellValue::None, None) => return Ok(()),
        (EnumCellValue::String(val), Some(fmt)) if val.is_empty() => {
            worksheet.write_blank(n_row, n_col, fmt)
        }
        (EnumCellValue::String(val), _) if val.is_empty() => return Ok(()),
        (EnumCellValue::String(val), Some(fmt)) => {
            worksheet.write_string_with_format(n_row, n_col, val, fmt)
        }
        (EnumCellValue::String(val), None) => worksheet.write_string(n_row, n_col, val),
        (EnumCellValue::Number(val), Some(fmt)) => {
            worksheet.write_number_with_format(n_row, n_col, *val, fmt)
        }
        (EnumCellValue::Number(val), None) => worksheet.write_number(n_row, n_col, *val),
        (EnumCellValue::Int(val), Some(fmt)) => {
            worksheet.write_number_with_format(n_row, n_col, *val as f64, fmt)
        }
        (EnumCellValue::Int(val), None) => worksheet.write_number(n_row, n_col, *val as f64),
        (EnumCellValue::Bool(val), Some(fmt)) => {
            worksheet.write_boolean_with_format(n_row, n_col, *val, fmt)
        }
        (EnumCellValue::Bool(val), None) => worksheet.write_boolean(n_row, n_col, *val),
        (other, Some(fmt)) => worksheet.write_string_with_format(n_row, n_col, other.to_text(), fmt),
        (other, None) => worksheet.write_string(n_row, n_col, other.to_text()),
    };
    result.map(|_| ()).map_err(derive_xlsx_error)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region FormatConversion

fn derive_rust_xlsx_format(spec: &SpecCellFormat) -> Format {
    let mut format = Format::new();

    if let Some(val) = &spec.font_name {
        format = format.set_font_name(val.clone());
    }
    if let Some(val) = spec.font_size {
        format = format.set_font_size(val as f64);
    }
    if spec.bold.unwrap_or(false) {
        format = format.set_bold();
    }
    if spec.italic.unwrap_or(false) {
        format = format.set_italic();
    }

    if let Some(val) = &spec.align
        && let Some(align) = derive_format_align(val)
    {
        format = format.set_align(align);
    }
    if let Some(val) = &spec.valign
        && let Some(align) = derive_format_valign(val)
    {
        format = format.set_align(align);
    }

    if let Some(val) = &spec.num_format {
        format = format.set_num_format(val.clone());
    }
    if let Some(val) = &spec.bg_color {
        format = format.set_background_color(val.as_str());
    }
    if let Some(val) = &spec.font_color {
        format = format.set_font_color(val.as_str());
    }
    if let Some(val) = spec.border {
        format = format.set_border(derive_format_border(val));
    }
    if spec.text_wrap.unwrap_or(false) {
        format = format.set_text_wrap();
    }

    format
}

fn derive_format_border(border: i64) -> FormatBorder {
    match border {
        1 => FormatBorder::Thin,
        2 => FormatBorder::Medium,
        3 => FormatBorder::Dashed,
        4 => FormatBorder::Dotted,
        5 => FormatBorder::Thick,
        6 => FormatBorder::Double,
        7 => FormatBorder::Hair,
        8 => FormatBorder::MediumDashed,
        9 => FormatBorder::DashDot,
        10 => FormatBorder::MediumDashDot,
        11 => FormatBorder::DashDotDot,
        12 => FormatBorder::MediumDashDotDot,
        13 => FormatBorder::SlantDashDot,
        _ => FormatBorder::None,
    }
}

fn derive_format_align(align: &str) -> Option<FormatAlign> {
    let value = align.trim().to_ascii_lowercase();
    match value.as_str() {
        "general" => Some(FormatAlign::General),
        "left" => Some(FormatAlign::Left),
        "center" => Some(FormatAlign::Center),
        "right" => Some(FormatAlign::Right),
        "fill" => Some(FormatAlign::Fill),
        "justify" => Some(FormatAlign::Justify),
        "center_across" => Some(FormatAlign::CenterAcross),
        "distributed" => Some(FormatAlign::Distributed),
        _ => None,
    }
}

fn derive_format_valign(valign: &str) -> Option<FormatAlign> {
    let value = valign.trim().to_ascii_lowercase();
    match value.as_str() {
        "top" => Some(FormatAlign::Top),
        "center" | "vcenter" | "vertical_center" | "middle" => Some(FormatAlign::VerticalCenter),
        "bottom" => Some(FormatAlign::Bottom),
        "justify" => Some(FormatAlign::VerticalJustify),
        "distributed" => Some(FormatAlign::VerticalDistributed),
        _ => None,
    }
}

fn cast_row_num(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TableIoError::InvalidOption(format!("row index overflow: {value}")))
}

fn cast_col_num(value: usize) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| TableIoError::InvalidOption(format!("column index overflow: {value}")))
}

fn derive_xlsx_error_text(err: XlsxError) -> String {
    format!("xlsx write error: {err}")
}

fn derive_xlsx_error(err: XlsxError) -> TableIoError {
    TableIoError::codec("write_xlsx", derive_xlsx_error_text(err))
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use calamine::{Data, Reader, Xlsx, open_workbook};
    use chrono::NaiveDate;

    use super::*;
    use crate::spec::{
        EnumTableFormat, ExportEventHandler, SpecConditionalFormat, SpecSheetStyles,
    };
    use crate::writer::{TableWriter, XlsxWriter};

    fn headers() -> Vec<String> {
        vec!["name".to_string(), "amount".to_string(), "day".to_string()]
    }

    fn rows(n: usize) -> RowStream<'static> {
        let d = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
        Box::new((0..n).map(move |i| {
            Ok::<_, TableIoError>(Row::new(vec![
                EnumCellValue::String(format!("item-{i}")),
                EnumCellValue::Number(i as f64 - 1.0),
                EnumCellValue::Date(d),
            ]))
        }))
    }

    fn options() -> SpecExportOptions {
        SpecExportOptions {
            format: EnumTableFormat::Xlsx,
            sheet_name: "Data".to_string(),
            columns: vec![
                SpecColumnDefinition::new("amount", EnumColumnType::Currency),
                SpecColumnDefinition::new("day", EnumColumnType::Date).with_width(14.0),
            ],
            ..Default::default()
        }
    }

    fn read_back(path: &Path, sheet: &str) -> Vec<Vec<Data>> {
        let mut workbook: Xlsx<_> = open_workbook(path).expect("open workbook");
        let range = workbook.worksheet_range(sheet).expect("sheet");
        range.rows().map(|row| row.to_vec()).collect()
    }

    #[derive(Default)]
    struct RecordingHandler {
        l_events: Mutex<Vec<String>>,
    }

    impl ExportEventHandler for RecordingHandler {
        fn handle(&self, event: &EnumExportEvent<'_>) -> anyhow::Result<()> {
            let c_event = match event {
                EnumExportEvent::BeforeExport => "before_export".to_string(),
                EnumExportEvent::BeforeSheet { sheet_name } => format!("before_sheet:{sheet_name}"),
                EnumExportEvent::AfterSheet { sheet_name, rows } => {
                    format!("after_sheet:{sheet_name}:{rows}")
                }
                EnumExportEvent::AfterExport { report } => {
                    format!("after_export:{}", report.rows_written)
                }
            };
            self.l_events.lock().expect("lock").push(c_event);
            Ok(())
        }
    }

    #[test]
    fn test_every_strategy_writes_headers_then_rows_in_order() {
        for strategy in [
            EnumWriterStrategy::PlainStreaming,
            EnumWriterStrategy::StyledStreaming,
            EnumWriterStrategy::Document,
            EnumWriterStrategy::ChunkedDocument,
            EnumWriterStrategy::Hybrid,
            EnumWriterStrategy::Default,
        ] {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("out.xlsx");
            let mut opts = options();
            opts.chunk_size = 2;
            let writer = XlsxWriter::try_new(strategy, opts).expect("writer");
            let report = writer.export(rows(5), &headers(), &path).expect("export");
            assert_eq!(report.rows_written, 5, "{strategy}");
            assert_eq!(report.sheets, vec!["Data".to_string()]);
            assert_eq!(report.strategy, Some(strategy));

            let grid = read_back(&path, "Data");
            assert_eq!(grid.len(), 6, "{strategy}");
            assert_eq!(grid[0][0], Data::String("name".to_string()));
            assert_eq!(grid[1][0], Data::String("item-0".to_string()));
            assert_eq!(grid[5][0], Data::String("item-4".to_string()));
            assert_eq!(grid[3][1], Data::Float(1.0));
        }
    }

    #[test]
    fn test_streaming_writes_formulas_and_dates_as_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plain.xlsx");
        let data: RowStream<'static> = Box::new(std::iter::once(Ok::<_, TableIoError>(Row::new(vec![
            EnumCellValue::Formula("=1+1".to_string()),
            EnumCellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 1).expect("date")),
        ]))));
        XlsxWriter::try_new(EnumWriterStrategy::PlainStreaming, options())
            .expect("writer")
            .export(data, &[], &path)
            .expect("export");
        let grid = read_back(&path, "Data");
        assert_eq!(grid[0][0], Data::String("=1+1".to_string()));
        assert_eq!(grid[0][1], Data::String("2024-02-01".to_string()));
    }

    #[test]
    fn test_document_adds_group_row_totals_and_events() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("doc.xlsx");
        let handler = Arc::new(RecordingHandler::default());
        let mut opts = options();
        opts.heading_groups = Some(vec!["Item".to_string(), "Money".to_string(), "Money".to_string()]);
        opts.totals = vec!["amount".to_string(), "missing".to_string()];
        opts.freeze_row = Some(1);
        opts.auto_filter = true;
        opts.conditional_formats = vec![SpecConditionalFormat {
            column: "amount".to_string(),
            rule: EnumConditionalRule::LessThan(0.0),
            format: SpecCellFormat {
                font_color: Some("#C00000".to_string()),
                ..Default::default()
            },
        }];
        opts.styles = Some(SpecSheetStyles::default());
        opts.events = Some(handler.clone() as Arc<dyn ExportEventHandler>);

        let report = XlsxWriter::try_new(EnumWriterStrategy::Document, opts)
            .expect("writer")
            .export(rows(3), &headers(), &path)
            .expect("export");
        assert!(report.warnings.iter().any(|w| w.contains("missing")));

        let grid = read_back(&path, "Data");
        // group row, heading row, 3 data rows, totals row
        assert_eq!(grid.len(), 6);
        assert_eq!(grid[0][0], Data::String("Item".to_string()));
        assert_eq!(grid[0][1], Data::String("Money".to_string()));
        assert_eq!(grid[1][2], Data::String("day".to_string()));
        assert_eq!(grid[5][0], Data::String("Total".to_string()));

        let l_events = handler.l_events.lock().expect("lock").clone();
        assert_eq!(
            l_events,
            vec![
                "before_export".to_string(),
                "before_sheet:Data".to_string(),
                "after_sheet:Data:3".to_string(),
                "after_export:3".to_string(),
            ]
        );
    }

    #[test]
    fn test_streaming_ignores_group_rows_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("styled.xlsx");
        let mut opts = options();
        opts.heading_groups = Some(vec!["G".to_string()]);
        let report = XlsxWriter::try_new(EnumWriterStrategy::StyledStreaming, opts)
            .expect("writer")
            .export(rows(1), &headers(), &path)
            .expect("export");
        assert!(!report.warnings.is_empty());
        assert_eq!(read_back(&path, "Data").len(), 2);
    }

    #[test]
    fn test_column_format_prefers_declared_format() {
        let spec_text = SpecCellFormat::default();
        let locale = SpecLocaleConfig::default();
        let col = SpecColumnDefinition::new("price", EnumColumnType::Currency).with_format("0.000");
        let spec = derive_column_cell_format(&spec_text, Some(&col), &locale);
        assert_eq!(spec.num_format.as_deref(), Some("0.000"));
        assert_eq!(spec.align.as_deref(), Some("right"));

        let col = SpecColumnDefinition::new("when", EnumColumnType::Date);
        let spec = derive_column_cell_format(&spec_text, Some(&col), &locale);
        assert_eq!(spec.num_format.as_deref(), Some("yyyy-mm-dd"));
    }

    #[test]
    fn test_vertical_alignment_maps_to_vertical_variants() {
        let spec = SpecCellFormat {
            align: Some("center".to_string()),
            valign: Some("center".to_string()),
            ..Default::default()
        };
        let fmt_expected = Format::new()
            .set_align(FormatAlign::Center)
            .set_align(FormatAlign::VerticalCenter);
        assert_eq!(derive_rust_xlsx_format(&spec), fmt_expected);

        assert_eq!(derive_format_valign("Top"), Some(FormatAlign::Top));
        assert_eq!(derive_format_valign("bottom"), Some(FormatAlign::Bottom));
        assert_eq!(derive_format_valign("left"), None);
        assert_eq!(derive_format_align("top"), None);
    }

    fn read_sheet_xml(path: &Path) -> String {
        let file = File::open(path).expect("open workbook");
        let mut archive = zip::ZipArchive::new(file).expect("zip");
        let mut entry = archive.by_name("xl/worksheets/sheet1.xml").expect("sheet1.xml");
        let mut c_xml = String::new();
        std::io::Read::read_to_string(&mut entry, &mut c_xml).expect("read xml");
        c_xml
    }

    #[test]
    fn test_freeze_and_filter_apply_to_every_strategy() {
        for strategy in [
            EnumWriterStrategy::Default,
            EnumWriterStrategy::StyledStreaming,
            EnumWriterStrategy::Document,
            EnumWriterStrategy::ChunkedDocument,
            EnumWriterStrategy::Hybrid,
        ] {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("frozen.xlsx");
            let mut opts = options();
            opts.freeze_row = Some(1);
            opts.auto_filter = true;
            let report = XlsxWriter::try_new(strategy, opts)
                .expect("writer")
                .export(rows(3), &headers(), &path)
                .expect("export");
            assert_eq!(report.rows_written, 3);

            let c_xml = read_sheet_xml(&path);
            assert!(c_xml.contains("<pane"), "{strategy}: no frozen pane");
            assert!(c_xml.contains("<autoFilter ref=\"A1:C4\""), "{strategy}: no autofilter");
        }
    }

    #[test]
    fn test_duplicate_headings_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("dup.xlsx");
        let err = XlsxWriter::try_new(EnumWriterStrategy::Document, options())
            .expect("writer")
            .export(rows(1), &["a".to_string(), "a".to_string()], &path)
            .expect_err("duplicate headings");
        assert!(matches!(err, TableIoError::InvalidOption(_)));
    }
}
