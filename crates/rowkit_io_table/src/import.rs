//! Import run: validation, row-to-model conversion, batching and issue
//! aggregation.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Result, TableIoError};
use crate::row::Row;
use crate::spec::{EnumCellValue, EnumHeadingFormat, SpecReadOptions};
use crate::validation::{TypeRuleSet, validate_row};

////////////////////////////////////////////////////////////////////////////////
// #region Issues

/// Validation failure of one attribute in one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecFailure {
    /// 1-based source row number.
    pub row_number: usize,
    /// Attribute key that failed.
    pub attribute: String,
    /// Every message produced for the attribute.
    pub errors: Vec<String>,
    /// Row values as read, keyed by heading.
    pub values: Vec<(String, EnumCellValue)>,
}

/// Processing error raised while converting or persisting one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecRowError {
    /// 1-based source row number.
    pub row_number: usize,
    /// Error text, including its context chain.
    pub cause: String,
}

impl fmt::Display for SpecRowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}", self.row_number, self.cause)
    }
}

/// Issue counts of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpecIssueSummary {
    /// Collected validation failures.
    pub failure_count: usize,
    /// Collected processing errors.
    pub error_count: usize,
    /// Sum of both.
    pub total_issues: usize,
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Aggregator

/// Lifecycle of one import run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum EnumImportState {
    /// Run created, nothing read yet.
    NotStarted,
    /// Source opened.
    Reading,
    /// Rows flowing through validation and conversion.
    RowProcessing,
    /// Every row consumed.
    Completed,
}

/// Collects failures and errors of one run without interrupting it.
#[derive(Debug, Clone)]
pub struct ImportAggregator {
    state: EnumImportState,
    l_failures: Vec<SpecFailure>,
    l_errors: Vec<SpecRowError>,
}

impl Default for ImportAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportAggregator {
    /// Fresh aggregator in `NotStarted`.
    pub fn new() -> Self {
        Self {
            state: EnumImportState::NotStarted,
            l_failures: Vec::new(),
            l_errors: Vec::new(),
        }
    }

    /// Current state.
    pub fn state(&self) -> EnumImportState {
        self.state
    }

    /// Move forward to `next`. States only advance; a backward move is an
    /// invalid option.
    pub fn advance(&mut self, next: EnumImportState) -> Result<()> {
        if next < self.state {
            return Err(TableIoError::InvalidOption(format!(
                "import state cannot move from {:?} back to {next:?}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record a validation failure.
    pub fn add_failure(&mut self, failure: SpecFailure) {
        debug!(row = failure.row_number, attribute = %failure.attribute, "row failed validation");
        self.l_failures.push(failure);
    }

    /// Record a processing error for `row_number`.
    pub fn add_error(&mut self, row_number: usize, cause: impl fmt::Display) {
        let c_cause = cause.to_string();
        debug!(row = row_number, cause = %c_cause, "row processing error");
        self.l_errors.push(SpecRowError {
            row_number,
            cause: c_cause,
        });
    }

    /// Whether anything was recorded.
    pub fn has_issues(&self) -> bool {
        !self.l_failures.is_empty() || !self.l_errors.is_empty()
    }

    /// Issue counts.
    pub fn summary(&self) -> SpecIssueSummary {
        SpecIssueSummary {
            failure_count: self.l_failures.len(),
            error_count: self.l_errors.len(),
            total_issues: self.l_failures.len() + self.l_errors.len(),
        }
    }

    /// Collected failures in row order.
    pub fn failures(&self) -> &[SpecFailure] {
        &self.l_failures
    }

    /// Collected errors in row order.
    pub fn errors(&self) -> &[SpecRowError] {
        &self.l_errors
    }

    fn into_parts(self) -> (Vec<SpecFailure>, Vec<SpecRowError>) {
        (self.l_failures, self.l_errors)
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Result

/// Outcome of one import run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpecImportResult {
    /// Data rows read from the source.
    pub total_rows: usize,
    /// Rows converted and persisted.
    pub imported_rows: usize,
    /// Rows with at least one validation failure.
    pub failed_rows: usize,
    /// Rows with a processing error.
    pub error_rows: usize,
    /// Rows the conversion hook chose to skip.
    pub skipped_rows: usize,
    /// Collected validation failures.
    pub failures: Vec<SpecFailure>,
    /// Collected processing errors.
    pub errors: Vec<SpecRowError>,
    /// Wall time of the run.
    pub duration: Duration,
    /// Peak resident memory of the process, when the platform reports it.
    pub peak_memory_bytes: Option<u64>,
    /// Terminal state.
    pub state: EnumImportState,
}

impl SpecImportResult {
    /// Percentage of rows imported; `100.0` for an empty source.
    pub fn success_rate(&self) -> f64 {
        if self.total_rows == 0 {
            return 100.0;
        }
        self.imported_rows as f64 / self.total_rows as f64 * 100.0
    }

    /// Completed with no failures and no errors.
    pub fn is_successful(&self) -> bool {
        self.state == EnumImportState::Completed
            && self.failures.is_empty()
            && self.errors.is_empty()
    }

    /// Issue counts.
    pub fn summary(&self) -> SpecIssueSummary {
        SpecIssueSummary {
            failure_count: self.failures.len(),
            error_count: self.errors.len(),
            total_issues: self.failures.len() + self.errors.len(),
        }
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Declaration

/// Caller side of an import: which rows to read, how to check them and what
/// to build from them.
pub trait ImportDeclaration {
    /// Model built from one row.
    type Model;

    /// Row-to-model conversion; `None` skips the row.
    fn model(&mut self, row: &Row) -> Option<anyhow::Result<Self::Model>>;

    /// Persist one batch of models.
    fn persist(&mut self, _batch: Vec<Self::Model>) -> anyhow::Result<()> {
        Ok(())
    }

    /// 1-based row holding headings.
    fn heading_row(&self) -> Option<usize> {
        None
    }

    /// Heading key normalization.
    fn heading_format(&self) -> EnumHeadingFormat {
        EnumHeadingFormat::Slug
    }

    /// Base reader options; heading settings above override theirs.
    fn read_options(&self) -> SpecReadOptions {
        SpecReadOptions::default()
    }

    /// Validation rules per attribute.
    fn rules(&self) -> TypeRuleSet {
        TypeRuleSet::new()
    }

    /// Extra row-level checks; returns messages per attribute.
    fn validate_row(&self, _row: &Row) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Keep going past validation failures instead of failing the run.
    fn skips_on_failure(&self) -> bool {
        false
    }

    /// Keep going past processing errors instead of failing the run.
    fn skips_on_error(&self) -> bool {
        false
    }

    /// Models handed to `persist` per call.
    fn batch_size(&self) -> Option<usize> {
        None
    }
}

/// Reader options for `declaration`.
pub fn derive_import_read_options<D: ImportDeclaration + ?Sized>(declaration: &D) -> SpecReadOptions {
    let mut options = declaration.read_options();
    if let Some(n_row) = declaration.heading_row() {
        options.heading_row = Some(n_row);
        options.heading_format = declaration.heading_format();
    }
    options
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region Run

struct SpecPendingBatch<M> {
    l_models: Vec<M>,
    l_row_numbers: Vec<usize>,
    n_size: usize,
}

impl<M> SpecPendingBatch<M> {
    fn is_full(&self) -> bool {
        self.l_models.len() >= self.n_size
    }

    fn flush<D>(&mut self, declaration: &mut D, aggregator: &mut ImportAggregator) -> usize
    where
        D: ImportDeclaration<Model = M> + ?Sized,
    {
        if self.l_models.is_empty() {
            return 0;
        }
        let l_models = std::mem::take(&mut self.l_models);
        let l_rows = std::mem::take(&mut self.l_row_numbers);
        match declaration.persist(l_models) {
            Ok(()) => l_rows.len(),
            Err(err) => {
                let c_cause = format!("{err:#}");
                for n_row in l_rows {
                    aggregator.add_error(n_row, &c_cause);
                }
                0
            }
        }
    }
}

/// Run `declaration` over numbered rows.
///
/// Every row is read even when some fail; escalation to an aggregate error
/// happens once at the end, and only for issue kinds the declaration does
/// not skip.
pub fn run_import<D, I>(declaration: &mut D, rows: I) -> Result<SpecImportResult>
where
    D: ImportDeclaration + ?Sized,
    I: IntoIterator<Item = Result<(usize, Row)>>,
{
    let t_start = Instant::now();
    let mut aggregator = ImportAggregator::new();
    aggregator.advance(EnumImportState::Reading)?;

    let rules = declaration.rules();
    let mut batch = SpecPendingBatch {
        l_models: Vec::new(),
        l_row_numbers: Vec::new(),
        n_size: declaration.batch_size().unwrap_or(1).max(1),
    };
    let (mut n_total, mut n_imported, mut n_failed, mut n_skipped) = (0usize, 0usize, 0usize, 0usize);

    for item in rows {
        let (n_row, row) = item?;
        if aggregator.state() == EnumImportState::Reading {
            aggregator.advance(EnumImportState::RowProcessing)?;
        }
        n_total += 1;

        let mut dict_errors = validate_row(&row, &rules);
        for (c_attr, c_msg) in declaration.validate_row(&row) {
            dict_errors.entry(c_attr).or_default().push(c_msg);
        }
        if !dict_errors.is_empty() {
            let l_values = row.to_pairs();
            for (c_attr, l_msgs) in dict_errors {
                aggregator.add_failure(SpecFailure {
                    row_number: n_row,
                    attribute: c_attr,
                    errors: l_msgs,
                    values: l_values.clone(),
                });
            }
            n_failed += 1;
            continue;
        }

        match declaration.model(&row) {
            None => n_skipped += 1,
            Some(Ok(model)) => {
                batch.l_models.push(model);
                batch.l_row_numbers.push(n_row);
                if batch.is_full() {
                    n_imported += batch.flush(declaration, &mut aggregator);
                }
            }
            Some(Err(err)) => {
                aggregator.add_error(n_row, format!("{err:#}"));
            }
        }
    }
    n_imported += batch.flush(declaration, &mut aggregator);
    aggregator.advance(EnumImportState::Completed)?;

    let summary = aggregator.summary();
    let n_error_rows = aggregator
        .errors()
        .iter()
        .map(|err| err.row_number)
        .collect::<BTreeSet<_>>()
        .len();
    let if_escalate_failures = summary.failure_count > 0 && !declaration.skips_on_failure();
    let if_escalate_errors = summary.error_count > 0 && !declaration.skips_on_error();
    let (l_failures, l_errors) = aggregator.into_parts();

    if if_escalate_failures {
        warn!(failures = l_failures.len(), rows = n_total, "import failed validation");
        return Err(TableIoError::ValidationAggregate {
            failures: l_failures,
        });
    }
    if if_escalate_errors {
        warn!(errors = l_errors.len(), rows = n_total, "import hit row processing errors");
        return Err(TableIoError::RowProcessingAggregate { errors: l_errors });
    }

    let result = SpecImportResult {
        total_rows: n_total,
        imported_rows: n_imported,
        failed_rows: n_failed,
        error_rows: n_error_rows,
        skipped_rows: n_skipped,
        failures: l_failures,
        errors: l_errors,
        duration: t_start.elapsed(),
        peak_memory_bytes: derive_peak_memory_bytes(),
        state: EnumImportState::Completed,
    };
    info!(
        total = result.total_rows,
        imported = result.imported_rows,
        failed = result.failed_rows,
        errors = result.error_rows,
        elapsed_ms = result.duration.as_millis() as u64,
        "import completed"
    );
    Ok(result)
}

/// Peak resident set size from `/proc/self/status` (`VmHWM`).
pub fn derive_peak_memory_bytes() -> Option<u64> {
    let c_status = std::fs::read_to_string("/proc/self/status").ok()?;
    let c_line = c_status.lines().find(|line| line.starts_with("VmHWM:"))?;
    let n_kib = c_line
        .trim_start_matches("VmHWM:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse::<u64>()
        .ok()?;
    Some(n_kib * 1024)
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::anyhow;

    use super::*;
    use crate::validation::parse_rule_set;

    struct PeopleImport {
        if_skip_failures: bool,
        if_skip_errors: bool,
        n_model_calls: usize,
        l_persisted: Vec<Vec<String>>,
    }

    impl PeopleImport {
        fn new(if_skip_failures: bool) -> Self {
            Self {
                if_skip_failures,
                if_skip_errors: false,
                n_model_calls: 0,
                l_persisted: Vec::new(),
            }
        }
    }

    impl ImportDeclaration for PeopleImport {
        type Model = String;

        fn model(&mut self, row: &Row) -> Option<anyhow::Result<String>> {
            self.n_model_calls += 1;
            let c_name = row.get_by_name("name")?.to_text();
            if c_name == "boom" {
                return Some(Err(anyhow!("cannot build model")));
            }
            Some(Ok(c_name))
        }

        fn persist(&mut self, batch: Vec<String>) -> anyhow::Result<()> {
            self.l_persisted.push(batch);
            Ok(())
        }

        fn rules(&self) -> TypeRuleSet {
            parse_rule_set([("age", vec!["required", "integer"])]).expect("rules")
        }

        fn skips_on_failure(&self) -> bool {
            self.if_skip_failures
        }

        fn skips_on_error(&self) -> bool {
            self.if_skip_errors
        }

        fn batch_size(&self) -> Option<usize> {
            Some(4)
        }
    }

    fn rows(n: usize, n_bad: usize) -> Vec<Result<(usize, Row)>> {
        let headings: Arc<[String]> = vec!["name".to_string(), "age".to_string()].into();
        (1..=n)
            .map(|n_row| {
                let age = if n_row == n_bad {
                    EnumCellValue::String("old".to_string())
                } else {
                    EnumCellValue::Int(20 + n_row as i64)
                };
                Ok((
                    n_row,
                    Row::new(vec![format!("p{n_row}").into(), age]).with_headings(headings.clone()),
                ))
            })
            .collect()
    }

    #[test]
    fn test_skip_on_failure_imports_remaining_rows() {
        let mut decl = PeopleImport::new(true);
        let result = run_import(&mut decl, rows(10, 5)).expect("import");
        assert_eq!(result.total_rows, 10);
        assert_eq!(result.failed_rows, 1);
        assert_eq!(result.imported_rows, 9);
        assert_eq!(result.failures[0].row_number, 5);
        assert_eq!(result.failures[0].attribute, "age");
        assert!(!result.is_successful());
        assert_eq!(decl.l_persisted.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 1]);
    }

    #[test]
    fn test_without_skip_every_row_is_read_before_escalation() {
        let mut decl = PeopleImport::new(false);
        let err = run_import(&mut decl, rows(10, 5)).expect_err("aggregate");
        let TableIoError::ValidationAggregate { failures } = err else {
            panic!("expected validation aggregate");
        };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].row_number, 5);
        assert_eq!(decl.n_model_calls, 9);
    }

    #[test]
    fn test_processing_errors_escalate_unless_skipped() {
        let headings: Arc<[String]> = vec!["name".to_string(), "age".to_string()].into();
        let make_rows = || {
            vec![
                Ok((1, Row::new(vec!["ok".into(), 1i64.into()]).with_headings(headings.clone()))),
                Ok((2, Row::new(vec!["boom".into(), 2i64.into()]).with_headings(headings.clone()))),
            ]
        };

        let mut decl = PeopleImport::new(false);
        let err = run_import(&mut decl, make_rows()).expect_err("aggregate");
        assert!(matches!(err, TableIoError::RowProcessingAggregate { ref errors } if errors.len() == 1));

        let mut decl = PeopleImport::new(false);
        decl.if_skip_errors = true;
        let result = run_import(&mut decl, make_rows()).expect("import");
        assert_eq!(result.error_rows, 1);
        assert_eq!(result.imported_rows, 1);
        assert_eq!(result.errors[0].row_number, 2);
    }

    #[test]
    fn test_empty_source_has_full_success_rate() {
        let mut decl = PeopleImport::new(false);
        let result = run_import(&mut decl, Vec::new()).expect("import");
        assert_eq!(result.total_rows, 0);
        assert_eq!(result.success_rate(), 100.0);
        assert!(result.is_successful());
    }

    #[test]
    fn test_aggregator_summary_and_state_order() {
        let mut aggregator = ImportAggregator::new();
        assert_eq!(aggregator.state(), EnumImportState::NotStarted);
        aggregator.advance(EnumImportState::RowProcessing).expect("forward");
        assert!(aggregator.advance(EnumImportState::Reading).is_err());
        aggregator.add_error(3, "bad");
        assert!(aggregator.has_issues());
        assert_eq!(
            aggregator.summary(),
            SpecIssueSummary {
                failure_count: 0,
                error_count: 1,
                total_issues: 1
            }
        );
    }
}
