//! Export and import services: the caller-facing entry points.
//!
//! Each call plans once (options snapshot, capability set, writer strategy),
//! then runs a single pull pipeline from source to destination. Services hold
//! only the immutable configuration, so one instance can serve concurrent
//! calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info};

use crate::capability::{
    EnumWriterStrategy, ExportDeclaration, SpecWriterCapabilities, select_writer_strategy,
};
use crate::conf::{SpecTableIoConfig, derive_default_xlsx_formats};
use crate::error::{Result, TableIoError};
use crate::import::{ImportDeclaration, SpecImportResult, derive_import_read_options, run_import};
use crate::reader::create_reader_for_path;
use crate::row::Row;
use crate::source::adapt;
use crate::spec::{
    EnumCellValue, EnumColumnType, EnumConditionalRule, EnumTableFormat, SpecConditionalFormat,
    SpecExportOptions, SpecExportReport, SpecReadOptions,
};
use crate::transform::{RowStream, RowTransformer};
use crate::writer::{SpecStreamResponse, SpecTransportResponse, TableWriter, create_writer};

////////////////////////////////////////////////////////////////////////////////
// #region Collaborators

/// Destination for stored exports.
pub trait StorageAdapter {
    /// Store `bytes` under the storage-relative `path`.
    fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()>;
}

/// Storage rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Store below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Absolute location of a storage-relative path.
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl StorageAdapter for LocalStorage {
    fn put(&self, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path_full = self.resolve(path);
        if let Some(parent) = path_full.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path_full, bytes)?;
        Ok(())
    }
}

/// Deferred unit of work. Nothing runs until [`QueuedJob::run`].
pub struct QueuedJob<T> {
    c_name: String,
    job: Box<dyn FnOnce() -> Result<T> + Send>,
}

impl<T> QueuedJob<T> {
    fn new(name: impl Into<String>, job: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        Self {
            c_name: name.into(),
            job: Box::new(job),
        }
    }

    /// Job label for logs and queues.
    pub fn name(&self) -> &str {
        &self.c_name
    }

    /// Execute the job on the current thread.
    pub fn run(self) -> Result<T> {
        debug!(job = %self.c_name, "running queued job");
        (self.job)()
    }
}

impl<T> std::fmt::Debug for QueuedJob<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedJob").field("name", &self.c_name).finish_non_exhaustive()
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ExportService

/// Resolved plan of one export call.
#[derive(Debug, Clone)]
pub struct SpecExportPlan {
    /// Options snapshot handed to the writer.
    pub options: SpecExportOptions,
    /// Capability set read from the declaration.
    pub capabilities: SpecWriterCapabilities,
    /// Spreadsheet strategy; ignored by text formats.
    pub strategy: EnumWriterStrategy,
}

/// Export entry point bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct ExportService {
    config: SpecTableIoConfig,
}

impl ExportService {
    /// Create the service; the configuration is validated once here.
    pub fn new(config: SpecTableIoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Bound configuration.
    pub fn config(&self) -> &SpecTableIoConfig {
        &self.config
    }

    /// Resolve options, capabilities and strategy for `declaration`.
    pub fn plan<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        format: EnumTableFormat,
    ) -> SpecExportPlan {
        let mut options = self.config.derive_export_options(format);
        if let Some(c_sheet) = declaration.sheet_name() {
            options.sheet_name = c_sheet;
        }
        if let Some(l_cols) = declaration.columns() {
            options.columns = l_cols;
        }
        options.styles = declaration.styles();
        if let Some(l_rules) = declaration.conditional_formats() {
            options.conditional_formats = l_rules;
        }
        options.events = declaration.events();
        if let Some(n_row) = declaration.freeze_row() {
            options.freeze_row = Some(n_row).filter(|n| *n > 0);
        }
        if let Some(if_filter) = declaration.auto_filter() {
            options.auto_filter = if_filter;
        }
        if let Some(l_totals) = declaration.totals() {
            options.totals = l_totals;
        }
        options.heading_groups = declaration.heading_groups();
        if let Some(n_chunk) = declaration.chunk_size() {
            options.chunk_size = n_chunk.max(1);
        }

        let mut capabilities = SpecWriterCapabilities::from_declaration(declaration);
        // Config defaults count as declared unless the declaration overrode them.
        capabilities.has_freeze_row = options.freeze_row.is_some();
        capabilities.has_auto_filter = options.auto_filter;
        if self.config.excel.conditional_coloring && options.conditional_formats.is_empty() {
            options.conditional_formats = derive_negative_coloring(&options);
            capabilities.has_conditional_formatting |= !options.conditional_formats.is_empty();
        }
        let strategy = select_writer_strategy(&capabilities);
        SpecExportPlan {
            options,
            capabilities,
            strategy,
        }
    }

    /// Format for `path`: explicit choice, then extension, then config default.
    pub fn resolve_format(&self, path: &Path, format: Option<EnumTableFormat>) -> EnumTableFormat {
        format
            .or_else(|| EnumTableFormat::from_path(path))
            .unwrap_or(self.config.default_format)
    }

    /// Export `declaration` to `path`.
    pub fn export<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        path: &Path,
        format: Option<EnumTableFormat>,
    ) -> Result<SpecExportReport> {
        let format = self.resolve_format(path, format);
        let t_start = Instant::now();
        let (writer, rows, headers, strategy) = self.prepare(declaration, format)?;
        info!(format = format.extension(), %strategy, path = %path.display(), "export started");
        let mut report = writer.export(rows, &headers, path)?;
        report.strategy = writer.strategy();
        info!(
            format = format.extension(),
            %strategy,
            rows = report.rows_written,
            elapsed_ms = t_start.elapsed().as_millis() as u64,
            "export finished"
        );
        Ok(report)
    }

    /// Render `declaration` to bytes in `format`.
    pub fn raw<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        format: EnumTableFormat,
    ) -> Result<Vec<u8>> {
        let (writer, rows, headers, _) = self.prepare(declaration, format)?;
        writer.to_bytes(rows, &headers)
    }

    /// In-memory downloadable response; format follows `filename`.
    pub fn download<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        filename: &str,
    ) -> Result<SpecTransportResponse> {
        let format = self.resolve_format(Path::new(filename), None);
        let (writer, rows, headers, _) = self.prepare(declaration, format)?;
        writer.download(rows, &headers, filename)
    }

    /// Chunked downloadable response backed by an anonymous temp file.
    pub fn stream<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        filename: &str,
    ) -> Result<SpecStreamResponse> {
        let format = self.resolve_format(Path::new(filename), None);
        let (writer, rows, headers, _) = self.prepare(declaration, format)?;
        writer.stream(rows, &headers, filename)
    }

    /// Export into `storage` under `path`.
    pub fn store<D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &D,
        storage: &dyn StorageAdapter,
        path: &str,
        format: Option<EnumTableFormat>,
    ) -> Result<SpecExportReport> {
        let format = self.resolve_format(Path::new(path), format);
        let tmp = tempfile::Builder::new()
            .prefix("rowkit-store-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile()
            .map_err(|err| TableIoError::io("create_scratch_file", err))?;
        let report = self.export(declaration, tmp.path(), Some(format))?;
        let bytes = fs::read(tmp.path()).map_err(|err| TableIoError::io("read_scratch_file", err))?;
        storage
            .put(path, &bytes)
            .map_err(|err| TableIoError::destination(path, format!("{err:#}")))?;
        debug!(path, bytes = bytes.len(), "export stored");
        Ok(report)
    }

    /// Deferred export of an owned declaration to `path`.
    pub fn queue<D>(
        &self,
        declaration: D,
        path: impl Into<PathBuf>,
        format: Option<EnumTableFormat>,
    ) -> QueuedJob<SpecExportReport>
    where
        D: ExportDeclaration + Send + 'static,
    {
        let service = self.clone();
        let path = path.into();
        QueuedJob::new(format!("export:{}", path.display()), move || {
            service.export(&declaration, &path, format)
        })
    }

    fn prepare<'d, D: ExportDeclaration + ?Sized>(
        &self,
        declaration: &'d D,
        format: EnumTableFormat,
    ) -> Result<(Box<dyn TableWriter>, RowStream<'d>, Vec<String>, EnumWriterStrategy)> {
        let plan = self.plan(declaration, format);
        debug!(
            strategy = %plan.strategy,
            capabilities = ?plan.capabilities,
            "export planned"
        );
        let strategy = plan.strategy;
        let writer = create_writer(strategy, plan.options)?;
        let records = adapt(declaration)?;
        let rows = RowTransformer::new(declaration).transform_stream(records);
        let (rows, headers) = derive_headings(declaration, rows);
        Ok((writer, rows, headers, strategy))
    }
}

/// Declared headings, or the keys of the first row when none are declared.
fn derive_headings<'d, D: ExportDeclaration + ?Sized>(
    declaration: &D,
    rows: RowStream<'d>,
) -> (RowStream<'d>, Vec<String>) {
    if let Some(l_headings) = declaration.headings() {
        return (rows, l_headings);
    }
    let mut it_rows = rows.peekable();
    let l_headings = match it_rows.peek() {
        Some(Ok(row)) => row.headings().map(<[String]>::to_vec).unwrap_or_default(),
        _ => Vec::new(),
    };
    (Box::new(it_rows), l_headings)
}

/// Red font for negative values in every numeric column.
fn derive_negative_coloring(options: &SpecExportOptions) -> Vec<SpecConditionalFormat> {
    let fmt_negative = derive_default_xlsx_formats()
        .remove("negative")
        .unwrap_or_default();
    options
        .columns
        .iter()
        .filter(|col| matches!(col.column_type, EnumColumnType::Number | EnumColumnType::Currency))
        .map(|col| SpecConditionalFormat {
            column: col.key.clone(),
            rule: EnumConditionalRule::LessThan(0.0),
            format: fmt_negative.clone(),
        })
        .collect()
}

// #endregion
////////////////////////////////////////////////////////////////////////////////
// #region ImportService

/// Import entry point bound to one configuration.
#[derive(Debug, Clone, Default)]
pub struct ImportService {
    config: SpecTableIoConfig,
}

impl ImportService {
    /// Create the service; the configuration is validated once here.
    pub fn new(config: SpecTableIoConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    fn derive_read_options(&self, mut options: SpecReadOptions) -> SpecReadOptions {
        if options.csv == Default::default() {
            options.csv = self.config.csv.clone();
        }
        options
    }

    /// Read `path` into `declaration`.
    pub fn import<D: ImportDeclaration + ?Sized>(
        &self,
        declaration: &mut D,
        path: &Path,
    ) -> Result<SpecImportResult> {
        let options = self.derive_read_options(derive_import_read_options(declaration));
        let reader = create_reader_for_path(path)?;
        debug!(path = %path.display(), format = reader.format().extension(), "import started");
        let rows = reader.read(path, &options)?;
        run_import(declaration, rows)
    }

    /// Plain value rows of `path`.
    pub fn to_array(&self, path: &Path, options: &SpecReadOptions) -> Result<Vec<Vec<EnumCellValue>>> {
        Ok(self
            .to_collection(path, options)?
            .into_iter()
            .map(Row::into_values)
            .collect())
    }

    /// Rows of `path`, keyed by heading when a heading row is configured.
    pub fn to_collection(&self, path: &Path, options: &SpecReadOptions) -> Result<Vec<Row>> {
        let options = self.derive_read_options(options.clone());
        let reader = create_reader_for_path(path)?;
        reader
            .read(path, &options)?
            .map(|item| item.map(|(_, row)| row))
            .collect()
    }

    /// Deferred import of an owned declaration.
    pub fn queue_import<D>(&self, mut declaration: D, path: impl Into<PathBuf>) -> QueuedJob<SpecImportResult>
    where
        D: ImportDeclaration + Send + 'static,
    {
        let service = self.clone();
        let path = path.into();
        QueuedJob::new(format!("import:{}", path.display()), move || {
            service.import(&mut declaration, &path)
        })
    }
}

// #endregion
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::source::{EnumDataSource, EnumRawRecord};
    use crate::spec::SpecColumnDefinition;
    use crate::validation::{TypeRuleSet, parse_rule_set};

    struct UsersExport {
        n_rows: i64,
        if_chunked: bool,
    }

    impl ExportDeclaration for UsersExport {
        fn data_source(&self) -> Option<EnumDataSource<'_>> {
            let headings: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
            Some(EnumDataSource::Collection(
                (1..=self.n_rows)
                    .map(|i| {
                        EnumRawRecord::Row(
                            Row::new(vec![i.into(), format!("user-{i}").into()])
                                .with_headings(headings.clone()),
                        )
                    })
                    .collect(),
            ))
        }

        fn chunk_size(&self) -> Option<usize> {
            self.if_chunked.then_some(2)
        }

        fn auto_filter(&self) -> Option<bool> {
            self.if_chunked.then_some(true)
        }
    }

    struct NoSource;

    impl ExportDeclaration for NoSource {}

    #[test]
    fn test_headings_come_from_first_row_when_not_declared() {
        let service = ExportService::default();
        let c_out = String::from_utf8(
            service
                .raw(&UsersExport { n_rows: 2, if_chunked: false }, EnumTableFormat::Csv)
                .expect("raw"),
        )
        .expect("utf8");
        assert_eq!(c_out, "id,name\n1,user-1\n2,user-2\n");
    }

    #[test]
    fn test_plan_selects_strategy_from_capabilities() {
        let service = ExportService::default();
        let plan = service.plan(&UsersExport { n_rows: 1, if_chunked: true }, EnumTableFormat::Xlsx);
        assert_eq!(plan.strategy, EnumWriterStrategy::Hybrid);
        assert!(plan.options.auto_filter);
        assert_eq!(plan.options.chunk_size, 2);

        let plan = service.plan(&UsersExport { n_rows: 1, if_chunked: false }, EnumTableFormat::Xlsx);
        assert_eq!(plan.strategy, EnumWriterStrategy::Default);
    }

    #[test]
    fn test_conditional_coloring_targets_numeric_columns() {
        struct Priced;
        impl ExportDeclaration for Priced {
            fn columns(&self) -> Option<Vec<SpecColumnDefinition>> {
                Some(vec![
                    SpecColumnDefinition::new("name", EnumColumnType::String),
                    SpecColumnDefinition::new("price", EnumColumnType::Currency),
                ])
            }
        }
        let mut config = SpecTableIoConfig::default();
        config.excel.conditional_coloring = true;
        let plan = ExportService::new(config).expect("service").plan(&Priced, EnumTableFormat::Xlsx);
        assert_eq!(plan.options.conditional_formats.len(), 1);
        assert_eq!(plan.options.conditional_formats[0].column, "price");
        assert!(plan.capabilities.has_conditional_formatting);
        assert_eq!(plan.strategy, EnumWriterStrategy::Document);
    }

    #[cfg(feature = "xlsx")]
    #[test]
    fn test_config_freeze_and_filter_reach_the_workbook() {
        let mut config = SpecTableIoConfig::default();
        config.excel.freeze_header = true;
        config.excel.auto_filter = true;
        let service = ExportService::new(config).expect("service");

        let plan = service.plan(&UsersExport { n_rows: 1, if_chunked: false }, EnumTableFormat::Xlsx);
        assert!(plan.capabilities.has_freeze_row && plan.capabilities.has_auto_filter);
        assert_eq!(plan.strategy, EnumWriterStrategy::Default);

        struct ChunkOnly;
        impl ExportDeclaration for ChunkOnly {
            fn chunk_size(&self) -> Option<usize> {
                Some(100)
            }
        }
        assert_eq!(
            service.plan(&ChunkOnly, EnumTableFormat::Xlsx).strategy,
            EnumWriterStrategy::Hybrid
        );

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.xlsx");
        let report = service
            .export(&UsersExport { n_rows: 3, if_chunked: false }, &path, None)
            .expect("export");
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);

        let file = fs::File::open(&path).expect("open");
        let mut archive = zip::ZipArchive::new(file).expect("zip");
        let mut entry = archive.by_name("xl/worksheets/sheet1.xml").expect("sheet1.xml");
        let mut c_xml = String::new();
        std::io::Read::read_to_string(&mut entry, &mut c_xml).expect("xml");
        assert!(c_xml.contains("<pane"));
        assert!(c_xml.contains("<autoFilter ref=\"A1:B4\""));
    }

    #[test]
    fn test_missing_source_is_reported() {
        let err = ExportService::default()
            .raw(&NoSource, EnumTableFormat::Json)
            .err()
            .expect("no source");
        assert!(matches!(err, TableIoError::NoDataSourceCapability));
    }

    #[test]
    fn test_store_and_queue_write_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = LocalStorage::new(dir.path());
        let service = ExportService::default();
        let report = service
            .store(&UsersExport { n_rows: 3, if_chunked: false }, &storage, "exports/users.json", None)
            .expect("store");
        assert_eq!(report.rows_written, 3);
        let c_json = fs::read_to_string(storage.resolve("exports/users.json")).expect("stored");
        assert!(c_json.contains("user-3"));

        let path = dir.path().join("queued.csv");
        let job = service.queue(UsersExport { n_rows: 4, if_chunked: false }, path.clone(), None);
        assert!(!path.exists());
        assert_eq!(job.name(), format!("export:{}", path.display()));
        assert_eq!(job.run().expect("run").rows_written, 4);
        assert!(path.exists());
    }

    struct NamesImport {
        l_names: Vec<String>,
    }

    impl ImportDeclaration for NamesImport {
        type Model = String;

        fn model(&mut self, row: &Row) -> Option<anyhow::Result<String>> {
            Some(Ok(row.get_by_name("name")?.to_text()))
        }

        fn persist(&mut self, batch: Vec<String>) -> anyhow::Result<()> {
            self.l_names.extend(batch);
            Ok(())
        }

        fn heading_row(&self) -> Option<usize> {
            Some(1)
        }

        fn rules(&self) -> TypeRuleSet {
            parse_rule_set([("id", vec!["integer"])]).unwrap_or_default()
        }

        fn skips_on_failure(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_export_then_import_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("users.csv");
        ExportService::default()
            .export(&UsersExport { n_rows: 5, if_chunked: false }, &path, None)
            .expect("export");

        let service = ImportService::default();
        let mut declaration = NamesImport { l_names: Vec::new() };
        let result = service.import(&mut declaration, &path).expect("import");
        assert_eq!(result.total_rows, 5);
        assert_eq!(result.imported_rows, 5);
        assert!(result.is_successful());
        assert_eq!(declaration.l_names[4], "user-5");

        let options = SpecReadOptions {
            heading_row: Some(1),
            ..Default::default()
        };
        let l_rows = service.to_collection(&path, &options).expect("collection");
        assert_eq!(l_rows[0].get_by_name("name"), Some(&EnumCellValue::String("user-1".to_string())));
        let l_values = service.to_array(&path, &SpecReadOptions::default()).expect("array");
        assert_eq!(l_values.len(), 6);
        assert_eq!(l_values[0][0], EnumCellValue::String("id".to_string()));

        let job = service.queue_import(NamesImport { l_names: Vec::new() }, path);
        assert_eq!(job.run().expect("run").imported_rows, 5);
    }
}
