//! `rowkit_io_table` v1:
//! Streaming tabular export/import pipeline.
//!
//! Layout:
//! - `conf`       : constants, configuration model and format presets
//! - `spec`       : cell values, column definitions, options and reports
//! - `error`      : crate error type
//! - `row`        : row model
//! - `cursor`     : keyset-paginated chunk iteration
//! - `source`     : data source adapter
//! - `transform`  : raw records into rows
//! - `capability` : export declarations, capability set, strategy selector
//! - `writer`     : csv / json / xlsx writers
//! - `reader`     : csv / json / xlsx readers and slicing rules
//! - `heading`    : heading key formatting
//! - `validation` : per-attribute import rules
//! - `import`     : import aggregator and run loop
//! - `service`    : export and import services
//! - `frame`      : polars `DataFrame` source (feature `frame`)
//! - `sqlite`     : SQLite keyset source (feature `sqlite`)
//! - `util`       : pure helper functions
pub mod capability;
pub mod conf;
pub mod cursor;
pub mod error;
#[cfg(feature = "frame")]
pub mod frame;
pub mod heading;
pub mod import;
pub mod reader;
pub mod row;
pub mod service;
pub mod source;
pub mod spec;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod transform;
pub mod util;
pub mod validation;
pub mod writer;

pub use capability::{
    EnumWriterOverride, EnumWriterStrategy, ExportDeclaration, SpecWriterCapabilities,
    select_writer_strategy,
};
pub use conf::{
    N_CHUNK_SIZE_DEFAULT, N_LEN_EXCEL_SHEET_NAME_MAX, N_NCOLS_EXCEL_MAX, N_NROWS_EXCEL_MAX,
    SpecCsvConfig, SpecExcelConfig, SpecJsonConfig, SpecLocaleConfig, SpecTableIoConfig,
};
pub use cursor::{
    ChunkedCursorIter, EnumKeyValue, MemoryKeysetSource, QuerySource, SpecChunkCursor,
    SpecKeyedRecord,
};
pub use error::{Result, TableIoError};
#[cfg(feature = "frame")]
pub use frame::FrameSource;
pub use heading::{format_heading, format_headings};
pub use import::{
    EnumImportState, ImportAggregator, ImportDeclaration, SpecFailure, SpecImportResult,
    SpecIssueSummary, SpecRowError, run_import,
};
pub use reader::{
    CsvReader, JsonReader, SlicedRows, TableReader, XlsxReader, create_reader,
    create_reader_for_path,
};
pub use row::Row;
pub use service::{
    ExportService, ImportService, LocalStorage, QueuedJob, SpecExportPlan, StorageAdapter,
};
pub use source::{EnumDataSource, EnumRawRecord, RecordStream, adapt, adapt_data_source};
pub use spec::{
    EnumCellValue, EnumColumnType, EnumConditionalRule, EnumExportEvent, EnumHeadingFormat,
    EnumSheetSelector, EnumTableFormat, ExportEventHandler, SpecCellFormat, SpecColumnDefinition,
    SpecConditionalFormat, SpecExportOptions, SpecExportReport, SpecReadOptions, SpecSheetStyles,
    SpecValuePolicy,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteQuerySource, SqliteStatementSource};
pub use transform::{RowStream, RowTransformer};
pub use validation::{EnumValidationRule, TypeRuleSet, parse_rule_set, validate_row};
pub use writer::{
    CsvWriter, JsonWriter, SpecStreamResponse, SpecTransportResponse, TableWriter, XlsxWriter,
    create_writer,
};
