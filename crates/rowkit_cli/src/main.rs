//! `rowkit` command-line front end.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rowkit_io_table::{
    EnumDataSource, EnumHeadingFormat, EnumRawRecord, EnumSheetSelector, EnumTableFormat,
    ExportDeclaration, ExportService, SpecExportReport, SpecReadOptions, SpecTableIoConfig,
    create_reader_for_path,
};
use rowkit_log::{EnumLogFormat, SpecLogOptions, init_logging};
use tracing::info;

/// Convert and inspect tabular files (csv, xlsx, json).
#[derive(Parser, Debug)]
#[command(name = "rowkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log formatter: compact, pretty or json.
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    /// TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read any supported file and write it in another format.
    Convert {
        /// Input file.
        input: PathBuf,

        /// Output file; format follows the extension unless `--format` is set.
        output: PathBuf,

        /// Output format (csv, xlsx, json).
        #[arg(short, long)]
        format: Option<String>,

        /// Input sheet, by zero-based index or by name.
        #[arg(long)]
        sheet: Option<String>,

        /// Input has no heading row.
        #[arg(long)]
        no_heading: bool,

        /// Freeze the heading row of spreadsheet output.
        #[arg(long)]
        freeze_header: bool,

        /// Add an auto-filter to spreadsheet output.
        #[arg(long)]
        auto_filter: bool,

        /// Chunk size hint; selects chunked spreadsheet writers.
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Print sheets and row counts of a file.
    Inspect {
        /// Input file.
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_format = match cli.log_format.parse::<EnumLogFormat>() {
        Ok(format) => format,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(SpecLogOptions {
        format: log_format,
        filter: cli.verbose.then(|| "debug".to_string()),
        with_ansi: true,
    }) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Convert {
            input,
            output,
            format,
            sheet,
            no_heading,
            freeze_header,
            auto_filter,
            chunk_size,
        } => {
            let format = format
                .map(|c_fmt| parse_table_format(&c_fmt))
                .transpose()?;
            let declaration = ConvertDeclaration {
                input,
                read_options: SpecReadOptions {
                    heading_row: (!no_heading).then_some(1),
                    heading_format: EnumHeadingFormat::None,
                    sheet: parse_sheet_selector(sheet.as_deref()),
                    csv: config.csv.clone(),
                    ..Default::default()
                },
                if_freeze_header: freeze_header,
                if_auto_filter: auto_filter,
                chunk_size,
            };
            let report = run_convert(config, &declaration, &output, format)?;
            println!(
                "{} rows -> {} ({})",
                report.rows_written,
                output.display(),
                report.strategy.map_or("text", |s| s.as_str())
            );
            for c_warning in &report.warnings {
                println!("warning: {c_warning}");
            }
            Ok(())
        }
        Commands::Inspect { file } => {
            for c_line in run_inspect(&file)? {
                println!("{c_line}");
            }
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SpecTableIoConfig> {
    let Some(path) = path else {
        return Ok(SpecTableIoConfig::default());
    };
    let c_text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    SpecTableIoConfig::from_toml_str(&c_text)
        .with_context(|| format!("invalid config {}", path.display()))
}

fn parse_table_format(text: &str) -> Result<EnumTableFormat> {
    EnumTableFormat::from_extension(text)
        .with_context(|| format!("unknown format {text:?} (expected csv, xlsx or json)"))
}

fn parse_sheet_selector(text: Option<&str>) -> EnumSheetSelector {
    match text {
        None => EnumSheetSelector::default(),
        Some(c_sheet) => c_sheet
            .parse::<usize>()
            .map_or_else(|_| EnumSheetSelector::Name(c_sheet.to_string()), EnumSheetSelector::Index),
    }
}

/// Input file re-exported through the export pipeline.
struct ConvertDeclaration {
    input: PathBuf,
    read_options: SpecReadOptions,
    if_freeze_header: bool,
    if_auto_filter: bool,
    chunk_size: Option<usize>,
}

impl ExportDeclaration for ConvertDeclaration {
    fn data_source(&self) -> Option<EnumDataSource<'_>> {
        let rows = create_reader_for_path(&self.input)
            .and_then(|reader| reader.read(&self.input, &self.read_options));
        let stream: rowkit_io_table::RecordStream<'static> = match rows {
            Ok(rows) => Box::new(rows.map(|item| item.map(|(_, row)| EnumRawRecord::Row(row)))),
            Err(err) => Box::new(std::iter::once(Err(err))),
        };
        Some(EnumDataSource::Generator(stream))
    }

    fn chunk_size(&self) -> Option<usize> {
        self.chunk_size
    }

    fn freeze_row(&self) -> Option<usize> {
        self.if_freeze_header.then_some(1)
    }

    fn auto_filter(&self) -> Option<bool> {
        self.if_auto_filter.then_some(true)
    }

    fn sheet_name(&self) -> Option<String> {
        self.input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }
}

fn run_convert(
    config: SpecTableIoConfig,
    declaration: &ConvertDeclaration,
    output: &Path,
    format: Option<EnumTableFormat>,
) -> Result<SpecExportReport> {
    let service = ExportService::new(config)?;
    let report = service
        .export(declaration, output, format)
        .with_context(|| {
            format!(
                "failed to convert {} to {}",
                declaration.input.display(),
                output.display()
            )
        })?;
    info!(rows = report.rows_written, "convert done");
    Ok(report)
}

fn run_inspect(file: &Path) -> Result<Vec<String>> {
    let reader = create_reader_for_path(file)?;
    let mut l_lines = vec![format!("{} ({})", file.display(), reader.format().extension())];
    for (n_idx, c_name) in reader.sheets(file)? {
        let options = SpecReadOptions {
            sheet: EnumSheetSelector::Index(n_idx),
            ..Default::default()
        };
        let c_rows = reader
            .row_count(file, &options)?
            .map_or_else(|| "?".to_string(), |n| n.to_string());
        l_lines.push(format!("  [{n_idx}] {c_name}: {c_rows} rows"));
    }
    Ok(l_lines)
}
