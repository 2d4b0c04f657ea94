use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::error;
use tracing_subscriber::EnvFilter;

use dwca_normalizer::config::{
    ArchiveFormat, BadRowPolicy, ConfigLoader, ConfigOverrides, OutputDelimiter,
};
use dwca_normalizer::error::DwcaError;
use dwca_normalizer::normalize::{Archive, InspectSummary, NormalizeSummary, default_output_path};
use dwca_normalizer::output::{JsonOutput, OutputMode};

#[derive(Parser)]
#[command(name = "dwca-norm")]
#[command(about = "Normalizes Darwin Core Archives: canonical names, breadcrumbs, synonym links")]
#[command(version, author)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, global = true)]
    debug: bool,

    /// Print the result as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// JSON config file (default: ./dwca-norm.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Root of the download/extract/output scratch directories.
    #[arg(long, global = true)]
    root_dir: Option<String>,

    /// Number of concurrent workers (1-100).
    #[arg(short, long, global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Normalize an archive into a new zip or tar.gz")]
    Normalize(NormalizeArgs),
    #[command(about = "Load an archive and report how it is structured")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct NormalizeArgs {
    /// Archive file, extracted directory or http(s) URL.
    input: String,

    /// Output archive (default: <input>.norm.<zip|tar.gz>).
    output: Option<String>,

    /// Rows with a wrong number of fields: stop, ignore or process.
    #[arg(short, long)]
    wrong_fields_num: Option<BadRowPolicy>,

    /// zip or tar (gzip-compressed).
    #[arg(short, long)]
    archive_format: Option<ArchiveFormat>,

    /// csv or tsv output files.
    #[arg(short, long)]
    csv_type: Option<OutputDelimiter>,
}

#[derive(Args)]
struct InspectArgs {
    input: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        if let Some(err) = report.downcast_ref::<DwcaError>() {
            error!(category = %err.root().category(), "{err}");
        }
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };
    let overrides = ConfigOverrides {
        root_path: cli.root_dir.map(Utf8PathBuf::from),
        jobs: cli.jobs,
        ..ConfigOverrides::default()
    };

    match cli.command {
        Commands::Normalize(args) => run_normalize(args, cli.config, overrides, mode),
        Commands::Inspect(args) => run_inspect(args, cli.config, overrides, mode),
    }
}

fn run_normalize(
    args: NormalizeArgs,
    config_path: Option<String>,
    overrides: ConfigOverrides,
    mode: OutputMode,
) -> miette::Result<()> {
    let overrides = ConfigOverrides {
        bad_row: args.wrong_fields_num,
        archive_format: args.archive_format,
        output_delimiter: args.csv_type,
        ..overrides
    };
    let config = ConfigLoader::resolve(config_path.as_deref(), &overrides)?;
    let output = args
        .output
        .map(Utf8PathBuf::from)
        .unwrap_or_else(|| default_output_path(&args.input, &config));

    let archive = Archive::open(config, &args.input)?;
    let summary = archive.normalize_to(output.as_std_path())?;
    archive.close()?;

    match mode {
        OutputMode::Json => JsonOutput::print_normalize(&summary).into_diagnostic()?,
        OutputMode::Text => print_normalize_summary(&summary),
    }
    Ok(())
}

fn run_inspect(
    args: InspectArgs,
    config_path: Option<String>,
    overrides: ConfigOverrides,
    mode: OutputMode,
) -> miette::Result<()> {
    let config = ConfigLoader::resolve(config_path.as_deref(), &overrides)?;
    let archive = Archive::open(config, &args.input)?;
    let summary = archive.inspect()?;
    archive.close()?;

    match mode {
        OutputMode::Json => JsonOutput::print_inspect(&summary).into_diagnostic()?,
        OutputMode::Text => print_inspect_summary(&summary),
    }
    Ok(())
}

fn print_normalize_summary(summary: &NormalizeSummary) {
    let green = "\x1b[32m";
    let cyan = "\x1b[36m";
    let yellow = "\x1b[33m";
    let reset = "\x1b[0m";

    println!("{cyan}dwca-norm summary{reset}");
    println!("  input:     {}", summary.input);
    if let Some(archive) = &summary.archive {
        println!("{green}  output:    {archive}{reset}");
    }
    println!("  diagnosis: {}", summary.diagnosis);
    println!(
        "  core:      {} rows, {} hierarchy nodes",
        summary.core_rows, summary.hierarchy_nodes
    );
    if summary.core_skipped > 0 {
        println!("{yellow}  skipped:   {} malformed core rows{reset}", summary.core_skipped);
    }
    for ext in &summary.extensions {
        println!("  extension: {} ({}) {} rows", ext.name, ext.location, ext.rows);
        if ext.skipped > 0 {
            println!("{yellow}             {} malformed rows skipped{reset}", ext.skipped);
        }
    }
}

fn print_inspect_summary(summary: &InspectSummary) {
    println!("input:      {}", summary.input);
    println!("core:       {} ({} rows sampled)", summary.core, summary.sampled_rows);
    println!("names:      {}", summary.diagnosis.names);
    println!("synonyms:   {}", summary.diagnosis.synonyms);
    println!("hierarchy:  {}", summary.diagnosis.hierarchy);
    if summary.extensions.is_empty() {
        println!("extensions: none");
    } else {
        println!("extensions: {}", summary.extensions.join(", "));
    }
}
