use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use ifcb_catalog::app::{App, CopyOverrides, CopyResult, LogSink, ProgressSink};
use ifcb_catalog::catalog::ImportMode;
use ifcb_catalog::config::ConfigLoader;
use ifcb_catalog::error::CatalogError;
use ifcb_catalog::layout::Layout;
use ifcb_catalog::output::{JsonOutput, OutputMode};
use ifcb_catalog::pipeline::BinOutcome;
use ifcb_catalog::query::Filter;

#[derive(Parser)]
#[command(name = "ifcb-cat")]
#[command(about = "Catalog IFCB bins and reorganize their raw filesets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[arg(long, global = true, help = "Catalog snapshot file (overrides config)")]
    catalog: Option<String>,

    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Scan a data directory into the catalog")]
    Import(ImportArgs),
    #[command(about = "List cataloged bins")]
    List(FilterArgs),
    #[command(about = "Count cataloged bins")]
    Count(FilterArgs),
    #[command(about = "Copy raw data of selected bins into a destination layout")]
    Copy(CopyArgs),
    #[command(about = "Add a tag to selected bins")]
    Tag(TagArgs),
    #[command(about = "Remove a tag from selected bins")]
    Untag(TagArgs),
    #[command(about = "Set attributes (lat, lon, depth, sample_type, cruise) on selected bins")]
    Set(SetArgs),
    #[command(about = "Write selected pids to a text file, one per line")]
    Export(ExportArgs),
    #[command(about = "Pack raw data of selected bins into a zip file")]
    Archive(ArchiveArgs),
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    #[arg(long)]
    instrument: Option<u32>,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    min_depth: Option<f64>,
    #[arg(long)]
    max_depth: Option<f64>,
    #[arg(long)]
    sample_type: Option<String>,
    #[arg(long)]
    cruise: Option<String>,
    #[arg(long)]
    tag: Option<String>,
}

impl From<FilterArgs> for Filter {
    fn from(args: FilterArgs) -> Self {
        Filter {
            instrument: args.instrument,
            start_time: args.start,
            end_time: args.end,
            min_depth: args.min_depth,
            max_depth: args.max_depth,
            sample_type: args.sample_type,
            cruise: args.cruise,
            tag: args.tag,
        }
    }
}

#[derive(Args)]
struct ImportArgs {
    source: String,

    #[arg(long)]
    create_only: bool,

    #[arg(long, help = "Fail on already cataloged bins in create-only mode")]
    no_skip_existing: bool,
}

#[derive(Args)]
struct CopyArgs {
    source: String,
    destination: String,

    #[arg(long)]
    layout: Option<Layout>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    no_skip_existing: bool,

    #[arg(long)]
    fail_on_missing: bool,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct TagArgs {
    name: String,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct SetArgs {
    #[arg(required = true, value_name = "KEY=VALUE")]
    assignments: Vec<String>,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct ExportArgs {
    path: String,

    #[command(flatten)]
    filter: FilterArgs,
}

#[derive(Args)]
struct ArchiveArgs {
    source: String,
    path: String,

    #[arg(long)]
    layout: Option<Layout>,

    #[command(flatten)]
    filter: FilterArgs,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(error) = report.downcast_ref::<CatalogError>() {
                return ExitCode::from(map_exit_code(error));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &CatalogError) -> u8 {
    match error {
        CatalogError::NotFound(_) | CatalogError::ConfigRead(_) => 2,
        CatalogError::DuplicateBin(_) | CatalogError::IncompleteFileset { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(path) = cli.catalog {
        config.catalog_path = path.into();
    }
    let app = App::open(config)?;
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };

    match cli.command {
        Command::Import(args) => {
            let mode = if args.create_only {
                ImportMode::CreateOnly
            } else {
                ImportMode::Update
            };
            let skip_existing = args.no_skip_existing.then_some(false);
            let result = app.import(args.source, mode, skip_existing, sink)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_import(&result).into_diagnostic()?,
                OutputMode::Human => println!(
                    "imported from {}: {} inserted, {} updated, {} skipped",
                    result.source, result.inserted, result.updated, result.skipped
                ),
            }
        }
        Command::List(filter) => {
            let result = app.list(&filter.into())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_list(&result).into_diagnostic()?,
                OutputMode::Human => {
                    for bin in &result.bins {
                        let tags: Vec<&str> = bin.tags.iter().map(|tag| tag.as_str()).collect();
                        println!(
                            "{}\t{}\tIFCB{}\t{}",
                            bin.pid(),
                            bin.sample_time.format("%Y-%m-%dT%H:%M:%SZ"),
                            bin.instrument,
                            tags.join(",")
                        );
                    }
                }
            }
        }
        Command::Count(filter) => {
            let result = app.count(&filter.into())?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_count(&result).into_diagnostic()?,
                OutputMode::Human => println!("{}", result.count),
            }
        }
        Command::Copy(args) => {
            let overrides = CopyOverrides {
                layout: args.layout,
                workers: args.workers,
                skip_existing: args.no_skip_existing.then_some(false),
                skip_missing: args.fail_on_missing.then_some(false),
            };
            let result = app.copy(
                args.source,
                args.destination,
                &args.filter.into(),
                overrides,
                sink,
            )?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_copy(&result).into_diagnostic()?,
                OutputMode::Human => print_copy_summary(&result),
            }
            if result.report.has_failures() {
                return Ok(ExitCode::from(3));
            }
        }
        Command::Tag(args) => {
            let result = app.tag(&args.filter.into(), &args.name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_tag(&result).into_diagnostic()?,
                OutputMode::Human => println!(
                    "tag {}: {} of {} selected bins changed",
                    result.tag, result.changed, result.selected
                ),
            }
        }
        Command::Untag(args) => {
            let result = app.untag(&args.filter.into(), &args.name)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_tag(&result).into_diagnostic()?,
                OutputMode::Human => println!(
                    "untag {}: {} of {} selected bins changed",
                    result.tag, result.changed, result.selected
                ),
            }
        }
        Command::Set(args) => {
            let result = app.set(&args.filter.into(), &args.assignments)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_set(&result).into_diagnostic()?,
                OutputMode::Human => println!(
                    "set {} on {} bins",
                    result.attributes.join(", "),
                    result.updated
                ),
            }
        }
        Command::Export(args) => {
            let result = app.export(&args.filter.into(), args.path)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_export(&result).into_diagnostic()?,
                OutputMode::Human => {
                    println!("exported {} pids to {}", result.exported, result.path)
                }
            }
        }
        Command::Archive(args) => {
            let result = app.archive(args.source, args.path, &args.filter.into(), args.layout)?;
            match output_mode {
                OutputMode::Json => JsonOutput::print_archive(&result).into_diagnostic()?,
                OutputMode::Human => println!(
                    "archived {} bins to {} ({} missing)",
                    result.report.archived.len(),
                    result.path,
                    result.report.missing.len()
                ),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_copy_summary(result: &CopyResult) {
    let summary = &result.summary;
    println!(
        "copy {} -> {} (layout {})",
        result.source, result.destination, result.layout
    );
    println!("  copied:           {}", summary.copied);
    println!("  skipped existing: {}", summary.skipped_existing);
    println!("  missing:          {}", summary.missing);
    println!("  failed:           {}", summary.failed);
    if summary.cancelled > 0 {
        println!("  cancelled:        {}", summary.cancelled);
    }
    for (pid, outcome) in &result.report.outcomes {
        if let BinOutcome::Failed { error } = outcome {
            println!("  ! {pid}: {error}");
        }
    }
}
