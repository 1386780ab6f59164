use clap::Parser;
use colored::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use otter_e2e::{
    OutputFolder, ReporterConfig, RunReport, Runner, RunnerError, Settings, SourceLoader, SourcePaths,
    read_test_source,
};

#[derive(Parser, Debug)]
#[command(name = "otter-e2e")]
#[command(about = "Run end-to-end test modules and write JUnit reports")]
struct Args {
    /// Path to the TOML config (default: ./otter_e2e.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report output folder (overrides `output_folder`)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Completion timeout in milliseconds (overrides `globals.async_hook_timeout`)
    #[arg(long)]
    timeout: Option<u64>,

    /// Only include modules whose path contains this pattern
    #[arg(short, long)]
    filter: Option<String>,

    /// Only list discovered modules without running them
    #[arg(long)]
    list_only: bool,

    /// Print the run report as JSON and write summary.json
    #[arg(long)]
    json: bool,

    /// Show verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Source files or folders (default: `src_folders` from the config)
    #[arg(value_name = "SOURCES")]
    sources: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: failed to start runtime: {}", "error".red().bold(), e);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(async_main(args)) {
        Ok(false) => ExitCode::SUCCESS,
        Ok(true) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

/// Returns whether the run had failures
async fn async_main(args: Args) -> Result<bool, RunnerError> {
    let mut settings = Settings::load_or_default(args.config.as_deref())?;
    if let Some(output) = args.output {
        settings.output_folder = OutputFolder::Path(output);
    }
    if let Some(timeout) = args.timeout {
        settings.globals.async_hook_timeout = timeout;
    }
    if args.filter.is_some() {
        settings.filter = args.filter;
    }
    if args.verbose {
        settings.silent = false;
    }
    if args.json {
        settings.output = false;
    }
    let settings = settings.validate()?;
    let sources = SourcePaths::from(args.sources);

    if args.list_only {
        let modules = SourceLoader::new(sources, &settings)?.list()?;
        for module in &modules {
            println!("{}", module.key);
        }
        println!("\nTotal: {} modules", modules.len());
        return Ok(false);
    }

    let source = read_test_source(sources, &settings)?.await?;
    if settings.output {
        println!("{}", "Otter E2E Runner".bold().cyan());
        println!("Source: {}", source.display_path());
    }

    let reporter_config = if args.json {
        ReporterConfig::json()
    } else {
        ReporterConfig::default()
    };
    let mut runner = Runner::create(settings, reporter_config);
    let summary = runner.run(source).await?;

    if args.json {
        match RunReport::from_results(runner.results()).to_json() {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Failed to generate JSON: {}", e),
        }
    } else if args.verbose {
        RunReport::from_results(runner.results()).print_summary();
    }

    Ok(summary.has_failures())
}
