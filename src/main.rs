//! Prism CLI
//!
//! Lists and runs the shipped conformance suites against the simulated
//! device. Case listing never touches a device: case generation is pure.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use prism::device::GpuDevice;
use prism::group::TestGroup;
use prism::runner::{OutputFormat, Runner, RunnerConfig};
use prism::suites;
use regex::Regex;

#[derive(Parser)]
#[command(name = "prism")]
#[command(author, version, about = "A conformance-test harness for GPU device APIs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List case identities and counts without running anything
    List {
        /// Restrict to one suite
        #[arg(short, long)]
        suite: Option<String>,
    },

    /// Run conformance suites against the simulated device
    Run {
        /// Restrict to one suite
        #[arg(short, long)]
        suite: Option<String>,

        /// Only run cases whose path (`group:test:case`) matches this regex
        #[arg(short, long)]
        filter: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Summary)]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Summary,
    Verbose,
    Json,
    Tap,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Summary => OutputFormat::Summary,
            Format::Verbose => OutputFormat::Verbose,
            Format::Json => OutputFormat::Json,
            Format::Tap => OutputFormat::Tap,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::List { suite } => list(suite.as_deref()),
        Commands::Run {
            suite,
            filter,
            format,
        } => run(suite.as_deref(), filter.as_deref(), format.into()),
    }
}

fn setup_logging(verbosity: u8) {
    let default = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn selected_groups(suite: Option<&str>) -> anyhow::Result<Vec<TestGroup>> {
    let mut groups = suites::all();
    if let Some(name) = suite {
        groups.retain(|g| g.name() == name);
        if groups.is_empty() {
            bail!("unknown suite '{}'", name);
        }
    }
    Ok(groups)
}

fn list(suite: Option<&str>) -> anyhow::Result<()> {
    for group in selected_groups(suite)? {
        let cases = group
            .enumerate()
            .with_context(|| format!("enumerating suite '{}'", group.name()))?;
        println!("{} ({} cases)", group.name(), cases.len());
        for test in group.tests() {
            if test.is_unimplemented() {
                println!("  {}:{} (unimplemented)", group.name(), test.name());
            }
        }
        for case in cases {
            println!("  {}", case.full_path());
        }
    }
    Ok(())
}

fn run(suite: Option<&str>, filter: Option<&str>, format: OutputFormat) -> anyhow::Result<()> {
    let groups = selected_groups(suite)?;
    let filter = filter
        .map(|f| Regex::new(f).with_context(|| format!("invalid case filter '{}'", f)))
        .transpose()?;

    let device = GpuDevice::shared("Prism Simulated GPU");
    let mut runner = Runner::with_config(device, RunnerConfig { filter });
    let report = runner.run_groups(&groups)?;
    println!("{}", report.render(format));

    if report.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
