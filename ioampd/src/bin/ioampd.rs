//! CLI entry point: parses arguments, resolves configuration, wires a
//! source (synthetic or — out of this core's scope — a real kernel
//! producer) into a [`Pipeline`], and maps the outcome onto the exit code
//! table (§6e: 0 normal, 1 configuration error, 2 producer/schema error,
//! 3 sink write error, 130 interrupted).

use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ioampd::config::{ClassificationConfig, Config, ReportConfig, ReportFormat};
use ioampd::correlator::Correlator;
use ioampd::demo::{DemoScenario, DemoSource};
use ioampd::sink::ReportSink;
use ioampd::source::EventSource;
use ioampd::{system_profile, IoAmpError, Pipeline, Termination};
use log::{error, info};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "lowercase")]
enum FormatArg {
    Text,
    Json,
}

impl From<FormatArg> for ReportFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Text => ReportFormat::Text,
            FormatArg::Json => ReportFormat::Json,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ioampd")]
#[command(about = "I/O write-amplification correlation and analysis engine")]
struct Args {
    /// Bounded run length in seconds (0 = unbounded, run until signaled).
    #[arg(long, default_value_t = 0)]
    duration: u64,

    /// Sink destination (default stdout).
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Filter real-time output to workload-tagged events.
    #[arg(long)]
    workload_only: bool,

    /// Disable request roll-ups (enabled by default).
    #[arg(long)]
    no_correlate: bool,

    /// Include filenames in real-time output.
    #[arg(long)]
    verbose: bool,

    /// Disable real-time per-event output, only show the termination summary.
    #[arg(long)]
    quiet: bool,

    /// Record and report format.
    #[arg(long, value_enum)]
    format: Option<FormatArg>,

    /// Restrict classification to a named storage system's conventions
    /// (e.g. `minio`). Unrecognized names are a configuration error.
    #[arg(long, value_name = "NAME")]
    system: Option<String>,

    /// Explicit config file path, overrides IOAMP_CONFIG.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Run against the synthetic generator instead of a real producer.
    #[arg(long, value_enum)]
    demo: Option<DemoScenario>,
}

fn resolve_config(args: &Args) -> Result<Config, IoAmpError> {
    match &args.config {
        Some(path) => Config::load_explicit(path),
        None => Ok(Config::load()),
    }
}

fn resolve_classification(
    args: &Args,
    config: &Config,
) -> Result<ClassificationConfig, IoAmpError> {
    match &args.system {
        Some(name) => system_profile::resolve(name)
            .map(|(_, cfg)| cfg)
            .ok_or_else(|| {
                IoAmpError::Configuration(format!("unrecognized --system profile '{name}'"))
            }),
        None => Ok(config.classification.clone()),
    }
}

fn resolve_report(args: &Args, config: &Config) -> ReportConfig {
    let mut report = config.report.clone();
    if args.workload_only {
        report.workload_only = true;
    }
    if args.verbose {
        report.verbose = true;
    }
    if args.quiet {
        report.realtime = false;
    }
    if let Some(format) = args.format {
        report.format = format.into();
    }
    report
}

async fn run(args: Args) -> Result<Termination, IoAmpError> {
    let config = resolve_config(&args)?;
    let classification_cfg = resolve_classification(&args, &config)?;
    let report_cfg = resolve_report(&args, &config);
    let correlate = !args.no_correlate;
    let duration = (args.duration > 0).then(|| Duration::from_secs(args.duration));

    let source: Box<dyn EventSource + Send> = match args.demo {
        Some(scenario) => {
            info!("running synthetic scenario: {}", scenario.name());
            Box::new(DemoSource::new(scenario))
        }
        None => {
            // The real kernel-probe producer is out of this core's scope
            // (see the purpose & scope notes); without --demo there is
            // nothing to feed the ring buffer.
            return Err(IoAmpError::ProducerUnavailable(
                "no ring-buffer producer attached; pass --demo <scenario> to run \
                 against the synthetic generator"
                    .to_string(),
            ));
        }
    };

    let correlator = Correlator::new(&config.runtime);

    let out: Box<dyn Write + Send> = match &args.output {
        Some(path) => Box::new(File::create(path).map_err(IoAmpError::SinkWrite)?),
        None => Box::new(io::stdout()),
    };
    let sink = ReportSink::new(out, report_cfg.format, report_cfg.realtime, report_cfg.verbose);
    let mut pipeline = Pipeline::new(
        source,
        correlator,
        sink,
        classification_cfg,
        config.straggler_policy.clone(),
        report_cfg,
        correlate,
    );
    let outcome = pipeline.run(duration, Box::pin(cancellation())).await?;

    Ok(outcome.termination)
}

/// Resolves once SIGINT (or, on Unix, SIGTERM) is received — raced against
/// the poll loop in `Pipeline::run` so a blocked `poll` never delays
/// shutdown past one timeout.
async fn cancellation() {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let args = Args::parse();

    match run(args).await {
        Ok(termination) => {
            io::stdout().flush().ok();
            std::process::exit(termination.exit_code());
        }
        Err(e) => {
            error!("fatal: {e}");
            std::process::exit(e.exit_code());
        }
    }
}
