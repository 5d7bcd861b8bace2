use anyhow::Context;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use procrelay::app::{init_logging, AppConfig};
use procrelay::subprocess::intercept::{
    InterceptConfig, LoggingSink, LoggingSinkOptions, Pipeline, StopReport, StreamSource,
};
use procrelay::subprocess::{ChildProcess, ExitStatus, ProcessCommandBuilder, ProcessLifecycle};

/// Run a program and relay its output to log files
#[derive(Parser)]
#[command(name = "procrelay")]
#[command(about = "Run a child process and capture its output line by line", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a program and log its stdout and stderr until it exits or Ctrl-C
    Run {
        /// Path to an interception config file (TOML)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Name used for log file names (default: program file name)
        #[arg(long)]
        name: Option<String>,

        /// Directory for timestamped log files
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Write stdout lines to this file instead
        #[arg(long)]
        stdout_log: Option<PathBuf>,

        /// Write stderr lines to this file instead
        #[arg(long)]
        stderr_log: Option<PathBuf>,

        /// Seconds to wait for each stream to drain on shutdown
        #[arg(long)]
        drain_timeout: Option<u64>,

        /// Also print stderr lines of the program to the console
        #[arg(long)]
        echo_stderr: bool,

        /// Program to run followed by its arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
}

struct RunArgs {
    config: Option<PathBuf>,
    name: Option<String>,
    log_dir: Option<PathBuf>,
    stdout_log: Option<PathBuf>,
    stderr_log: Option<PathBuf>,
    drain_timeout: Option<u64>,
    echo_stderr: bool,
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config,
            name,
            log_dir,
            stdout_log,
            stderr_log,
            drain_timeout,
            echo_stderr,
            command,
        } => {
            let app_config = AppConfig::new(cli.verbose).with_config_file(config.clone());
            init_logging(&app_config);
            run(
                &app_config,
                RunArgs {
                    config,
                    name,
                    log_dir,
                    stdout_log,
                    stderr_log,
                    drain_timeout,
                    echo_stderr,
                    command,
                },
            )
            .await
        }
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            eprintln!("Error: {e}");
            if cli.verbose >= 1 {
                eprintln!("\nError chain:");
                for (i, cause) in e.chain().enumerate() {
                    eprintln!("  {}: {}", i, cause);
                }
            }
            std::process::exit(1);
        }
    }
}

fn build_config(
    app_config: &AppConfig,
    args: &RunArgs,
    program: &str,
) -> anyhow::Result<InterceptConfig> {
    let mut config = app_config.intercept_config()?;
    debug!("Config file: {:?}", args.config);

    match &args.name {
        Some(name) => config.process_name = name.clone(),
        None if config.process_name == InterceptConfig::default().process_name => {
            if let Some(stem) = std::path::Path::new(program).file_name() {
                config.process_name = stem.to_string_lossy().into_owned();
            }
        }
        None => {}
    }
    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(path) = &args.stdout_log {
        config.stdout_log = Some(path.clone());
    }
    if let Some(path) = &args.stderr_log {
        config.stderr_log = Some(path.clone());
    }
    if let Some(secs) = args.drain_timeout {
        config.drain_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

async fn run(app_config: &AppConfig, args: RunArgs) -> anyhow::Result<i32> {
    let (program, program_args) = args
        .command
        .split_first()
        .context("No program given to run")?;
    let config = build_config(app_config, &args, program)?;

    let command = ProcessCommandBuilder::new(program)
        .args(program_args)
        .build();
    let process = ChildProcess::new(command)
        .with_name(config.process_name.clone())
        .with_stop_grace_period(config.stop_grace_period);

    let logging_sink = LoggingSink::new(&LoggingSinkOptions::from(&config))?;
    let mut pipeline = Pipeline::new(process, config);
    pipeline.register_stdout(logging_sink.info_sink(StreamSource::Stdout));
    if args.echo_stderr {
        pipeline.register_stderr(logging_sink.error_sink(StreamSource::Stderr));
    } else {
        pipeline.register_stderr(logging_sink.info_sink(StreamSource::Stderr));
    }

    info!(
        "Logging to {} and {}",
        logging_sink.path(StreamSource::Stdout).display(),
        logging_sink.path(StreamSource::Stderr).display()
    );

    pipeline.start().await?;
    {
        let process = pipeline.process();
        let process = process.lock().await;
        info!(
            "Started {} (pid {:?}): {}",
            process.name(),
            process.id(),
            process.command().display()
        );
    }

    let outcome = supervise(&mut pipeline, tokio::signal::ctrl_c()).await?;
    print_summary(&outcome.report, &logging_sink);

    let exit_status = pipeline.process().lock().await.exit_status();
    debug!("Child exit status: {:?}", exit_status);

    let code = match outcome.exit {
        Some(status) => status.code().unwrap_or(1),
        None => 130,
    };
    Ok(code)
}

/// How a supervised run ended
struct Outcome {
    report: StopReport,
    /// Exit status of the child, `None` if the run was interrupted
    exit: Option<ExitStatus>,
}

/// Wait for the child to exit or for `interrupt`, then stop the pipeline.
///
/// The pipeline is always stopped before any wait failure is returned.
async fn supervise<P, F>(pipeline: &mut Pipeline<P>, interrupt: F) -> anyhow::Result<Outcome>
where
    P: ProcessLifecycle,
    F: Future<Output = std::io::Result<()>>,
{
    let process = pipeline.process();
    let waited = tokio::select! {
        status = async { process.lock().await.wait().await } => Some(status),
        signal = interrupt => match signal {
            Ok(()) => {
                info!("Interrupted, stopping {}", pipeline.config().process_name);
                None
            }
            Err(e) => {
                warn!("Failed to listen for Ctrl-C, waiting for exit: {}", e);
                Some(process.lock().await.wait().await)
            }
        },
    };

    let report = pipeline.stop().await?;
    let exit = waited
        .transpose()
        .context("Failed to wait for the child process")?;
    Ok(Outcome { report, exit })
}

fn print_summary(report: &StopReport, logging_sink: &LoggingSink) {
    for source in StreamSource::ALL {
        let stream = report.stream(source);
        println!(
            "{source}: {} lines -> {}",
            stream.delivered,
            logging_sink.path(source).display()
        );
        if let Some(ref err) = stream.error {
            warn!("{} relay failed: {}", source, err);
        } else if !stream.drained {
            warn!("{} relay did not drain, trailing lines may be missing", source);
        }
    }
}
