use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use process_key_sequencer::config::parse_duration;
use process_key_sequencer::{
    Dispatcher, DryRunSender, KeyInjector, KeySender, ProcessFinder, RunEvent, Severity,
    SequenceFile, StopHotkey, TerminalReason,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "pks",
    version,
    about = "Replay a key sequence into a single process until stopped"
)]
struct Cli {
    /// Enable debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List PIDs of running processes whose name contains NAME
    List { name: String },

    /// Start replaying a sequence
    Run(RunArgs),

    /// Check that a sequence file loads and is valid
    Validate { path: PathBuf },

    /// Write an example sequence file
    Init {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Target process id
    #[arg(long, conflicts_with = "process", required_unless_present = "process")]
    pid: Option<u32>,

    /// Target the lowest PID whose process name contains this text
    #[arg(long)]
    process: Option<String>,

    /// Sequence file (JSON)
    #[arg(short, long, conflicts_with = "keys", required_unless_present = "keys")]
    config: Option<PathBuf>,

    /// Comma-separated keys, e.g. `1,2,space`
    #[arg(long, value_delimiter = ',', requires = "delays")]
    keys: Vec<String>,

    /// Comma-separated delays matching --keys, e.g. `500ms,500,2s`
    #[arg(long, value_delimiter = ',')]
    delays: Vec<String>,

    /// Log keys instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Global hotkey that stops the run
    #[arg(long)]
    stop_hotkey: Option<String>,

    /// Give up after this many consecutive failed key sends
    #[arg(long)]
    max_failures: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::List { name } => list(&name),
        Command::Run(args) => run(args).await,
        Command::Validate { path } => validate(&path),
        Command::Init { path, force } => init(&path, force),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn list(name: &str) -> Result<ExitCode> {
    let pids = ProcessFinder::new().find_processes(name);
    if pids.is_empty() {
        println!("{} no running process matches '{}'", "✗".red(), name);
        return Ok(ExitCode::FAILURE);
    }
    for pid in pids {
        println!("{pid}");
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(path: &Path) -> Result<ExitCode> {
    let file = load(path)?;
    file.validate()
        .with_context(|| format!("{} is not a valid sequence", path.display()))?;
    println!(
        "{} {} ({} steps)",
        "✓".green(),
        path.display(),
        file.key_sequence.len()
    );
    Ok(ExitCode::SUCCESS)
}

fn init(path: &Path, force: bool) -> Result<ExitCode> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    SequenceFile::example().save_to_file(&path.to_string_lossy())?;
    println!("{} wrote example sequence to {}", "✓".green(), path.display());
    Ok(ExitCode::SUCCESS)
}

fn load(path: &Path) -> Result<SequenceFile> {
    Ok(SequenceFile::from_file(&path.to_string_lossy())?)
}

fn sequence_from_args(args: &RunArgs) -> Result<SequenceFile> {
    if let Some(path) = &args.config {
        return load(path);
    }

    let sleep_times = args
        .delays
        .iter()
        .map(String::as_str)
        .map(parse_duration)
        .collect::<process_key_sequencer::Result<Vec<_>>>()?;

    Ok(SequenceFile {
        key_sequence: args.keys.clone(),
        sleep_times,
        ..SequenceFile::default()
    })
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let finder = Arc::new(ProcessFinder::new());

    let pid = match (args.pid, &args.process) {
        (Some(pid), _) => pid,
        (None, Some(name)) => match finder.find_processes(name).first() {
            Some(pid) => *pid,
            None => bail!("no running process matches '{name}'"),
        },
        (None, None) => bail!("either --pid or --process is required"),
    };

    let mut sequence = sequence_from_args(&args)?;
    if args.max_failures.is_some() {
        sequence.max_consecutive_failures = args.max_failures;
    }
    let hotkey = args
        .stop_hotkey
        .clone()
        .unwrap_or_else(|| sequence.stop_hotkey.clone());
    let config = sequence.into_config(pid)?;

    let injector: Arc<dyn KeyInjector> = if args.dry_run {
        Arc::new(DryRunSender::new())
    } else {
        Arc::new(KeySender::new()?)
    };

    let (handle, mut events) = Dispatcher::new(finder, injector)
        .start(config)
        .with_context(|| format!("could not start run against PID {pid}"))?;

    println!(
        "{} running against PID {} (stop with {} or Ctrl+C)",
        "▶".green(),
        pid,
        hotkey.bold()
    );

    let stop_hotkey = match StopHotkey::register(&hotkey) {
        Ok(stop_hotkey) => {
            drop(stop_hotkey.spawn_listener(handle.clone()));
            Some(stop_hotkey)
        }
        Err(e) => {
            warn!(error = %e, "continuing without a stop hotkey");
            println!("{} stop hotkey unavailable: {}", "!".yellow(), e);
            None
        }
    };

    let ctrl_c = handle.clone();
    drop(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.stop();
        }
    }));

    let mut reason = TerminalReason::FatalError("run ended without a terminal event".to_string());
    while let Some(event) = events.recv().await {
        match event {
            RunEvent::Status(status) => match status.severity {
                Severity::Info => println!("  {}", status.text),
                Severity::Error => println!("  {}", status.text.red()),
            },
            RunEvent::Finished(terminal) => reason = terminal,
        }
    }

    // releases the hotkey listener when the run ended on its own
    handle.stop();
    drop(stop_hotkey);

    Ok(match reason {
        TerminalReason::Cancelled => {
            println!("{} stopped", "■".yellow());
            ExitCode::SUCCESS
        }
        TerminalReason::TargetLost => {
            println!("{} target process {} is gone", "■".yellow(), pid);
            ExitCode::SUCCESS
        }
        TerminalReason::FatalError(message) => {
            println!("{} {}", "✗".red(), message.red());
            ExitCode::FAILURE
        }
    })
}
