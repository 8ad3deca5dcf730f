/*!
 * Shuttle CLI - drives the transfer engine against a directory-rooted session
 *
 * The binary embeds the engine the way a file manager would: the queue posts
 * every Task change through a channel dispatcher and the main thread pumps
 * that channel and redraws the progress bars.
 */

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shuttle::{
    cli_progress::{format_bytes, format_summary, TaskProgressRenderer},
    config::{EngineConfig, ExistingFilePolicy, LogLevel},
    error::{ShuttleError, EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    logging, shared, ChannelDispatcher, EnqueueReport, LocalSession, LogEntry, SharedSession,
    StatusKind, TransferLog, TransferQueue,
};

#[derive(Parser)]
#[command(name = "shuttle")]
#[command(version, about = "Queued, resumable file transfers over a single session", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Transfer log location (overrides the config file)
    #[arg(long = "transfer-log", value_name = "FILE", global = true)]
    transfer_log: Option<PathBuf>,

    /// Log level
    #[arg(long, value_enum, global = true)]
    log_level: Option<LogLevelArg>,

    /// Write diagnostics to this file as JSON
    #[arg(long = "log", value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (debug diagnostics and server replies)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Do not draw progress bars
    #[arg(long, global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload local files and directories
    Upload {
        /// Directory served as the remote side
        #[arg(long, value_name = "DIR")]
        remote_root: PathBuf,

        /// Remote destination directory
        #[arg(short = 'd', long = "dest", default_value = "/")]
        remote_dir: String,

        /// What to do with existing destinations
        #[arg(long, value_enum)]
        existing: Option<ExistingArg>,

        /// Local files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Download remote files and directories
    Download {
        /// Directory served as the remote side
        #[arg(long, value_name = "DIR")]
        remote_root: PathBuf,

        /// Local destination directory
        #[arg(short = 'd', long = "dest", default_value = ".")]
        local_dir: PathBuf,

        /// What to do with existing destinations
        #[arg(long, value_enum)]
        existing: Option<ExistingArg>,

        /// Remote files or directories
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Inspect the transfer log
    #[command(subcommand)]
    Log(LogCommands),
}

#[derive(Subcommand)]
enum LogCommands {
    /// Show every logged transfer
    List,

    /// Show transfers that can be resumed
    Incomplete,

    /// Print the transfer log location
    Path,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ExistingArg {
    Overwrite,
    Skip,
}

impl From<ExistingArg> for ExistingFilePolicy {
    fn from(arg: ExistingArg) -> Self {
        match arg {
            ExistingArg::Overwrite => ExistingFilePolicy::Overwrite,
            ExistingArg::Skip => ExistingFilePolicy::Skip,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ShuttleError>()
                .map(ShuttleError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load config file {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.log_level = level.into();
    }
    if cli.log.is_some() {
        config.log_file = cli.log.clone();
    }
    config.verbose |= cli.verbose;
    if cli.transfer_log.is_some() {
        config.transfer_log_path = cli.transfer_log.clone();
    }

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Upload {
            remote_root,
            remote_dir,
            existing,
            paths,
        } => {
            if let Some(policy) = existing {
                config.existing_files = policy.into();
            }
            config.validate()?;
            run_transfers(&config, remote_root, !cli.no_progress, |queue, session| {
                queue.enqueue_upload(&paths, &remote_dir, session)
            })
        }
        Commands::Download {
            remote_root,
            local_dir,
            existing,
            paths,
        } => {
            if let Some(policy) = existing {
                config.existing_files = policy.into();
            }
            config.validate()?;
            std::fs::create_dir_all(&local_dir)
                .with_context(|| format!("Cannot create {}", local_dir.display()))?;
            run_transfers(&config, remote_root, !cli.no_progress, |queue, session| {
                queue.enqueue_download(&paths, &local_dir, session)
            })
        }
        Commands::Log(command) => {
            handle_log_command(&config, command);
            Ok(EXIT_SUCCESS)
        }
    }
}

fn run_transfers(
    config: &EngineConfig,
    remote_root: PathBuf,
    show_progress: bool,
    enqueue: impl FnOnce(&TransferQueue, SharedSession) -> shuttle::Result<EnqueueReport>,
) -> Result<i32> {
    let log = Arc::new(TransferLog::from_config(config));
    let (dispatcher, pump) = ChannelDispatcher::new();
    let queue = TransferQueue::new(config.clone(), log, Arc::new(dispatcher));

    let notices: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let notices = notices.clone();
        let verbose = config.verbose;
        queue.set_status_callback(move |kind, message| {
            let show = match kind {
                StatusKind::Warning | StatusKind::Failed => true,
                StatusKind::Reply => verbose,
                StatusKind::Completed | StatusKind::Info => false,
            };
            if show {
                if let Ok(mut lines) = notices.lock() {
                    lines.push(format!("[{}] {}", kind, message));
                }
            }
        });
    }
    if config.verbose {
        let notices = notices.clone();
        queue.set_completion_callback(move || {
            if let Ok(mut lines) = notices.lock() {
                lines.push(format!("[{}] All transfers finished", StatusKind::Info));
            }
        });
    }

    let session = shared(
        LocalSession::new(&remote_root)
            .with_context(|| format!("Cannot open session at {}", remote_root.display()))?,
    );
    let report = enqueue(&queue, session)?;
    if report.truncated {
        eprintln!(
            "Warning: queue limit reached, {} items were not queued",
            report.dropped
        );
    }

    let mut renderer = TaskProgressRenderer::new(show_progress);
    loop {
        pump.run_for(Duration::from_millis(100));
        renderer.refresh(&queue.tasks());
        if let Ok(mut lines) = notices.lock() {
            for line in lines.drain(..) {
                renderer.println(&line);
            }
        }
        if queue.is_idle() && pump.pending() == 0 {
            break;
        }
    }
    pump.run_pending();
    renderer.refresh(&queue.tasks());
    if let Ok(mut lines) = notices.lock() {
        for line in lines.drain(..) {
            renderer.println(&line);
        }
    }

    let summary = queue.tasks().summary();
    println!("{}", format_summary(&summary));
    Ok(if summary.failed > 0 || summary.pending > 0 {
        EXIT_PARTIAL
    } else {
        EXIT_SUCCESS
    })
}

fn handle_log_command(config: &EngineConfig, command: LogCommands) {
    let log = TransferLog::from_config(config);
    match command {
        LogCommands::Path => println!("{}", log.path().display()),
        LogCommands::List => print_entries(&log.load_all_transfers()),
        LogCommands::Incomplete => print_entries(&log.incomplete_transfers()),
    }
}

fn print_entries(entries: &[LogEntry]) {
    if entries.is_empty() {
        println!("No transfers recorded");
        return;
    }
    for entry in entries {
        let state = if entry.completed {
            "completed"
        } else if entry.failed {
            "failed"
        } else {
            "active"
        };
        println!(
            "{}  {:<9} {:<8} {:>10} / {:<10} {} -> {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            state,
            entry.direction.to_string(),
            format_bytes(entry.bytes_transferred),
            format_bytes(entry.total_bytes),
            entry.source,
            entry.destination
        );
        if let Some(ref message) = entry.error_message {
            println!("    {}", message);
        }
    }
}
