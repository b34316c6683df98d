//! pomod - pomodoro timer daemon
//!
//! Runs the timer and serves it over a TCP control protocol and an
//! HTTP/SSE API.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! pomod start
//!
//! # Start the daemon (background/daemonized)
//! pomod start -d
//!
//! # Follow another daemon instead of running a timer locally
//! pomod client --outbound-address timer.example.com:7900
//!
//! # Reload the configuration, keeping the timer state
//! pomod reload
//!
//! # Stop the daemon
//! pomod stop
//!
//! # Check daemon status
//! pomod status
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT/SIGQUIT: save state, run quit hooks, exit
//! - SIGHUP: reload configuration
//!
//! The config file is also watched; saving it reloads like SIGHUP does
//! unless `--no-watch` is given.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pomo_core::duration::parse_std_duration;
use pomod::lifecycle::{LifecycleSignal, RunMode, Supervisor};
use pomod::settings::{SettingsLoader, SettingsOverrides};
use pomod::watcher::ConfigWatcher;

/// pomod - collaborative pomodoro timer daemon
#[derive(Parser, Debug)]
#[command(name = "pomod", version, about)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the config file (default: $XDG_CONFIG_HOME/pomod/config.toml)
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overridden by RUST_LOG
    #[arg(
        long,
        global = true,
        default_value = "info",
        value_parser = ["error", "warn", "info", "debug"]
    )]
    loglevel: String,

    /// Do not reload when the config file changes
    #[arg(long, global = true)]
    no_watch: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the daemon
    Start {
        /// Run as a background daemon (fork to background)
        #[arg(short = 'd', long)]
        daemon: bool,

        #[command(flatten)]
        timer: TimerArgs,
    },
    /// Follow a remote daemon and serve its timer locally
    Client {
        /// Address of the daemon to follow
        #[arg(short = 'o', long)]
        outbound_address: String,

        #[command(flatten)]
        timer: TimerArgs,
    },
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
    /// Ask the running daemon to reload its configuration
    Reload,
}

/// Settings that can be given on the command line.
#[derive(clap::Args, Debug, Default)]
struct TimerArgs {
    /// TCP control address; empty disables it
    #[arg(short = 'a', long)]
    tcp_address: Option<String>,

    /// HTTP API address; empty disables it
    #[arg(short = 'A', long)]
    http_address: Option<String>,

    /// File to save the timer state to and restore it from
    #[arg(long)]
    statefile: Option<PathBuf>,

    /// Save the state on every change, not only when quitting
    #[arg(long)]
    statefile_keep_updated: bool,

    /// Write timer events into a named pipe at this path
    #[arg(short = 'f', long)]
    fifo: Option<PathBuf>,

    /// Program to run when a mode starts (snapshot JSON as first argument)
    #[arg(long)]
    exec_start: Option<String>,

    /// Program to run when a mode ends
    #[arg(long)]
    exec_end: Option<String>,

    /// Program to run when the timer is (un)paused
    #[arg(long)]
    exec_pause: Option<String>,

    /// Work sessions before a long break
    #[arg(short = 's', long)]
    sessions: Option<u32>,

    /// Work duration (e.g. 25m)
    #[arg(long, value_parser = parse_std_duration)]
    work: Option<Duration>,

    /// Short break duration (e.g. 5m)
    #[arg(long, value_parser = parse_std_duration)]
    short_break: Option<Duration>,

    /// Long break duration (e.g. 30m)
    #[arg(long, value_parser = parse_std_duration)]
    long_break: Option<Duration>,

    /// Tick interval, the timer's resolution (e.g. 1s)
    #[arg(long, value_parser = parse_std_duration)]
    tick: Option<Duration>,

    /// Start paused
    #[arg(short = 'p', long, conflicts_with = "not_paused")]
    paused: bool,

    /// Start running
    #[arg(short = 'P', long)]
    not_paused: bool,
}

impl TimerArgs {
    fn into_overrides(self) -> SettingsOverrides {
        let paused = match (self.paused, self.not_paused) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        SettingsOverrides {
            tcp_address: self.tcp_address,
            http_address: self.http_address,
            statefile: self.statefile,
            statefile_keep_updated: self.statefile_keep_updated.then_some(true),
            fifo: self.fifo,
            exec_start: self.exec_start,
            exec_end: self.exec_end,
            exec_pause: self.exec_pause,
            sessions: self.sessions,
            work: self.work,
            short_break: self.short_break,
            long_break: self.long_break,
            tick: self.tick,
            paused,
        }
    }
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("pomod")
}

/// Returns the path to the PID file.
fn pid_file_path() -> PathBuf {
    state_dir().join("pomod.pid")
}

/// Returns the path to the log file.
fn log_file_path() -> PathBuf {
    state_dir().join("pomod.log")
}

/// Reads the PID from the PID file, if it exists.
fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

/// Writes the current PID to the PID file.
fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

fn is_process_running(pid: u32) -> bool {
    // signal 0 only checks that the process exists
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Returns the PID of a running daemon, cleaning up a stale PID file.
fn is_daemon_running() -> Option<u32> {
    if let Some(pid) = read_pid() {
        if is_process_running(pid) {
            return Some(pid);
        }
        remove_pid_file();
    }
    None
}

fn send_signal(pid: u32, signal: libc::c_int) -> Result<()> {
    let target = libc::pid_t::try_from(pid).context("PID out of range")?;
    let result = unsafe { libc::kill(target, signal) };
    if result != 0 {
        bail!("Failed to signal process {}", pid);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command.unwrap_or(Command::Start {
        daemon: false,
        timer: TimerArgs::default(),
    });

    match command {
        Command::Start { daemon, timer } => {
            let loader = SettingsLoader::new(args.config, timer.into_overrides());
            start(loader, RunMode::Standalone, daemon, &args.loglevel, !args.no_watch)
        }
        Command::Client {
            outbound_address,
            timer,
        } => {
            let loader = SettingsLoader::new(args.config, timer.into_overrides());
            start(
                loader,
                RunMode::Satellite { outbound_address },
                false,
                &args.loglevel,
                !args.no_watch,
            )
        }
        Command::Stop => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                return Ok(());
            };
            println!("Stopping daemon (PID {})...", pid);
            send_signal(pid, libc::SIGTERM)?;

            for _ in 0..50 {
                if !is_process_running(pid) {
                    println!("Daemon stopped.");
                    return Ok(());
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            eprintln!("Daemon did not stop within 5 seconds.");
            process::exit(1);
        }
        Command::Reload => {
            let Some(pid) = is_daemon_running() else {
                eprintln!("Daemon is not running.");
                process::exit(1);
            };
            send_signal(pid, libc::SIGHUP)?;
            println!("Reload requested (PID {}).", pid);
            Ok(())
        }
        Command::Status => {
            let Some(pid) = is_daemon_running() else {
                println!("Daemon is not running.");
                process::exit(1);
            };
            println!("Daemon is running (PID {})", pid);

            let settings = SettingsLoader::new(args.config, SettingsOverrides::default()).load();
            if let Some(address) = settings.ok().as_ref().and_then(|s| s.tcp_address()) {
                match query_timer(address) {
                    Ok(lines) => lines.iter().for_each(|line| println!("{line}")),
                    Err(e) => eprintln!("Could not query {}: {:#}", address, e),
                }
            }
            Ok(())
        }
    }
}

/// Asks the TCP daemon for the `timer` fields.
fn query_timer(address: &str) -> Result<Vec<String>> {
    let stream = TcpStream::connect(address).context("connect")?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let mut greeting = String::new();
    reader.read_line(&mut greeting)?;
    if !greeting.starts_with("OK ") {
        bail!("unexpected greeting {:?}", greeting.trim_end());
    }

    writer.write_all(b"timer\n")?;
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            bail!("connection closed");
        }
        let line = line.trim_end().to_string();
        if line == "OK" {
            return Ok(lines);
        }
        if line.starts_with("ACK ") {
            bail!("{}", line);
        }
        lines.push(line);
    }
}

fn start(
    loader: SettingsLoader,
    mode: RunMode,
    daemon: bool,
    loglevel: &str,
    watch: bool,
) -> Result<()> {
    if let Some(pid) = is_daemon_running() {
        eprintln!("Daemon is already running (PID {})", pid);
        eprintln!("Use 'pomod stop' to stop it first.");
        process::exit(1);
    }

    // Fail before forking if the configuration is unusable
    loader.load().context("Invalid configuration")?;

    // Resolved before daemonizing changes the working directory
    let watched = loader
        .config_path()
        .filter(|_| watch)
        .and_then(|path| path.canonicalize().ok());

    if daemon {
        // Daemonize before starting tokio runtime
        daemonize()?;
    }

    write_pid()?;
    let result = run_daemon(loader, mode, watched, loglevel);
    remove_pid_file();
    result
}

/// Daemonizes the current process.
fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let log_path = log_file_path();
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent).context("Failed to create log directory")?;
    }

    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

fn env_filter(loglevel: &str) -> Result<EnvFilter> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(EnvFilter::from_default_env());
    }
    let mut filter = EnvFilter::new("warn");
    for target in ["pomod", "pomo", "pomo_core", "pomo_protocol"] {
        filter = filter.add_directive(format!("{target}={loglevel}").parse()?);
    }
    Ok(filter)
}

/// Runs the daemon (async entry point).
#[tokio::main]
async fn run_daemon(
    loader: SettingsLoader,
    mode: RunMode,
    watched: Option<PathBuf>,
    loglevel: &str,
) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(loglevel)?)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        ?mode,
        "pomod starting"
    );

    let (signal_tx, signal_rx) = mpsc::channel(8);
    let _watcher = watched.and_then(|path| match ConfigWatcher::spawn(&path, signal_tx.clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "Config file changes will need a SIGHUP");
            None
        }
    });
    tokio::spawn(async move {
        if let Err(e) = forward_signals(signal_tx).await {
            error!(error = %e, "Error waiting for signals");
        }
    });

    Supervisor::new(loader, mode).run(signal_rx).await?;

    info!("pomod stopped");
    Ok(())
}

/// Turns OS signals into lifecycle signals.
async fn forward_signals(tx: mpsc::Sender<LifecycleSignal>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigquit = signal(SignalKind::quit())?;

    loop {
        let lifecycle = tokio::select! {
            _ = sighup.recv() => {
                info!("Received SIGHUP");
                LifecycleSignal::Reload
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                LifecycleSignal::Terminate
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                LifecycleSignal::Terminate
            }
            _ = sigquit.recv() => {
                info!("Received SIGQUIT");
                LifecycleSignal::Terminate
            }
        };

        if tx.send(lifecycle).await.is_err() || lifecycle == LifecycleSignal::Terminate {
            return Ok(());
        }
    }
}
