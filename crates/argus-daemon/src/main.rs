mod dispatch;
mod hub;
mod outbox;

use anyhow::Context;
use argus_core::focus::{DaemonConfig, DEFAULT_FOCUS_DELAY_MS};
use argus_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use clap::Parser;
use std::{
    fs::OpenOptions,
    io::{self, Write},
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const SOCKET_DIR: &str = "agents-monitor";
const SOCKET_FILE: &str = "daemon.sock";
const LOG_FILE: &str = "argus-daemon.log";

#[derive(Clone, Debug)]
struct Config {
    socket_path: PathBuf,
    log_dir: String,
    debug: bool,
    queue_capacity: usize,
    write_timeout: Duration,
    daemon: DaemonConfig,
}

impl Config {
    fn hub_config(&self) -> hub::HubConfig {
        hub::HubConfig {
            socket_path: self.socket_path.clone(),
            write_timeout: self.write_timeout,
            queue_capacity: self.queue_capacity,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            daemon: self.daemon,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "argus-daemon")]
struct Args {
    #[arg(long, default_value = "")]
    socket: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
    #[arg(long, default_value_t = 2000)]
    write_timeout_ms: u64,
    #[arg(long, default_value_t = false)]
    auto_focus: bool,
    #[arg(long, default_value_t = DEFAULT_FOCUS_DELAY_MS)]
    focus_delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse());
    let _log_guard = init_logging(&config);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(
        event = "argus_daemon_start",
        socket = %config.socket_path.display(),
        log_dir = %config.log_dir,
        debug = config.debug
    );

    hub::run(config.hub_config(), shutdown_rx)
        .await
        .with_context(|| format!("serving {}", config.socket_path.display()))?;

    info!(event = "argus_daemon_stop");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            warn!(event = "argus_signal_error", error = %err);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn load_config(args: Args) -> Config {
    let socket_path = resolve_socket_path(&args.socket);
    let log_dir = resolve_log_dir(&args.log_dir);
    let debug = args.debug || env_true("ARGUS_DEBUG");
    let auto_focus_enabled = args.auto_focus || env_true("ARGUS_AUTO_FOCUS");
    Config {
        socket_path,
        log_dir,
        debug,
        queue_capacity: args.queue_capacity.max(1),
        write_timeout: Duration::from_millis(args.write_timeout_ms.max(1)),
        daemon: DaemonConfig {
            auto_focus_enabled,
            focus_delay_ms: args.focus_delay_ms,
        },
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("ARGUS_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.write_all(buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = file.flush();
            }
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    std::fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn default_socket_path(runtime_dir: Option<&str>) -> PathBuf {
    let base = runtime_dir
        .map(str::trim)
        .filter(|dir| !dir.is_empty())
        .unwrap_or("/tmp");
    PathBuf::from(base).join(SOCKET_DIR).join(SOCKET_FILE)
}

fn resolve_socket_path(socket_flag: &str) -> PathBuf {
    if !socket_flag.trim().is_empty() {
        return PathBuf::from(socket_flag);
    }
    if let Ok(value) = std::env::var("ARGUS_SOCKET") {
        if !value.trim().is_empty() {
            return PathBuf::from(value);
        }
    }
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").ok();
    default_socket_path(runtime_dir.as_deref())
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    if let Ok(value) = std::env::var("ARGUS_LOG_DIR") {
        if !value.trim().is_empty() {
            return value;
        }
    }
    String::new()
}
