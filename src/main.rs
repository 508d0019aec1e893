use anyhow::{Context, Result};
use clap::Parser;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wanstatus::config::{Config, FileConfigSource};
use wanstatus::report::StatusReport;
use wanstatus::state::WanIpStore;
use wanstatus::supervisor::{ComponentFactory, LiveComponents, Supervisor};

#[derive(Parser, Debug)]
#[command(name = "wanstatus", version)]
#[command(about = "Home internet outage and WAN IP change monitor", long_about = None)]
struct Args {
    /// Config file path (default: ./wanstatus.toml, then the user and system config dirs)
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Append log output to this file
    #[arg(short, long)]
    log_file: Option<PathBuf>,

    /// Print the tail of the log file and exit
    #[arg(short, long)]
    print_log: bool,

    /// Run continuously, watching for outages and WAN IP changes
    #[arg(long)]
    service: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let path = Config::locate(args.config_file.as_deref())?;
    let (source, cfg) = FileConfigSource::open(&path)
        .with_context(|| format!("Failed loading config file <{}>", path.display()))?;

    let log_file = args.log_file.clone().or_else(|| {
        if args.service {
            cfg.logging.log_file.clone()
        } else {
            None
        }
    });

    if args.print_log {
        let log_file = log_file
            .or_else(|| cfg.logging.log_file.clone())
            .context("No log file given (--log-file or logging.log_file)")?;
        return print_log_tail(&log_file, cfg.logging.print_log_length);
    }

    init_logging(&cfg.logging.level, log_file.as_deref())?;

    tracing::info!("Wanstatus v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Config file: {}", source.path().display());

    if args.service {
        run_service(cfg, source).await
    } else {
        run_once(&cfg).await
    }
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match log_file {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn print_log_tail(path: &Path, lines: usize) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let all: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    for line in &all[all.len().saturating_sub(lines)..] {
        println!("{line}");
    }
    Ok(())
}

/// One pass over every check, reported and done
async fn run_once(cfg: &Config) -> Result<()> {
    let mut components = LiveComponents.build(cfg)?;
    let saved_wan_ip = WanIpStore::new(cfg.global.wan_ip_path()).load()?;

    let report = StatusReport::collect(&mut components, &saved_wan_ip).await;
    report.log();
    components.close();

    if !report.is_healthy() {
        tracing::warn!("One or more checks failed");
    }
    Ok(())
}

async fn run_service(cfg: Config, source: FileConfigSource) -> Result<()> {
    let supervisor = Supervisor::new(cfg, Box::new(source), Box::new(LiveComponents))?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        trigger.cancel();
    });

    supervisor.run(cancel).await
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::warn!("Keyboard interrupt"),
        _ = terminate => tracing::warn!("SIGTERM received"),
    }
}
