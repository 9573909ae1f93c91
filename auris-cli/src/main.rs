use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

/// Realtime voice conversation agent: bridges local audio I/O to a remote
/// multimodal speech model over a bidirectional streaming protocol.
#[derive(Parser, Debug)]
#[command(name = "auris", about = "Realtime voice conversation agent")]
struct Args {
    /// Path to a TOML config fragment. Repeat to layer overlays.
    #[arg(short, long, default_value = "config/auris.toml")]
    config: Vec<PathBuf>,

    /// List audio input/output devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// List processes capturable via audio.loopback (Windows only) and exit.
    #[arg(long)]
    list_processes: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("auris_core=info,auris=info"));
    match format {
        LogFormat::Pretty => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
        LogFormat::Json => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
    }
}

fn list_devices() -> Result<()> {
    let devices = auris_core::AudioDevice::enumerate_all().context("failed to enumerate audio devices")?;
    for device in devices {
        println!(
            "{:?}\t{}{}\trates={:?}\tmax_channels={}",
            device.device_type,
            device.name,
            if device.is_default { " (default)" } else { "" },
            device.sample_rates,
            device.max_channels,
        );
    }
    Ok(())
}

fn list_processes() -> Result<()> {
    let enumerator = auris_platform::windows::ProcessEnumerator::new();
    let processes = enumerator.enumerate_all().context("failed to enumerate processes")?;
    for p in processes {
        println!("{}\t{}\tthreads={}", p.pid, p.exe_name, p.thread_count);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(args.log_format);

    if args.list_devices {
        return list_devices();
    }
    if args.list_processes {
        return list_processes();
    }

    let mut fragments = Vec::with_capacity(args.config.len());
    for path in &args.config {
        let text = std::fs::read_to_string(path).with_context(|| format!("failed to read config file {:?}", path))?;
        fragments.push(text);
    }
    let fragment_refs: Vec<&str> = fragments.iter().map(String::as_str).collect();

    let env: std::collections::BTreeMap<String, String> = std::env::vars().collect();
    let config = auris_core::load_config(&fragment_refs, &env).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let (shutdown_tx, shutdown_rx) = auris_core::shutdown_channel();

    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("ctrl_c_received");
        shutdown_tx.shutdown();
    });

    auris_core::run(config, shutdown_rx).await.context("agent runtime failed")?;

    Ok(())
}
