//! CLI Entry Point for rust-evb
//!
//! Provides command-line interface for:
//! - Running the event builder on UDP inputs and outputs
//! - Emulating front-end sources that feed a running builder
//! - Printing the resolved configuration
//!
//! # Usage
//!
//! Run the builder:
//! ```bash
//! rust-evb run --config config/evb.toml --run-number 1042
//! ```
//!
//! Feed it from three emulated sources:
//! ```bash
//! rust-evb emulate --target 127.0.0.1:5000 --sources 3 --rate 1000
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rust_evb::config::{EvbConfig, DEFAULT_CONFIG_PATH};
use rust_evb::dispatcher::Dispatcher;
use rust_evb::emulator::{EmulatorConfig, FrontEndEmulator};
use rust_evb::format::{EventTag, MAX_RUN_NUMBER};
use rust_evb::metrics::spawn_reporter;
use rust_evb::tracing_init;
use rust_evb::transport::{UdpSink, UdpSource};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "rust-evb")]
#[command(about = "Event builder for detector readout fragments", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the event builder until Ctrl+C
    Run {
        /// Configuration file (TOML format)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Run number written into every event header (24 bits)
        #[arg(
            long,
            default_value_t = 0,
            value_parser = clap::value_parser!(u32).range(..=i64::from(MAX_RUN_NUMBER))
        )]
        run_number: u32,
    },

    /// Emulate front-end sources sending fragments over UDP
    Emulate {
        /// Address of the first builder input; source i sends to port + i
        #[arg(long, default_value = "127.0.0.1:5000")]
        target: SocketAddr,

        /// Number of emulated sources
        #[arg(long, default_value_t = 1)]
        sources: u16,

        /// Fragments per second per source
        #[arg(long, default_value_t = 100)]
        rate: u32,

        /// Stop after this many events (0 = until Ctrl+C)
        #[arg(long, default_value_t = 0)]
        events: u64,

        /// Event class of the emitted fragments
        #[arg(long, value_parser = parse_tag, default_value = "physics")]
        tag: EventTag,

        /// Fraction of buffers truncated on purpose
        #[arg(long, default_value_t = 0.0)]
        corrupt_fraction: f64,

        /// Fraction of fragments repeating the previous event id
        #[arg(long, default_value_t = 0.0)]
        duplicate_fraction: f64,
    },

    /// Validate a configuration file and print it with defaults filled in
    CheckConfig {
        /// Configuration file (TOML format)
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

fn parse_tag(s: &str) -> Result<EventTag, String> {
    EventTag::ALL
        .into_iter()
        .find(|tag| tag.name() == s)
        .ok_or_else(|| format!("unknown event class '{s}'"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, run_number } => run_builder(config, run_number).await,
        Commands::Emulate {
            target,
            sources,
            rate,
            events,
            tag,
            corrupt_fraction,
            duplicate_fraction,
        } => {
            tracing_init::init(tracing_init::TracingConfig::default())?;
            let template = EmulatorConfig {
                tag,
                corrupt_fraction,
                duplicate_fraction,
                ..Default::default()
            };
            emulate(target, sources, rate, events, template).await
        }
        Commands::CheckConfig { config } => check_config(config),
    }
}

fn load_config(path: &Path) -> Result<EvbConfig> {
    let config = EvbConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(&path)?;
    println!("{}", config.to_toml_string()?);
    Ok(())
}

async fn run_builder(path: PathBuf, run_number: u32) -> Result<()> {
    let config = load_config(&path)?;
    tracing_init::init_from_config(&config)?;
    info!(
        name = %config.application.name,
        config = %path.display(),
        run_number,
        "Starting event builder"
    );

    if config.transport.inputs.is_empty() {
        anyhow::bail!("transport.inputs is empty; nothing to receive from");
    }
    let source = UdpSource::bind(&config.transport.inputs).await?;
    let sink = UdpSink::from_config(&config.transport).await?;

    let mut dispatcher = Dispatcher::new(config.builder.clone(), source, sink)?;
    dispatcher.start(run_number)?;
    let control = dispatcher.control();
    let reporter = spawn_reporter(dispatcher.metrics(), config.metrics.clone());

    let mut builder = tokio::spawn(async move { dispatcher.run().await });

    tokio::select! {
        result = &mut builder => {
            warn!("Dispatcher ended without a stop request");
            result??;
        }
        result = signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, stopping run");
            control.request_stop();
            let snapshot = builder.await??;
            info!(
                run_number = snapshot.run_number,
                physics = snapshot.emitted(EventTag::Physics),
                incomplete = snapshot.emitted(EventTag::Incomplete),
                "Event builder shutdown complete"
            );
        }
    }

    // The dispatcher owned the metrics sender; the reporter ends on its own.
    reporter.await?;
    Ok(())
}

async fn emulate(
    target: SocketAddr,
    sources: u16,
    rate: u32,
    events: u64,
    template: EmulatorConfig,
) -> Result<()> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await?;
    let mut emulators: Vec<(FrontEndEmulator, SocketAddr)> = (0..sources)
        .map(|i| {
            let config = EmulatorConfig {
                source_id: u32::from(i),
                ..template.clone()
            };
            let mut addr = target;
            addr.set_port(target.port().wrapping_add(i));
            (FrontEndEmulator::new(config), addr)
        })
        .collect();

    info!(%target, sources, rate, "Emulating front-end sources");
    let period = Duration::from_secs_f64(1.0 / f64::from(rate.max(1)));
    let mut ticker = tokio::time::interval(period);
    let mut sent = 0u64;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = signal::ctrl_c() => break,
        }
        let now = chrono::Utc::now().timestamp_micros().max(0) as u64;
        for (emulator, addr) in &mut emulators {
            let raw = emulator.next_buffer(now);
            if let Err(e) = socket.send_to(&raw, *addr).await {
                warn!(%addr, error = %e, "Send failed");
            }
        }
        sent += 1;
        if events > 0 && sent >= events {
            break;
        }
    }

    info!(sent, "Emulation finished");
    Ok(())
}
