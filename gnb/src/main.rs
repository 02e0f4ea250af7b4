//! Massive-MIMO GNodeB Main Application
//!
//! Runs the frame scheduling engine against the simulated radio and MAC.

mod config;

use anyhow::Result;
use clap::Parser;
use common::{UplinkTerminal, WorkerMode};
use scheduler::{NoopStats, Pipeline, RunOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::GnbConfig;

/// Massive-MIMO GNodeB
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Frames to process
    #[arg(long)]
    frames: Option<u32>,

    /// Worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Drive a single worker from the coordinator thread
    #[arg(long)]
    inline: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GnbConfig::from_file(path)?,
        None => GnbConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.pipeline.frames_to_test = frames;
    }
    if let Some(workers) = args.workers {
        config.pipeline.worker_threads = workers;
    }
    if args.inline {
        config.pipeline.worker_mode = WorkerMode::Inline;
        config.pipeline.worker_threads = 1;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Massive-MIMO GNodeB");
    match &args.config {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => info!("Configuration file: none, using defaults"),
    }

    let pipeline_config = &config.pipeline;
    info!("Pipeline configuration:");
    info!("  Frame schedule: {}", pipeline_config.frame_schedule);
    info!(
        "  Antennas: {} (beamforming {}), users: {}",
        pipeline_config.bs_ant_num,
        pipeline_config.bf_ant_num(),
        pipeline_config.ue_ant_num
    );
    info!("  Data subcarriers: {}", pipeline_config.ofdm_data_num);
    info!("  Frame window: {}", pipeline_config.frame_window);
    info!("  Frames: {}", pipeline_config.frames_to_test);
    info!(
        "  Workers: {} ({:?})",
        pipeline_config.worker_threads, pipeline_config.worker_mode
    );
    info!("  Uplink terminal: {:?}", pipeline_config.uplink_terminal);
    if pipeline_config.uplink_terminal != UplinkTerminal::Mac {
        info!("  Downlink scheduled on first received packet (no MAC)");
    }

    let mut pipeline = Pipeline::new(
        config.pipeline,
        config.radio,
        config.mac,
        Arc::new(config.executors),
    )?;
    if !config.log.stats {
        pipeline = pipeline.with_stats(Box::new(NoopStats));
    }
    let running = pipeline.run_flag();

    info!("GNodeB initialized successfully");

    // The engine owns its threads; keep it off the async runtime
    let mut engine = tokio::task::spawn_blocking(move || pipeline.run());

    let finished = tokio::select! {
        result = &mut engine => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    let joined = match finished {
        Some(result) => result,
        None => {
            info!("Received shutdown signal");
            running.stop();
            engine.await
        }
    };

    info!("Shutting down GNodeB");
    let report = match joined {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            error!("Pipeline failed: {}", e);
            return Err(e.into());
        }
        Err(e) => {
            error!("Pipeline thread failed: {}", e);
            return Err(e.into());
        }
    };

    info!("Run statistics:");
    info!("  Frames processed: {}", report.processing_frontier);
    info!("  Task events executed: {}", report.executed);
    info!(
        "  RX packets: {}, TX packets: {}",
        report.txrx.rx_packets, report.txrx.tx_packets
    );
    if let Some(mac) = &report.mac {
        info!(
            "  MAC frames: {}, uplink payloads: {}, SNR reports: {}",
            mac.frames_delivered, mac.payloads_received, mac.snr_reports
        );
    }

    match report.outcome {
        RunOutcome::Completed { frames } => {
            info!("GNodeB shutdown complete after {} frames", frames);
            Ok(())
        }
        RunOutcome::Stopped => {
            info!("GNodeB shutdown complete");
            Ok(())
        }
        RunOutcome::Halted(reason) => {
            warn!("Pipeline halted: {:?}", reason);
            Err(anyhow::anyhow!("Pipeline halted: {:?}", reason))
        }
    }
}
