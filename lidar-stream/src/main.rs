//! lidar-stream - streaming daemon
//!
//! Runs one streamer per head and feeds it from the synthetic source:
//!
//! | Mode | Port | Clients |
//! |------|------|---------|
//! | processed | `processed_base_port + head` | one TCP client per head, last one wins |
//! | raw | `raw_base_port + head` | same |
//!
//! Any fatal pipeline error (pool exhaustion, ring overflow) stops the
//! daemon with a non-zero exit status.

use crossbeam_channel::{bounded, select, tick};
use lidar_stream::adapters::{ProcessedDataAdapter, RawDataAdapter, RawOutcome};
use lidar_stream::config::{Config, DEFAULT_CONFIG_PATH};
use lidar_stream::core::types::OutputMode;
use lidar_stream::core::PipelineContext;
use lidar_stream::devices::SyntheticSource;
use lidar_stream::error::{Error, Result};
use lidar_stream::streaming::StreamerStage;
use std::env;
use std::time::{Duration, Instant};

/// Interval between statistics lines
const STATS_INTERVAL: Duration = Duration::from_secs(10);

/// Parse config path from command line arguments.
///
/// Supports:
/// - `lidar-stream <path>` (positional)
/// - `lidar-stream --config <path>` (flag-based)
/// - `lidar-stream -c <path>` (short flag)
///
/// Defaults to `/etc/lidar-stream.toml` if not specified.
fn parse_config_path() -> String {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return args[1].clone();
    }

    DEFAULT_CONFIG_PATH.to_string()
}

enum Feed {
    Processed(ProcessedDataAdapter),
    Raw(RawDataAdapter),
}

/// One field-of-view stream: source, adapter and streamer
struct Head {
    id: u16,
    source: SyntheticSource,
    feed: Feed,
    stage: StreamerStage,
}

impl Head {
    /// Push one frame from the source through the adapter
    fn pump(&mut self) -> Result<()> {
        match &mut self.feed {
            Feed::Processed(adapter) => {
                let fov = self.source.next_fov();
                adapter.process_fov(&fov, &self.stage)?;
            }
            Feed::Raw(adapter) => {
                for capture in self.source.next_raw_frame() {
                    if adapter.process_capture(&capture, &self.stage)? == RawOutcome::Rejected {
                        log::trace!("Head {}: capture rejected by frame gate", self.id);
                    }
                }
            }
        }
        Ok(())
    }

    fn log_stats(&self) {
        let stats = self.stage.stats();
        log::info!(
            "Head {} ({}): {} packets, {} calibration packets, {} dropped chunks, {} connections, queue {}",
            self.id,
            self.stage.local_addr(),
            stats.packets_sent,
            stats.calibration_packets,
            stats.chunks_dropped,
            stats.connections,
            self.stage.queued()
        );
        if let Feed::Raw(adapter) = &self.feed {
            log::info!(
                "Head {}: {} raw frames admitted, {} captures rejected",
                self.id,
                adapter.frames(),
                adapter.rejected()
            );
        }
    }
}

fn main() -> Result<()> {
    let config_path = parse_config_path();
    let config = Config::load(&config_path)?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    log::info!("lidar-stream v{} starting...", env!("CARGO_PKG_VERSION"));
    log::info!("Using config: {}", config_path);

    let ctx = PipelineContext::from_config(&config)?;
    let mode = ctx.output_mode();
    log::info!(
        "Device {:#x} (version {:#x}): {} heads, {} output over {:?}",
        config.device.device_id,
        config.device.device_version,
        config.device.heads,
        mode,
        config.network.transport
    );

    let mut heads = Vec::with_capacity(config.device.heads as usize);
    for id in 0..config.device.heads {
        let stage = StreamerStage::start(&ctx, &config, id)?;
        log::info!("Head {} streaming on {}", id, stage.local_addr());
        let feed = match mode {
            OutputMode::ProcessedData => Feed::Processed(ProcessedDataAdapter::new(ctx.clone())),
            OutputMode::RawData => Feed::Raw(RawDataAdapter::new(ctx.clone())),
        };
        heads.push(Head {
            id,
            source: SyntheticSource::new(id, &config.mock),
            feed,
            stage,
        });
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        let _ = stop_tx.try_send(());
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let period = Duration::from_secs_f32(1.0 / config.mock.frame_rate_hz);
    let ticker = tick(period);
    let mut last_stats = Instant::now();
    let mut outcome = Ok(());

    log::info!("lidar-stream running. Press Ctrl-C to stop.");
    'run: loop {
        select! {
            recv(stop_rx) -> _ => break 'run,
            recv(ticker) -> _ => {
                for head in heads.iter_mut() {
                    if let Err(e) = head.pump() {
                        log::error!("Head {}: fatal pipeline error: {}", head.id, e);
                        outcome = Err(e);
                        break 'run;
                    }
                }
            }
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            heads.iter().for_each(Head::log_stats);
            last_stats = Instant::now();
        }
    }

    log::info!("Shutting down...");
    for head in heads.iter_mut() {
        if let Err(e) = head.stage.stop() {
            log::error!("Head {}: stop failed: {}", head.id, e);
        }
        head.log_stats();
    }

    log::info!("lidar-stream stopped");
    outcome
}
