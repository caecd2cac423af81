//! Stagelight - audio-reactive DMX lighting engine
//!
//! Listens to a microphone, turns the spectrum into fixture movements and
//! colors, and sends the result over Art-Net. A TCP control server lets
//! clients inspect and override the rig while it runs.

#![warn(missing_docs)]

mod logging_setup;
mod watchdog;

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use stagelight_control::{ControlServer, DmxOutput, NetworkTask, RemoteStrip};
use stagelight_core::audio::capture::microphone;
use stagelight_core::audio::ThreadCapture;
use stagelight_core::{
    AudioFeatureExtractor, CaptureTask, Clock, EngineConfig, EngineContext, FixtureTask,
    FrameScheduler, SystemClock,
};
use tracing::{info, warn};

use watchdog::HeartbeatTask;

/// Command line
#[derive(Parser, Debug)]
#[command(name = "stagelight", version, about = "Audio-reactive DMX lighting engine")]
struct Cli {
    /// Configuration file (.json or .toml); defaults to ./config.json, then ./config.toml
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Start with every fixture suspended so only control clients drive the rig
    #[arg(short, long)]
    manual: bool,

    /// Run the engine as a supervised child, restarting it when its
    /// heartbeat stalls for this many seconds
    #[arg(short, long, value_name = "SECONDS")]
    watchdog: Option<f64>,

    /// List audio input devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Heartbeat file written for the supervisor
    #[arg(long, hide = true, value_name = "FILE")]
    heartbeat: Option<PathBuf>,
}

impl Cli {
    // Arguments for a supervised child: everything but --watchdog.
    fn child_args(&self) -> Vec<OsString> {
        let mut args = Vec::new();
        if let Some(config) = &self.config {
            args.push(OsString::from("--config"));
            args.push(config.clone().into_os_string());
        }
        if self.manual {
            args.push(OsString::from("--manual"));
        }
        args
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.list_devices {
        for name in microphone::input_device_names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    // A supervised child writes the log file; the supervisor only logs to the console.
    let mut log_config = config.log.clone();
    if cli.watchdog.is_some() {
        log_config.file_output = false;
    }
    let _log_guard = logging_setup::init(&log_config)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc::set_handler(move || {
            info!("Received termination signal");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("Failed to install signal handler")?;
    }

    if let Some(timeout) = cli.watchdog {
        anyhow::ensure!(timeout > 0.0, "--watchdog needs a positive number of seconds");
        return watchdog::supervise(timeout, cli.child_args(), &shutdown);
    }

    let mut scheduler = build_engine(&config, &cli)?;
    info!("Running tasks: {}", scheduler.task_names().join(", "));
    scheduler.run_until(&shutdown)?;
    info!("Stagelight stopped");
    Ok(())
}

/// Wire every task in frame order: capture, features, network input,
/// fixtures, LED strips, DMX, network output.
fn build_engine(config: &EngineConfig, cli: &Cli) -> Result<FrameScheduler> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut ctx = EngineContext::new(Arc::clone(&clock));
    for fixture in config.build_fixtures(cli.manual)? {
        ctx.add_fixture(Box::new(fixture));
    }
    if cli.manual {
        info!("Manual mode: all fixtures suspended");
    }

    let settings = config.audio_settings();
    let mut scheduler = FrameScheduler::new(ctx, config.fps);

    let worker = microphone::worker(
        config.capture.device.clone(),
        settings.mic_rate,
        settings.samples_per_frame(),
    );
    let source = ThreadCapture::new("microphone", Arc::clone(&clock), worker);
    scheduler.add_task(Box::new(CaptureTask::new(
        Box::new(source),
        config.capture.watchdog_timeout,
    )));
    scheduler.add_task(Box::new(AudioFeatureExtractor::new(&settings)));

    let network = if config.network.enabled {
        let addr = format!("{}:{}", config.network.host, config.network.port);
        let server = ControlServer::bind(addr.as_str())
            .with_context(|| format!("Failed to start control server on {}", addr))?;
        Some(NetworkTask::pair(server))
    } else {
        None
    };
    let (network_input, network_output) = match network {
        Some((input, output)) => (Some(input), Some(output)),
        None => (None, None),
    };

    if let Some(task) = network_input {
        scheduler.add_task(Box::new(task));
    }
    scheduler.add_task(Box::new(FixtureTask));
    for strip in config.strips() {
        let task = RemoteStrip::new(strip, settings.n_fft_bins)
            .with_context(|| format!("Invalid LED strip {}", strip.name))?;
        scheduler.add_task(Box::new(task));
    }
    match &config.dmx {
        Some(dmx) => scheduler.add_task(Box::new(DmxOutput::from_config(dmx, config.fps))),
        None => warn!("No DMX device configured, fixture output is discarded"),
    }
    if let Some(task) = network_output {
        scheduler.add_task(Box::new(task));
    }
    if let Some(path) = &cli.heartbeat {
        scheduler.add_task(Box::new(HeartbeatTask::new(path.clone())));
    }

    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_args_drop_watchdog() {
        let cli = Cli::parse_from([
            "stagelight",
            "--watchdog",
            "2.5",
            "--config",
            "rig.toml",
            "--manual",
        ]);
        assert_eq!(cli.watchdog, Some(2.5));
        assert_eq!(
            cli.child_args(),
            vec![
                OsString::from("--config"),
                OsString::from("rig.toml"),
                OsString::from("--manual"),
            ]
        );
    }

    #[test]
    fn test_engine_task_order() {
        let config = EngineConfig::from_json(
            r#"{
                "network": {"host": "127.0.0.1", "port": 0},
                "dmx": {"device": "sink"},
                "outputs": [
                    {"device": "UKingGobo", "name": "G1"},
                    {"device": "RemoteStrip", "name": "S1", "host": "127.0.0.1", "port": 7777, "n_pixels": 30}
                ]
            }"#,
        )
        .unwrap();
        let cli = Cli::parse_from(["stagelight", "--manual"]);
        let scheduler = build_engine(&config, &cli).unwrap();
        assert_eq!(
            scheduler.task_names(),
            vec![
                "capture",
                "audio features",
                "network input",
                "fixtures",
                "led strip",
                "dmx output",
                "network output",
            ]
        );
        assert_eq!(scheduler.context().suspended_names(), vec!["G1".to_string()]);
    }
}
