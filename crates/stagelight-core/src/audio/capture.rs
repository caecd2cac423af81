//! Audio capture actor and the frame-loop task that consumes it
//!
//! A worker thread owns the capture handle and pushes PCM blocks into a
//! single-slot channel. The frame loop pops at most one block per tick
//! without blocking; when the worker's heartbeat stalls the task restarts
//! it.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::scheduler::{EngineContext, Task};
use crate::{CoreError, Result};

/// Minimum gap between two overflow reports
const OVERFLOW_REPORT_INTERVAL: f64 = 1.0;

/// Where the frame loop gets its PCM blocks from
pub trait CaptureSource: Send {
    /// Start producing blocks
    fn start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Pop the next block without blocking
    fn read_block(&mut self) -> Option<Vec<i16>>;

    /// Clock time the producer last showed signs of life
    fn last_heartbeat(&self) -> f64;

    /// Blocks dropped because the consumer fell behind, since the last call
    fn take_overflows(&mut self) -> u64 {
        0
    }

    /// Tear down and respawn the producer
    fn restart(&mut self) -> Result<()>;

    /// Stop producing
    fn stop(&mut self) {}
}

/// Producer half of the capture channel, handed to the worker thread
#[derive(Clone)]
pub struct BlockSender {
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
    heartbeat: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    clock: Arc<dyn Clock>,
}

impl BlockSender {
    /// Queue a block, replacing any block the consumer has not picked up yet
    pub fn push(&self, block: Vec<i16>) {
        self.beat();
        match self.tx.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(block)) => {
                let _ = self.rx.try_recv();
                self.overflows.fetch_add(1, Ordering::Relaxed);
                let _ = self.tx.try_send(block);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Record liveness without producing a block
    pub fn beat(&self) {
        self.heartbeat
            .store(self.clock.now().to_bits(), Ordering::Release);
    }

    /// True once this worker generation has been told to exit
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

/// Body of a capture worker; runs on its own thread until
/// [`BlockSender::should_stop`] returns true
pub type WorkerFn = Arc<dyn Fn(BlockSender) -> Result<()> + Send + Sync>;

/// [`CaptureSource`] backed by a restartable worker thread
pub struct ThreadCapture {
    name: String,
    worker: WorkerFn,
    tx: Sender<Vec<i16>>,
    rx: Receiver<Vec<i16>>,
    heartbeat: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    clock: Arc<dyn Clock>,
}

impl ThreadCapture {
    /// Capture source running `worker` on a thread named `name`
    pub fn new(name: impl Into<String>, clock: Arc<dyn Clock>, worker: WorkerFn) -> Self {
        let (tx, rx) = bounded(1);
        Self {
            name: name.into(),
            worker,
            tx,
            rx,
            heartbeat: Arc::new(AtomicU64::new(clock.now().to_bits())),
            overflows: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
            clock,
        }
    }

    fn spawn(&mut self) -> Result<()> {
        // Each generation gets its own stop flag so a hung worker that
        // wakes up late exits instead of competing with its successor.
        self.stop = Arc::new(AtomicBool::new(false));
        self.heartbeat
            .store(self.clock.now().to_bits(), Ordering::Release);

        let sender = BlockSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            heartbeat: self.heartbeat.clone(),
            overflows: self.overflows.clone(),
            stop: self.stop.clone(),
            clock: self.clock.clone(),
        };
        let worker = self.worker.clone();
        let name = self.name.clone();
        let handle = std::thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                if let Err(e) = worker(sender) {
                    error!("Capture worker {} exited: {}", name, e);
                }
            })?;
        self.handle = Some(handle);
        info!("Capture worker {} started", self.name);
        Ok(())
    }

    fn signal_stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
            // A stuck worker is left detached; its stop flag is already set.
        }
    }
}

impl CaptureSource for ThreadCapture {
    fn start(&mut self) -> Result<()> {
        self.spawn()
    }

    fn read_block(&mut self) -> Option<Vec<i16>> {
        match self.rx.try_recv() {
            Ok(block) => Some(block),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    fn last_heartbeat(&self) -> f64 {
        f64::from_bits(self.heartbeat.load(Ordering::Acquire))
    }

    fn take_overflows(&mut self) -> u64 {
        self.overflows.swap(0, Ordering::Relaxed)
    }

    fn restart(&mut self) -> Result<()> {
        self.signal_stop();
        while self.rx.try_recv().is_ok() {}
        self.spawn()
    }

    fn stop(&mut self) {
        self.signal_stop();
    }
}

impl Drop for ThreadCapture {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// Frame-loop task popping one block per tick into `frame.raw_audio`
pub struct CaptureTask {
    source: Box<dyn CaptureSource>,
    watchdog_timeout: f64,
    pending_overflows: u64,
    last_overflow_report: f64,
    restarts: u32,
}

impl CaptureTask {
    /// Task polling `source`, restarting it when its heartbeat is older
    /// than `watchdog_timeout` seconds
    pub fn new(source: Box<dyn CaptureSource>, watchdog_timeout: f64) -> Self {
        Self {
            source,
            watchdog_timeout,
            pending_overflows: 0,
            last_overflow_report: f64::NEG_INFINITY,
            restarts: 0,
        }
    }

    /// Number of watchdog restarts so far
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    fn report_overflows(&mut self, now: f64) {
        self.pending_overflows += self.source.take_overflows();
        if self.pending_overflows > 0 && now - self.last_overflow_report >= OVERFLOW_REPORT_INTERVAL
        {
            warn!("Capture overflowed {} blocks", self.pending_overflows);
            self.pending_overflows = 0;
            self.last_overflow_report = now;
        }
    }
}

impl Task for CaptureTask {
    fn name(&self) -> &str {
        "capture"
    }

    fn start(&mut self, _ctx: &mut EngineContext) -> Result<()> {
        self.source.start()
    }

    fn run(&mut self, ctx: &mut EngineContext) -> Result<()> {
        let now = ctx.frame.now;
        let stalled_for = now - self.source.last_heartbeat();
        if stalled_for > self.watchdog_timeout {
            warn!(
                "Capture heartbeat stalled for {:.2}s, restarting worker",
                stalled_for
            );
            self.restarts += 1;
            self.source.restart().map_err(|e| CoreError::Task {
                task: "capture".into(),
                message: format!("restart failed: {}", e),
            })?;
            // The in-flight block belongs to the dead worker
            return Ok(());
        }

        ctx.frame.raw_audio = self.source.read_block();
        self.report_overflows(now);
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut EngineContext) {
        self.source.stop();
    }
}

/// Microphone capture through cpal
#[cfg(feature = "audio")]
pub mod microphone {
    use super::{BlockSender, WorkerFn};
    use crate::{CoreError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, SampleFormat, StreamConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing::{error, info};

    /// Worker reading `block_len`-sample mono blocks at `sample_rate` from
    /// the first input device whose name contains `device` (default device
    /// when `None`)
    pub fn worker(device: Option<String>, sample_rate: u32, block_len: usize) -> WorkerFn {
        Arc::new(move |sender: BlockSender| run(device.as_deref(), sample_rate, block_len, sender))
    }

    /// Names of available input devices
    pub fn input_device_names() -> Vec<String> {
        cpal::default_host()
            .input_devices()
            .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
            .unwrap_or_default()
    }

    fn find_device(wanted: Option<&str>) -> Result<Device> {
        let host = cpal::default_host();
        match wanted {
            Some(fragment) => host
                .input_devices()
                .map_err(|e| CoreError::Capture(e.to_string()))?
                .find(|d| d.name().map(|n| n.contains(fragment)).unwrap_or(false))
                .ok_or_else(|| CoreError::Capture(format!("no input device matching {fragment:?}"))),
            None => host
                .default_input_device()
                .ok_or_else(|| CoreError::Capture("no default input device".into())),
        }
    }

    fn run(wanted: Option<&str>, sample_rate: u32, block_len: usize, sender: BlockSender) -> Result<()> {
        let device = find_device(wanted)?;
        let default = device
            .default_input_config()
            .map_err(|e| CoreError::Capture(e.to_string()))?;
        let format = default.sample_format();
        let config = StreamConfig {
            channels: default.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, block_len, sender.clone()),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, block_len, sender.clone()),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, block_len, sender.clone()),
            other => {
                return Err(CoreError::Capture(format!(
                    "unsupported sample format {other:?}"
                )))
            }
        }
        .map_err(|e| CoreError::Capture(e.to_string()))?;
        stream.play().map_err(|e| CoreError::Capture(e.to_string()))?;

        info!(
            "Capturing from {} at {} Hz ({} channels)",
            device.name().unwrap_or_default(),
            sample_rate,
            config.channels
        );

        while !sender.should_stop() {
            std::thread::sleep(Duration::from_millis(20));
        }
        Ok(())
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        block_len: usize,
        sender: BlockSender,
    ) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: cpal::Sample + cpal::SizedSample,
        i16: cpal::FromSample<T>,
    {
        let channels = usize::from(config.channels.max(1));
        let mut block: Vec<i16> = Vec::with_capacity(block_len);
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                // First channel only
                for frame in data.chunks(channels) {
                    block.push(<i16 as cpal::Sample>::from_sample(frame[0]));
                    if block.len() == block_len {
                        sender.push(std::mem::replace(&mut block, Vec::with_capacity(block_len)));
                    }
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
    }
}
