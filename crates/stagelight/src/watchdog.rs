//! Process supervisor
//!
//! With `--watchdog` the engine runs as a child process. The child writes
//! its clock time to a heartbeat file every tick (at most four times a
//! second); the supervisor restarts it when it exits with an error or the
//! heartbeat goes stale.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use stagelight_core::{Clock, EngineContext, SystemClock, Task};
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RESTART_DELAY: Duration = Duration::from_secs(1);
const STOP_GRACE: Duration = Duration::from_secs(5);
const HEARTBEAT_INTERVAL: f64 = 0.25;

/// Writes the tick time to the heartbeat file
pub struct HeartbeatTask {
    path: PathBuf,
    last_write: Option<f64>,
    failing: bool,
}

impl HeartbeatTask {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_write: None,
            failing: false,
        }
    }
}

impl Task for HeartbeatTask {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn run(&mut self, ctx: &mut EngineContext) -> stagelight_core::Result<()> {
        let now = ctx.frame.now;
        if self
            .last_write
            .is_some_and(|t| now - t < HEARTBEAT_INTERVAL)
        {
            return Ok(());
        }
        self.last_write = Some(now);
        match std::fs::write(&self.path, now.to_string()) {
            Ok(()) => self.failing = false,
            Err(e) if !self.failing => {
                warn!("Failed to write heartbeat {:?}: {}", self.path, e);
                self.failing = true;
            }
            Err(_) => {}
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut EngineContext) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Seconds since the child last wrote its heartbeat, counting from
/// `spawned` until the first write
pub fn heartbeat_age(path: &Path, spawned: Instant, now: f64) -> f64 {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .map_or_else(|| spawned.elapsed().as_secs_f64(), |beat| now - beat)
}

enum Outcome {
    Exited(ExitStatus),
    Stalled(f64),
    Shutdown,
}

/// Restart the engine until it exits cleanly or `shutdown` is set
pub fn supervise(timeout: f64, child_args: Vec<OsString>, shutdown: &AtomicBool) -> Result<()> {
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    let heartbeat = std::env::temp_dir().join(format!("stagelight-{}.heartbeat", std::process::id()));
    info!(
        "Watchdog supervising {:?} (timeout {:.2}s, heartbeat {:?})",
        exe, timeout, heartbeat
    );

    let result = loop {
        let _ = std::fs::remove_file(&heartbeat);
        let mut child = Command::new(&exe)
            .args(&child_args)
            .arg("--heartbeat")
            .arg(&heartbeat)
            .spawn()
            .with_context(|| format!("Failed to start {:?}", exe))?;
        info!("Engine started as pid {}", child.id());

        match watch(&mut child, &heartbeat, timeout, shutdown)? {
            Outcome::Exited(status) if status.success() => {
                info!("Engine exited cleanly");
                break Ok(());
            }
            Outcome::Exited(status) => error!("Engine exited with {}, restarting", status),
            Outcome::Stalled(age) => {
                error!("Engine heartbeat stalled for {:.2}s, restarting", age);
                if let Err(e) = child.kill() {
                    warn!("Failed to kill engine: {}", e);
                }
                let _ = child.wait();
            }
            Outcome::Shutdown => {
                stop_child(&mut child);
                break Ok(());
            }
        }

        std::thread::sleep(RESTART_DELAY);
        if shutdown.load(Ordering::SeqCst) {
            break Ok(());
        }
    };

    let _ = std::fs::remove_file(&heartbeat);
    result
}

fn watch(child: &mut Child, heartbeat: &Path, timeout: f64, shutdown: &AtomicBool) -> Result<Outcome> {
    let spawned = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("Failed to poll engine")? {
            return Ok(Outcome::Exited(status));
        }
        if shutdown.load(Ordering::SeqCst) {
            return Ok(Outcome::Shutdown);
        }
        let age = heartbeat_age(heartbeat, spawned, SystemClock.now());
        if age > timeout {
            return Ok(Outcome::Stalled(age));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

// The child shares our terminal and gets the same signal; give it time to
// shut its tasks down before killing it.
fn stop_child(child: &mut Child) {
    let start = Instant::now();
    while start.elapsed() < STOP_GRACE {
        if let Ok(Some(_)) = child.try_wait() {
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    warn!("Engine did not stop within {:?}, killing it", STOP_GRACE);
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagelight_core::ManualClock;
    use std::sync::Arc;

    #[test]
    fn test_age_counts_from_spawn_without_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let spawned = Instant::now();
        let age = heartbeat_age(&dir.path().join("missing"), spawned, 1e9);
        assert!(age < 1.0);
    }

    #[test]
    fn test_age_from_written_heartbeat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beat");
        std::fs::write(&path, "100.5").unwrap();
        let age = heartbeat_age(&path, Instant::now(), 102.0);
        assert!((age - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_heartbeat_task_throttles_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beat");
        let clock = ManualClock::new(10.0);
        let mut ctx = EngineContext::new(Arc::new(clock.clone()));
        let mut task = HeartbeatTask::new(path.clone());

        ctx.frame.now = 10.0;
        task.run(&mut ctx).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10");

        ctx.frame.now = 10.1;
        task.run(&mut ctx).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10");

        ctx.frame.now = 10.5;
        task.run(&mut ctx).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "10.5");

        task.stop(&mut ctx);
        assert!(!path.exists());
    }
}
