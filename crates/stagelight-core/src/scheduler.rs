//! Frame scheduler - runs every task once per tick, in declared order
//!
//! The scheduler owns the [`EngineContext`]: the current [`Frame`], the
//! animatable fixtures and the outbound monitor queue. Tasks receive the
//! context by reference, so nothing outside the loop thread ever touches
//! fixture state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::clock::Clock;
use crate::fixture::Animatable;
use crate::frame::Frame;
use crate::monitor::MonitorQueue;
use crate::Result;

/// How often throughput is logged
const FPS_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic ticks-per-second logger
#[derive(Debug)]
pub struct FpsCounter {
    name: String,
    ticks: u32,
    window_start: Instant,
}

impl FpsCounter {
    /// Counter reporting under `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ticks: 0,
            window_start: Instant::now(),
        }
    }

    /// Count one tick; logs at DEBUG once per reporting window
    pub fn tick(&mut self) {
        self.ticks += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= FPS_REPORT_INTERVAL {
            let secs = elapsed.as_secs_f64();
            debug!(
                "{}: {:.1} ticks/s, {:.2} ms/tick",
                self.name,
                f64::from(self.ticks) / secs,
                secs * 1000.0 / f64::from(self.ticks)
            );
            self.ticks = 0;
            self.window_start = Instant::now();
        }
    }
}

/// Shared state passed through every task
pub struct EngineContext {
    /// Blackboard for the current tick
    pub frame: Frame,
    /// Fixtures in declared order
    pub fixtures: Vec<Box<dyn Animatable>>,
    /// Monitor events waiting to be broadcast
    pub events: MonitorQueue,
    clock: Arc<dyn Clock>,
}

impl EngineContext {
    /// Empty context reading time from `clock`
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            frame: Frame::new(now),
            fixtures: Vec::new(),
            events: MonitorQueue::new(),
            clock,
        }
    }

    /// Current clock time
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Register a fixture
    pub fn add_fixture(&mut self, fixture: Box<dyn Animatable>) {
        self.fixtures.push(fixture);
    }

    /// Look up a fixture by name
    pub fn fixture_mut(&mut self, name: &str) -> Option<&mut Box<dyn Animatable>> {
        self.fixtures.iter_mut().find(|f| f.name() == name)
    }

    /// Names of fixtures currently suspended
    pub fn suspended_names(&self) -> Vec<String> {
        self.fixtures
            .iter()
            .filter(|f| f.is_suspended())
            .map(|f| f.name().to_string())
            .collect()
    }

    /// Move fixture events into the monitor queue
    pub fn collect_events(&mut self) {
        for fixture in &mut self.fixtures {
            self.events.extend(fixture.take_events());
        }
    }

    // Fresh frame; link pushes not consumed last tick (targets declared
    // before their source) carry over once.
    fn begin_tick(&mut self) {
        let carried = std::mem::take(&mut self.frame.pushed_states);
        self.frame = Frame::new(self.clock.now());
        self.frame.pushed_states = carried;
    }
}

/// A unit of work run once per tick
pub trait Task {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Called once before the first tick; an error aborts startup
    fn start(&mut self, _ctx: &mut EngineContext) -> Result<()> {
        Ok(())
    }

    /// Called once per tick; errors are logged and the tick continues
    fn run(&mut self, ctx: &mut EngineContext) -> Result<()>;

    /// Called once at shutdown, in reverse declaration order
    fn stop(&mut self, _ctx: &mut EngineContext) {}
}

/// Runs every fixture in declared order
#[derive(Debug, Default)]
pub struct FixtureTask;

impl Task for FixtureTask {
    fn name(&self) -> &str {
        "fixtures"
    }

    fn start(&mut self, ctx: &mut EngineContext) -> Result<()> {
        for fixture in &mut ctx.fixtures {
            fixture.start(&mut ctx.frame);
        }
        ctx.collect_events();
        Ok(())
    }

    fn run(&mut self, ctx: &mut EngineContext) -> Result<()> {
        for fixture in &mut ctx.fixtures {
            fixture.tick(&mut ctx.frame);
        }
        ctx.collect_events();
        Ok(())
    }
}

/// The per-tick orchestrator
pub struct FrameScheduler {
    tasks: Vec<Box<dyn Task>>,
    context: EngineContext,
    tick_interval: Duration,
    started: bool,
    fps: FpsCounter,
}

impl FrameScheduler {
    /// Scheduler targeting `fps` ticks per second
    pub fn new(context: EngineContext, fps: u32) -> Self {
        Self {
            tasks: Vec::new(),
            context,
            tick_interval: Duration::from_secs_f64(1.0 / f64::from(fps.max(1))),
            started: false,
            fps: FpsCounter::new("frame loop"),
        }
    }

    /// Append a task; tasks run in the order they were added
    pub fn add_task(&mut self, task: Box<dyn Task>) {
        self.tasks.push(task);
    }

    /// Names of registered tasks, in run order
    pub fn task_names(&self) -> Vec<String> {
        self.tasks.iter().map(|t| t.name().to_string()).collect()
    }

    /// Engine context
    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Mutable engine context
    pub fn context_mut(&mut self) -> &mut EngineContext {
        &mut self.context
    }

    /// Start every task in order
    pub fn start(&mut self) -> Result<()> {
        self.context.begin_tick();
        for task in &mut self.tasks {
            debug!("Starting task {}", task.name());
            task.start(&mut self.context)?;
        }
        self.started = true;
        info!("Frame loop started with {} tasks", self.tasks.len());
        Ok(())
    }

    /// Run one tick: build a fresh frame and run every task once
    pub fn tick(&mut self) {
        self.fps.tick();
        self.context.begin_tick();
        for task in &mut self.tasks {
            if let Err(e) = task.run(&mut self.context) {
                error!("Task {} failed: {}", task.name(), e);
            }
        }
    }

    /// Tick at the target rate until `shutdown` is set, then stop
    pub fn run_until(&mut self, shutdown: &AtomicBool) -> Result<()> {
        if !self.started {
            self.start()?;
        }
        while !shutdown.load(Ordering::SeqCst) {
            let began = Instant::now();
            self.tick();
            if let Some(rest) = self.tick_interval.checked_sub(began.elapsed()) {
                std::thread::sleep(rest);
            }
        }
        info!("Shutdown requested, stopping tasks");
        self.stop();
        Ok(())
    }

    /// Stop every task in reverse order. Only the first call has an effect.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;
        for task in self.tasks.iter_mut().rev() {
            debug!("Stopping task {}", task.name());
            task.stop(&mut self.context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Task for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn start(&mut self, _ctx: &mut EngineContext) -> Result<()> {
            self.log.lock().push(format!("start {}", self.name));
            Ok(())
        }

        fn run(&mut self, ctx: &mut EngineContext) -> Result<()> {
            self.log.lock().push(format!("run {} {}", self.name, ctx.frame.now));
            if self.fail {
                return Err(crate::CoreError::Task {
                    task: self.name.into(),
                    message: "boom".into(),
                });
            }
            Ok(())
        }

        fn stop(&mut self, _ctx: &mut EngineContext) {
            self.log.lock().push(format!("stop {}", self.name));
        }
    }

    fn scheduler(clock: &ManualClock, log: &Arc<Mutex<Vec<String>>>) -> FrameScheduler {
        let mut scheduler = FrameScheduler::new(EngineContext::new(Arc::new(clock.clone())), 60);
        for (name, fail) in [("a", false), ("b", true), ("c", false)] {
            scheduler.add_task(Box::new(Recorder {
                name,
                log: log.clone(),
                fail,
            }));
        }
        scheduler
    }

    #[test]
    fn test_tasks_run_in_order_and_stop_in_reverse() {
        let clock = ManualClock::new(1.0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&clock, &log);

        scheduler.start().unwrap();
        scheduler.tick();
        clock.advance(0.5);
        scheduler.tick();
        scheduler.stop();
        scheduler.stop();

        let log = log.lock().clone();
        assert_eq!(
            log,
            vec![
                "start a", "start b", "start c", "run a 1", "run b 1", "run c 1", "run a 1.5",
                "run b 1.5", "run c 1.5", "stop c", "stop b", "stop a",
            ]
        );
    }

    #[test]
    fn test_each_tick_gets_a_fresh_frame() {
        let clock = ManualClock::new(0.0);
        let mut scheduler = FrameScheduler::new(EngineContext::new(Arc::new(clock.clone())), 30);
        scheduler.context_mut().frame.raw_audio = Some(vec![1, 2, 3]);
        scheduler.context_mut().frame.dmx.insert(1, 255);
        scheduler
            .context_mut()
            .frame
            .pushed_states
            .insert("late".into(), Default::default());
        clock.advance(1.0);
        scheduler.tick();

        let frame = &scheduler.context().frame;
        assert_eq!(frame.now, 1.0);
        assert!(frame.raw_audio.is_none());
        assert!(frame.dmx.is_empty());
        assert!(frame.pushed_states.contains_key("late"));
    }

    #[test]
    fn test_run_until_exits_when_flag_set() {
        let clock = ManualClock::new(0.0);
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = scheduler(&clock, &log);
        let shutdown = AtomicBool::new(true);
        scheduler.run_until(&shutdown).unwrap();

        let log = log.lock().clone();
        assert_eq!(log.first().map(String::as_str), Some("start a"));
        assert_eq!(log.last().map(String::as_str), Some("stop a"));
    }
}
