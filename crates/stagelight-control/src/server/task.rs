//! Frame-loop adapter for the control server

use std::sync::Arc;

use parking_lot::Mutex;
use stagelight_core::{EngineContext, Task};

use super::ControlServer;

/// Which half of the server a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Accept, read and dispatch commands
    Input,
    /// Broadcast monitor events
    Output,
}

/// Runs one phase of a shared [`ControlServer`] every tick
pub struct NetworkTask {
    server: Arc<Mutex<ControlServer>>,
    phase: Phase,
}

impl NetworkTask {
    /// Input and output tasks sharing one server
    pub fn pair(server: ControlServer) -> (Self, Self) {
        let server = Arc::new(Mutex::new(server));
        (
            Self {
                server: Arc::clone(&server),
                phase: Phase::Input,
            },
            Self {
                server,
                phase: Phase::Output,
            },
        )
    }

    /// Phase this task runs
    pub fn phase(&self) -> Phase {
        self.phase
    }
}

impl Task for NetworkTask {
    fn name(&self) -> &str {
        match self.phase {
            Phase::Input => "network input",
            Phase::Output => "network output",
        }
    }

    fn run(&mut self, ctx: &mut EngineContext) -> stagelight_core::Result<()> {
        let mut server = self.server.lock();
        match self.phase {
            Phase::Input => server.run_input(ctx),
            Phase::Output => server.run_output(ctx),
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut EngineContext) {
        self.server.lock().shutdown();
    }
}
