//! State effects: higher-priority choreography that temporarily owns properties
//!
//! At most one state effect is active per fixture. Candidates are checked in
//! priority order every tick; see [`Fixture::tick`](super::Fixture::tick).

use rand::Rng;

use super::fixture::{Animatable, Fixture};
use crate::effect::Effect;
use crate::frame::Frame;

/// A behaviour override evaluated once per tick
pub trait StateEffect: Send {
    /// Name reported in monitor events
    fn name(&self) -> &'static str;

    /// Whether this effect should be active for the current frame
    fn applicable(&self, fixture: &Fixture, frame: &Frame) -> bool;

    /// Called once when the effect becomes active
    fn apply(&mut self, _fixture: &mut Fixture, _frame: &mut Frame) {}

    /// Called every tick while the effect stays active
    fn run(&mut self, _fixture: &mut Fixture, _frame: &mut Frame) {}

    /// Called once when the effect is displaced or no longer applicable
    fn unapply(&mut self, _fixture: &mut Fixture, _frame: &mut Frame) {}
}

/// Profile-specific effects added while dead-coasting
pub type CoastingExtras = fn(&mut Fixture, f64) -> Vec<(&'static str, Effect)>;

fn random_channel() -> i32 {
    rand::rng().random_range(0..=255)
}

/// Silence for a while: slow the motors, fade the dimmer down and wander
#[derive(Debug, Clone)]
pub struct DeadCoasting {
    /// Seconds of silence before coasting starts
    pub after: f64,
    /// Motor speed while coasting
    pub speed: u8,
    /// Dimmer level to fade to
    pub dim: u8,
    /// How long each random pan/tilt position is held
    pub hold: f64,
    /// Profile-specific effects (color, gobo)
    pub extras: CoastingExtras,
}

impl DeadCoasting {
    /// Dead coasting with the standard timings
    pub fn new(extras: CoastingExtras) -> Self {
        Self {
            after: 2.0,
            speed: 5,
            dim: 20,
            hold: 8.0,
            extras,
        }
    }
}

impl StateEffect for DeadCoasting {
    fn name(&self) -> &'static str {
        "DeadCoasting"
    }

    fn applicable(&self, _fixture: &Fixture, frame: &Frame) -> bool {
        frame.dead_for.unwrap_or(0.0) >= self.after
    }

    fn apply(&mut self, fixture: &mut Fixture, frame: &mut Frame) {
        let speed_off = fixture.state().get("speed") != Some(&self.speed);
        let dim_off = fixture.state().get("dim") != Some(&self.dim);
        if speed_off || dim_off {
            fixture.set_auto("speed", self.speed);
            let current = i32::from(fixture.state().get("dim").copied().unwrap_or(0));
            let fade = Effect::new(current, i32::from(self.dim), 1.0, frame.now);
            fixture.add_effect("dim", fade, false);
            fixture.send_dmx(frame, true);
        }
        self.run(fixture, frame);
    }

    fn run(&mut self, fixture: &mut Fixture, frame: &mut Frame) {
        let now = frame.now;
        fixture.add_effect("pan", Effect::hold(random_channel(), self.hold, now), false);
        fixture.add_effect("tilt", Effect::hold(random_channel(), self.hold, now), false);
        for (property, effect) in (self.extras)(fixture, now) {
            fixture.add_effect(property, effect, false);
        }
    }
}

/// Audio is present but pan/tilt has not moved for a while: drift slowly
#[derive(Debug, Clone)]
pub struct IdleCoasting {
    /// Seconds without a pan/tilt change before drifting
    pub after: f64,
    /// Motor speed while drifting
    pub speed: u8,
    /// Duration of each drift
    pub drift: f64,
}

impl Default for IdleCoasting {
    fn default() -> Self {
        Self {
            after: 2.0,
            speed: 31,
            drift: 5.0,
        }
    }
}

impl StateEffect for IdleCoasting {
    fn name(&self) -> &'static str {
        "IdleCoasting"
    }

    fn applicable(&self, fixture: &Fixture, frame: &Frame) -> bool {
        let has_audio = frame.audio_v_sum.is_some_and(|v| v != 0.0);
        let last_move = match (fixture.last_change("pan"), fixture.last_change("tilt")) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let still = last_move.map_or(true, |t| frame.now - t >= self.after);
        has_audio && still
    }

    fn apply(&mut self, fixture: &mut Fixture, frame: &mut Frame) {
        if fixture.state().get("speed") != Some(&self.speed) {
            fixture.set_auto("speed", self.speed);
            fixture.send_dmx(frame, true);
        }
        self.run(fixture, frame);
    }

    fn run(&mut self, fixture: &mut Fixture, frame: &mut Frame) {
        let now = frame.now;
        for property in ["pan", "tilt"] {
            let current = i32::from(fixture.state().get(property).copied().unwrap_or(0));
            let drift = Effect::new(current, random_channel(), self.drift, now);
            fixture.add_effect(property, drift, false);
        }
    }
}

/// Laser: silence for a while, switch to dynamic mode and rotate patterns
#[derive(Debug, Clone)]
pub struct DeadPattern {
    /// Seconds of silence before the pattern show starts
    pub after: f64,
    /// Mode value while active
    pub mode: u8,
    /// Seconds each pattern is held
    pub pattern_duration: f64,
    prev_mode: Option<u8>,
}

impl Default for DeadPattern {
    fn default() -> Self {
        Self {
            after: 2.0,
            mode: 100,
            pattern_duration: 5.0,
            prev_mode: None,
        }
    }
}

impl StateEffect for DeadPattern {
    fn name(&self) -> &'static str {
        "DeadPattern"
    }

    fn applicable(&self, _fixture: &Fixture, frame: &Frame) -> bool {
        frame.dead_for.unwrap_or(0.0) > self.after
    }

    fn apply(&mut self, fixture: &mut Fixture, _frame: &mut Frame) {
        self.prev_mode = fixture.auto_state().get("mode").copied();
        fixture.set_auto("mode", self.mode);
    }

    fn run(&mut self, fixture: &mut Fixture, frame: &mut Frame) {
        let pattern = Effect::hold(random_channel(), self.pattern_duration, frame.now);
        fixture.add_effect("pattern", pattern, false);
    }

    fn unapply(&mut self, fixture: &mut Fixture, _frame: &mut Frame) {
        if let Some(mode) = self.prev_mode.take() {
            fixture.set_auto("mode", mode);
        }
    }
}

/// Laser: below the idle threshold for a moment, switch the output off
#[derive(Debug, Clone)]
pub struct IdleOff {
    /// Seconds idle before switching off
    pub after: f64,
    /// Function to switch
    pub function: &'static str,
    /// Value meaning "off"
    pub value: u8,
    prev: Option<u8>,
}

impl Default for IdleOff {
    fn default() -> Self {
        Self {
            after: 0.5,
            function: "mode",
            value: 0,
            prev: None,
        }
    }
}

impl StateEffect for IdleOff {
    fn name(&self) -> &'static str {
        "IdleOff"
    }

    fn applicable(&self, _fixture: &Fixture, frame: &Frame) -> bool {
        frame.idle_for.unwrap_or(0.0) > self.after
    }

    fn apply(&mut self, fixture: &mut Fixture, _frame: &mut Frame) {
        self.prev = fixture.auto_state().get(self.function).copied();
        fixture.set_auto(self.function, self.value);
    }

    fn unapply(&mut self, fixture: &mut Fixture, _frame: &mut Frame) {
        if let Some(prev) = self.prev.take() {
            fixture.set_auto(self.function, prev);
        }
    }
}
