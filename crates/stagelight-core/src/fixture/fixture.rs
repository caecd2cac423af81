//! Fixture - the per-device animation state machine
//!
//! A fixture owns two views of its channel values:
//! - `auto_state`: the target computed by automation (mapping, effects, links)
//! - `state`: the authoritative values sent to hardware
//!
//! While not suspended, `auto_state` is copied into `state` on every commit.
//! Manual network commands write `state` directly and are never purged by
//! automation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use super::mapping::MappingDirective;
use super::profile::{FixtureProfile, MapFn, MapInput};
use super::state_effect::StateEffect;
use crate::effect::{Effect, Value};
use crate::frame::{Frame, StateMap};
use crate::monitor::{MonitorEvent, MonitorOp, OpState};
use crate::scheduler::FpsCounter;
use crate::{CoreError, Result};

/// A peer fixture that mirrors this fixture's automatic state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Name of the receiving fixture
    #[serde(default)]
    pub name: Option<String>,
    /// Functions inverted before pushing
    #[serde(default)]
    pub invert: Vec<String>,
}

/// Per-instance fixture settings
#[derive(Debug, Clone)]
pub struct FixtureOptions {
    /// DMX base address (1-based)
    pub address: u16,
    /// Mapping directives; fixtures without any are driven only manually
    pub mapping: Vec<MappingDirective>,
    /// Fixtures mirroring this one
    pub links: Vec<LinkConfig>,
    /// Whether link propagation is enabled globally
    pub links_enabled: bool,
    /// Initial value overrides
    pub initialize: BTreeMap<String, u8>,
    /// Allowed position box `[xmin, ymin, xmax, ymax]`
    pub restrict_position: [u8; 4],
    /// Start suspended
    pub suspended: bool,
}

impl Default for FixtureOptions {
    fn default() -> Self {
        Self {
            address: 1,
            mapping: Vec::new(),
            links: Vec::new(),
            links_enabled: false,
            initialize: BTreeMap::new(),
            restrict_position: [0, 0, 255, 255],
            suspended: false,
        }
    }
}

/// Capability shared by every output with animatable channel state.
///
/// The frame loop and the control server only talk to fixtures through
/// this trait.
pub trait Animatable: Send {
    /// Unique fixture name
    fn name(&self) -> &str;

    /// Fixture type name
    fn kind(&self) -> &str;

    /// Authoritative channel values
    fn state(&self) -> &StateMap;

    /// Descriptor sent to new control clients
    fn describe(&self) -> JsonValue;

    /// Whether automation is currently kept out of `state`
    fn is_suspended(&self) -> bool;

    /// Suspend or resume automation
    fn set_suspended(&mut self, suspended: bool);

    /// Reset to all-zero plus initial values
    fn blackout(&mut self);

    /// Current value of a property (vector for multi-channel properties)
    fn current_value(&self, property: &str) -> Option<Value>;

    /// Write a literal or relative property value into `state`
    fn set_property(&mut self, property: &str, value: &Value, relative: bool) -> Result<()>;

    /// Install an effect on a property
    fn install_effect(&mut self, property: &str, effect: Effect, overwrite: bool) -> Result<bool>;

    /// Initial render
    fn start(&mut self, frame: &mut Frame);

    /// One animation tick
    fn tick(&mut self, frame: &mut Frame);

    /// Take queued monitor events
    fn take_events(&mut self) -> Vec<MonitorEvent>;
}

/// One physical DMX fixture
pub struct Fixture {
    name: String,
    profile: &'static FixtureProfile,
    address: u16,
    mapping: Vec<MappingDirective>,
    mappers: HashMap<&'static str, MapFn>,
    links: Vec<String>,
    link_inverts: Vec<Vec<String>>,
    links_enabled: bool,
    initialize: StateMap,
    restrict_position: [u8; 4],
    state: StateMap,
    auto_state: StateMap,
    last_state: StateMap,
    last_auto_state: StateMap,
    effects: BTreeMap<String, Effect>,
    state_effects: Vec<Box<dyn StateEffect>>,
    active_state_effect: Option<usize>,
    last_change: HashMap<String, f64>,
    suspended: bool,
    flush_pending: bool,
    events: Vec<MonitorEvent>,
    fps: FpsCounter,
}

impl std::fmt::Debug for Fixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fixture")
            .field("name", &self.name)
            .field("kind", &self.profile.kind)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("suspended", &self.suspended)
            .finish()
    }
}

impl Fixture {
    /// Create a fixture from a profile.
    ///
    /// Fails if a mapping directive names a function the profile has no
    /// strategy for, or an initial value override names an unknown function.
    pub fn new(
        name: impl Into<String>,
        profile: &'static FixtureProfile,
        options: FixtureOptions,
    ) -> Result<Self> {
        let name = name.into();

        let mut mappers = HashMap::new();
        for directive in &options.mapping {
            let Some((key, mapper)) = profile
                .mappers
                .iter()
                .find(|(f, _)| *f == directive.function)
            else {
                return Err(CoreError::Unknown {
                    kind: "mapping function",
                    name: format!("{}.{}", name, directive.function),
                });
            };
            mappers.insert(*key, *mapper);
        }

        let mut initialize: StateMap = profile
            .initialize
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect();
        for (function, value) in &options.initialize {
            if !profile.has_function(function) {
                return Err(CoreError::InvalidConfig(format!(
                    "{}: cannot initialize unknown function '{}'",
                    name, function
                )));
            }
            initialize.insert(function.clone(), *value);
        }

        let mut links = Vec::new();
        let mut link_inverts = Vec::new();
        for link in options.links {
            match link.name {
                Some(target) if target != name => {
                    links.push(target);
                    link_inverts.push(link.invert);
                }
                other => {
                    warn!("{}: ignoring link to {:?}, it would loop", name, other);
                }
            }
        }

        let mut state: StateMap = profile
            .function_names()
            .map(|f| (f.to_string(), 0))
            .collect();
        state.extend(initialize.iter().map(|(k, v)| (k.clone(), *v)));

        let fps = FpsCounter::new(format!("{} {}", profile.kind, name));

        Ok(Self {
            profile,
            address: options.address.max(1),
            mapping: options.mapping,
            mappers,
            links,
            link_inverts,
            links_enabled: options.links_enabled,
            initialize,
            restrict_position: options.restrict_position,
            auto_state: state.clone(),
            last_state: state.clone(),
            last_auto_state: state.clone(),
            state,
            effects: BTreeMap::new(),
            state_effects: (profile.state_effects)(),
            active_state_effect: None,
            last_change: HashMap::new(),
            suspended: options.suspended,
            flush_pending: false,
            events: Vec::new(),
            fps,
            name,
        })
    }

    /// Fixture profile
    pub fn profile(&self) -> &'static FixtureProfile {
        self.profile
    }

    /// DMX base address
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Automatic target state
    pub fn auto_state(&self) -> &StateMap {
        &self.auto_state
    }

    /// Snapshot of `state` taken at the last commit
    pub fn last_state(&self) -> &StateMap {
        &self.last_state
    }

    /// Snapshot of `auto_state` taken at the last commit
    pub fn last_auto_state(&self) -> &StateMap {
        &self.last_auto_state
    }

    /// Active effects by property
    pub fn effects(&self) -> &BTreeMap<String, Effect> {
        &self.effects
    }

    /// Name of the active state effect
    pub fn active_state_effect(&self) -> Option<&'static str> {
        self.active_state_effect
            .and_then(|i| self.state_effects.get(i))
            .map(|e| e.name())
    }

    /// Time of the last accepted mapping change to a function
    pub fn last_change(&self, function: &str) -> Option<f64> {
        self.last_change.get(function).copied()
    }

    /// Allowed position box `[xmin, ymin, xmax, ymax]`
    pub fn restrict_position(&self) -> [u8; 4] {
        self.restrict_position
    }

    /// Write a function into `auto_state`
    pub fn set_auto(&mut self, function: &str, value: u8) {
        if let Some(slot) = self.auto_state.get_mut(function) {
            *slot = value;
        }
    }

    /// Install an effect unless one is already running on the property.
    ///
    /// With `overwrite` the running effect is replaced. Returns whether the
    /// effect was installed.
    pub fn add_effect(&mut self, property: &str, effect: Effect, overwrite: bool) -> bool {
        if !overwrite && self.effects.contains_key(property) {
            return false;
        }
        self.events.push(
            MonitorEvent::new(self.profile.kind, &self.name, MonitorOp::Effect)
                .with_op(OpState::New, property)
                .with_state(effect.describe()),
        );
        self.effects.insert(property.to_string(), effect);
        true
    }

    // Expand a property value into (function, channel value) pairs.
    fn expand(&self, property: &str, value: &Value) -> Vec<(&'static str, i32)> {
        if let Some(subs) = self.profile.multi_prop(property) {
            match value {
                Value::Vector(parts) => subs.iter().copied().zip(parts.iter().copied()).collect(),
                Value::Scalar(v) => subs.iter().map(|s| (*s, *v)).collect(),
            }
        } else {
            let function = self.profile.function_names().find(|f| *f == property);
            let scalar = match value {
                Value::Scalar(v) => *v,
                Value::Vector(parts) => parts.first().copied().unwrap_or(0),
            };
            function.map(|f| vec![(f, scalar)]).unwrap_or_default()
        }
    }

    fn write_value(&mut self, property: &str, value: &Value, automation: bool) {
        for (function, v) in self.expand(property, value) {
            let v = clamp_channel(v);
            self.auto_state.insert(function.to_string(), v);
            if !automation {
                self.state.insert(function.to_string(), v);
            }
        }
    }

    // Functions currently driven by a manual effect; automation must not
    // overwrite them on commit.
    fn manual_functions(&self) -> BTreeSet<&'static str> {
        self.effects
            .iter()
            .filter(|(_, e)| !e.is_automation())
            .flat_map(|(p, e)| self.expand(p, e.end_value()))
            .map(|(f, _)| f)
            .collect()
    }

    fn run_effects(&mut self, now: f64) {
        let mut done = Vec::new();
        let mut writes = Vec::with_capacity(self.effects.len());
        for (property, effect) in &self.effects {
            let value = if effect.done(now) {
                done.push(property.clone());
                effect.done_value().clone()
            } else {
                effect.value(now)
            };
            writes.push((property.clone(), value, effect.is_automation()));
        }

        for (property, value, automation) in writes {
            self.write_value(&property, &value, automation);
        }

        for property in done {
            if let Some(effect) = self.effects.remove(&property) {
                self.events.push(
                    MonitorEvent::new(self.profile.kind, &self.name, MonitorOp::Effect)
                        .with_op(OpState::Done, property)
                        .with_state(effect.describe()),
                );
            }
        }
    }

    fn state_effect_event(&mut self, op_state: OpState, name: &'static str) {
        self.events.push(
            MonitorEvent::new(self.profile.kind, &self.name, MonitorOp::StateEffect)
                .with_op(op_state, name),
        );
    }

    fn run_state_effects(&mut self, frame: &mut Frame) {
        let mut candidates = std::mem::take(&mut self.state_effects);

        if let Some(active) = self.active_state_effect {
            if candidates[active].applicable(self, frame) {
                candidates[active].run(self, frame);
            } else {
                let name = candidates[active].name();
                self.state_effect_event(OpState::Done, name);
                candidates[active].unapply(self, frame);
                self.active_state_effect = None;
                self.send_dmx(frame, true);
            }
        }

        // Only candidates ranked above the active one may pre-empt it
        let limit = self.active_state_effect.unwrap_or(candidates.len());
        for idx in 0..limit {
            if !candidates[idx].applicable(self, frame) {
                continue;
            }
            if let Some(prev) = self.active_state_effect {
                let name = candidates[prev].name();
                self.state_effect_event(OpState::Done, name);
                candidates[prev].unapply(self, frame);
            }
            self.active_state_effect = Some(idx);
            candidates[idx].apply(self, frame);
            self.send_dmx(frame, true);
            let name = candidates[idx].name();
            debug!("{}: state effect {} active", self.name, name);
            self.state_effect_event(OpState::New, name);
            break;
        }

        self.state_effects = candidates;
    }

    fn rate_allows(&self, function: &str, now: f64) -> bool {
        match self.last_change.get(function) {
            None => true,
            Some(last) => now - last >= self.profile.rate(function),
        }
    }

    fn run_mapping(&mut self, frame: &mut Frame) {
        let now = frame.now;
        let directives = std::mem::take(&mut self.mapping);
        let mut new_state: Vec<(String, Value)> = Vec::new();

        for directive in &directives {
            let Some(mapper) = self.mappers.get(directive.function.as_str()).copied() else {
                continue;
            };
            let Some((value, threshold)) = directive.select(frame) else {
                continue;
            };
            let input = MapInput {
                trigger: Some(directive.trigger),
                value: &value,
                threshold,
                now,
            };
            let Some(candidate) = mapper(self, &input) else {
                continue;
            };
            if self.rate_allows(&directive.function, now) {
                self.last_change.insert(directive.function.clone(), now);
                new_state.push((directive.function.clone(), candidate));
            }
        }
        self.mapping = directives;

        if new_state.is_empty() {
            return;
        }

        let profile = self.profile;
        let purged: Vec<String> = self
            .effects
            .iter()
            .filter(|(p, e)| e.is_automation() && profile.clears_on_new_state(p))
            .map(|(p, _)| p.clone())
            .collect();
        for property in purged {
            self.effects.remove(&property);
        }

        if !profile.reset_on_new_state.is_empty() {
            for function in profile.reset_on_new_state {
                let initial = self.initialize.get(*function).copied().unwrap_or(0);
                self.set_auto(function, initial);
            }
            self.send_dmx(frame, true);
        }

        for (property, value) in new_state {
            self.write_value(&property, &value, true);
        }
    }

    fn prep_dmx(&mut self) -> StateMap {
        if !self.suspended {
            let manual = self.manual_functions();
            for (function, value) in &self.auto_state {
                if !manual.contains(function.as_str()) {
                    self.state.insert(function.clone(), *value);
                }
            }
        }

        let changed: Map<String, JsonValue> = self
            .state
            .iter()
            .filter(|(k, v)| self.last_state.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        if !changed.is_empty() {
            self.events.push(
                MonitorEvent::new(self.profile.kind, &self.name, MonitorOp::State)
                    .with_state(changed),
            );
        }

        let mut out = self.state.clone();
        for function in self.profile.invert {
            if let Some(v) = out.get_mut(*function) {
                *v = 255 - *v;
            }
        }
        out
    }

    /// Commit state and write channels into the frame.
    ///
    /// With `force` the channels go to the render-immediately buffer.
    pub fn send_dmx(&mut self, frame: &mut Frame, force: bool) {
        if self.links_enabled {
            for (target, inverts) in self.links.iter().zip(&self.link_inverts) {
                let mut linked = self.auto_state.clone();
                for function in inverts {
                    if let Some(v) = linked.get_mut(function) {
                        *v = 255 - *v;
                    }
                }
                frame.pushed_states.insert(target.clone(), linked);
            }
        }

        let out = self.prep_dmx();
        let base = self.address.saturating_sub(1);
        let profile = self.profile;
        let channels = out.iter().filter_map(|(function, value)| {
            let channel = profile.channel(function)?.checked_add(base)?;
            Some((channel, *value))
        });
        frame.write_channels(channels, force);

        self.last_auto_state = self.auto_state.clone();
        self.last_state = self.state.clone();
    }
}

fn clamp_channel(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

impl Animatable for Fixture {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        self.profile.kind
    }

    fn state(&self) -> &StateMap {
        &self.state
    }

    fn describe(&self) -> JsonValue {
        json!({
            "type": self.profile.kind,
            "name": self.name,
            "functions": self.profile.function_names().collect::<Vec<_>>(),
            "state": self.state,
            "enums": self.profile.enums_json(),
            "speeds": self.profile.speeds_json(),
        })
    }

    fn is_suspended(&self) -> bool {
        self.suspended
    }

    fn set_suspended(&mut self, suspended: bool) {
        self.suspended = suspended;
        let mut state = Map::new();
        state.insert("suspended".into(), json!(suspended));
        self.events.push(
            MonitorEvent::new(self.profile.kind, &self.name, MonitorOp::Suspended)
                .with_state(state),
        );
    }

    fn blackout(&mut self) {
        for value in self.state.values_mut() {
            *value = 0;
        }
        for (function, value) in &self.initialize {
            self.state.insert(function.clone(), *value);
        }
        self.auto_state = self.state.clone();
        self.flush_pending = true;
    }

    fn current_value(&self, property: &str) -> Option<Value> {
        if let Some(subs) = self.profile.multi_prop(property) {
            let parts = subs
                .iter()
                .map(|s| i32::from(self.state.get(*s).copied().unwrap_or(0)))
                .collect();
            return Some(Value::Vector(parts));
        }
        self.state.get(property).map(|v| Value::Scalar(i32::from(*v)))
    }

    fn set_property(&mut self, property: &str, value: &Value, relative: bool) -> Result<()> {
        let targets = self.expand(property, value);
        if targets.is_empty() {
            return Err(CoreError::Unknown {
                kind: "property",
                name: format!("{}.{}", self.name, property),
            });
        }
        for (function, v) in targets {
            let base = if relative {
                i32::from(self.state.get(function).copied().unwrap_or(0))
            } else {
                0
            };
            let v = clamp_channel(base.saturating_add(v));
            self.state.insert(function.to_string(), v);
            self.auto_state.insert(function.to_string(), v);
            if self.profile.is_immediate(function) {
                self.flush_pending = true;
            }
        }
        Ok(())
    }

    fn install_effect(&mut self, property: &str, effect: Effect, overwrite: bool) -> Result<bool> {
        if !self.profile.has_property(property) {
            return Err(CoreError::Unknown {
                kind: "property",
                name: format!("{}.{}", self.name, property),
            });
        }
        Ok(self.add_effect(property, effect, overwrite))
    }

    fn start(&mut self, frame: &mut Frame) {
        for (function, value) in &self.initialize {
            self.state.insert(function.clone(), *value);
        }
        self.last_state = self.state.clone();
        self.auto_state = self.state.clone();
        self.last_auto_state = self.state.clone();
        self.send_dmx(frame, false);
    }

    /// Run one tick in fixed order: linked push, effects, state-effect
    /// arbitration and mapping (only for mapped fixtures), then commit.
    fn tick(&mut self, frame: &mut Frame) {
        self.fps.tick();

        if let Some(pushed) = frame.pushed_states.remove(&self.name) {
            for (function, value) in pushed {
                if let Some(slot) = self.auto_state.get_mut(&function) {
                    *slot = value;
                }
            }
        }

        self.run_effects(frame.now);

        if !self.mapping.is_empty() {
            self.run_state_effects(frame);
            self.run_mapping(frame);
        }

        let force = std::mem::take(&mut self.flush_pending);
        self.send_dmx(frame, force);
    }

    fn take_events(&mut self) -> Vec<MonitorEvent> {
        std::mem::take(&mut self.events)
    }
}
