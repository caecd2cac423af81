//! Command handlers
//!
//! Handlers run inside the frame loop, between capture and the fixture
//! tick, so their writes are picked up by the same tick's commit.

use serde_json::{json, Map, Value as JsonValue};
use stagelight_core::{Animatable, Effect, EngineContext, Value};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error};

use super::protocol::{reply, Command, Envelope, ErrorCode};

/// Keyword that makes `set` values relative to the current state
pub const RELATIVE_KWARG: &str = "_relative";

/// Default effect duration in seconds
pub const DEFAULT_EFFECT_DURATION: f64 = 1.0;

/// A command that could not be carried out
#[derive(Debug, Clone, PartialEq)]
pub struct CommandError {
    /// Wire error code
    pub code: ErrorCode,
    /// Offending argument, if any
    pub argument: Option<String>,
    /// Description
    pub message: String,
}

impl CommandError {
    fn bad_arg(argument: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::BadArg,
            argument: Some(argument.into()),
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::General,
            argument: None,
            message: message.into(),
        }
    }

    /// `ERROR` reply for this failure
    pub fn into_envelope(self) -> Envelope {
        Envelope::error(self.code, self.argument, self.message)
    }
}

type HandlerResult = Result<Envelope, CommandError>;

/// Run a fixture command; a panicking handler becomes a `general` error.
pub fn dispatch_guarded(
    ctx: &mut EngineContext,
    command: Command,
    args: Vec<JsonValue>,
    kwargs: Map<String, JsonValue>,
) -> HandlerResult {
    match panic::catch_unwind(AssertUnwindSafe(|| dispatch(ctx, command, args, kwargs))) {
        Ok(result) => result,
        Err(_) => {
            error!("Handler for {:?} panicked", command);
            Err(CommandError::general(format!(
                "internal error while handling {:?}",
                command
            )))
        }
    }
}

/// Run a fixture command.
///
/// `monitor` changes per-connection state and is answered by the server;
/// reaching it here is a `general` error.
pub fn dispatch(
    ctx: &mut EngineContext,
    command: Command,
    args: Vec<JsonValue>,
    kwargs: Map<String, JsonValue>,
) -> HandlerResult {
    debug!("Dispatching {:?} {:?} {:?}", command, args, kwargs);
    match command {
        Command::Echo => Ok(Envelope {
            command: reply::ECHO.to_string(),
            args,
            kwargs,
        }),
        Command::Suspend => suspend(ctx, &args, true),
        Command::Unsuspend => suspend(ctx, &args, false),
        Command::State => state(ctx, &args),
        Command::Blackout => blackout(ctx, &args),
        Command::Set => set(ctx, &args, kwargs),
        Command::Effect => effect(ctx, &args, kwargs),
        Command::Monitor => Err(CommandError::general(
            "monitor is only available on a client connection",
        )),
    }
}

// Fixture names from positional args; empty means every fixture.
fn target_names(args: &[JsonValue]) -> Result<Vec<String>, CommandError> {
    args.iter()
        .map(|a| {
            a.as_str()
                .map(str::to_string)
                .ok_or_else(|| CommandError::bad_arg(a.to_string(), "fixture names must be strings"))
        })
        .collect()
}

// Apply `op` to the named fixtures (or all of them) and collect
// `{light, <key>: ...}` records. Unknown names report null.
fn for_each_target(
    ctx: &mut EngineContext,
    args: &[JsonValue],
    key: &str,
    mut op: impl FnMut(&mut dyn Animatable) -> JsonValue,
) -> Result<Vec<JsonValue>, CommandError> {
    let names = target_names(args)?;
    if names.is_empty() {
        return Ok(ctx
            .fixtures
            .iter_mut()
            .map(|f| json!({"light": f.name(), key: op(f.as_mut())}))
            .collect());
    }
    Ok(names
        .iter()
        .map(|name| {
            let result = ctx
                .fixture_mut(name)
                .map_or(JsonValue::Null, |f| op(f.as_mut()));
            json!({"light": name, key: result})
        })
        .collect())
}

fn suspend(ctx: &mut EngineContext, args: &[JsonValue], suspended: bool) -> HandlerResult {
    let results = for_each_target(ctx, args, "result", |f| {
        if f.is_suspended() != suspended {
            f.set_suspended(suspended);
        }
        JsonValue::Bool(true)
    })?;
    Ok(Envelope::new(reply::OK)
        .with_args(results)
        .with_kwarg("suspended", ctx.suspended_names()))
}

fn state(ctx: &mut EngineContext, args: &[JsonValue]) -> HandlerResult {
    let states = for_each_target(ctx, args, "state", |f| json!(f.state()))?;
    Ok(Envelope::new(reply::STATE).with_args(states))
}

fn blackout(ctx: &mut EngineContext, args: &[JsonValue]) -> HandlerResult {
    let results = for_each_target(ctx, args, "result", |f| {
        f.blackout();
        JsonValue::Bool(true)
    })?;
    Ok(Envelope::new(reply::OK).with_args(results))
}

fn set(
    ctx: &mut EngineContext,
    args: &[JsonValue],
    mut kwargs: Map<String, JsonValue>,
) -> HandlerResult {
    let relative = match kwargs.remove(RELATIVE_KWARG) {
        None | Some(JsonValue::Null) => false,
        Some(JsonValue::Bool(b)) => b,
        Some(_) => return Err(CommandError::bad_arg(RELATIVE_KWARG, "must be a boolean")),
    };
    if kwargs.is_empty() {
        return Err(CommandError::bad_arg("kwargs", "no properties given"));
    }

    let mut props = Vec::with_capacity(kwargs.len());
    for (prop, raw) in &kwargs {
        let value = parse_value(raw)
            .ok_or_else(|| CommandError::bad_arg(prop.as_str(), format!("invalid value {}", raw)))?;
        props.push((prop.as_str(), value));
    }

    let results = for_each_target(ctx, args, "result", |f| {
        let mut ok = true;
        for (prop, value) in &props {
            if let Err(e) = f.set_property(prop, value, relative) {
                debug!("set on {} failed: {}", f.name(), e);
                ok = false;
            }
        }
        JsonValue::Bool(ok)
    })?;
    Ok(Envelope::new(reply::OK).with_args(results))
}

/// Parsed `effect` arguments for one property
#[derive(Debug, Clone, PartialEq)]
struct EffectRequest {
    start: Option<Value>,
    end: Value,
    duration: f64,
    overwrite: bool,
    done: Option<Value>,
}

impl EffectRequest {
    fn parse(prop: &str, raw: &JsonValue) -> Result<Self, CommandError> {
        let object = raw
            .as_object()
            .ok_or_else(|| CommandError::bad_arg(prop, "effect arguments must be an object"))?;

        let start = match object.get("start") {
            None | Some(JsonValue::Null) => None,
            Some(JsonValue::String(s)) if s == "current" => None,
            Some(v) => Some(
                parse_value(v).ok_or_else(|| CommandError::bad_arg(prop, "invalid start value"))?,
            ),
        };
        let end = object
            .get("end")
            .and_then(parse_value)
            .ok_or_else(|| CommandError::bad_arg(prop, "missing or invalid end value"))?;
        let duration = match object.get("duration") {
            None | Some(JsonValue::Null) => DEFAULT_EFFECT_DURATION,
            Some(v) => v
                .as_f64()
                .filter(|d| d.is_finite() && *d >= 0.0)
                .ok_or_else(|| CommandError::bad_arg(prop, "invalid duration"))?,
        };
        let overwrite = match object.get("overwrite") {
            None | Some(JsonValue::Null) => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| CommandError::bad_arg(prop, "overwrite must be a boolean"))?,
        };
        let done = match object.get("done") {
            None | Some(JsonValue::Null) => None,
            Some(v) => Some(
                parse_value(v).ok_or_else(|| CommandError::bad_arg(prop, "invalid done value"))?,
            ),
        };

        Ok(Self {
            start,
            end,
            duration,
            overwrite,
            done,
        })
    }

    fn build(&self, fixture: &dyn Animatable, prop: &str, now: f64) -> Option<Effect> {
        let start = match &self.start {
            Some(v) => v.clone(),
            None => fixture.current_value(prop)?,
        };
        let mut effect = Effect::new(start, self.end.clone(), self.duration, now).manual();
        if let Some(done) = &self.done {
            effect = effect.with_done_value(done.clone());
        }
        Some(effect)
    }
}

fn effect(
    ctx: &mut EngineContext,
    args: &[JsonValue],
    kwargs: Map<String, JsonValue>,
) -> HandlerResult {
    if kwargs.is_empty() {
        return Err(CommandError::bad_arg("kwargs", "no properties given"));
    }
    let requests = kwargs
        .iter()
        .map(|(prop, raw)| EffectRequest::parse(prop, raw).map(|r| (prop.as_str(), r)))
        .collect::<Result<Vec<_>, _>>()?;

    let now = ctx.now();
    let results = for_each_target(ctx, args, "result", |f| {
        let mut installed = true;
        for (prop, request) in &requests {
            let Some(effect) = request.build(f, prop, now) else {
                installed = false;
                continue;
            };
            match f.install_effect(prop, effect, request.overwrite) {
                Ok(true) => {}
                Ok(false) => installed = false,
                Err(e) => {
                    debug!("effect on {} failed: {}", f.name(), e);
                    installed = false;
                }
            }
        }
        JsonValue::Bool(installed)
    })?;
    Ok(Envelope::new(reply::OK).with_args(results))
}

/// Largest magnitude a protocol value keeps after parsing
pub const VALUE_LIMIT: i32 = 65_535;

// Numbers are truncated to integers and clamped to VALUE_LIMIT; lists become
// vector values.
fn parse_value(raw: &JsonValue) -> Option<Value> {
    fn scalar(v: &JsonValue) -> Option<i32> {
        let n = v.as_f64()?;
        let limit = f64::from(VALUE_LIMIT);
        n.is_finite().then(|| n.trunc().clamp(-limit, limit) as i32)
    }
    match raw {
        JsonValue::Array(parts) => parts
            .iter()
            .map(scalar)
            .collect::<Option<Vec<_>>>()
            .map(Value::Vector),
        other => scalar(other).map(Value::Scalar),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagelight_core::fixture::profiles::{TOMSHINE_MOVING_HEAD, UKING_GOBO};
    use stagelight_core::{
        Fixture, FixtureOptions, FixtureTask, Frame, ManualClock, MonitorEvent, StateMap, Task,
    };
    use std::sync::Arc;

    // Fixture whose blackout panics
    struct Faulty {
        state: StateMap,
    }

    impl Animatable for Faulty {
        fn name(&self) -> &str {
            "faulty"
        }
        fn kind(&self) -> &str {
            "Faulty"
        }
        fn state(&self) -> &StateMap {
            &self.state
        }
        fn describe(&self) -> JsonValue {
            json!({"name": "faulty"})
        }
        fn is_suspended(&self) -> bool {
            false
        }
        fn set_suspended(&mut self, _: bool) {}
        fn blackout(&mut self) {
            panic!("blackout failed");
        }
        fn current_value(&self, _: &str) -> Option<Value> {
            None
        }
        fn set_property(
            &mut self,
            _: &str,
            _: &Value,
            _: bool,
        ) -> stagelight_core::Result<()> {
            Ok(())
        }
        fn install_effect(&mut self, _: &str, _: Effect, _: bool) -> stagelight_core::Result<bool> {
            Ok(false)
        }
        fn start(&mut self, _: &mut Frame) {}
        fn tick(&mut self, _: &mut Frame) {}
        fn take_events(&mut self) -> Vec<MonitorEvent> {
            Vec::new()
        }
    }

    fn context(clock: &ManualClock) -> EngineContext {
        let mut ctx = EngineContext::new(Arc::new(clock.clone()));
        for (name, profile) in [("head", &TOMSHINE_MOVING_HEAD), ("gobo", &UKING_GOBO)] {
            let fixture = Fixture::new(name, profile, FixtureOptions::default()).unwrap();
            ctx.add_fixture(Box::new(fixture));
        }
        FixtureTask.start(&mut ctx).unwrap();
        ctx
    }

    fn kwargs(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_echo_reflects_arguments() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let reply = dispatch(
            &mut ctx,
            Command::Echo,
            vec![json!(1), json!("two")],
            kwargs(json!({"x": 3})),
        )
        .unwrap();
        assert_eq!(reply.command, "echo_response");
        assert_eq!(reply.args, vec![json!(1), json!("two")]);
        assert_eq!(reply.kwargs["x"], json!(3));
    }

    #[test]
    fn test_state_reports_null_for_unknown_fixture() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let reply = dispatch(
            &mut ctx,
            Command::State,
            vec![json!("head"), json!("nope")],
            Map::new(),
        )
        .unwrap();
        assert_eq!(reply.command, "STATE");
        assert_eq!(reply.args.len(), 2);
        assert_eq!(reply.args[0]["light"], json!("head"));
        assert!(reply.args[0]["state"].is_object());
        assert_eq!(reply.args[1], json!({"light": "nope", "state": null}));
    }

    #[test]
    fn test_set_literal_and_relative() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        dispatch(&mut ctx, Command::Set, vec![json!("head")], kwargs(json!({"pan": 100}))).unwrap();
        let reply = dispatch(
            &mut ctx,
            Command::Set,
            vec![json!("head")],
            kwargs(json!({"pan": 20, "_relative": true})),
        )
        .unwrap();
        assert_eq!(reply.args, vec![json!({"light": "head", "result": true})]);
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["pan"], 120);
    }

    #[test]
    fn test_relative_set_saturates_at_channel_bounds() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        dispatch(&mut ctx, Command::Set, vec![json!("head")], kwargs(json!({"pan": 100}))).unwrap();
        dispatch(
            &mut ctx,
            Command::Set,
            vec![json!("head")],
            kwargs(json!({"pan": 2147483647, "_relative": true})),
        )
        .unwrap();
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["pan"], 255);

        dispatch(
            &mut ctx,
            Command::Set,
            vec![json!("head")],
            kwargs(json!({"pan": -1e300, "_relative": true})),
        )
        .unwrap();
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["pan"], 0);
    }

    #[test]
    fn test_parse_value_clamps_magnitude() {
        assert_eq!(parse_value(&json!(1e12)), Some(Value::Scalar(VALUE_LIMIT)));
        assert_eq!(parse_value(&json!(-2147483648)), Some(Value::Scalar(-VALUE_LIMIT)));
        assert_eq!(parse_value(&json!(12.9)), Some(Value::Scalar(12)));
        assert_eq!(
            parse_value(&json!([1, 1e9])),
            Some(Value::Vector(vec![1, VALUE_LIMIT]))
        );
        assert_eq!(parse_value(&json!("x")), None);
    }

    #[test]
    fn test_set_unknown_property_reports_false() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let reply = dispatch(
            &mut ctx,
            Command::Set,
            vec![json!("gobo")],
            kwargs(json!({"red": 10})),
        )
        .unwrap();
        assert_eq!(reply.args, vec![json!({"light": "gobo", "result": false})]);
    }

    #[test]
    fn test_set_without_properties_is_bad_arg() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let err = dispatch(&mut ctx, Command::Set, vec![], kwargs(json!({"_relative": true})))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArg);
    }

    #[test]
    fn test_suspend_is_idempotent() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        dispatch(&mut ctx, Command::Suspend, vec![json!("head")], Map::new()).unwrap();
        let reply = dispatch(&mut ctx, Command::Suspend, vec![json!("head")], Map::new()).unwrap();
        assert_eq!(reply.kwargs["suspended"], json!(["head"]));
        assert_eq!(ctx.suspended_names(), vec!["head".to_string()]);

        dispatch(&mut ctx, Command::Unsuspend, vec![], Map::new()).unwrap();
        assert!(ctx.suspended_names().is_empty());
    }

    #[test]
    fn test_blackout_then_state() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        dispatch(&mut ctx, Command::Set, vec![], kwargs(json!({"dim": 10}))).unwrap();
        dispatch(&mut ctx, Command::Blackout, vec![json!("head")], Map::new()).unwrap();

        let head = ctx.fixture_mut("head").unwrap();
        let profile = &TOMSHINE_MOVING_HEAD;
        for function in profile.function_names() {
            let expected = profile.initial(function);
            assert_eq!(head.state()[function], expected, "{}", function);
        }
    }

    #[test]
    fn test_effect_from_current_value() {
        let clock = ManualClock::new(10.0);
        let mut ctx = context(&clock);
        let reply = dispatch(
            &mut ctx,
            Command::Effect,
            vec![json!("head")],
            kwargs(json!({"dim": {"start": "current", "end": 0, "duration": 1}})),
        )
        .unwrap();
        assert_eq!(reply.args, vec![json!({"light": "head", "result": true})]);

        clock.advance(1.0);
        ctx.frame.now = ctx.now();
        FixtureTask.run(&mut ctx).unwrap();
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["dim"], 0);
    }

    #[test]
    fn test_effect_with_extreme_endpoints_runs() {
        let clock = ManualClock::new(10.0);
        let mut ctx = context(&clock);
        dispatch(
            &mut ctx,
            Command::Effect,
            vec![json!("head")],
            kwargs(json!({"dim": {"start": -2147483648i64, "end": 2147483647i64, "duration": 2}})),
        )
        .unwrap();

        clock.advance(1.0);
        ctx.frame.now = ctx.now();
        FixtureTask.run(&mut ctx).unwrap();
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["dim"], 0);

        clock.advance(1.5);
        ctx.frame.now = ctx.now();
        FixtureTask.run(&mut ctx).unwrap();
        assert_eq!(ctx.fixture_mut("head").unwrap().state()["dim"], 255);
    }

    #[test]
    fn test_effect_requires_end() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let err = dispatch(
            &mut ctx,
            Command::Effect,
            vec![],
            kwargs(json!({"dim": {"start": 0}})),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArg);
        assert_eq!(err.argument.as_deref(), Some("dim"));
    }

    #[test]
    fn test_monitor_outside_connection_is_general_error() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let err = dispatch(&mut ctx, Command::Monitor, vec![], Map::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::General);
        assert_eq!(err.argument, None);
    }

    #[test]
    fn test_panicking_handler_reports_general_error() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        ctx.add_fixture(Box::new(Faulty {
            state: StateMap::new(),
        }));

        let err = dispatch_guarded(&mut ctx, Command::Blackout, vec![json!("faulty")], Map::new())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::General);
        assert_eq!(err.clone().into_envelope().kwargs["code"], json!("general"));

        let reply =
            dispatch_guarded(&mut ctx, Command::State, vec![json!("head")], Map::new()).unwrap();
        assert_eq!(reply.args[0]["light"], json!("head"));
    }

    #[test]
    fn test_non_string_name_is_bad_arg() {
        let clock = ManualClock::new(0.0);
        let mut ctx = context(&clock);
        let err = dispatch(&mut ctx, Command::State, vec![json!(5)], Map::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::BadArg);
    }
}
