//! Effect - time-based value interpolation
//!
//! An [`Effect`] linearly moves a property (or a group of properties, for
//! multi-channel values like RGB color) from a start value to an end value
//! over a fixed duration. Fixtures sample it once per tick.

use serde::{Deserialize, Serialize};
use serde_json::json;

/// A property value: a single channel or several channels moving together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Single channel value
    Scalar(i32),
    /// Several channel values, interpolated componentwise
    Vector(Vec<i32>),
}

impl Value {
    /// The scalar value, if this is not a vector
    pub fn as_scalar(&self) -> Option<i32> {
        match self {
            Value::Scalar(v) => Some(*v),
            Value::Vector(_) => None,
        }
    }

    /// All components (a scalar is a one-element list)
    pub fn components(&self) -> Vec<i32> {
        match self {
            Value::Scalar(v) => vec![*v],
            Value::Vector(v) => v.clone(),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Scalar(v)
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Scalar(i32::from(v))
    }
}

impl From<Vec<i32>> for Value {
    fn from(v: Vec<i32>) -> Self {
        Value::Vector(v)
    }
}

impl<const N: usize> From<[i32; N]> for Value {
    fn from(v: [i32; N]) -> Self {
        Value::Vector(v.to_vec())
    }
}

/// Linear interpolation between two values over time
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    start: Value,
    end: Value,
    done_value: Value,
    start_time: f64,
    duration: f64,
    automation: bool,
}

impl Effect {
    /// Create an effect starting at `now` that reaches `end` after `duration` seconds.
    ///
    /// The done value defaults to `end`. Effects are automation effects
    /// unless marked with [`Effect::manual`].
    pub fn new(start: impl Into<Value>, end: impl Into<Value>, duration: f64, now: f64) -> Self {
        let end = end.into();
        Self {
            start: start.into(),
            done_value: end.clone(),
            end,
            start_time: now,
            duration,
            automation: true,
        }
    }

    /// An effect that holds `value` for `duration` seconds
    pub fn hold(value: impl Into<Value>, duration: f64, now: f64) -> Self {
        let value = value.into();
        Self::new(value.clone(), value, duration, now)
    }

    /// Value written once the effect is done
    pub fn with_done_value(mut self, done: impl Into<Value>) -> Self {
        self.done_value = done.into();
        self
    }

    /// Mark this effect as a manual (network) effect: it writes the
    /// authoritative state directly and survives mapping-driven purges.
    pub fn manual(mut self) -> Self {
        self.automation = false;
        self
    }

    /// Whether this effect was created by automation
    pub fn is_automation(&self) -> bool {
        self.automation
    }

    /// Value written once the effect is done
    pub fn done_value(&self) -> &Value {
        &self.done_value
    }

    /// Start value
    pub fn start_value(&self) -> &Value {
        &self.start
    }

    /// End value
    pub fn end_value(&self) -> &Value {
        &self.end
    }

    /// Time the effect started
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// True once `now >= start_time + duration`
    pub fn done(&self, now: f64) -> bool {
        now >= self.start_time + self.duration
    }

    /// Interpolated value at `now`, clamped between start and end
    pub fn value(&self, now: f64) -> Value {
        if self.start == self.end {
            return self.start.clone();
        }
        if self.done(now) {
            return self.end.clone();
        }

        let progress = ((now - self.start_time) / self.duration).clamp(0.0, 1.0);
        match (&self.start, &self.end) {
            (Value::Scalar(a), Value::Scalar(b)) => Value::Scalar(lerp(*a, *b, progress)),
            (Value::Vector(a), Value::Vector(b)) => Value::Vector(
                a.iter()
                    .zip(b.iter())
                    .map(|(a, b)| lerp(*a, *b, progress))
                    .collect(),
            ),
            (Value::Scalar(a), Value::Vector(b)) => {
                Value::Vector(b.iter().map(|b| lerp(*a, *b, progress)).collect())
            }
            (Value::Vector(a), Value::Scalar(b)) => {
                Value::Vector(a.iter().map(|a| lerp(*a, *b, progress)).collect())
            }
        }
    }

    /// Effect arguments as reported in monitor events
    pub fn describe(&self) -> serde_json::Map<String, serde_json::Value> {
        let described = json!({
            "start": self.start,
            "end": self.end,
            "done": self.done_value,
            "duration": self.duration,
            "automation": self.automation,
        });
        match described {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        }
    }
}

fn lerp(start: i32, end: i32, progress: f64) -> i32 {
    let value = f64::from(start) + (f64::from(end) - f64::from(start)) * progress;
    (value.trunc() as i32).clamp(start.min(end), start.max(end))
}
