//! Built-in fixture profiles

mod gobo;
mod laser;
mod movinghead;

pub use gobo::{UKING_GOBO, UNNAMED_GOBO};
pub use laser::GENERIC_4_COLOR_LASER;
pub use movinghead::TOMSHINE_MOVING_HEAD;

use rand::Rng;

use super::fixture::{Animatable, Fixture};
use super::mapping::map_to_range;
use super::profile::{FixtureProfile, MapInput};
use crate::effect::Value;

/// Every profile known to the engine
pub static BUILTIN: [&FixtureProfile; 4] = [
    &TOMSHINE_MOVING_HEAD,
    &UKING_GOBO,
    &UNNAMED_GOBO,
    &GENERIC_4_COLOR_LASER,
];

// Move pan/tilt away from the current position by a distance that grows
// with how far the trigger exceeds its threshold.
fn map_pan_tilt(fixture: &Fixture, function: &str, input: &MapInput<'_>) -> Option<Value> {
    let value = input.value.level();
    if value < input.threshold {
        return None;
    }
    let current = i32::from(fixture.state().get(function).copied().unwrap_or(0));
    let reach = current.max(255 - current) as f32;
    let distance = (map_to_range(value, input.threshold, 1.0) * reach) as i32;
    let choices = [(current + distance).min(255), (current - distance).max(0)];
    let pick = choices[rand::rng().random_range(0..choices.len())];
    Some(Value::Scalar(pick))
}

fn map_pan(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    map_pan_tilt(fixture, "pan", input)
}

fn map_tilt(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    map_pan_tilt(fixture, "tilt", input)
}
