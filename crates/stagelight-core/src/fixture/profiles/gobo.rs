//! Color-wheel / gobo-wheel moving heads

use rand::Rng;

use super::{map_pan, map_tilt};
use crate::effect::{Effect, Value};
use crate::fixture::profile::EnumTable;
use crate::fixture::{
    ClearEffects, DeadCoasting, Fixture, FixtureProfile, IdleCoasting, MapFn, MapInput,
    StateEffect, TriggerValue,
};

const GOBO_FUNCTIONS: &[(&str, u16)] = &[
    ("pan", 1),
    ("pan_fine", 2),
    ("tilt", 3),
    ("tilt_fine", 4),
    ("color", 5),
    ("gobo", 6),
    ("strobe", 7),
    ("dim", 8),
    ("speed", 9),
    ("mode", 10),
    ("dim_mode", 11),
];

const GOBO_INITIALIZE: &[(&str, u8)] = &[
    ("pan", 0),
    ("pan_fine", 0),
    ("tilt", 0),
    ("tilt_fine", 0),
    ("color", 0),
    ("gobo", 0),
    ("strobe", 0),
    ("dim", 255),
    ("speed", 255),
    ("mode", 0),
    ("dim_mode", 0),
];

const GOBO_RATES: &[(&str, f64)] = &[
    ("pan", 0.75),
    ("tilt", 0.75),
    ("gobo", 0.25),
    ("color", 0.25),
    ("strobe", 10.0),
    ("dim", 0.125),
];

const GOBO_WHEEL: EnumTable = &[
    ("none", 0, 7),
    ("broken_circle", 8, 15),
    ("burst", 16, 23),
    ("3_spot_circle", 24, 31),
    ("square_spots", 32, 39),
    ("droplets", 40, 47),
    ("swirl", 48, 55),
    ("stripes", 56, 63),
    ("dither_none", 64, 71),
    ("dither_broken_circle", 72, 79),
    ("dither_burst", 80, 87),
    ("dither_3_spot_circle", 88, 95),
    ("dither_square_spots", 96, 103),
    ("dither_droplets", 104, 111),
    ("dither_swirl", 112, 119),
    ("dither_stripes", 120, 127),
];

const GOBO_MAPPERS: &[(&str, MapFn)] = &[
    ("pan", map_pan as MapFn),
    ("tilt", map_tilt as MapFn),
    ("color", map_color as MapFn),
    ("gobo", map_gobo as MapFn),
    ("strobe", map_strobe as MapFn),
];

/// UKing gobo moving head (11 channel mode)
pub static UKING_GOBO: FixtureProfile = FixtureProfile {
    kind: "UKingGobo",
    functions: GOBO_FUNCTIONS,
    rates: GOBO_RATES,
    speeds: &[],
    enums: &[
        (
            "color",
            &[
                ("white", 0, 9),
                ("red", 10, 19),
                ("green", 20, 29),
                ("blue", 30, 39),
                ("yellow", 40, 49),
                ("orange", 50, 59),
                ("cyan", 60, 69),
                ("pink", 70, 79),
                ("pink_cyan", 80, 89),
                ("cyan_orange", 90, 99),
                ("orange_yellow", 100, 109),
                ("yellow_blue", 110, 119),
                ("blue_green", 120, 127),
            ],
        ),
        ("gobo", GOBO_WHEEL),
    ],
    initialize: GOBO_INITIALIZE,
    invert: &["speed", "strobe"],
    clear_effects_on_new_state: ClearEffects::Only(&["pan", "tilt", "speed", "dim"]),
    reset_on_new_state: &["speed", "dim"],
    multi_prop_map: &[],
    immediate: &["speed", "dim"],
    mappers: GOBO_MAPPERS,
    state_effects,
};

/// Unbranded gobo moving head; channel 11 is reset but keeps the
/// `dim_mode` name so it links with the UKing head
pub static UNNAMED_GOBO: FixtureProfile = FixtureProfile {
    kind: "UnnamedGobo",
    functions: GOBO_FUNCTIONS,
    rates: GOBO_RATES,
    speeds: &[],
    enums: &[
        (
            "color",
            &[
                ("white", 0, 9),
                ("yellow", 10, 19),
                ("orange", 20, 29),
                ("cyan", 30, 39),
                ("blue", 40, 49),
                ("green", 50, 59),
                ("pink", 60, 69),
                ("red", 70, 79),
                ("pink_red", 80, 89),
                ("green_pink", 90, 99),
                ("blue_green", 100, 109),
                ("cyan_blue", 110, 119),
                ("orange_cyan", 120, 129),
                ("yellow_orange", 130, 139),
            ],
        ),
        ("gobo", GOBO_WHEEL),
    ],
    initialize: GOBO_INITIALIZE,
    invert: &["speed", "strobe"],
    clear_effects_on_new_state: ClearEffects::Only(&["pan", "tilt", "speed", "dim"]),
    reset_on_new_state: &["speed", "dim"],
    multi_prop_map: &[],
    immediate: &["speed", "dim"],
    mappers: GOBO_MAPPERS,
    state_effects,
};

fn state_effects() -> Vec<Box<dyn StateEffect>> {
    vec![
        Box::new(DeadCoasting::new(coasting_wheels)),
        Box::new(IdleCoasting::default()),
    ]
}

// Hold a random color and gobo while coasting
fn coasting_wheels(fixture: &mut Fixture, now: f64) -> Vec<(&'static str, Effect)> {
    let full = TriggerValue::Level(1.0);
    let input = MapInput {
        trigger: None,
        value: &full,
        threshold: 0.0,
        now,
    };
    let mut out = Vec::new();
    if let Some(color) = map_color(fixture, &input) {
        out.push(("color", Effect::hold(color, 8.0, now)));
    }
    if let Some(gobo) = map_gobo(fixture, &input) {
        out.push(("gobo", Effect::hold(gobo, 8.0, now)));
    }
    out
}

// Pick from the lower range, or with a 25% chance from the upper one
fn random_split(low: std::ops::RangeInclusive<i32>, high: std::ops::RangeInclusive<i32>) -> Value {
    let mut rng = rand::rng();
    let range = if rng.random::<f32>() > 0.75 { high } else { low };
    Value::Scalar(rng.random_range(range))
}

fn map_color(_fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    if input.value.level() < input.threshold {
        return None;
    }
    Some(random_split(0..=56, 57..=127))
}

fn map_gobo(_fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    if input.value.level() < input.threshold {
        return None;
    }
    Some(random_split(0..=63, 64..=127))
}

fn map_strobe(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    if input.value.level() > input.threshold && !fixture.effects().contains_key("strobe") {
        let burst = Effect::hold(255, 1.0, input.now).with_done_value(0);
        fixture.add_effect("strobe", burst, false);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureOptions, Trigger};

    fn gobo() -> Fixture {
        Fixture::new("g", &UKING_GOBO, FixtureOptions::default()).unwrap()
    }

    fn input(value: &TriggerValue, threshold: f32) -> MapInput<'_> {
        MapInput {
            trigger: Some(Trigger::Frequency),
            value,
            threshold,
            now: 1.0,
        }
    }

    #[test]
    fn test_color_and_gobo_stay_in_wheel_range() {
        let mut fixture = gobo();
        let value = TriggerValue::Level(0.8);
        for _ in 0..200 {
            let color = map_color(&mut fixture, &input(&value, 0.5)).unwrap();
            let gobo = map_gobo(&mut fixture, &input(&value, 0.5)).unwrap();
            assert!((0..=127).contains(&color.as_scalar().unwrap()));
            assert!((0..=127).contains(&gobo.as_scalar().unwrap()));
        }
        assert!(map_gobo(&mut fixture, &input(&TriggerValue::Level(0.1), 0.5)).is_none());
    }

    #[test]
    fn test_strobe_installs_single_burst() {
        let mut fixture = gobo();
        let value = TriggerValue::Level(0.9);
        assert!(map_strobe(&mut fixture, &input(&value, 0.5)).is_none());
        let effect = fixture.effects()["strobe"].clone();
        assert_eq!(effect.value(1.5), Value::Scalar(255));
        assert_eq!(effect.done_value(), &Value::Scalar(0));

        // A running burst is not restarted
        map_strobe(&mut fixture, &input(&value, 0.5));
        assert_eq!(fixture.effects()["strobe"], effect);
    }

    #[test]
    fn test_profiles_differ_only_in_color_wheel() {
        assert_eq!(UKING_GOBO.functions, UNNAMED_GOBO.functions);
        let uking = UKING_GOBO.enums_json();
        let unnamed = UNNAMED_GOBO.enums_json();
        assert_eq!(uking["gobo"], unnamed["gobo"]);
        assert_ne!(uking["color"], unnamed["color"]);
    }
}
