//! RGB moving head

use rand::Rng;

use super::{map_pan, map_tilt};
use crate::effect::{Effect, Value};
use crate::fixture::{
    Animatable, ClearEffects, DeadCoasting, Fixture, FixtureProfile, IdleCoasting, MapFn,
    MapInput, StateEffect, Trigger, TriggerValue,
};

/// Tomshine 6-in-1 RGBWA+UV moving head (18 channel mode)
pub static TOMSHINE_MOVING_HEAD: FixtureProfile = FixtureProfile {
    kind: "TomshineMovingHead6in1",
    functions: &[
        ("pan", 1),
        ("pan_fine", 2),
        ("tilt", 3),
        ("tilt_fine", 4),
        ("speed", 5),
        ("dim", 6),
        ("strobe", 7),
        ("red", 8),
        ("green", 9),
        ("blue", 10),
        ("white", 11),
        ("amber", 12),
        ("uv", 13),
        ("mode", 14),
        ("motor_sens", 15),
        ("effect", 16),
        ("led_sens", 17),
        ("reset", 18),
    ],
    rates: &[
        ("pan", 0.75),
        ("tilt", 0.75),
        ("color", 0.125),
        ("strobe", 10.0),
        ("dim", 0.125),
    ],
    speeds: &[],
    enums: &[],
    initialize: &[("dim", 255), ("speed", 255)],
    invert: &["speed"],
    clear_effects_on_new_state: ClearEffects::Only(&[
        "pan", "tilt", "speed", "dim", "uv", "white", "amber",
    ]),
    reset_on_new_state: &["speed", "dim"],
    multi_prop_map: &[("color", &["red", "green", "blue"])],
    immediate: &["speed", "dim"],
    mappers: &[
        ("pan", map_pan as MapFn),
        ("tilt", map_tilt as MapFn),
        ("color", map_color as MapFn),
    ],
    state_effects,
};

fn state_effects() -> Vec<Box<dyn StateEffect>> {
    vec![
        Box::new(DeadCoasting::new(coasting_color)),
        Box::new(IdleCoasting::default()),
    ]
}

fn coasting_color(fixture: &mut Fixture, now: f64) -> Vec<(&'static str, Effect)> {
    let Some(current) = fixture.current_value("color") else {
        return Vec::new();
    };
    let full = TriggerValue::Level(1.0);
    let input = MapInput {
        trigger: None,
        value: &full,
        threshold: 0.0,
        now,
    };
    map_color(fixture, &input)
        .map(|target| vec![("color", Effect::new(current, target, 2.0, now))])
        .unwrap_or_default()
}

fn map_color(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    if input.trigger == Some(Trigger::FrequencyAll) {
        // Fade towards a color built from the spectrum thirds
        let levels = input.value.bucket_levels();
        let per = levels.len() / 3;
        if per == 0 {
            return None;
        }
        let rgb: Vec<i32> = (0..3)
            .map(|i| {
                let loudest = levels[i * per..(i + 1) * per]
                    .iter()
                    .copied()
                    .fold(0.0, f32::max);
                if loudest > input.threshold {
                    ((loudest * 255.0) as i32).min(255)
                } else {
                    0
                }
            })
            .collect();
        if rgb.iter().sum::<i32>() > 0 {
            let current = fixture.current_value("color")?;
            fixture.add_effect("color", Effect::new(current, rgb, 0.25, input.now), false);
        }
        return None;
    }

    let level = input.value.level();
    if level < input.threshold {
        return None;
    }

    if input.trigger == Some(Trigger::Pitch) {
        let red = ((level / 128.0) * 255.0) as i32;
        return Some(Value::Vector(vec![red.clamp(0, 255), 0, 0]));
    }

    // A random color noticeably different from the current one
    let old = fixture.current_value("color")?.components();
    let mut rng = rand::rng();
    let mut rgb = vec![0; 3];
    for _ in 0..64 {
        rgb = (0..3).map(|_| rng.random_range(0..=255)).collect();
        let diff = rgb
            .iter()
            .zip(&old)
            .map(|(a, b)| (a - b).abs() as f32 / 255.0)
            .sum::<f32>()
            / 3.0;
        if diff >= 0.25 {
            break;
        }
    }
    Some(Value::Vector(rgb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::FixtureOptions;

    fn head() -> Fixture {
        Fixture::new("mh", &TOMSHINE_MOVING_HEAD, FixtureOptions::default()).unwrap()
    }

    #[test]
    fn test_pitch_maps_to_red_level() {
        let mut fixture = head();
        let value = TriggerValue::Level(64.0);
        let input = MapInput {
            trigger: Some(Trigger::Pitch),
            value: &value,
            threshold: 0.0,
            now: 0.0,
        };
        assert_eq!(map_color(&mut fixture, &input), Some(Value::Vector(vec![127, 0, 0])));
    }

    #[test]
    fn test_random_color_differs_from_current() {
        let mut fixture = head();
        let value = TriggerValue::Level(1.0);
        let input = MapInput {
            trigger: Some(Trigger::Frequency),
            value: &value,
            threshold: 0.5,
            now: 0.0,
        };
        let Some(Value::Vector(rgb)) = map_color(&mut fixture, &input) else {
            panic!("expected a color");
        };
        assert_eq!(rgb.len(), 3);
        let diff: f32 = rgb.iter().map(|c| *c as f32 / 255.0).sum::<f32>() / 3.0;
        assert!(diff >= 0.25);
    }

    #[test]
    fn test_below_threshold_is_no_change() {
        let mut fixture = head();
        let value = TriggerValue::Level(0.1);
        let input = MapInput {
            trigger: Some(Trigger::Frequency),
            value: &value,
            threshold: 0.5,
            now: 0.0,
        };
        assert_eq!(map_color(&mut fixture, &input), None);
    }

    #[test]
    fn test_frequency_all_installs_fade() {
        let mut fixture = head();
        let value = TriggerValue::Buckets(vec![
            vec![1.0],
            vec![0.0],
            vec![0.0],
            vec![0.0],
            vec![0.5],
            vec![0.0],
        ]);
        let input = MapInput {
            trigger: Some(Trigger::FrequencyAll),
            value: &value,
            threshold: 0.1,
            now: 3.0,
        };
        assert_eq!(map_color(&mut fixture, &input), None);
        let effect = &fixture.effects()["color"];
        assert_eq!(effect.start_value(), &Value::Vector(vec![0, 0, 0]));
        assert_eq!(effect.end_value(), &Value::Vector(vec![255, 0, 127]));
        assert_eq!(effect.duration(), 0.25);
    }

    #[test]
    fn test_pan_moves_by_scaled_distance() {
        let mut fixture = head();
        let value = TriggerValue::Level(1.0);
        let input = MapInput {
            trigger: Some(Trigger::Frequency),
            value: &value,
            threshold: 0.5,
            now: 0.0,
        };
        // From 0 the only reachable far positions are 255 and 0
        let pan = map_pan(&mut fixture, &input).unwrap();
        assert!(pan == Value::Scalar(255) || pan == Value::Scalar(0));
    }
}
