//! Pattern laser

use rand::Rng;

use crate::effect::{Effect, Value};
use crate::fixture::{
    ClearEffects, DeadPattern, Fixture, FixtureProfile, IdleOff, MapFn, MapInput, StateEffect,
};

/// Generic 4-color pattern laser (7 channel mode)
pub static GENERIC_4_COLOR_LASER: FixtureProfile = FixtureProfile {
    kind: "Generic4ColorLaser",
    functions: &[
        ("mode", 1),
        ("pattern", 2),
        ("x", 3),
        ("y", 4),
        ("scan_speed", 5),
        ("pattern_speed", 6),
        ("pattern_size", 7),
    ],
    rates: &[
        ("mode", 0.0),
        ("pattern", 4.0),
        ("pattern_size", 5.0),
        ("x", 1.0),
        ("y", 1.0),
    ],
    speeds: &[],
    enums: &[
        (
            "mode",
            &[
                ("off", 0, 49),
                ("static", 50, 99),
                ("dynamic", 100, 149),
                ("sound", 150, 199),
                ("auto", 200, 255),
            ],
        ),
        (
            "pattern_static",
            &[
                ("circle", 0, 4),
                ("dot_circle_1", 5, 9),
                ("dot_circle_2", 10, 14),
                ("scan_circle", 15, 19),
                ("horiz_line", 20, 24),
                ("horiz_dot_line", 25, 29),
                ("vert_line", 30, 34),
                ("vert_dot_line", 35, 39),
                ("45deg_diag", 40, 44),
                ("45deg_dot_diag", 45, 49),
                ("135deg_diag", 50, 54),
                ("135deg_dot_diag", 55, 59),
                ("v_line_1", 60, 64),
                ("v_dot_line_1", 65, 69),
                ("v_line_2", 70, 74),
                ("v_dot_line_2", 75, 79),
                ("triangle_1", 80, 84),
                ("dot_triangle_1", 85, 89),
                ("triangle_2", 90, 94),
                ("dot_triangle_2", 95, 99),
                ("square", 100, 104),
                ("dot_square", 105, 109),
                ("rectangle_1", 110, 114),
                ("dot_rectangle_1", 115, 119),
                ("rectangle_2", 120, 124),
                ("dot_rectangle_2", 125, 129),
                ("criscross", 130, 134),
                ("chiasma_line", 135, 139),
                ("horiz_extend_line", 140, 144),
                ("horiz_shrink_line", 145, 149),
                ("horiz_flex_line", 150, 154),
                ("horiz_flex_dot_line", 155, 159),
                ("vert_extend_line", 160, 164),
                ("vert_shrink_line", 165, 169),
                ("vert_flex_line", 170, 174),
                ("vert_flex_dot_line", 175, 179),
                ("ladder_line_1", 180, 184),
                ("ladder_line_2", 185, 189),
                ("ladder_line_3", 190, 194),
                ("ladder_line_4", 195, 199),
                ("tetragon_1", 200, 204),
                ("tetragon_2", 205, 209),
                ("pentagon_1", 210, 214),
                ("pentagon_2", 215, 219),
                ("pentagon_3", 220, 224),
                ("pentagon_4", 225, 229),
                ("wave_line", 230, 234),
                ("wave_dot_line", 235, 239),
                ("spiral_line", 240, 244),
                ("many_dot_1", 245, 249),
                ("many_dot_2", 250, 254),
                ("square_dot", 255, 255),
            ],
        ),
        (
            "pattern_dynamic",
            &[
                ("circle_to_big", 0, 4),
                ("dot_circle_to_big", 5, 9),
                ("scan_circle_to_big", 10, 14),
                ("circle_flash", 15, 19),
                ("dot_circle_flash", 20, 24),
                ("circle_roll", 25, 29),
                ("dot_circle_roll", 30, 34),
                ("circle_turn", 35, 39),
                ("dot_circle_turn", 40, 44),
                ("dot_circle_to_add", 45, 49),
                ("scan_circle_extend", 50, 54),
                ("circle_jump", 55, 59),
                ("dot_circle_jump", 60, 64),
                ("horiz_line_jump", 65, 69),
                ("horiz_dot_line_jump", 70, 74),
                ("vert_line_jump", 75, 79),
                ("vert_dot_line_jump", 80, 84),
                ("diag_jump", 85, 89),
                ("dot_diag_jump", 90, 94),
                ("short_sector_round_1", 95, 99),
                ("short_sector_round_2", 100, 104),
                ("long_sector_round_1", 105, 109),
                ("long_sector_round_2", 110, 114),
                ("line_scan", 115, 119),
                ("dot_line_scan", 120, 124),
                ("45deg_diag_move", 125, 129),
                ("dot_diag_move", 130, 134),
                ("horiz_line_flex", 135, 139),
                ("horiz_dot_line_flex", 140, 144),
                ("horiz_line_move", 145, 149),
                ("horiz_dot_line_move", 150, 154),
                ("vert_line_move", 155, 159),
                ("vert_dot_line_move", 160, 164),
                ("rect_extend", 165, 169),
                ("dot_rect_extend", 170, 174),
                ("square_extend", 175, 179),
                ("dot_square_extend", 180, 184),
                ("rect_turn", 185, 189),
                ("dot_rect_turn", 190, 194),
                ("square_turn", 195, 199),
                ("dot_square_turn", 200, 204),
                ("pentagon_turn", 205, 209),
                ("dot_pentagon_turn", 210, 214),
                ("tetragon_turn", 215, 219),
                ("pentagon_star_turn", 220, 224),
                ("bird_fly", 225, 229),
                ("dot_bird_fly", 230, 234),
                ("wave_flowing", 235, 239),
                ("dot_wave_flowing", 240, 244),
                ("many_dot_jump_1", 245, 249),
                ("square_dot_jump", 250, 254),
                ("many_dot_jump_2", 255, 255),
            ],
        ),
    ],
    initialize: &[
        ("mode", 50),
        ("pattern", 0),
        ("x", 128),
        ("y", 128),
        ("scan_speed", 255),
        ("pattern_speed", 255),
        ("pattern_size", 128),
    ],
    invert: &["scan_speed", "pattern_speed"],
    clear_effects_on_new_state: ClearEffects::Only(&["scan_speed", "pattern_speed"]),
    reset_on_new_state: &[],
    multi_prop_map: &[],
    immediate: &["mode"],
    mappers: &[
        ("pattern", map_pattern as MapFn),
        ("x", map_x as MapFn),
        ("y", map_y as MapFn),
        ("pattern_size", map_pattern_size as MapFn),
    ],
    state_effects,
};

fn state_effects() -> Vec<Box<dyn StateEffect>> {
    vec![Box::new(DeadPattern::default()), Box::new(IdleOff::default())]
}

const FULL_RANGE_ATTEMPTS: usize = 25;

// Random channel value, retried a bounded number of times to land inside `cap`
fn map_full_range(input: &MapInput<'_>, cap: Option<(u8, u8)>) -> Option<Value> {
    if input.value.level() < input.threshold {
        return None;
    }
    let mut rng = rand::rng();
    for _ in 0..FULL_RANGE_ATTEMPTS {
        let out: u8 = rng.random();
        if let Some((min, max)) = cap {
            if out < min || out > max {
                continue;
            }
        }
        return Some(Value::from(out));
    }
    None
}

fn map_pattern(_fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    map_full_range(input, None)
}

fn map_x(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    let [xmin, _, xmax, _] = fixture.restrict_position();
    map_full_range(input, Some((xmin, xmax)))
}

fn map_y(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    let [_, ymin, _, ymax] = fixture.restrict_position();
    map_full_range(input, Some((ymin, ymax)))
}

// A negative threshold grows the pattern instead of shrinking it
fn map_pattern_size(fixture: &mut Fixture, input: &MapInput<'_>) -> Option<Value> {
    let grow = input.threshold < 0.0;
    if input.value.level() >= input.threshold.abs() {
        let effect = if grow {
            Effect::new(0, 255, 0.25, input.now)
        } else {
            Effect::new(255, 0, 0.25, input.now)
        };
        fixture.add_effect("pattern_size", effect, false);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{FixtureOptions, Trigger, TriggerValue};

    fn laser(restrict: [u8; 4]) -> Fixture {
        let options = FixtureOptions {
            restrict_position: restrict,
            ..Default::default()
        };
        Fixture::new("laser", &GENERIC_4_COLOR_LASER, options).unwrap()
    }

    fn input(value: &TriggerValue, threshold: f32) -> MapInput<'_> {
        MapInput {
            trigger: Some(Trigger::Beat),
            value,
            threshold,
            now: 2.0,
        }
    }

    #[test]
    fn test_position_respects_restriction() {
        let mut fixture = laser([100, 0, 140, 255]);
        let value = TriggerValue::Level(0.5);
        for _ in 0..200 {
            if let Some(Value::Scalar(x)) = map_x(&mut fixture, &input(&value, 0.0)) {
                assert!((100..=140).contains(&x));
            }
        }
    }

    #[test]
    fn test_impossible_restriction_gives_no_change() {
        let mut fixture = laser([10, 10, 9, 9]);
        let value = TriggerValue::Level(0.5);
        assert!(map_x(&mut fixture, &input(&value, 0.0)).is_none());
    }

    #[test]
    fn test_pattern_size_direction_follows_threshold_sign() {
        let value = TriggerValue::Level(0.6);

        let mut shrinking = laser([0, 0, 255, 255]);
        assert!(map_pattern_size(&mut shrinking, &input(&value, 0.5)).is_none());
        assert_eq!(
            shrinking.effects()["pattern_size"].start_value(),
            &Value::Scalar(255)
        );

        let mut growing = laser([0, 0, 255, 255]);
        map_pattern_size(&mut growing, &input(&value, -0.5));
        assert_eq!(growing.effects()["pattern_size"].end_value(), &Value::Scalar(255));

        let mut quiet = laser([0, 0, 255, 255]);
        map_pattern_size(&mut quiet, &input(&TriggerValue::Level(0.1), -0.5));
        assert!(quiet.effects().is_empty());
    }
}
