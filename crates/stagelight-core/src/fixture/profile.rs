//! Static per-fixture-type descriptions
//!
//! A [`FixtureProfile`] is pure data: channel layout, change rates, enum
//! tables, initial values and the mapping strategies a fixture type offers.
//! Built-in profiles live in [`super::profiles`].

use serde_json::{json, Map, Value as JsonValue};

use super::fixture::Fixture;
use super::mapping::{Trigger, TriggerValue};
use super::profiles;
use super::state_effect::StateEffect;
use crate::effect::Value;

/// Arguments handed to a mapping strategy
#[derive(Debug, Clone)]
pub struct MapInput<'a> {
    /// Trigger that fired, `None` when called outside the mapping engine
    pub trigger: Option<Trigger>,
    /// Trigger value
    pub value: &'a TriggerValue,
    /// Directive threshold
    pub threshold: f32,
    /// Tick time
    pub now: f64,
}

/// Mapping strategy for one fixture function.
///
/// Returns the proposed value, or `None` for "no change". Strategies may
/// also install effects on the fixture directly.
pub type MapFn = fn(&mut Fixture, &MapInput<'_>) -> Option<Value>;

/// Builds the ordered state-effect candidates for a new fixture
pub type StateEffectFactory = fn() -> Vec<Box<dyn StateEffect>>;

/// Effects purged when mapping produces a new state
#[derive(Debug, Clone, Copy)]
pub enum ClearEffects {
    /// Every automation effect
    All,
    /// Only effects on these properties
    Only(&'static [&'static str]),
}

/// Enum table: label and inclusive channel range
pub type EnumTable = &'static [(&'static str, u8, u8)];

/// Immutable description of a fixture type
pub struct FixtureProfile {
    /// Type name used in configuration and on the wire
    pub kind: &'static str,
    /// Function name to channel offset (1-based), in channel order
    pub functions: &'static [(&'static str, u16)],
    /// Minimum seconds between mapping-driven changes per function
    pub rates: &'static [(&'static str, f64)],
    /// Seconds a function takes to move, as (min, max)
    pub speeds: &'static [(&'static str, f64, f64)],
    /// Named value ranges per function
    pub enums: &'static [(&'static str, EnumTable)],
    /// Initial values (functions not listed start at 0)
    pub initialize: &'static [(&'static str, u8)],
    /// Functions sent as `255 - value`
    pub invert: &'static [&'static str],
    /// Effects cleared when mapping proposes a new state
    pub clear_effects_on_new_state: ClearEffects,
    /// Functions reset to their initial value when mapping proposes a new state
    pub reset_on_new_state: &'static [&'static str],
    /// Multi-channel properties and the functions they expand to
    pub multi_prop_map: &'static [(&'static str, &'static [&'static str])],
    /// Functions whose manual changes are rendered immediately
    pub immediate: &'static [&'static str],
    /// Mapping strategies by function
    pub mappers: &'static [(&'static str, MapFn)],
    /// State-effect candidates in priority order
    pub state_effects: StateEffectFactory,
}

impl std::fmt::Debug for FixtureProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureProfile")
            .field("kind", &self.kind)
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl FixtureProfile {
    /// Look up a built-in profile by type name
    pub fn builtin(kind: &str) -> Option<&'static FixtureProfile> {
        profiles::BUILTIN.iter().copied().find(|p| p.kind == kind)
    }

    /// Names of all built-in profiles
    pub fn builtin_kinds() -> impl Iterator<Item = &'static str> {
        profiles::BUILTIN.iter().map(|p| p.kind)
    }

    /// Channel offset of a function
    pub fn channel(&self, function: &str) -> Option<u16> {
        self.functions
            .iter()
            .find(|(name, _)| *name == function)
            .map(|(_, offset)| *offset)
    }

    /// Number of DMX channels the fixture occupies
    pub fn footprint(&self) -> u16 {
        self.functions.iter().map(|(_, offset)| *offset).max().unwrap_or(0)
    }

    /// Whether the fixture has this function
    pub fn has_function(&self, function: &str) -> bool {
        self.channel(function).is_some()
    }

    /// Function names in channel order
    pub fn function_names(&self) -> impl Iterator<Item = &'static str> {
        self.functions.iter().map(|(name, _)| *name)
    }

    /// Minimum seconds between mapping-driven changes (0 if unlimited)
    pub fn rate(&self, function: &str) -> f64 {
        self.rates
            .iter()
            .find(|(name, _)| *name == function)
            .map_or(0.0, |(_, rate)| *rate)
    }

    /// Built-in initial value of a function
    pub fn initial(&self, function: &str) -> u8 {
        self.initialize
            .iter()
            .find(|(name, _)| *name == function)
            .map_or(0, |(_, value)| *value)
    }

    /// Functions a multi-channel property expands to
    pub fn multi_prop(&self, property: &str) -> Option<&'static [&'static str]> {
        self.multi_prop_map
            .iter()
            .find(|(name, _)| *name == property)
            .map(|(_, subs)| *subs)
    }

    /// Whether a property is addressable (a function or a multi-channel property)
    pub fn has_property(&self, property: &str) -> bool {
        self.has_function(property) || self.multi_prop(property).is_some()
    }

    /// Mapping strategy for a function
    pub fn mapper(&self, function: &str) -> Option<MapFn> {
        self.mappers
            .iter()
            .find(|(name, _)| *name == function)
            .map(|(_, f)| *f)
    }

    /// Whether manual changes to this function are rendered immediately
    pub fn is_immediate(&self, function: &str) -> bool {
        self.immediate.contains(&function)
    }

    /// Whether an effect on `property` is purged on a new mapped state
    pub fn clears_on_new_state(&self, property: &str) -> bool {
        match self.clear_effects_on_new_state {
            ClearEffects::All => true,
            ClearEffects::Only(props) => props.contains(&property),
        }
    }

    /// Enum tables as `{function: {label: [min, max]}}`
    pub fn enums_json(&self) -> JsonValue {
        let mut out = Map::new();
        for (function, table) in self.enums {
            let entries: Map<String, JsonValue> = table
                .iter()
                .map(|(label, min, max)| (label.to_string(), json!([min, max])))
                .collect();
            out.insert(function.to_string(), JsonValue::Object(entries));
        }
        JsonValue::Object(out)
    }

    /// Speed table as `{function: [min, max]}`
    pub fn speeds_json(&self) -> JsonValue {
        let out: Map<String, JsonValue> = self
            .speeds
            .iter()
            .map(|(function, min, max)| (function.to_string(), json!([min, max])))
            .collect();
        JsonValue::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        for kind in [
            "TomshineMovingHead6in1",
            "UKingGobo",
            "UnnamedGobo",
            "Generic4ColorLaser",
        ] {
            let profile = FixtureProfile::builtin(kind).unwrap();
            assert_eq!(profile.kind, kind);
        }
        assert!(FixtureProfile::builtin("FogMachine").is_none());
        assert_eq!(FixtureProfile::builtin_kinds().count(), 4);
    }

    #[test]
    fn test_tables_are_consistent() {
        for profile in profiles::BUILTIN {
            for (name, _) in profile.rates {
                assert!(profile.has_property(name), "{}: rate for {}", profile.kind, name);
            }
            for (name, _) in profile.initialize {
                assert!(profile.has_function(name), "{}: init {}", profile.kind, name);
            }
            for name in profile.invert {
                assert!(profile.has_function(name), "{}: invert {}", profile.kind, name);
            }
            for name in profile.reset_on_new_state {
                assert!(profile.has_function(name), "{}: reset {}", profile.kind, name);
            }
            for (name, _) in profile.mappers {
                assert!(profile.has_property(name), "{}: mapper {}", profile.kind, name);
            }
            for (_, subs) in profile.multi_prop_map {
                for sub in *subs {
                    assert!(profile.has_function(sub), "{}: sub {}", profile.kind, sub);
                }
            }
        }
    }

    #[test]
    fn test_moving_head_channels() {
        let profile = FixtureProfile::builtin("TomshineMovingHead6in1").unwrap();
        assert_eq!(profile.channel("pan"), Some(1));
        assert_eq!(profile.channel("red"), Some(8));
        assert_eq!(profile.channel("reset"), Some(18));
        assert_eq!(profile.rate("strobe"), 10.0);
        assert_eq!(profile.rate("mode"), 0.0);
        assert_eq!(profile.initial("dim"), 255);
        assert_eq!(profile.multi_prop("color"), Some(&["red", "green", "blue"][..]));
        assert!(profile.clears_on_new_state("uv"));
        assert!(!profile.clears_on_new_state("red"));
    }

    #[test]
    fn test_enum_json_shape() {
        let profile = FixtureProfile::builtin("UKingGobo").unwrap();
        let enums = profile.enums_json();
        assert_eq!(enums["color"]["red"], json!([10, 19]));
        assert_eq!(enums["gobo"]["dither_stripes"], json!([120, 127]));
    }
}
