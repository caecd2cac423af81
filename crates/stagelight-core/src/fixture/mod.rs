//! Fixtures: profiles, the animation state machine, mapping and state effects

#[allow(clippy::module_inception)]
mod fixture;
pub mod mapping;
pub mod profile;
pub mod profiles;
pub mod state_effect;

pub use fixture::{Animatable, Fixture, FixtureOptions, LinkConfig};
pub use mapping::{map_to_range, BinSpec, MappingDirective, Trigger, TriggerValue};
pub use profile::{ClearEffects, FixtureProfile, MapFn, MapInput};
pub use state_effect::{DeadCoasting, DeadPattern, IdleCoasting, IdleOff, StateEffect};
