//! Monitor events
//!
//! Fixtures record what changed (state diffs, effects starting and
//! finishing, state-effect transitions, suspension) as [`MonitorEvent`]s.
//! The control server drains them once per tick and broadcasts them to
//! subscribed clients.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// What kind of change an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorOp {
    /// Properties changed value
    State,
    /// An effect was installed or finished
    Effect,
    /// A state effect became active or finished
    StateEffect,
    /// A fixture was suspended or resumed
    Suspended,
}

/// Lifecycle marker for effect events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpState {
    /// Started
    New,
    /// Finished or removed
    Done,
}

/// A single monitor record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEvent {
    /// Fixture type name
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Fixture name
    pub name: Option<String>,
    /// Event category
    pub op: MonitorOp,
    /// NEW/DONE for effects and state effects
    pub op_state: Option<OpState>,
    /// Property or state-effect name the event is about
    pub op_name: Option<String>,
    /// Event payload
    pub state: Map<String, Value>,
}

impl MonitorEvent {
    /// Event for a fixture
    pub fn new(kind: &str, name: &str, op: MonitorOp) -> Self {
        Self {
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
            op,
            op_state: None,
            op_name: None,
            state: Map::new(),
        }
    }

    /// Attach a NEW/DONE marker and the subject name
    pub fn with_op(mut self, op_state: OpState, op_name: impl Into<String>) -> Self {
        self.op_state = Some(op_state);
        self.op_name = Some(op_name.into());
        self
    }

    /// Attach a payload
    pub fn with_state(mut self, state: Map<String, Value>) -> Self {
        self.state = state;
        self
    }
}

/// Outbound queue of monitor events, drained once per tick
#[derive(Debug, Default)]
pub struct MonitorQueue {
    events: Vec<MonitorEvent>,
}

impl MonitorQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event
    pub fn push(&mut self, event: MonitorEvent) {
        self.events.push(event);
    }

    /// Queue several events, preserving order
    pub fn extend(&mut self, events: impl IntoIterator<Item = MonitorEvent>) {
        self.events.extend(events);
    }

    /// Take every queued event
    pub fn drain(&mut self) -> Vec<MonitorEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_serializes_to_envelope_shape() {
        let mut state = Map::new();
        state.insert("dim".into(), json!(20));
        let event = MonitorEvent::new("UKingGobo", "gobo1", MonitorOp::StateEffect)
            .with_op(OpState::New, "DeadCoasting")
            .with_state(state);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "UKingGobo",
                "name": "gobo1",
                "op": "STATE_EFFECT",
                "op_state": "NEW",
                "op_name": "DeadCoasting",
                "state": {"dim": 20},
            })
        );
    }

    #[test]
    fn test_queue_drains_in_order() {
        let mut queue = MonitorQueue::new();
        queue.push(MonitorEvent::new("A", "a", MonitorOp::State));
        queue.push(MonitorEvent::new("B", "b", MonitorOp::Suspended));
        assert_eq!(queue.len(), 2);

        let drained = queue.drain();
        assert_eq!(drained[0].name.as_deref(), Some("a"));
        assert_eq!(drained[1].op, MonitorOp::Suspended);
        assert!(queue.is_empty());
    }
}
