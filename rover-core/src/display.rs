//! Display-state projection (C8): a pure function of `Phase`. LED and face
//! renderers subscribe solely to `display.state` — this is the only module
//! allowed to produce that topic.

use crate::bus::payload::{DisplayState, DisplayStateMsg};
use crate::fsm::Phase;

pub fn project(phase: Phase, timestamp: i64) -> DisplayStateMsg {
    let state = match phase {
        Phase::Idle => DisplayState::Idle,
        Phase::Listening => DisplayState::Listening,
        Phase::Thinking => DisplayState::Thinking,
        Phase::Speaking => DisplayState::Speaking,
        Phase::Error => DisplayState::Error,
    };
    DisplayStateMsg {
        state,
        phase: format!("{phase:?}").to_uppercase(),
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_phase_maps_to_its_named_state() {
        assert_eq!(project(Phase::Idle, 0).state, DisplayState::Idle);
        assert_eq!(project(Phase::Listening, 0).state, DisplayState::Listening);
        assert_eq!(project(Phase::Thinking, 0).state, DisplayState::Thinking);
        assert_eq!(project(Phase::Speaking, 0).state, DisplayState::Speaking);
        assert_eq!(project(Phase::Error, 0).state, DisplayState::Error);
    }
}
