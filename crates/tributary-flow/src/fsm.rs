//! Flow control state table
//!
//! The engine has two states. Recovering is not a state of its own: it is the
//! `Pausing -> Pausing` transition, which runs the same quiesce action as
//! unpausing but at the `mid` threshold.
//!
//! ```text
//!                 behind >= high
//!  ┌────────────┐ ─────────────────────────> ┌─────────┐
//!  │ Forwarding │                            │ Pausing │ ──┐ behind < mid
//!  └────────────┘ <───────────────────────── └─────────┘ <─┘ (quiesce)
//!                 behind < low (quiesce)
//! ```
//!
//! For each state the transitions are evaluated in the order they are
//! declared and the first guard that holds wins.

use crate::config::Thresholds;
use serde::{Deserialize, Serialize};
use tributary_core::ProgressCursors;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    /// Records are forwarded to the sender as soon as they are logged
    Forwarding,
    /// Records are logged but withheld until the sender catches up
    Pausing,
}

impl FlowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowState::Forwarding => "forwarding",
            FlowState::Pausing => "pausing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    ShouldPause,
    ShouldUnpause,
    ShouldRecover,
}

impl Guard {
    pub fn holds(&self, cursors: &ProgressCursors, thresholds: &Thresholds) -> bool {
        let behind = cursors.bytes_behind();
        match self {
            Guard::ShouldPause => behind >= thresholds.high,
            Guard::ShouldUnpause => behind < thresholds.low,
            Guard::ShouldRecover => {
                behind < thresholds.mid && cursors.unforwarded() >= thresholds.recover_min
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Replay everything written but not forwarded, then mark
    Quiesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub guard: Guard,
    pub target: FlowState,
    pub action: Option<Action>,
}

const FORWARDING: &[Transition] = &[Transition {
    guard: Guard::ShouldPause,
    target: FlowState::Pausing,
    action: None,
}];

const PAUSING: &[Transition] = &[
    Transition {
        guard: Guard::ShouldUnpause,
        target: FlowState::Forwarding,
        action: Some(Action::Quiesce),
    },
    Transition {
        guard: Guard::ShouldRecover,
        target: FlowState::Pausing,
        action: Some(Action::Quiesce),
    },
];

/// Ordered transitions out of `state`.
pub fn transitions(state: FlowState) -> &'static [Transition] {
    match state {
        FlowState::Forwarding => FORWARDING,
        FlowState::Pausing => PAUSING,
    }
}

/// First transition out of `state` whose guard holds.
pub fn select(
    state: FlowState,
    cursors: &ProgressCursors,
    thresholds: &Thresholds,
) -> Option<Transition> {
    transitions(state)
        .iter()
        .find(|t| t.guard.holds(cursors, thresholds))
        .copied()
}
