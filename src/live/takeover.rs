//! Supervisor takeover state machine.

use serde::{Deserialize, Serialize};

/// Whether a supervisor controls the conversation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoverState {
    /// Automated agent still in control.
    #[default]
    NotTakenOver,
    /// A supervisor assumed control. Terminal within a session.
    TakenOver,
}

/// How the takeover was first observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TakeoverOrigin {
    /// This session requested it and the backend confirmed.
    Local,
    /// A takeover marker appeared in the transcript.
    Observed,
}

/// One-way `NotTakenOver -> TakenOver` machine.
#[derive(Clone, Debug, Default)]
pub struct TakeoverMachine {
    state: TakeoverState,
    origin: Option<TakeoverOrigin>,
}

impl TakeoverMachine {
    /// Fresh machine in `NotTakenOver`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TakeoverState {
        self.state
    }

    /// Path that first caused the takeover, if any.
    #[must_use]
    pub const fn origin(&self) -> Option<TakeoverOrigin> {
        self.origin
    }

    /// Whether a supervisor is in control.
    #[must_use]
    pub fn is_taken_over(&self) -> bool {
        self.state == TakeoverState::TakenOver
    }

    /// Record a confirmed local takeover.
    pub fn confirm_local(&mut self) {
        self.transition(TakeoverOrigin::Local);
    }

    /// Observe a merge pass; a takeover marker forces `TakenOver`.
    ///
    /// An absent marker never moves the machine back.
    pub fn observe(&mut self, has_takeover_marker: bool) {
        if has_takeover_marker {
            self.transition(TakeoverOrigin::Observed);
        }
    }

    fn transition(&mut self, origin: TakeoverOrigin) {
        if self.state == TakeoverState::NotTakenOver {
            tracing::info!(?origin, "Conversation taken over");
            self.state = TakeoverState::TakenOver;
            self.origin = Some(origin);
        }
    }
}
