//! Session lifecycle state machine.

use crate::error::LspError;

/// The current state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, nothing spawned yet.
    Uninitialized,
    /// Spawning the server process.
    Starting,
    /// `initialize` sent, waiting for the server's answer.
    Initializing,
    /// Handshake complete; requests flow freely.
    Running,
    /// `shutdown`/`exit` in progress.
    Stopping,
    /// Cleanly stopped. Terminal.
    Stopped,
    /// Start failed or the connection died. Terminal.
    Failed,
}

impl SessionState {
    /// `Stopped` and `Failed` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Uninitialized, Starting)
            | (Starting, Initializing)
            | (Initializing, Running)
            | (Running, Stopping)
            | (Stopping, Stopped) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Tracks and validates the state of one session.
#[derive(Debug)]
pub struct Lifecycle {
    state: SessionState,
}

impl Lifecycle {
    /// Create a lifecycle in [`SessionState::Uninitialized`].
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
        }
    }

    /// Return the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: SessionState) -> Result<SessionState, LspError> {
        if !self.state.can_transition_to(next) {
            return Err(LspError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let prev = self.state;
        self.state = next;
        Ok(prev)
    }

    /// Move to `Failed`. Returns `false` when already terminal.
    pub fn fail(&mut self) -> bool {
        self.transition(SessionState::Failed).is_ok()
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn lifecycle_happy_path() {
        let mut lc = Lifecycle::new();
        assert_eq!(lc.state(), Uninitialized);
        for next in [Starting, Initializing, Running, Stopping, Stopped] {
            lc.transition(next).unwrap();
            assert_eq!(lc.state(), next);
        }
    }

    #[test]
    fn failed_reachable_from_every_live_state() {
        for from in [Uninitialized, Starting, Initializing, Running, Stopping] {
            assert!(from.can_transition_to(Failed), "{from:?}");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        let all = [
            Uninitialized,
            Starting,
            Initializing,
            Running,
            Stopping,
            Stopped,
            Failed,
        ];
        for from in [Stopped, Failed] {
            assert!(from.is_terminal());
            for to in all {
                assert!(!from.can_transition_to(to), "{from:?} -> {to:?}");
            }
        }
    }

    #[test]
    fn skipping_states_is_rejected() {
        let mut lc = Lifecycle::new();
        let err = lc.transition(Running).unwrap_err();
        assert!(matches!(
            err,
            LspError::InvalidTransition {
                from: Uninitialized,
                to: Running
            }
        ));
        assert_eq!(lc.state(), Uninitialized);
    }

    #[test]
    fn restart_after_stop_is_rejected() {
        let mut lc = Lifecycle::new();
        for next in [Starting, Initializing, Running, Stopping, Stopped] {
            lc.transition(next).unwrap();
        }
        assert!(lc.transition(Starting).is_err());
    }

    #[test]
    fn fail_is_idempotent() {
        let mut lc = Lifecycle::new();
        lc.transition(Starting).unwrap();
        assert!(lc.fail());
        assert!(!lc.fail());
        assert_eq!(lc.state(), Failed);
    }

    #[test]
    fn default_is_uninitialized() {
        assert_eq!(Lifecycle::default().state(), Uninitialized);
    }
}
