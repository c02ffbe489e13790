use std::fmt;

/// Playback state of a session.
///
/// `Idle` may still have a start pending (the next track's stream is being
/// resolved); the session tracks that separately. `Disconnecting` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Active,
    Disconnecting,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        self == PlaybackState::Disconnecting
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        match (self, next) {
            (Disconnecting, _) => false,
            (_, Disconnecting) => true,
            (Idle, Active) | (Active, Idle) | (Active, Active) | (Idle, Idle) => true,
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Active => "playing",
            PlaybackState::Disconnecting => "disconnecting",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::PlaybackState::*;

    #[test]
    fn test_disconnecting_is_terminal() {
        assert!(Disconnecting.is_terminal());
        for next in [Idle, Active, Disconnecting] {
            assert!(!Disconnecting.can_transition_to(next));
        }
    }

    #[test]
    fn test_any_live_state_can_disconnect() {
        assert!(Idle.can_transition_to(Disconnecting));
        assert!(Active.can_transition_to(Disconnecting));
        assert!(Idle.can_transition_to(Active));
        assert!(Active.can_transition_to(Idle));
    }
}
