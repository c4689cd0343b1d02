//! Playback controller state machine.
//!
//! The controller is the single source of truth for what the audio engine is
//! doing. Playing/Paused are entered from engine events, never from the
//! commands that requested them, and every event is identity-checked so that
//! a stale completion can not mutate state that has since been re-targeted.

/// Lifecycle of the bound track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// No track bound to the engine.
    Idle,
    /// A decode/bind was requested for this track and has not started yet.
    Loading { track_id: String },
    Playing { track_id: String },
    Paused { track_id: String },
}

impl PlaybackState {
    /// Identity of the track this state is about, if any.
    pub fn bound_track_id(&self) -> Option<&str> {
        match self {
            PlaybackState::Idle => None,
            PlaybackState::Loading { track_id }
            | PlaybackState::Playing { track_id }
            | PlaybackState::Paused { track_id } => Some(track_id),
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackState::Playing { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PlaybackState::Idle)
    }

    pub fn begin_loading(&mut self, track_id: &str) {
        *self = PlaybackState::Loading {
            track_id: track_id.to_string(),
        };
    }

    pub fn to_idle(&mut self) {
        *self = PlaybackState::Idle;
    }

    /// Engine reported a track started. Accepted only when it matches the
    /// pending or already-bound identity; returns whether state changed.
    pub fn on_track_started(&mut self, track_id: &str) -> bool {
        match self.bound_track_id() {
            Some(bound) if bound == track_id => {
                *self = PlaybackState::Playing {
                    track_id: track_id.to_string(),
                };
                true
            }
            _ => false,
        }
    }

    /// Engine reported pause. Only meaningful while playing.
    pub fn on_paused(&mut self) -> bool {
        if let PlaybackState::Playing { track_id } = self {
            *self = PlaybackState::Paused {
                track_id: track_id.clone(),
            };
            true
        } else {
            false
        }
    }

    /// Engine reported resume. Only meaningful while paused.
    pub fn on_resumed(&mut self) -> bool {
        if let PlaybackState::Paused { track_id } = self {
            *self = PlaybackState::Playing {
                track_id: track_id.clone(),
            };
            true
        } else {
            false
        }
    }

    /// Whether a finished event for this id belongs to the bound track.
    /// State is left untouched; the caller decides what plays next.
    pub fn accepts_finished(&self, track_id: &str) -> bool {
        self.bound_track_id() == Some(track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_started_event_moves_loading_to_playing() {
        let mut state = PlaybackState::Idle;
        state.begin_loading("a");
        assert!(state.on_track_started("a"));
        assert!(state.is_playing());
    }

    #[test]
    fn test_stale_started_event_is_ignored() {
        let mut state = PlaybackState::Idle;
        state.begin_loading("b");
        assert!(!state.on_track_started("a"));
        assert_eq!(
            state,
            PlaybackState::Loading {
                track_id: "b".to_string()
            }
        );
    }

    #[test]
    fn test_started_event_while_idle_is_ignored() {
        let mut state = PlaybackState::Idle;
        assert!(!state.on_track_started("a"));
        assert!(state.is_idle());
    }

    #[test]
    fn test_pause_resume_round_trip() {
        let mut state = PlaybackState::Playing {
            track_id: "a".to_string(),
        };
        assert!(state.on_paused());
        assert!(!state.is_playing());
        assert!(state.on_resumed());
        assert!(state.is_playing());
    }

    #[test]
    fn test_pause_outside_playing_is_ignored() {
        let mut state = PlaybackState::Idle;
        assert!(!state.on_paused());
        let mut state = PlaybackState::Loading {
            track_id: "a".to_string(),
        };
        assert!(!state.on_paused());
    }

    #[test]
    fn test_replay_of_bound_track_is_accepted_as_started() {
        let mut state = PlaybackState::Playing {
            track_id: "a".to_string(),
        };
        assert!(state.on_track_started("a"));
        assert!(state.is_playing());
    }

    #[test]
    fn test_finished_acceptance_is_identity_checked() {
        let state = PlaybackState::Playing {
            track_id: "a".to_string(),
        };
        assert!(state.accepts_finished("a"));
        assert!(!state.accepts_finished("b"));
        assert!(!PlaybackState::Idle.accepts_finished("a"));
    }
}
