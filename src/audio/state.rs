//! Playback phase and the state snapshot broadcast to listeners.

use super::SessionError;
use serde::Serialize;
use uuid::Uuid;

/// Coarse playback phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackPhase {
    /// Nothing loaded
    #[default]
    Idle,
    /// A start is decoding or restarting the sound
    Loading,
    /// Sound is audible (or fading in/out)
    Playing,
    /// Sound is loaded but paused; the countdown is halted
    Paused,
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackPhase::Idle => write!(f, "Idle"),
            PlaybackPhase::Loading => write!(f, "Loading"),
            PlaybackPhase::Playing => write!(f, "Playing"),
            PlaybackPhase::Paused => write!(f, "Paused"),
        }
    }
}

/// State change notification.
///
/// Emitted on every phase, target volume, remaining time or error change.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SessionSnapshot {
    /// Identity of the current session, if one exists
    pub session_id: Option<Uuid>,
    pub phase: PlaybackPhase,
    pub is_playing: bool,
    pub is_paused: bool,
    pub is_loading: bool,
    /// Seconds left on the sleep timer
    pub remaining_seconds: u32,
    /// Target volume (0.0 - 1.0)
    pub volume: f32,
    /// Sound being played or loaded
    pub sound_id: Option<String>,
    /// End-of-timer fade-out has begun
    pub final_fade_started: bool,
    /// Last user-visible error
    pub error: Option<SessionError>,
}

impl SessionSnapshot {
    /// Whether a session exists.
    pub fn is_active(&self) -> bool {
        self.phase != PlaybackPhase::Idle
    }
}
