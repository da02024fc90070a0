//! Ambient Audio Session Module
//!
//! Looping playback of a single ambient sound for a user-selected duration,
//! with volume fades on every transition and a sleep-timer countdown.
//!
//! The [`AudioSessionController`] is the only stateful piece; the media
//! backend, settings store and now-playing notifier are collaborators passed
//! in explicitly.

pub mod backend;
pub mod controller;
pub mod countdown;
pub mod fade;
pub mod loop_guard;
pub mod notify;
#[cfg(feature = "desktop-audio")]
pub mod rodio_backend;
pub mod sounds;
pub mod state;
pub mod timer;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

// Re-export main types
pub use backend::{
    LoadOptions, LoadedSound, MediaBackend, MediaStatus, SoundHandle, SoundSource, SourceKind,
    StatusUpdate,
};
pub use controller::{AudioSessionController, SessionRequest};
pub use countdown::{CountdownState, CountdownTick};
pub use fade::FadePlan;
pub use loop_guard::{LoopDecision, LoopGuard};
pub use notify::{NoopNotifier, NowPlaying, NowPlayingNotifier};
#[cfg(feature = "desktop-audio")]
pub use rodio_backend::RodioBackend;
pub use sounds::{AmbientSound, SoundLibrary, SoundLibraryConfig};
pub use state::{PlaybackPhase, SessionSnapshot};
pub use timer::TimerHandle;

/// Errors reported by a media backend.
///
/// These never reach the caller of the controller directly; the controller
/// either promotes them to a [`SessionError`] or swallows them.
#[derive(Debug, Clone, Error)]
pub enum AudioError {
    #[error("Audio device not available")]
    DeviceNotAvailable,

    #[error("Sound file not found: {0}")]
    SoundNotFound(String),

    #[error("Could not decode sound: {0}")]
    DecodeFailed(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    #[error("Unknown sound handle: {0}")]
    UnknownHandle(SoundHandle),
}

/// What the user can do about a [`SessionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// The sound could not be opened; offer a different one
    PickDifferentSound,
    /// Playback may be glitched; offer a manual restart
    RestartPlayback,
}

/// User-visible session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum SessionError {
    #[error("Could not load sound: {0}")]
    LoadFailed(String),

    #[error("Could not restart the loop: {0}")]
    LoopRestartFailed(String),
}

impl SessionError {
    /// Suggested recovery for the UI.
    pub fn recovery(&self) -> RecoveryAction {
        match self {
            SessionError::LoadFailed(_) => RecoveryAction::PickDifferentSound,
            SessionError::LoopRestartFailed(_) => RecoveryAction::RestartPlayback,
        }
    }
}

/// How the seam at the end of the track is hidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum LoopMasking {
    /// Reseek when the backend reports the track just finished
    #[default]
    EndCallback,
    /// Reseek once the position is within `lead_ms` of the end
    LeadSeek { lead_ms: u64 },
}

/// Timing parameters for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fade-in after start (ms)
    pub start_fade_ms: u64,
    /// Fade-in after resume (ms)
    pub resume_fade_ms: u64,
    /// Fade-out before pausing (ms)
    pub pause_fade_ms: u64,
    /// Fade-out on a manual stop (ms)
    pub stop_fade_ms: u64,
    /// Length of the end-of-timer fade-out (seconds)
    pub final_fade_secs: u32,
    /// Interval between fade steps (ms)
    pub fade_tick_ms: u64,
    /// Lower bound on the number of steps in any fade
    pub min_fade_steps: u32,
    /// Longest accepted session (seconds)
    pub max_duration_secs: u32,
    /// Reuse the loaded resource when `start` names the same sound
    pub reuse_loaded_source: bool,
    /// Loop seam handling
    pub loop_masking: LoopMasking,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            start_fade_ms: 3000,
            resume_fade_ms: 1500,
            pause_fade_ms: 1000,
            stop_fade_ms: 3000,
            final_fade_secs: 8,
            fade_tick_ms: 50,
            min_fade_steps: 20,
            max_duration_secs: 180 * 60,
            reuse_loaded_source: true,
            loop_masking: LoopMasking::EndCallback,
        }
    }
}

impl SessionConfig {
    pub fn start_fade(&self) -> Duration {
        Duration::from_millis(self.start_fade_ms)
    }

    pub fn resume_fade(&self) -> Duration {
        Duration::from_millis(self.resume_fade_ms)
    }

    pub fn pause_fade(&self) -> Duration {
        Duration::from_millis(self.pause_fade_ms)
    }

    pub fn stop_fade(&self) -> Duration {
        Duration::from_millis(self.stop_fade_ms)
    }

    pub fn fade_tick(&self) -> Duration {
        Duration::from_millis(self.fade_tick_ms.max(1))
    }

    /// Clamp a requested duration into the accepted range.
    pub fn clamp_duration(&self, seconds: u32) -> u32 {
        seconds.clamp(1, self.max_duration_secs.max(1))
    }
}

/// Clamp a gain into `[0, 1]`, mapping NaN to silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}
