//! Now-playing notification hook.
//!
//! The controller shows a notification when a session starts playing and
//! cancels it on teardown. The notifier is passed in explicitly; failures are
//! cosmetic and only logged.

use super::AudioError;
use uuid::Uuid;

/// What is currently playing.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub session_id: Uuid,
    pub sound_id: String,
    pub duration_seconds: u32,
}

/// Platform notification surface.
pub trait NowPlayingNotifier: Send + Sync {
    /// Show or replace the now-playing notification
    fn show(&self, now_playing: &NowPlaying) -> Result<(), AudioError>;

    /// Remove the notification
    fn cancel(&self) -> Result<(), AudioError>;
}

/// Notifier that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl NowPlayingNotifier for NoopNotifier {
    fn show(&self, _now_playing: &NowPlaying) -> Result<(), AudioError> {
        Ok(())
    }

    fn cancel(&self) -> Result<(), AudioError> {
        Ok(())
    }
}
