//! Driftwell - Sleep Sounds Player
//!
//! Plays a looping ambient sound with fade-in, fade-out and a sleep timer
//! that ends the session with a gradual fade. Playback goes through a
//! pluggable media backend; a rodio backend is available behind the
//! `desktop-audio` feature.

pub mod audio;
pub mod storage;

// Re-export commonly used types
pub use audio::{AudioSessionController, MediaBackend, SessionSnapshot, SoundLibrary};
pub use storage::config::AppConfig;
pub use storage::settings::SleepSettings;
