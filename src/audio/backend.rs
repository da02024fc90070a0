//! Media Backend
//!
//! The platform playback capability the session controller drives. Every call
//! is asynchronous and fallible; the controller decides which failures matter.

use super::AudioError;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opaque reference to a loaded, decoded sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SoundHandle(u64);

impl SoundHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where the audio data comes from.
#[derive(Clone)]
pub enum SourceKind {
    /// Audio file on disk
    File(PathBuf),
    /// Encoded audio already in memory
    Bytes(Arc<[u8]>),
}

impl fmt::Debug for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::File(path) => f.debug_tuple("File").field(path).finish(),
            SourceKind::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A playable sound with a stable identity.
///
/// Two sources with the same `id` are treated as the same sound, which lets
/// the controller reuse a loaded resource instead of decoding again.
#[derive(Debug, Clone)]
pub struct SoundSource {
    id: String,
    kind: SourceKind,
}

impl SoundSource {
    pub fn file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::File(path.into()),
        }
    }

    pub fn bytes(id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id: id.into(),
            kind: SourceKind::Bytes(bytes.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    /// Whether `other` names the same sound.
    pub fn same_sound(&self, other: &SoundSource) -> bool {
        self.id == other.id
    }
}

/// Options applied when a sound is loaded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadOptions {
    /// Gain (0.0 - 1.0) the sound starts at
    pub initial_gain: f32,
    /// Ask the platform to loop natively
    pub looping: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            initial_gain: 0.0,
            looping: false,
        }
    }
}

/// Point-in-time status of a loaded sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaStatus {
    pub position_ms: u64,
    /// Total length, when the container reports one
    pub duration_ms: Option<u64>,
    pub is_loaded: bool,
}

/// Periodic update pushed by the backend while a sound is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusUpdate {
    /// The track reached its natural end since the last update
    pub did_just_finish: bool,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
}

impl StatusUpdate {
    /// Update reporting the natural end of the track.
    pub fn finished(duration_ms: Option<u64>) -> Self {
        Self {
            did_just_finish: true,
            position_ms: duration_ms.unwrap_or(0),
            duration_ms,
        }
    }

    /// Plain position update.
    pub fn position(position_ms: u64, duration_ms: Option<u64>) -> Self {
        Self {
            did_just_finish: false,
            position_ms,
            duration_ms,
        }
    }
}

/// A freshly loaded sound and the stream of status updates for it.
///
/// The receiver closes when the backend unloads the sound.
#[derive(Debug)]
pub struct LoadedSound {
    pub handle: SoundHandle,
    pub status: mpsc::UnboundedReceiver<StatusUpdate>,
}

/// Trait for media playback backends
pub trait MediaBackend: Send + Sync + 'static {
    /// Open and decode a sound; it starts paused at `options.initial_gain`
    fn load(
        &self,
        source: &SoundSource,
        options: LoadOptions,
    ) -> impl std::future::Future<Output = Result<LoadedSound, AudioError>> + Send;

    /// Start or resume output
    fn play(
        &self,
        handle: SoundHandle,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Pause output, keeping the position
    fn pause(
        &self,
        handle: SoundHandle,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Stop output
    fn stop(
        &self,
        handle: SoundHandle,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Release the sound; the handle is invalid afterwards
    fn unload(
        &self,
        handle: SoundHandle,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Move the play position (milliseconds from the start)
    fn seek_to(
        &self,
        handle: SoundHandle,
        position_ms: u64,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Set output gain (0.0 - 1.0)
    fn set_gain(
        &self,
        handle: SoundHandle,
        gain: f32,
    ) -> impl std::future::Future<Output = Result<(), AudioError>> + Send;

    /// Query position and length
    fn status(
        &self,
        handle: SoundHandle,
    ) -> impl std::future::Future<Output = Result<MediaStatus, AudioError>> + Send;
}
