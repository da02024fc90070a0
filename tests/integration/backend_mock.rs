//! Scriptable in-memory media backend.
//!
//! Records every call, tracks which handles are alive and can be told to
//! delay or fail individual operations.

use driftwell::audio::{
    AudioError, LoadOptions, LoadedSound, MediaBackend, MediaStatus, NowPlaying,
    NowPlayingNotifier, SoundHandle, SoundSource, StatusUpdate,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Load(String, LoadOptions),
    Play(SoundHandle),
    Pause(SoundHandle),
    Stop(SoundHandle),
    Unload(SoundHandle),
    Seek(SoundHandle, u64),
    Gain(SoundHandle, f32),
    Status(SoundHandle),
}

struct MockSound {
    source_id: String,
    playing: bool,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
}

#[derive(Default)]
struct Inner {
    next_handle: u64,
    sounds: HashMap<SoundHandle, MockSound>,
    calls: Vec<Call>,
    max_live: usize,
    load_delay: Duration,
    seek_delay: Duration,
    failing_sources: HashSet<String>,
    fail_play: bool,
    fail_seek: bool,
    fail_gain: bool,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<Inner>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    pub fn set_load_delay(&self, delay: Duration) {
        self.lock().load_delay = delay;
    }

    pub fn set_seek_delay(&self, delay: Duration) {
        self.lock().seek_delay = delay;
    }

    pub fn fail_loads_of(&self, source_id: &str) {
        self.lock().failing_sources.insert(source_id.to_string());
    }

    pub fn set_fail_play(&self, fail: bool) {
        self.lock().fail_play = fail;
    }

    pub fn set_fail_seek(&self, fail: bool) {
        self.lock().fail_seek = fail;
    }

    pub fn set_fail_gain(&self, fail: bool) {
        self.lock().fail_gain = fail;
    }

    /// Options passed to every load, in order.
    pub fn load_options(&self) -> Vec<LoadOptions> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Load(_, options) => Some(*options),
                _ => None,
            })
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    /// Gains commanded on `handle`, in order.
    pub fn gains(&self, handle: SoundHandle) -> Vec<f32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                Call::Gain(h, gain) if *h == handle => Some(*gain),
                _ => None,
            })
            .collect()
    }

    pub fn last_gain(&self, handle: SoundHandle) -> Option<f32> {
        self.gains(handle).last().copied()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn position_of(&self, call: &Call) -> Option<usize> {
        self.lock().calls.iter().position(|c| c == call)
    }

    pub fn live_handles(&self) -> Vec<SoundHandle> {
        let mut handles: Vec<_> = self.lock().sounds.keys().copied().collect();
        handles.sort_by_key(|handle| handle.raw());
        handles
    }

    pub fn live_sources(&self) -> Vec<String> {
        self.lock()
            .sounds
            .values()
            .map(|sound| sound.source_id.clone())
            .collect()
    }

    /// The only live handle. Panics unless exactly one exists.
    pub fn handle(&self) -> SoundHandle {
        let handles = self.live_handles();
        assert_eq!(handles.len(), 1, "expected one live handle, got {:?}", handles);
        handles[0]
    }

    /// Most handles alive at the same time so far.
    pub fn max_live(&self) -> usize {
        self.lock().max_live
    }

    pub fn is_playing(&self, handle: SoundHandle) -> bool {
        self.lock()
            .sounds
            .get(&handle)
            .is_some_and(|sound| sound.playing)
    }

    /// Deliver a status update for `handle`. Returns false when not loaded.
    pub fn push_status(&self, handle: SoundHandle, update: StatusUpdate) -> bool {
        self.lock()
            .sounds
            .get(&handle)
            .is_some_and(|sound| sound.status_tx.send(update).is_ok())
    }

    /// Report the natural end of the track.
    pub fn finish_track(&self, handle: SoundHandle) -> bool {
        self.push_status(handle, StatusUpdate::finished(Some(60_000)))
    }
}

impl MediaBackend for MockBackend {
    async fn load(
        &self,
        source: &SoundSource,
        options: LoadOptions,
    ) -> Result<LoadedSound, AudioError> {
        let id = source.id().to_string();
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(Call::Load(id.clone(), options));
            inner.load_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        if inner.failing_sources.contains(&id) {
            return Err(AudioError::DecodeFailed(format!("cannot decode {id}")));
        }

        inner.next_handle += 1;
        let handle = SoundHandle::new(inner.next_handle);
        let (status_tx, status) = mpsc::unbounded_channel();
        inner.sounds.insert(
            handle,
            MockSound {
                source_id: id,
                playing: false,
                status_tx,
            },
        );
        inner.max_live = inner.max_live.max(inner.sounds.len());
        Ok(LoadedSound { handle, status })
    }

    async fn play(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Play(handle));
        if inner.fail_play {
            return Err(AudioError::PlaybackFailed("device busy".into()));
        }
        let sound = inner
            .sounds
            .get_mut(&handle)
            .ok_or(AudioError::UnknownHandle(handle))?;
        sound.playing = true;
        Ok(())
    }

    async fn pause(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Pause(handle));
        let sound = inner
            .sounds
            .get_mut(&handle)
            .ok_or(AudioError::UnknownHandle(handle))?;
        sound.playing = false;
        Ok(())
    }

    async fn stop(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Stop(handle));
        let sound = inner
            .sounds
            .get_mut(&handle)
            .ok_or(AudioError::UnknownHandle(handle))?;
        sound.playing = false;
        Ok(())
    }

    async fn unload(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Unload(handle));
        inner
            .sounds
            .remove(&handle)
            .map(|_| ())
            .ok_or(AudioError::UnknownHandle(handle))
    }

    async fn seek_to(&self, handle: SoundHandle, position_ms: u64) -> Result<(), AudioError> {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(Call::Seek(handle, position_ms));
            inner.seek_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let inner = self.lock();
        if inner.fail_seek {
            return Err(AudioError::PlaybackFailed("seek rejected".into()));
        }
        if !inner.sounds.contains_key(&handle) {
            return Err(AudioError::UnknownHandle(handle));
        }
        Ok(())
    }

    async fn set_gain(&self, handle: SoundHandle, gain: f32) -> Result<(), AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Gain(handle, gain));
        if inner.fail_gain {
            return Err(AudioError::PlaybackFailed("volume write failed".into()));
        }
        if !inner.sounds.contains_key(&handle) {
            return Err(AudioError::UnknownHandle(handle));
        }
        Ok(())
    }

    async fn status(&self, handle: SoundHandle) -> Result<MediaStatus, AudioError> {
        let mut inner = self.lock();
        inner.calls.push(Call::Status(handle));
        Ok(MediaStatus {
            position_ms: 0,
            duration_ms: Some(60_000),
            is_loaded: inner.sounds.contains_key(&handle),
        })
    }
}

/// Notifier that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<NowPlaying>>,
    cancels: Mutex<usize>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn shown(&self) -> Vec<NowPlaying> {
        self.shown.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> usize {
        *self.cancels.lock().unwrap()
    }
}

impl NowPlayingNotifier for RecordingNotifier {
    fn show(&self, now_playing: &NowPlaying) -> Result<(), AudioError> {
        self.shown.lock().unwrap().push(now_playing.clone());
        if self.fail {
            return Err(AudioError::PlaybackFailed("notification denied".into()));
        }
        Ok(())
    }

    fn cancel(&self) -> Result<(), AudioError> {
        *self.cancels.lock().unwrap() += 1;
        if self.fail {
            return Err(AudioError::PlaybackFailed("notification denied".into()));
        }
        Ok(())
    }
}
