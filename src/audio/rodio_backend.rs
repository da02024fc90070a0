//! Desktop media backend using rodio.
//!
//! The output stream is not `Send`, so it lives on a dedicated thread for the
//! lifetime of the backend; only its handle crosses threads. Each loaded
//! sound owns one `Sink` fed from the cached file bytes. rodio 0.17 sinks
//! cannot seek, so seeking rebuilds the sink with the decoder skipped ahead,
//! and position is tracked from wall-clock play time.

use super::backend::{
    LoadOptions, LoadedSound, MediaBackend, MediaStatus, SoundHandle, SoundSource, SourceKind,
    StatusUpdate,
};
use super::timer::{ticker, TimerHandle};
use super::{clamp_volume, AudioError};
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// How often each sound reports its position.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

type SoundMap = Mutex<HashMap<SoundHandle, RodioSound>>;

struct RodioSound {
    sink: Sink,
    data: Arc<[u8]>,
    duration: Option<Duration>,
    looping: bool,
    gain: f32,
    /// Position when playback last (re)started
    offset: Duration,
    /// Set while audible
    resumed_at: Option<Instant>,
    status_tx: mpsc::UnboundedSender<StatusUpdate>,
    _poller: TimerHandle,
}

impl RodioSound {
    fn position(&self) -> Duration {
        let position = self.offset + self.resumed_at.map(|at| at.elapsed()).unwrap_or_default();
        match self.duration {
            Some(duration) if !self.looping => position.min(duration),
            _ => position,
        }
    }

    fn duration_ms(&self) -> Option<u64> {
        self.duration.map(|d| d.as_millis() as u64)
    }
}

/// rodio implementation of [`MediaBackend`].
pub struct RodioBackend {
    stream: OutputStreamHandle,
    sounds: Arc<SoundMap>,
    next_handle: AtomicU64,
    poll_interval: Duration,
    /// Dropping this ends the stream thread
    _shutdown: std_mpsc::Sender<()>,
}

impl RodioBackend {
    /// Open the default output device.
    pub fn new() -> Result<Self, AudioError> {
        Self::with_poll_interval(DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(poll_interval: Duration) -> Result<Self, AudioError> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("driftwell-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((_stream, handle)) => {
                    let _ = ready_tx.send(Ok(handle));
                    // Keep the stream open until the backend goes away
                    let _ = shutdown_rx.recv();
                    tracing::debug!("Audio output thread exiting");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                }
            })
            .map_err(|e| AudioError::PlaybackFailed(e.to_string()))?;

        let stream = ready_rx
            .recv()
            .map_err(|_| AudioError::DeviceNotAvailable)?
            .map_err(|e| {
                tracing::error!("Failed to open audio output: {}", e);
                AudioError::DeviceNotAvailable
            })?;

        tracing::info!("Audio output opened");

        Ok(Self {
            stream,
            sounds: Arc::new(Mutex::new(HashMap::new())),
            next_handle: AtomicU64::new(1),
            poll_interval,
            _shutdown: shutdown_tx,
        })
    }

    fn sounds(&self) -> MutexGuard<'_, HashMap<SoundHandle, RodioSound>> {
        self.sounds.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against a loaded sound.
    fn with_sound<T>(
        &self,
        handle: SoundHandle,
        f: impl FnOnce(&mut RodioSound) -> Result<T, AudioError>,
    ) -> Result<T, AudioError> {
        let mut sounds = self.sounds();
        let sound = sounds
            .get_mut(&handle)
            .ok_or(AudioError::UnknownHandle(handle))?;
        f(sound)
    }

    /// Build a sink positioned at `start`, keeping the gain.
    fn build_sink(
        &self,
        data: &Arc<[u8]>,
        start: Duration,
        looping: bool,
        gain: f32,
    ) -> Result<Sink, AudioError> {
        let decoder = Decoder::new(Cursor::new(Arc::clone(data)))
            .map_err(|e| AudioError::DecodeFailed(e.to_string()))?;
        let sink =
            Sink::try_new(&self.stream).map_err(|e| AudioError::PlaybackFailed(e.to_string()))?;
        sink.pause();
        sink.set_volume(gain);

        if looping {
            sink.append(decoder.skip_duration(start).repeat_infinite());
        } else {
            sink.append(decoder.skip_duration(start));
        }
        Ok(sink)
    }

    /// Swap in a fresh sink at `start`, preserving play state.
    fn rebuild(&self, sound: &mut RodioSound, start: Duration) -> Result<(), AudioError> {
        let playing = sound.resumed_at.is_some();
        let sink = self.build_sink(&sound.data, start, sound.looping, sound.gain)?;
        if playing {
            sink.play();
        }
        // Dropping the old sink stops it
        sound.sink = sink;
        sound.offset = start;
        sound.resumed_at = playing.then(Instant::now);
        Ok(())
    }

    async fn read_source(source: &SoundSource) -> Result<Arc<[u8]>, AudioError> {
        match source.kind() {
            SourceKind::Bytes(bytes) => Ok(Arc::clone(bytes)),
            SourceKind::File(path) => {
                let path = path.clone();
                let display = path.display().to_string();
                let bytes = tokio::task::spawn_blocking(move || std::fs::read(path))
                    .await
                    .map_err(|e| AudioError::PlaybackFailed(e.to_string()))?
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::NotFound => AudioError::SoundNotFound(display),
                        _ => AudioError::DecodeFailed(format!("{display}: {e}")),
                    })?;
                Ok(bytes.into())
            }
        }
    }

    async fn poll_status(sounds: Weak<SoundMap>, handle: SoundHandle, period: Duration) {
        let mut ticks = ticker(period, MissedTickBehavior::Skip);
        loop {
            ticks.tick().await;
            let Some(sounds) = sounds.upgrade() else {
                return;
            };
            let mut sounds = sounds.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(sound) = sounds.get_mut(&handle) else {
                return;
            };
            if sound.resumed_at.is_none() {
                continue;
            }

            if sound.sink.empty() {
                sound.offset = sound.duration.unwrap_or_else(|| sound.position());
                sound.resumed_at = None;
                let _ = sound.status_tx.send(StatusUpdate::finished(sound.duration_ms()));
            } else {
                let position_ms = sound.position().as_millis() as u64;
                let _ = sound
                    .status_tx
                    .send(StatusUpdate::position(position_ms, sound.duration_ms()));
            }
        }
    }
}

impl MediaBackend for RodioBackend {
    async fn load(
        &self,
        source: &SoundSource,
        options: LoadOptions,
    ) -> Result<LoadedSound, AudioError> {
        let data = Self::read_source(source).await?;
        let gain = clamp_volume(options.initial_gain);

        let duration = Decoder::new(Cursor::new(Arc::clone(&data)))
            .map_err(|e| AudioError::DecodeFailed(e.to_string()))?
            .total_duration();
        let sink = self.build_sink(&data, Duration::ZERO, options.looping, gain)?;

        let handle = SoundHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let (status_tx, status) = mpsc::unbounded_channel();
        let poller = TimerHandle::spawn(Self::poll_status(
            Arc::downgrade(&self.sounds),
            handle,
            self.poll_interval,
        ));

        self.sounds().insert(
            handle,
            RodioSound {
                sink,
                data,
                duration,
                looping: options.looping,
                gain,
                offset: Duration::ZERO,
                resumed_at: None,
                status_tx,
                _poller: poller,
            },
        );

        tracing::debug!("Loaded {} as {} ({:?})", source.id(), handle, duration);
        Ok(LoadedSound { handle, status })
    }

    async fn play(&self, handle: SoundHandle) -> Result<(), AudioError> {
        self.with_sound(handle, |sound| {
            if sound.sink.empty() {
                // Ran out; start over
                sound.resumed_at = None;
                self.rebuild(sound, Duration::ZERO)?;
            }
            sound.sink.play();
            if sound.resumed_at.is_none() {
                sound.resumed_at = Some(Instant::now());
            }
            Ok(())
        })
    }

    async fn pause(&self, handle: SoundHandle) -> Result<(), AudioError> {
        self.with_sound(handle, |sound| {
            sound.sink.pause();
            sound.offset = sound.position();
            sound.resumed_at = None;
            Ok(())
        })
    }

    async fn stop(&self, handle: SoundHandle) -> Result<(), AudioError> {
        self.with_sound(handle, |sound| {
            sound.resumed_at = None;
            self.rebuild(sound, Duration::ZERO)
        })
    }

    async fn unload(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let sound = self.sounds().remove(&handle);
        match sound {
            Some(sound) => {
                sound.sink.stop();
                tracing::debug!("Unloaded {}", handle);
                Ok(())
            }
            None => Err(AudioError::UnknownHandle(handle)),
        }
    }

    async fn seek_to(&self, handle: SoundHandle, position_ms: u64) -> Result<(), AudioError> {
        self.with_sound(handle, |sound| {
            let mut target = Duration::from_millis(position_ms);
            if let Some(duration) = sound.duration {
                target = target.min(duration);
            }
            self.rebuild(sound, target)
        })
    }

    async fn set_gain(&self, handle: SoundHandle, gain: f32) -> Result<(), AudioError> {
        self.with_sound(handle, |sound| {
            sound.gain = clamp_volume(gain);
            sound.sink.set_volume(sound.gain);
            Ok(())
        })
    }

    async fn status(&self, handle: SoundHandle) -> Result<MediaStatus, AudioError> {
        let sounds = self.sounds();
        Ok(match sounds.get(&handle) {
            Some(sound) => MediaStatus {
                position_ms: sound.position().as_millis() as u64,
                duration_ms: sound.duration_ms(),
                is_loaded: true,
            },
            None => MediaStatus {
                position_ms: 0,
                duration_ms: None,
                is_loaded: false,
            },
        })
    }
}
