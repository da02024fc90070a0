//! Ambient Audio Session Controller
//!
//! Owns at most one loaded sound and multiplexes three timelines against it:
//! the fade timer, the sleep-timer countdown and the backend's status stream.
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! await. Every continuation after a device call re-checks the session epoch
//! (bumped on each start and teardown) before touching the resource, and
//! timer tasks check their generation so a tick that raced a cancel on
//! another worker thread is dropped.

use super::backend::{
    LoadOptions, LoadedSound, MediaBackend, SoundHandle, SoundSource, StatusUpdate,
};
use super::countdown::{CountdownState, CountdownTick};
use super::fade::FadePlan;
use super::loop_guard::{LoopDecision, LoopGuard};
use super::notify::{NoopNotifier, NowPlaying, NowPlayingNotifier};
use super::sounds::SoundLibrary;
use super::state::{PlaybackPhase, SessionSnapshot};
use super::timer::{ticker, TimerHandle};
use super::{clamp_volume, AudioError, SessionConfig, SessionError};
use crate::storage::settings::SleepSettings;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as TokioMutex};
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

/// Target volume before anything was requested
const DEFAULT_VOLUME: f32 = 0.5;

/// Session length before anything was requested (30 minutes)
const DEFAULT_DURATION_SECS: u32 = 30 * 60;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Why a fade is running. Decides what happens when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadePurpose {
    FadeIn,
    Pause,
    Stop,
    FinalFade,
}

impl FadePurpose {
    fn is_fade_out(self) -> bool {
        !matches!(self, FadePurpose::FadeIn)
    }
}

/// A loaded sound owned by the controller.
struct PlaybackSession {
    id: Uuid,
    handle: SoundHandle,
    source: SoundSource,
    /// Last commanded gain
    current_volume: f32,
    loop_guard: LoopGuard,
    status_listener: TimerHandle,
    loop_restart: TimerHandle,
}

impl PlaybackSession {
    /// Stop the session's tasks and hand back the device handle.
    fn into_handle(mut self) -> SoundHandle {
        self.status_listener.cancel();
        self.loop_restart.cancel();
        self.handle
    }
}

enum Phase {
    Idle,
    /// The session is held by the in-flight load
    Loading {
        session_id: Uuid,
        source: SoundSource,
    },
    Playing(PlaybackSession),
    Paused(PlaybackSession),
}

impl Phase {
    fn kind(&self) -> PlaybackPhase {
        match self {
            Phase::Idle => PlaybackPhase::Idle,
            Phase::Loading { .. } => PlaybackPhase::Loading,
            Phase::Playing(_) => PlaybackPhase::Playing,
            Phase::Paused(_) => PlaybackPhase::Paused,
        }
    }

    fn session(&self) -> Option<&PlaybackSession> {
        match self {
            Phase::Playing(session) | Phase::Paused(session) => Some(session),
            _ => None,
        }
    }

    fn session_mut(&mut self) -> Option<&mut PlaybackSession> {
        match self {
            Phase::Playing(session) | Phase::Paused(session) => Some(session),
            _ => None,
        }
    }

    fn take(&mut self) -> Phase {
        std::mem::replace(self, Phase::Idle)
    }
}

/// Work left over after a teardown, done outside the state lock.
#[must_use]
struct Teardown {
    handle: Option<SoundHandle>,
    /// A now-playing notification is still showing
    cancel_notice: bool,
}

impl Teardown {
    fn is_empty(&self) -> bool {
        self.handle.is_none() && !self.cancel_notice
    }
}

struct ControllerState {
    phase: Phase,
    countdown: CountdownState,
    target_volume: f32,
    duration_seconds: u32,
    error: Option<SessionError>,
    /// Bumped on every start and teardown
    epoch: u64,
    disposed: bool,
    /// Set when a session commits, cleared once its notification is cancelled
    notified: bool,
    fade: TimerHandle,
    fade_generation: u64,
    fade_purpose: Option<FadePurpose>,
    countdown_timer: TimerHandle,
    countdown_generation: u64,
}

impl ControllerState {
    fn snapshot(&self) -> SessionSnapshot {
        let phase = self.phase.kind();
        let (session_id, sound_id) = match &self.phase {
            Phase::Idle => (None, None),
            Phase::Loading { session_id, source } => {
                (Some(*session_id), Some(source.id().to_string()))
            }
            Phase::Playing(session) | Phase::Paused(session) => {
                (Some(session.id), Some(session.source.id().to_string()))
            }
        };

        SessionSnapshot {
            session_id,
            phase,
            is_playing: phase == PlaybackPhase::Playing,
            is_paused: phase == PlaybackPhase::Paused,
            is_loading: phase == PlaybackPhase::Loading,
            remaining_seconds: self.countdown.remaining_seconds(),
            volume: self.target_volume,
            sound_id,
            final_fade_started: self.countdown.final_fade_started(),
            error: self.error.clone(),
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        !self.disposed && self.epoch == epoch
    }
}

/// A start request assembled from stored preferences.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub source: SoundSource,
    pub duration_seconds: u32,
    pub volume: f32,
}

impl SessionRequest {
    /// Resolve the selected sound and apply the safe-volume cap.
    pub fn from_settings(
        settings: &SleepSettings,
        library: &SoundLibrary,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            source: library.resolve(&settings.selected_sound_id)?,
            duration_seconds: settings.duration_seconds(),
            volume: settings.effective_volume(),
        })
    }
}

struct Shared<B> {
    backend: B,
    config: SessionConfig,
    notifier: Arc<dyn NowPlayingNotifier>,
    state: Mutex<ControllerState>,
    /// Serializes loads and releases so two handles are never alive at once
    load_gate: TokioMutex<()>,
    events: broadcast::Sender<SessionSnapshot>,
}

/// Looping ambient playback with fades and a sleep timer.
///
/// Cloning yields another handle to the same controller.
pub struct AudioSessionController<B: MediaBackend> {
    shared: Arc<Shared<B>>,
}

impl<B: MediaBackend> Clone for AudioSessionController<B> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<B: MediaBackend> AudioSessionController<B> {
    /// Create a controller without a now-playing notifier.
    pub fn new(backend: B, config: SessionConfig) -> Self {
        Self::with_notifier(backend, config, Arc::new(NoopNotifier))
    }

    /// Create a controller that reports to `notifier`.
    pub fn with_notifier(
        backend: B,
        config: SessionConfig,
        notifier: Arc<dyn NowPlayingNotifier>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let state = ControllerState {
            phase: Phase::Idle,
            countdown: CountdownState::new(config.final_fade_secs),
            target_volume: DEFAULT_VOLUME,
            duration_seconds: config.clamp_duration(DEFAULT_DURATION_SECS),
            error: None,
            epoch: 0,
            disposed: false,
            notified: false,
            fade: TimerHandle::idle(),
            fade_generation: 0,
            fade_purpose: None,
            countdown_timer: TimerHandle::idle(),
            countdown_generation: 0,
        };

        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                notifier,
                state: Mutex::new(state),
                load_gate: TokioMutex::new(()),
                events,
            }),
        }
    }

    /// Load `source` muted, start it and fade in to `target_volume`, with a
    /// sleep timer of `duration_seconds`.
    ///
    /// An active session is replaced. When it plays the same sound the loaded
    /// resource is rewound instead of decoded again. A start superseded by a
    /// later start or a stop returns `Ok(())` and leaves nothing loaded.
    pub async fn start(
        &self,
        source: SoundSource,
        duration_seconds: u32,
        target_volume: f32,
    ) -> Result<(), SessionError> {
        let shared = &self.shared;
        let (epoch, session_id, previous) = {
            let mut state = shared.lock();
            if state.disposed {
                tracing::warn!("start called on a disposed controller");
                return Ok(());
            }

            let duration = shared.config.clamp_duration(duration_seconds);
            if duration != duration_seconds {
                tracing::warn!(
                    "Session duration {}s out of range, using {}s",
                    duration_seconds,
                    duration
                );
            }

            state.epoch += 1;
            shared.cancel_fade(&mut state);
            shared.halt_countdown(&mut state);
            state.target_volume = clamp_volume(target_volume);
            state.duration_seconds = duration;
            state.countdown.reset(duration);
            state.error = None;

            let previous = match state.phase.take() {
                Phase::Playing(session) | Phase::Paused(session) => Some(session),
                Phase::Loading { .. } | Phase::Idle => None,
            };
            let session_id = Uuid::new_v4();
            state.phase = Phase::Loading {
                session_id,
                source: source.clone(),
            };
            shared.emit(&state);
            (state.epoch, session_id, previous)
        };

        tracing::info!(
            session_id = %session_id,
            sound = source.id(),
            "Starting session for {}s",
            shared.config.clamp_duration(duration_seconds)
        );

        // The load runs on its own task so a dropped caller never leaks a handle.
        let load = tokio::spawn(
            Arc::clone(shared).load_session(epoch, session_id, source, previous),
        );
        match load.await {
            Ok(result) => result,
            Err(e) => Err(shared.fail_load(epoch, format!("load task ended: {e}"))),
        }
    }

    /// Start with the stored target volume and duration.
    pub async fn start_stored(&self, source: SoundSource) -> Result<(), SessionError> {
        let (duration, volume) = {
            let state = self.shared.lock();
            (state.duration_seconds, state.target_volume)
        };
        self.start(source, duration, volume).await
    }

    /// Start from a request built from settings.
    pub async fn start_request(&self, request: SessionRequest) -> Result<(), SessionError> {
        self.start(request.source, request.duration_seconds, request.volume)
            .await
    }

    /// Fade out and pause. Only valid while playing; the countdown halts at
    /// once and keeps its remaining time.
    pub async fn pause(&self) -> bool {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.disposed {
            return false;
        }
        if state.fade_purpose == Some(FadePurpose::Stop) {
            tracing::debug!("Ignoring pause while stopping");
            return false;
        }

        match state.phase.take() {
            Phase::Playing(session) => state.phase = Phase::Paused(session),
            other => {
                tracing::debug!("Ignoring pause in phase {}", other.kind());
                state.phase = other;
                return false;
            }
        }

        shared.halt_countdown(&mut state);
        shared.begin_fade(
            &mut state,
            0.0,
            shared.config.pause_fade(),
            FadePurpose::Pause,
        );
        shared.emit(&state);
        tracing::info!(
            "Paused with {}s remaining",
            state.countdown.remaining_seconds()
        );
        true
    }

    /// Resume output, fade back in and restart the countdown from the
    /// preserved remaining time. Only valid while paused.
    pub async fn resume(&self) -> bool {
        let shared = &self.shared;
        let handle = {
            let mut state = shared.lock();
            if state.disposed {
                return false;
            }

            let handle = match state.phase.take() {
                Phase::Paused(session) => {
                    let handle = session.handle;
                    state.phase = Phase::Playing(session);
                    handle
                }
                other => {
                    tracing::debug!("Ignoring resume in phase {}", other.kind());
                    state.phase = other;
                    return false;
                }
            };

            // Supersedes a pause fade that has not reached the device yet
            shared.cancel_fade(&mut state);
            if state.countdown.final_fade_started() {
                let remaining = state.countdown.remaining_seconds();
                shared.begin_fade(
                    &mut state,
                    0.0,
                    Duration::from_secs(remaining.into()),
                    FadePurpose::FinalFade,
                );
            } else {
                let target = state.target_volume;
                shared.begin_fade(
                    &mut state,
                    target,
                    shared.config.resume_fade(),
                    FadePurpose::FadeIn,
                );
            }
            shared.start_countdown(&mut state);
            shared.emit(&state);
            tracing::info!(
                "Resumed with {}s remaining",
                state.countdown.remaining_seconds()
            );
            handle
        };

        let task_shared = Arc::clone(shared);
        let play = tokio::spawn(async move {
            best_effort("play", handle, task_shared.backend.play(handle).await);
        });
        let _ = play.await;
        true
    }

    /// Set the target volume.
    ///
    /// Applied to the device at once (superseding a fade-in) while playing;
    /// otherwise only stored for the next start or resume.
    pub async fn set_volume(&self, volume: f32) {
        let shared = &self.shared;
        let volume = clamp_volume(volume);
        let apply = {
            let mut state = shared.lock();
            if state.disposed {
                return;
            }
            state.target_volume = volume;

            let fading_out = state.fade_purpose.is_some_and(FadePurpose::is_fade_out);
            let apply = match &mut state.phase {
                Phase::Playing(session) if !fading_out => {
                    session.current_volume = volume;
                    Some(session.handle)
                }
                _ => None,
            };
            if apply.is_some() {
                shared.cancel_fade(&mut state);
            }
            shared.emit(&state);
            apply
        };

        if let Some(handle) = apply {
            best_effort("set_gain", handle, shared.backend.set_gain(handle, volume).await);
        }
    }

    /// Change the session length without interrupting audio.
    ///
    /// While playing the countdown restarts from `seconds` immediately and a
    /// running end-of-timer fade is reversed. Otherwise the value applies to
    /// the paused, loading or next session.
    pub async fn reset_timer(&self, seconds: u32) {
        let shared = &self.shared;
        let seconds = shared.config.clamp_duration(seconds);
        let mut state = shared.lock();
        if state.disposed {
            return;
        }
        state.duration_seconds = seconds;

        match state.phase.kind() {
            PlaybackPhase::Playing if state.fade_purpose == Some(FadePurpose::Stop) => {}
            PlaybackPhase::Playing => {
                let reverse_final_fade = state.fade_purpose == Some(FadePurpose::FinalFade);
                state.countdown.reset(seconds);
                if reverse_final_fade {
                    let target = state.target_volume;
                    shared.begin_fade(
                        &mut state,
                        target,
                        shared.config.resume_fade(),
                        FadePurpose::FadeIn,
                    );
                }
                shared.start_countdown(&mut state);
            }
            PlaybackPhase::Paused | PlaybackPhase::Loading => state.countdown.reset(seconds),
            PlaybackPhase::Idle => {}
        }

        shared.emit(&state);
        tracing::info!("Sleep timer set to {}s", seconds);
    }

    /// Alias of [`reset_timer`](Self::reset_timer).
    pub async fn set_duration(&self, seconds: u32) {
        self.reset_timer(seconds).await;
    }

    /// Tear the session down and return to idle with no time remaining.
    ///
    /// With `with_fade` and audible playback the volume ramps to zero first;
    /// the teardown then happens when the fade completes. Stopping while idle
    /// is a no-op.
    pub async fn stop(&self, with_fade: bool) {
        let shared = &self.shared;
        let release = {
            let mut state = shared.lock();
            if state.disposed || matches!(state.phase, Phase::Idle) {
                return;
            }

            let audible = matches!(
                &state.phase,
                Phase::Playing(session) if session.current_volume > 0.0
            );
            if with_fade && audible {
                if state.fade_purpose == Some(FadePurpose::Stop) {
                    return;
                }
                shared.halt_countdown(&mut state);
                state.countdown.clear();
                shared.begin_fade(
                    &mut state,
                    0.0,
                    shared.config.stop_fade(),
                    FadePurpose::Stop,
                );
                shared.emit(&state);
                tracing::info!("Stopping with fade-out");
                return;
            }

            tracing::info!("Stopping");
            shared.teardown_locked(&mut state)
        };

        shared.spawn_release(release).await;
    }

    /// Stop without fading and make the controller permanently inert.
    pub async fn dispose(&self) {
        let shared = &self.shared;
        let release = {
            let mut state = shared.lock();
            if state.disposed {
                return;
            }
            let release = shared.teardown_locked(&mut state);
            state.disposed = true;
            tracing::info!("Audio session controller disposed");
            release
        };

        shared.spawn_release(release).await;
    }

    /// Current state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.lock().snapshot()
    }

    /// Subscribe to state change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.shared.events.subscribe()
    }

    pub fn phase(&self) -> PlaybackPhase {
        self.shared.lock().phase.kind()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.lock().disposed
    }

    pub fn target_volume(&self) -> f32 {
        self.shared.lock().target_volume
    }

    /// Session length used by the next start.
    pub fn duration_seconds(&self) -> u32 {
        self.shared.lock().duration_seconds
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }
}

impl<B: MediaBackend> Shared<B> {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, state: &ControllerState) {
        let _ = self.events.send(state.snapshot());
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lock().is_current(epoch)
    }

    // ---- resource lifecycle ----

    async fn load_session(
        self: Arc<Self>,
        epoch: u64,
        session_id: Uuid,
        source: SoundSource,
        previous: Option<PlaybackSession>,
    ) -> Result<(), SessionError> {
        let _gate = self.load_gate.lock().await;

        let mut reused = None;
        if let Some(mut session) = previous {
            if self.config.reuse_loaded_source && session.source.same_sound(&source) {
                session.loop_restart.cancel();
                session.loop_guard.release();
                match self.rewind(session.handle).await {
                    Ok(()) => {
                        session.id = session_id;
                        session.current_volume = 0.0;
                        reused = Some(session);
                    }
                    Err(e) => {
                        tracing::debug!("Could not reuse {}, reloading: {}", session.handle, e);
                        self.release(session.into_handle()).await;
                    }
                }
            } else {
                self.release(session.into_handle()).await;
            }
        }

        if !self.is_current(epoch) {
            if let Some(session) = reused {
                self.release(session.into_handle()).await;
            }
            tracing::debug!("Start superseded before loading");
            return Ok(());
        }

        let session = match reused {
            Some(session) => session,
            None => {
                let options = LoadOptions {
                    initial_gain: 0.0,
                    looping: false,
                };
                match self.backend.load(&source, options).await {
                    Ok(LoadedSound { handle, status }) => {
                        if !self.is_current(epoch) {
                            tracing::debug!("Discarding {} loaded for a superseded start", handle);
                            self.release(handle).await;
                            return Ok(());
                        }
                        PlaybackSession {
                            id: session_id,
                            handle,
                            source: source.clone(),
                            current_volume: 0.0,
                            loop_guard: LoopGuard::new(self.config.loop_masking),
                            status_listener: self.spawn_status_listener(handle, status),
                            loop_restart: TimerHandle::idle(),
                        }
                    }
                    Err(e) => {
                        if !self.is_current(epoch) {
                            return Ok(());
                        }
                        return Err(self.fail_load(epoch, e.to_string()));
                    }
                }
            }
        };

        if let Err(e) = self.backend.play(session.handle).await {
            self.release(session.into_handle()).await;
            if !self.is_current(epoch) {
                return Ok(());
            }
            return Err(self.fail_load(epoch, e.to_string()));
        }

        let committed = {
            let mut state = self.lock();
            if state.is_current(epoch) {
                let duration_seconds = state.duration_seconds;
                let target = state.target_volume;
                state.phase = Phase::Playing(session);
                state.notified = true;
                self.begin_fade(
                    &mut state,
                    target,
                    self.config.start_fade(),
                    FadePurpose::FadeIn,
                );
                self.start_countdown(&mut state);
                self.emit(&state);
                Ok(NowPlaying {
                    session_id,
                    sound_id: source.id().to_string(),
                    duration_seconds,
                })
            } else {
                Err(session)
            }
        };

        match committed {
            Ok(now_playing) => {
                if let Err(e) = self.notifier.show(&now_playing) {
                    tracing::debug!("Now-playing notification failed: {}", e);
                }
                tracing::info!(session_id = %session_id, "Session playing");
                Ok(())
            }
            Err(session) => {
                tracing::debug!("Start superseded while starting playback");
                self.release(session.into_handle()).await;
                Ok(())
            }
        }
    }

    /// Mute and seek a loaded sound back to the start for reuse.
    async fn rewind(&self, handle: SoundHandle) -> Result<(), AudioError> {
        let status = self.backend.status(handle).await?;
        if !status.is_loaded {
            return Err(AudioError::UnknownHandle(handle));
        }
        best_effort("set_gain", handle, self.backend.set_gain(handle, 0.0).await);
        self.backend.seek_to(handle, 0).await
    }

    /// Record a failed load. Returns the error to hand to the caller.
    fn fail_load(&self, epoch: u64, message: String) -> SessionError {
        let error = SessionError::LoadFailed(message);
        let cancel_notice = {
            let mut state = self.lock();
            if state.is_current(epoch) {
                state.phase = Phase::Idle;
                state.countdown.clear();
                state.error = Some(error.clone());
                self.emit(&state);
                std::mem::take(&mut state.notified)
            } else {
                false
            }
        };
        tracing::warn!("{}", error);
        // The session this start replaced may still be on display
        if cancel_notice {
            self.cancel_notice();
        }
        error
    }

    /// Detach the session from the state and invalidate every continuation.
    ///
    /// A session still loading releases its own result once the load
    /// resolves; the notification of a session it replaced is still returned.
    fn teardown_locked(&self, state: &mut ControllerState) -> Teardown {
        if matches!(state.phase, Phase::Idle) {
            return Teardown {
                handle: None,
                cancel_notice: std::mem::take(&mut state.notified),
            };
        }

        state.epoch += 1;
        self.cancel_fade(state);
        self.halt_countdown(state);
        state.countdown.clear();

        let handle = match state.phase.take() {
            Phase::Playing(session) | Phase::Paused(session) => Some(session.into_handle()),
            Phase::Loading { .. } | Phase::Idle => None,
        };
        self.emit(state);
        Teardown {
            handle,
            cancel_notice: std::mem::take(&mut state.notified),
        }
    }

    /// Best-effort mute, stop and unload.
    async fn release(&self, handle: SoundHandle) {
        best_effort("set_gain", handle, self.backend.set_gain(handle, 0.0).await);
        best_effort("stop", handle, self.backend.stop(handle).await);
        best_effort("unload", handle, self.backend.unload(handle).await);
        tracing::debug!("Released {}", handle);
    }

    /// Release a torn-down session's handle and drop its notification.
    async fn finish_teardown(&self, teardown: Teardown) {
        let Some(handle) = teardown.handle else {
            if teardown.cancel_notice {
                self.cancel_notice();
            }
            return;
        };

        // Cancelled under the gate so it cannot land after the next show
        let _gate = self.load_gate.lock().await;
        self.release(handle).await;
        if teardown.cancel_notice {
            self.cancel_notice();
        }
    }

    /// Run the teardown on its own task so a dropped caller cannot leak it.
    async fn spawn_release(self: &Arc<Self>, teardown: Teardown) {
        if teardown.is_empty() {
            return;
        }
        let shared = Arc::clone(self);
        let task = tokio::spawn(async move { shared.finish_teardown(teardown).await });
        if let Err(e) = task.await {
            tracing::warn!("Teardown did not complete: {}", e);
        }
    }

    fn cancel_notice(&self) {
        if let Err(e) = self.notifier.cancel() {
            tracing::debug!("Could not cancel now-playing notification: {}", e);
        }
    }

    // ---- fade engine ----

    /// Start a fade of the current session toward `to`, superseding any
    /// fade in flight.
    fn begin_fade(
        self: &Arc<Self>,
        state: &mut ControllerState,
        to: f32,
        duration: Duration,
        purpose: FadePurpose,
    ) {
        let Some(from) = state.phase.session().map(|session| session.current_volume) else {
            return;
        };

        let plan = FadePlan::new(
            from,
            to,
            duration,
            self.config.fade_tick(),
            self.config.min_fade_steps,
        );
        state.fade_generation += 1;
        state.fade_purpose = Some(purpose);
        let generation = state.fade_generation;

        tracing::debug!(
            "Fade {:?} {:.2} -> {:.2} over {:?} in {} steps",
            purpose,
            plan.from(),
            plan.to(),
            plan.duration(),
            plan.steps()
        );

        let weak = Arc::downgrade(self);
        state
            .fade
            .replace(TimerHandle::spawn(Self::run_fade(weak, plan, generation, purpose)));
    }

    fn cancel_fade(&self, state: &mut ControllerState) {
        state.fade.cancel();
        state.fade_generation += 1;
        state.fade_purpose = None;
    }

    async fn run_fade(weak: Weak<Self>, plan: FadePlan, generation: u64, purpose: FadePurpose) {
        let mut ticks = (!plan.step_interval().is_zero())
            .then(|| ticker(plan.step_interval(), MissedTickBehavior::Delay));

        for step in 1..=plan.steps() {
            if let Some(ticks) = ticks.as_mut() {
                ticks.tick().await;
            }

            let gain = plan.gain_at(step);
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let handle = {
                let mut state = shared.lock();
                if state.fade_generation != generation {
                    return;
                }
                let Some(session) = state.phase.session_mut() else {
                    return;
                };
                session.current_volume = gain;
                session.handle
            };
            best_effort("set_gain", handle, shared.backend.set_gain(handle, gain).await);
        }

        if let Some(shared) = weak.upgrade() {
            shared.finish_fade(generation, purpose).await;
        }
    }

    async fn finish_fade(&self, generation: u64, purpose: FadePurpose) {
        match purpose {
            FadePurpose::FadeIn | FadePurpose::FinalFade => {
                let mut state = self.lock();
                if state.fade_generation == generation {
                    state.fade_purpose = None;
                }
            }
            FadePurpose::Pause => {
                // Stays attached to the fade handle so a resume can still abort it
                let handle = {
                    let mut state = self.lock();
                    if state.fade_generation != generation {
                        return;
                    }
                    state.fade_purpose = None;
                    match &state.phase {
                        Phase::Paused(session) => session.handle,
                        _ => return,
                    }
                };
                best_effort("pause", handle, self.backend.pause(handle).await);
            }
            FadePurpose::Stop => {
                let release = {
                    let mut state = self.lock();
                    if state.fade_generation != generation {
                        return;
                    }
                    state.fade.detach();
                    tracing::info!("Stop fade complete");
                    self.teardown_locked(&mut state)
                };
                self.finish_teardown(release).await;
            }
        }
    }

    // ---- countdown engine ----

    /// (Re)start the one-second countdown from the current remaining time.
    fn start_countdown(self: &Arc<Self>, state: &mut ControllerState) {
        state.countdown_generation += 1;
        let generation = state.countdown_generation;
        let weak = Arc::downgrade(self);
        state
            .countdown_timer
            .replace(TimerHandle::spawn(Self::run_countdown(weak, generation)));
    }

    fn halt_countdown(&self, state: &mut ControllerState) {
        state.countdown_timer.cancel();
        state.countdown_generation += 1;
    }

    async fn run_countdown(weak: Weak<Self>, generation: u64) {
        let mut ticks = ticker(Duration::from_secs(1), MissedTickBehavior::Burst);
        loop {
            ticks.tick().await;
            let Some(shared) = weak.upgrade() else {
                return;
            };

            let expired = {
                let mut state = shared.lock();
                if state.countdown_generation != generation || state.disposed {
                    return;
                }
                match state.countdown.tick() {
                    CountdownTick::Running { .. } => {
                        shared.emit(&state);
                        None
                    }
                    CountdownTick::StartFinalFade { remaining } => {
                        tracing::info!("Final fade-out over the last {}s", remaining);
                        shared.begin_fade(
                            &mut state,
                            0.0,
                            Duration::from_secs(remaining.into()),
                            FadePurpose::FinalFade,
                        );
                        shared.emit(&state);
                        None
                    }
                    CountdownTick::Expired => {
                        tracing::info!("Sleep timer elapsed");
                        state.countdown_timer.detach();
                        Some(shared.teardown_locked(&mut state))
                    }
                    CountdownTick::Idle => None,
                }
            };

            if let Some(release) = expired {
                shared.finish_teardown(release).await;
                return;
            }
        }
    }

    // ---- loop guard ----

    fn spawn_status_listener(
        self: &Arc<Self>,
        handle: SoundHandle,
        mut status: mpsc::UnboundedReceiver<StatusUpdate>,
    ) -> TimerHandle {
        let weak = Arc::downgrade(self);
        TimerHandle::spawn(async move {
            while let Some(update) = status.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                shared.on_status(handle, update);
            }
        })
    }

    fn on_status(self: &Arc<Self>, handle: SoundHandle, update: StatusUpdate) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        let epoch = state.epoch;
        let Phase::Playing(session) = &mut state.phase else {
            return;
        };
        if session.handle != handle {
            return;
        }

        if session.loop_guard.observe(&update) == LoopDecision::Restart {
            tracing::debug!(
                restarts = session.loop_guard.restarts(),
                "Restarting loop of {} at {}ms",
                handle,
                update.position_ms
            );
            let weak = Arc::downgrade(self);
            session
                .loop_restart
                .replace(TimerHandle::spawn(Self::restart_loop(weak, handle, epoch)));
        }
    }

    async fn restart_loop(weak: Weak<Self>, handle: SoundHandle, epoch: u64) {
        let Some(shared) = weak.upgrade() else {
            return;
        };

        let mut result = shared.backend.seek_to(handle, 0).await;
        if result.is_ok() {
            let still_playing = {
                let state = shared.lock();
                state.is_current(epoch) && matches!(state.phase, Phase::Playing(_))
            };
            if still_playing {
                result = shared.backend.play(handle).await;
            }
        }

        let mut state = shared.lock();
        if !state.is_current(epoch) {
            return;
        }
        if let Some(session) = state.phase.session_mut() {
            if session.handle == handle {
                session.loop_guard.release();
            }
        }
        if let Err(e) = result {
            let error = SessionError::LoopRestartFailed(e.to_string());
            tracing::warn!("{}", error);
            state.error = Some(error);
            shared.emit(&state);
        }
    }
}

/// Log and swallow a failed cosmetic device call.
fn best_effort(operation: &str, handle: SoundHandle, result: Result<(), AudioError>) {
    if let Err(e) = result {
        tracing::debug!("Ignoring failed {} on {}: {}", operation, handle, e);
    }
}
