use crossbeam::channel::{Receiver, Sender};
use std::fmt;
use std::time::{Duration, Instant};

use super::capture::{CapturePipeline, DecodedTake, TakeId, quantize};
use super::clock::{TimerId, TimerQueue};
use super::graph::{Voice, VoiceKind};
use super::layer::LayerId;
use super::metronome::{
    CountIn, FLASH_DURATION, LoopClicks, Metronome, MetronomeSettings, Pulse, boundary_delay,
};
use super::resources::{AudioBackend, ResourceManager};
use super::scheduler::{CycleContent, PlaybackScheduler};
use super::store::{LayerStore, UndoOutcome};
use super::{LooperCommand, LooperNotification, TimerEvent};
use crate::config::SessionSettings;
use crate::error::{LooperError, Result};

/// Two taps closer than this collapse into an undo.
pub const DOUBLE_TAP_WINDOW: Duration = Duration::from_millis(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LooperState {
    Empty,
    Countdown,
    Recording,
    Playing,
    Overdubbing,
}

impl fmt::Display for LooperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LooperState::Empty => "EMPTY",
            LooperState::Countdown => "COUNTDOWN",
            LooperState::Recording => "RECORDING",
            LooperState::Playing => "PLAYING",
            LooperState::Overdubbing => "OVERDUBBING",
        };
        f.write_str(name)
    }
}

/// Everything that can change the session, consumed one at a time by
/// [`LooperEngine::handle`].
#[derive(Debug)]
pub enum EngineEvent {
    Tap,
    Stop,
    Undo,
    Timer(TimerId, TimerEvent),
    CaptureDecoded(DecodedTake),
}

struct Countdown {
    count_in: CountIn,
    timer: TimerId,
    /// When the armed pulse is due; the next one is armed from here
    due: Instant,
    shown: u8,
}

/// Progress of the take being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TakePhase {
    /// Overdub waiting for the next beat boundary
    Armed(TimerId),
    Capturing,
    /// Overdub end waiting for the next beat boundary
    Stopping(TimerId),
    Decoding(TakeId),
}

/// Read-only snapshot of the session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub state: LooperState,
    /// Audio clock time in seconds
    pub current_time: f64,
    /// Seconds into the running loop
    pub loop_position: Option<f64>,
    pub loop_duration: Option<f64>,
    pub loop_beats: Option<u32>,
    pub bpm: u32,
    pub count_in_beats: u8,
    /// Count-in number currently shown
    pub countdown: Option<u8>,
    pub layers: Vec<LayerView>,
    pub recording_elapsed: Option<Duration>,
    /// Whether an overdub start or stop is waiting for a beat boundary
    pub overdub_pending: bool,
    pub input_level: f32,
    /// Smoothed input RMS in dBFS
    pub input_db: f32,
    pub flash: bool,
    pub error: Option<String>,
    pub metronome: MetronomeSettings,
    pub can_undo: bool,
    pub undo_levels: usize,
    pub bpm_locked: bool,
}

impl Default for SessionView {
    fn default() -> Self {
        Self {
            state: LooperState::Empty,
            current_time: 0.0,
            loop_position: None,
            loop_duration: None,
            loop_beats: None,
            bpm: 120,
            count_in_beats: 4,
            countdown: None,
            layers: Vec::new(),
            recording_elapsed: None,
            overdub_pending: false,
            input_level: 0.0,
            input_db: -96.0,
            flash: false,
            error: None,
            metronome: MetronomeSettings::default(),
            can_undo: false,
            undo_levels: 0,
            bpm_locked: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerView {
    pub id: LayerId,
    pub volume: f32,
    pub muted: bool,
    pub hue: f32,
    pub duration: f64,
}

/// The looper session and the single place its state changes.
pub struct LooperEngine {
    state: LooperState,
    metronome: Metronome,
    store: LayerStore,
    capture: CapturePipeline,
    scheduler: PlaybackScheduler,
    resources: ResourceManager,
    timers: TimerQueue<TimerEvent>,
    countdown: Option<Countdown>,
    take: Option<TakePhase>,
    /// Loop position in frames at which the running overdub began
    take_offset: usize,
    loop_clicks: Option<LoopClicks>,
    last_tap: Option<Instant>,
    last_loop_beat: Option<u64>,
    flash_until: Option<Instant>,
    error: Option<String>,
    notifier: Option<Sender<LooperNotification>>,
}

impl LooperEngine {
    pub fn new(
        backend: Box<dyn AudioBackend>,
        session: &SessionSettings,
        metronome: MetronomeSettings,
    ) -> Result<Self> {
        Ok(Self {
            state: LooperState::Empty,
            metronome: Metronome::new(session.bpm, session.count_in_beats, metronome)?,
            store: LayerStore::new(),
            capture: CapturePipeline::new(),
            scheduler: PlaybackScheduler::new(),
            resources: ResourceManager::new(backend),
            timers: TimerQueue::new(),
            countdown: None,
            take: None,
            take_offset: 0,
            loop_clicks: None,
            last_tap: None,
            last_loop_beat: None,
            flash_until: None,
            error: None,
            notifier: None,
        })
    }

    pub fn set_notifier(&mut self, sender: Sender<LooperNotification>) {
        self.notifier = Some(sender);
    }

    pub fn state(&self) -> LooperState {
        self.state
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    pub fn is_decoding(&self) -> bool {
        matches!(self.take, Some(TakePhase::Decoding(_)))
    }

    /// Decoder completions; feed them back through [`EngineEvent::CaptureDecoded`].
    pub fn completions(&self) -> Receiver<DecodedTake> {
        self.capture.completions()
    }

    /// Earliest armed timer, for the caller's wait.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Open the devices ahead of the first tap. Failures are kept in the
    /// session view until an acquisition succeeds.
    pub fn acquire(&mut self) -> Result<()> {
        match self.resources.acquire() {
            Ok(()) => {
                self.error = None;
                Ok(())
            }
            Err(e) => {
                log::warn!("device acquisition failed: {}", e);
                self.error = Some(e.to_string());
                self.notify(LooperNotification::Error(e.to_string()));
                Err(e)
            }
        }
    }

    pub fn tap(&mut self, now: Instant) {
        self.handle(EngineEvent::Tap, now);
    }

    pub fn stop(&mut self, now: Instant) {
        self.handle(EngineEvent::Stop, now);
    }

    pub fn undo(&mut self, now: Instant) {
        self.handle(EngineEvent::Undo, now);
    }

    pub fn handle(&mut self, event: EngineEvent, now: Instant) {
        match event {
            EngineEvent::Tap => self.on_tap(now),
            EngineEvent::Stop => self.on_stop(now),
            EngineEvent::Undo => self.on_undo(now),
            EngineEvent::Timer(id, timer) => self.on_timer(id, timer, now),
            EngineEvent::CaptureDecoded(done) => self.on_decoded(done, now),
        }
    }

    /// Drain input, fire due timers, take decoder completions, and follow
    /// the running loop for beat pulses.
    pub fn poll(&mut self, now: Instant) {
        if let Some(input) = self.resources.input_mut()
            && let Err(e) = self.capture.feed(input)
        {
            log::warn!("input encode failed: {}", e);
        }

        while let Some((id, timer)) = self.timers.pop_due(now) {
            self.handle(EngineEvent::Timer(id, timer), now);
        }

        let completions = self.capture.completions();
        while let Ok(done) = completions.try_recv() {
            self.handle(EngineEvent::CaptureDecoded(done), now);
        }

        if let Some(graph) = self.resources.graph() {
            let frame = graph.clock().now();
            graph.with(|g| g.collect_finished(frame));
        }
        self.follow_loop_beats(now);
    }

    pub fn apply(&mut self, command: LooperCommand, now: Instant) -> Result<()> {
        match command {
            LooperCommand::Tap => self.tap(now),
            LooperCommand::Stop => self.stop(now),
            LooperCommand::Undo => self.undo(now),
            LooperCommand::HardReset | LooperCommand::Shutdown => self.hard_reset(),
            LooperCommand::SetBpm(bpm) => self.set_bpm(bpm)?,
            LooperCommand::SetCountInBeats(beats) => self.set_count_in_beats(beats)?,
            LooperCommand::SetMetronome(settings) => self.set_metronome(settings),
            LooperCommand::SetLayerVolume(id, volume) => self.set_layer_volume(id, volume)?,
            LooperCommand::ToggleLayerMute(id) => self.toggle_layer_mute(id)?,
            LooperCommand::DeleteLayer(id) => self.delete_layer(id, now)?,
        }
        Ok(())
    }

    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        if !self.store.is_empty() {
            return Err(LooperError::BpmLocked);
        }
        self.metronome.set_bpm(bpm)
    }

    pub fn set_count_in_beats(&mut self, beats: u8) -> Result<()> {
        self.metronome.set_count_in_beats(beats)
    }

    /// Takes effect from the next loop cycle.
    pub fn set_metronome(&mut self, mut settings: MetronomeSettings) {
        settings.volume = settings.volume.clamp(0.0, 1.0);
        self.metronome.settings = settings;
        self.refresh_loop_clicks();
    }

    pub fn set_layer_volume(&mut self, id: LayerId, volume: f32) -> Result<()> {
        self.store.get_mut(id)?.set_volume(volume);
        Ok(())
    }

    pub fn set_layer_muted(&mut self, id: LayerId, muted: bool) -> Result<()> {
        self.store.get_mut(id)?.muted = muted;
        Ok(())
    }

    pub fn toggle_layer_mute(&mut self, id: LayerId) -> Result<()> {
        self.store.get_mut(id)?.toggle_mute();
        Ok(())
    }

    pub fn delete_layer(&mut self, id: LayerId, now: Instant) -> Result<()> {
        self.store.delete(id)?;
        log::info!("layer {} deleted", id);
        self.notify(LooperNotification::LayerRemoved(id));
        if self.store.is_empty() {
            self.abandon_take();
            self.stop_playback();
            self.set_state(LooperState::Empty);
        } else {
            self.reschedule(now);
        }
        Ok(())
    }

    /// Drop the whole session and close the devices. Callable in any state.
    pub fn hard_reset(&mut self) {
        self.abandon_take();
        self.scheduler.reset(&mut self.timers);
        self.timers.clear();
        self.resources.release();
        self.store.clear();
        self.loop_clicks = None;
        self.last_tap = None;
        self.last_loop_beat = None;
        self.flash_until = None;
        self.error = None;
        self.set_state(LooperState::Empty);
        log::info!("session reset");
        self.notify(LooperNotification::Reset);
    }

    pub fn view(&self, now: Instant) -> SessionView {
        let graph = self.resources.graph();
        let loop_length = self.store.loop_length();
        SessionView {
            state: self.state,
            current_time: graph.map_or(0.0, |g| g.clock().now_seconds()),
            loop_position: graph.and_then(|g| {
                self.scheduler
                    .position(g.clock().now())
                    .map(|frames| g.clock().seconds(frames))
            }),
            loop_duration: loop_length.map(|l| l.seconds()),
            loop_beats: loop_length.map(|l| l.beats),
            bpm: self.metronome.bpm(),
            count_in_beats: self.metronome.count_in_beats(),
            countdown: self.countdown.as_ref().map(|c| c.shown),
            layers: self
                .store
                .layers()
                .iter()
                .map(|layer| LayerView {
                    id: layer.id,
                    volume: layer.volume,
                    muted: layer.muted,
                    hue: layer.hue,
                    duration: layer.duration(),
                })
                .collect(),
            recording_elapsed: self.capture.elapsed(now),
            overdub_pending: matches!(
                self.take,
                Some(TakePhase::Armed(_) | TakePhase::Stopping(_))
            ),
            input_level: self.capture.input_level(),
            input_db: self.capture.input_db(),
            flash: self.flash_until.is_some_and(|until| now < until),
            error: self.error.clone(),
            metronome: self.metronome.settings,
            can_undo: self.store.can_undo(),
            undo_levels: self.store.undo_levels(),
            bpm_locked: !self.store.is_empty(),
        }
    }

    fn on_tap(&mut self, now: Instant) {
        let previous = self.last_tap.replace(now);
        if let Some(previous) = previous
            && now.saturating_duration_since(previous) < DOUBLE_TAP_WINDOW
            && !self.store.is_empty()
        {
            // a third tap starts a new gesture
            self.last_tap = None;
            log::debug!("double tap");
            self.on_undo(now);
            return;
        }

        match (self.state, self.take) {
            (LooperState::Empty, _) => self.begin_take(now),
            (LooperState::Countdown, _) => {
                self.abandon_take();
                self.set_state(LooperState::Empty);
            }
            (LooperState::Recording, Some(TakePhase::Capturing)) => self.finish_take(now),
            (LooperState::Playing, _) => self.arm_overdub(now),
            (LooperState::Overdubbing, Some(TakePhase::Armed(_))) => {
                self.abandon_take();
                self.set_state(LooperState::Playing);
            }
            (LooperState::Overdubbing, Some(TakePhase::Capturing)) => {
                let delay = self.overdub_delay();
                if delay.is_zero() {
                    self.finish_take(now);
                } else {
                    let timer = self.timers.arm_after(now, delay, TimerEvent::OverdubStop);
                    self.take = Some(TakePhase::Stopping(timer));
                }
            }
            // already finishing
            _ => {}
        }
    }

    fn on_stop(&mut self, now: Instant) {
        match self.state {
            LooperState::Empty => {}
            LooperState::Countdown => {
                self.abandon_take();
                self.set_state(LooperState::Empty);
            }
            LooperState::Recording => {
                self.abandon_take();
                self.revert(now);
            }
            LooperState::Playing | LooperState::Overdubbing => {
                self.abandon_take();
                self.stop_playback();
                self.set_state(LooperState::Empty);
            }
        }
    }

    fn on_undo(&mut self, now: Instant) {
        self.abandon_take();
        match self.store.undo() {
            UndoOutcome::Nothing => {
                let state = if self.scheduler.is_running() {
                    LooperState::Playing
                } else {
                    LooperState::Empty
                };
                self.set_state(state);
                return;
            }
            UndoOutcome::Restored => {
                self.reschedule(now);
                self.set_state(LooperState::Playing);
            }
            UndoOutcome::Emptied => {
                self.stop_playback();
                self.set_state(LooperState::Empty);
            }
        }
        log::info!("undo, {} layer(s) left", self.store.len());
        self.notify(LooperNotification::Undone);
    }

    fn on_timer(&mut self, id: TimerId, timer: TimerEvent, now: Instant) {
        match timer {
            TimerEvent::CountInPulse => {
                if self.countdown.as_ref().is_some_and(|c| c.timer == id) {
                    self.count_in_pulse(now);
                }
            }
            TimerEvent::OverdubStart => {
                if self.take == Some(TakePhase::Armed(id)) {
                    self.start_capture(now, LooperState::Overdubbing);
                }
            }
            TimerEvent::OverdubStop => {
                if self.take == Some(TakePhase::Stopping(id)) {
                    self.finish_take(now);
                }
            }
            TimerEvent::Lookahead => {
                let Some(graph) = self.resources.graph() else {
                    return;
                };
                let content = CycleContent {
                    layers: self.store.layers(),
                    clicks: self.loop_clicks.as_ref(),
                };
                self.scheduler
                    .on_timer(id, graph, content, &mut self.timers, now);
            }
        }
    }

    fn on_decoded(&mut self, done: DecodedTake, now: Instant) {
        let raw = match self.capture.accept(done) {
            None => return,
            Some(Ok(raw)) => raw,
            Some(Err(e)) => {
                log::warn!("{}", e);
                self.revert(now);
                return;
            }
        };
        if !matches!(self.take, Some(TakePhase::Decoding(_))) {
            return;
        }
        self.take = None;

        let take = quantize(
            &raw,
            &self.metronome,
            self.store.loop_length(),
            self.take_offset,
        );
        let beats = take.length.beats;
        let seconds = take.length.seconds();
        let id = self.store.commit(take.buffer, take.length);
        log::info!(
            "layer {} committed: {} beat(s), {:.3} s (raw {} beats)",
            id,
            beats,
            seconds,
            take.raw_beats
        );
        self.notify(LooperNotification::LayerCommitted {
            id,
            beats,
            loop_seconds: seconds,
        });

        if self.scheduler.is_running() {
            self.reschedule(now);
        } else {
            self.start_playback(now);
        }
        self.set_state(LooperState::Playing);
    }

    /// EMPTY + tap: open devices, then count in or record.
    fn begin_take(&mut self, now: Instant) {
        if self.acquire().is_err() {
            return;
        }
        match self.metronome.count_in_beats() {
            0 => self.start_capture(now, LooperState::Recording),
            beats => {
                self.countdown = Some(Countdown {
                    count_in: CountIn::new(beats),
                    timer: 0,
                    due: now,
                    shown: beats,
                });
                self.set_state(LooperState::Countdown);
                self.count_in_pulse(now);
            }
        }
    }

    fn count_in_pulse(&mut self, now: Instant) {
        let Some(countdown) = self.countdown.as_mut() else {
            return;
        };
        let due = countdown.due;
        let step = countdown.count_in.pulse();
        countdown.shown = step.remaining;

        self.pulse(step.pulse, Some(step.remaining), now);
        if step.start_recording {
            self.countdown = None;
            self.start_capture(now, LooperState::Recording);
        } else {
            let next = due + self.metronome.beat_duration();
            let timer = self.timers.arm(next, TimerEvent::CountInPulse);
            if let Some(countdown) = self.countdown.as_mut() {
                countdown.timer = timer;
                countdown.due = next;
            }
        }
    }

    fn arm_overdub(&mut self, now: Instant) {
        self.set_state(LooperState::Overdubbing);
        let delay = self.overdub_delay();
        if delay.is_zero() {
            self.start_capture(now, LooperState::Overdubbing);
        } else {
            let timer = self.timers.arm_after(now, delay, TimerEvent::OverdubStart);
            self.take = Some(TakePhase::Armed(timer));
        }
    }

    fn start_capture(&mut self, now: Instant, state: LooperState) {
        let Some(start_frame) = self.resources.graph().map(|g| g.clock().now()) else {
            self.device_lost();
            return;
        };
        match self
            .capture
            .start(self.resources.input_mut(), now, start_frame)
        {
            Ok(_) => {
                self.take_offset = self
                    .scheduler
                    .position(start_frame)
                    .map_or(0, |position| position as usize);
                self.take = Some(TakePhase::Capturing);
                self.set_state(state);
            }
            Err(LooperError::DeviceUnavailable(e)) => {
                log::error!("input lost: {}", e);
                self.device_lost();
            }
            Err(e) => {
                log::error!("could not start take: {}", e);
                self.take = None;
                self.revert(now);
            }
        }
    }

    fn finish_take(&mut self, now: Instant) {
        if let Some(input) = self.resources.input_mut()
            && let Err(e) = self.capture.feed(input)
        {
            log::warn!("input encode failed: {}", e);
        }
        let Some(rate) = self.resources.graph().map(|g| g.sample_rate()) else {
            self.device_lost();
            return;
        };
        match self.capture.stop(rate) {
            Ok(take) => self.take = Some(TakePhase::Decoding(take)),
            Err(e) => {
                log::warn!("{}", e);
                self.revert(now);
            }
        }
    }

    /// Back to where the take started: playing if layers exist, else empty.
    fn revert(&mut self, now: Instant) {
        self.take = None;
        if self.store.is_empty() {
            self.stop_playback();
            self.set_state(LooperState::Empty);
        } else {
            if !self.scheduler.is_running() {
                self.start_playback(now);
            }
            self.set_state(LooperState::Playing);
        }
    }

    /// A device stream reported an error: drop the devices and surface it.
    /// The next tap reacquires.
    pub fn stream_failed(&mut self, message: &str) {
        log::error!("{}", message);
        if self.resources.is_acquired() {
            self.device_lost();
        }
        let error = LooperError::DeviceUnavailable(message.to_string()).to_string();
        self.error = Some(error.clone());
        self.notify(LooperNotification::Error(error));
    }

    fn device_lost(&mut self) {
        self.abandon_take();
        self.stop_playback();
        self.resources.release();
        self.error = Some(LooperError::DeviceUnavailable("device lost".to_string()).to_string());
        self.set_state(LooperState::Empty);
    }

    /// Cancel any count-in, armed boundary or running take.
    fn abandon_take(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            self.timers.cancel(countdown.timer);
        }
        match self.take.take() {
            Some(TakePhase::Armed(timer) | TakePhase::Stopping(timer)) => {
                self.timers.cancel(timer);
            }
            Some(_) | None => {}
        }
        self.capture.cancel();
    }

    /// Delay until the overdub start or stop may fire.
    fn overdub_delay(&self) -> Duration {
        let (Some(graph), Some(length)) = (self.resources.graph(), self.store.loop_length())
        else {
            return Duration::ZERO;
        };
        let Some(position) = self.scheduler.position(graph.clock().now()) else {
            return Duration::ZERO;
        };
        let rate = length.sample_rate as f64;
        let delay = boundary_delay(position as f64 / rate, length.beat_frames() / rate);
        Duration::from_secs_f64(delay)
    }

    fn start_playback(&mut self, now: Instant) {
        let Some(length) = self.store.loop_length() else {
            return;
        };
        self.refresh_loop_clicks();
        self.last_loop_beat = None;
        let Some(graph) = self.resources.graph() else {
            return;
        };
        let content = CycleContent {
            layers: self.store.layers(),
            clicks: self.loop_clicks.as_ref(),
        };
        let at = graph.clock().now();
        self.scheduler
            .start(graph, at, length, content, &mut self.timers, now);
    }

    fn reschedule(&mut self, now: Instant) {
        let Some(length) = self.store.loop_length() else {
            return;
        };
        if !self.scheduler.is_running() || self.scheduler.loop_frames() != length.frames as u64 {
            self.stop_playback();
            self.start_playback(now);
            return;
        }
        let Some(graph) = self.resources.graph() else {
            return;
        };
        let content = CycleContent {
            layers: self.store.layers(),
            clicks: self.loop_clicks.as_ref(),
        };
        self.scheduler
            .reschedule(graph, content, &mut self.timers, now);
    }

    fn stop_playback(&mut self) {
        match self.resources.graph() {
            Some(graph) => self.scheduler.stop(graph, &mut self.timers),
            None => self.scheduler.reset(&mut self.timers),
        }
        self.last_loop_beat = None;
    }

    fn refresh_loop_clicks(&mut self) {
        self.loop_clicks = match self.store.loop_length() {
            Some(length) => self.metronome.loop_clicks(length),
            None => None,
        };
    }

    /// Flash (and notify) once per loop beat while pulses follow the loop.
    fn follow_loop_beats(&mut self, now: Instant) {
        if !matches!(self.state, LooperState::Playing | LooperState::Overdubbing)
            || !self.metronome.pulses_while_looping()
        {
            return;
        }
        let (Some(graph), Some(origin), Some(length)) = (
            self.resources.graph(),
            self.scheduler.origin(),
            self.store.loop_length(),
        ) else {
            return;
        };
        let frame = graph.clock().now();
        if frame < origin {
            return;
        }
        let beat = ((frame - origin) as f64 / length.beat_frames()) as u64;
        if self.last_loop_beat == Some(beat) {
            return;
        }
        self.last_loop_beat = Some(beat);
        self.flash_until = Some(now + FLASH_DURATION);
        let pulse = Pulse::new(beat % length.beats as u64);
        self.notify(LooperNotification::Pulse {
            downbeat: pulse.downbeat,
            countdown: None,
        });
    }

    /// Count-in pulse: flash, notify, and click when audible.
    fn pulse(&mut self, pulse: Pulse, countdown: Option<u8>, now: Instant) {
        self.flash_until = Some(now + FLASH_DURATION);
        self.notify(LooperNotification::Pulse {
            downbeat: pulse.downbeat,
            countdown,
        });

        let settings = self.metronome.settings;
        if !(settings.enabled && settings.audible) {
            return;
        }
        if let Some(graph) = self.resources.graph() {
            let sound = self.metronome.clicks(graph.sample_rate()).for_pulse(pulse);
            let at = graph.clock().now();
            graph.with(|g| {
                g.schedule(Voice::new(VoiceKind::Click, sound, at, settings.volume));
            });
        }
    }

    fn set_state(&mut self, state: LooperState) {
        if self.state == state {
            return;
        }
        log::debug!("{} -> {}", self.state, state);
        self.state = state;
        self.notify(LooperNotification::StateChanged(state));
    }

    fn notify(&self, notification: LooperNotification) {
        if let Some(sender) = &self.notifier {
            let _ = sender.try_send(notification);
        }
    }
}
