// src/audio/scheduler.rs
// Look-ahead loop scheduling: voices start on exact audio clock frames,
// the wall clock only decides when to issue the next scheduling call.

use std::time::{Duration, Instant};

use super::TimerEvent;
use super::clock::{TimerId, TimerQueue};
use super::graph::{AudioGraph, RenderGraph, Voice, VoiceKind};
use super::layer::Layer;
use super::metronome::{LoopClicks, LoopLength};

/// How far before a cycle start its voices are handed to the graph.
pub const LOOKAHEAD: Duration = Duration::from_millis(50);
pub const MIN_LOOKAHEAD_DELAY: Duration = Duration::from_millis(100);
pub const STOP_FADE: Duration = Duration::from_millis(20);
/// Crossfade used when the layer set changes mid-cycle.
pub const RESCHEDULE_FADE: Duration = Duration::from_millis(10);

/// What one loop cycle plays.
#[derive(Clone, Copy)]
pub struct CycleContent<'a> {
    pub layers: &'a [Layer],
    pub clicks: Option<&'a LoopClicks>,
}

/// Repeats the layer set every `loop_frames` frames from `origin`.
///
/// Cycle `k` always starts at `origin + k * loop_frames`, however late the
/// wall-clock timer fires.
#[derive(Debug, Default)]
pub struct PlaybackScheduler {
    origin: Option<u64>,
    loop_frames: u64,
    next_index: u64,
    timer: Option<TimerId>,
}

impl PlaybackScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.origin.is_some()
    }

    pub fn origin(&self) -> Option<u64> {
        self.origin
    }

    pub fn loop_frames(&self) -> u64 {
        self.loop_frames
    }

    /// Start frame of the next cycle not yet handed to the graph.
    pub fn next_cycle(&self) -> Option<u64> {
        self.origin
            .map(|origin| origin + self.next_index * self.loop_frames)
    }

    /// Frames into the current cycle at audio clock frame `frame`.
    pub fn position(&self, frame: u64) -> Option<u64> {
        self.origin
            .map(|origin| frame.saturating_sub(origin) % self.loop_frames.max(1))
    }

    /// Begin looping with cycle 0 at audio clock frame `at`.
    pub fn start(
        &mut self,
        graph: &AudioGraph,
        at: u64,
        length: LoopLength,
        content: CycleContent<'_>,
        timers: &mut TimerQueue<TimerEvent>,
        now: Instant,
    ) {
        self.cancel_timer(timers);
        self.origin = Some(at);
        self.loop_frames = length.frames.max(1) as u64;
        self.next_index = 0;
        log::debug!("loop started at frame {} ({} frames)", at, self.loop_frames);
        self.fill(graph, content, timers, now);
    }

    /// Lookahead timer fired. Stale ids are ignored.
    pub fn on_timer(
        &mut self,
        id: TimerId,
        graph: &AudioGraph,
        content: CycleContent<'_>,
        timers: &mut TimerQueue<TimerEvent>,
        now: Instant,
    ) {
        if self.timer != Some(id) {
            return;
        }
        self.timer = None;
        self.fill(graph, content, timers, now);
    }

    /// Replace the playing layer set without moving the loop phase.
    ///
    /// Current voices fade out while the new set fades in at the same
    /// position, and the following cycles use the new set.
    pub fn reschedule(
        &mut self,
        graph: &AudioGraph,
        content: CycleContent<'_>,
        timers: &mut TimerQueue<TimerEvent>,
        now: Instant,
    ) {
        let Some(origin) = self.origin else {
            return;
        };
        let clock = graph.clock();
        let at = clock.now().max(origin);
        let elapsed = at - origin;
        let index = elapsed / self.loop_frames;
        let position = elapsed % self.loop_frames;
        let fade = clock.frames_for(RESCHEDULE_FADE.as_secs_f64()) as usize;

        graph.with(|g| {
            g.fade_out_from(at, fade);
            schedule_cycle(g, at - position, position, fade, content);
        });
        self.next_index = index + 1;
        self.cancel_timer(timers);
        self.fill(graph, content, timers, now);
    }

    /// Fade everything out and drop future cycles.
    pub fn stop(&mut self, graph: &AudioGraph, timers: &mut TimerQueue<TimerEvent>) {
        self.cancel_timer(timers);
        if self.origin.take().is_some() {
            let clock = graph.clock();
            let fade = clock.frames_for(STOP_FADE.as_secs_f64()) as usize;
            graph.with(|g| g.fade_out_from(clock.now(), fade));
            log::debug!("loop stopped");
        }
    }

    /// Forget the loop without touching the graph.
    pub fn reset(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        self.cancel_timer(timers);
        self.origin = None;
        self.next_index = 0;
    }

    fn cancel_timer(&mut self, timers: &mut TimerQueue<TimerEvent>) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
    }

    /// Hand every cycle starting within the horizon to the graph, then arm
    /// the timer for the next one.
    fn fill(
        &mut self,
        graph: &AudioGraph,
        content: CycleContent<'_>,
        timers: &mut TimerQueue<TimerEvent>,
        now: Instant,
    ) {
        let Some(origin) = self.origin else {
            return;
        };
        let clock = graph.clock();
        let frame = clock.now();
        let loop_frames = self.loop_frames;

        let elapsed_cycles = frame.saturating_sub(origin) / loop_frames;
        if elapsed_cycles > self.next_index {
            log::warn!(
                "scheduler fell behind, skipping {} cycle(s)",
                elapsed_cycles - self.next_index
            );
            self.next_index = elapsed_cycles;
        }

        let horizon = frame + clock.frames_for((LOOKAHEAD + MIN_LOOKAHEAD_DELAY).as_secs_f64());
        let mut index = self.next_index;
        graph.with(|g| {
            g.collect_finished(frame);
            while origin + index * loop_frames <= horizon {
                schedule_cycle(g, origin + index * loop_frames, 0, 0, content);
                index += 1;
            }
        });
        self.next_index = index;

        let next = origin + index * loop_frames;
        let delay = clock
            .until(next)
            .saturating_sub(LOOKAHEAD)
            .max(MIN_LOOKAHEAD_DELAY);
        self.timer = Some(timers.arm_after(now, delay, TimerEvent::Lookahead));
    }
}

/// Voices for one cycle starting at `cycle_start`, from `position` frames in.
fn schedule_cycle(
    graph: &mut RenderGraph,
    cycle_start: u64,
    position: u64,
    fade_in: usize,
    content: CycleContent<'_>,
) {
    for layer in content.layers.iter().filter(|l| l.is_audible()) {
        graph.schedule(Voice {
            kind: VoiceKind::Layer(layer.id),
            buffer: layer.buffer.clone(),
            start: cycle_start + position,
            offset: position as usize,
            gain: layer.volume,
            fade_in: if position > 0 { fade_in } else { 0 },
            fade_out: None,
        });
    }
    if let Some(clicks) = content.clicks {
        for (offset, sound) in clicks.offsets().filter(|(o, _)| *o >= position) {
            graph.schedule(Voice::new(
                VoiceKind::Click,
                sound,
                cycle_start + offset,
                clicks.gain,
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::AudioBuffer;

    const RATE: u32 = 8000;

    fn layers(length: LoopLength) -> Vec<Layer> {
        vec![
            Layer::new(1, 0, AudioBuffer::new(vec![vec![0.1; length.frames]], RATE)),
            Layer::new(2, 1, AudioBuffer::new(vec![vec![0.2; length.frames]], RATE)),
        ]
    }

    fn starts(graph: &AudioGraph, id: u64) -> Vec<u64> {
        graph
            .with(|g| {
                g.voices()
                    .iter()
                    .filter(|v| v.kind == VoiceKind::Layer(id))
                    .map(|v| v.start)
                    .collect()
            })
    }

    /// Render the graph forward in 5 ms blocks, firing due timers.
    fn run(
        scheduler: &mut PlaybackScheduler,
        graph: &AudioGraph,
        content: CycleContent<'_>,
        timers: &mut TimerQueue<TimerEvent>,
        now: &mut Instant,
        millis: u64,
    ) {
        let mut out = vec![0.0; 40 * graph.channels()];
        for _ in 0..millis / 5 {
            graph.render_block(&mut out);
            *now += Duration::from_millis(5);
            while let Some((id, _)) = timers.pop_due(*now) {
                scheduler.on_timer(id, graph, content, timers, *now);
            }
        }
    }

    #[test]
    fn test_cycles_start_on_exact_frames() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(2, 120, RATE);
        let layers = layers(length);
        let content = CycleContent {
            layers: &layers,
            clicks: None,
        };
        let mut timers = TimerQueue::new();
        let mut now = Instant::now();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(&graph, 0, length, content, &mut timers, now);
        assert_eq!(starts(&graph, 1), vec![0]);

        let mut seen = Vec::new();
        for _ in 0..50 {
            run(&mut scheduler, &graph, content, &mut timers, &mut now, 1000);
            for start in starts(&graph, 1) {
                if !seen.contains(&start) {
                    seen.push(start);
                }
            }
        }
        // 50 s of 1 s cycles, never drifting off origin + k * L
        assert!(seen.len() >= 50);
        for (k, start) in seen.iter().enumerate() {
            assert_eq!(*start, k as u64 * length.frames as u64);
        }
    }

    #[test]
    fn test_lookahead_delay_never_below_minimum() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(1, 200, RATE);
        let layers = layers(length);
        let content = CycleContent {
            layers: &layers,
            clicks: None,
        };
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(&graph, 0, length, content, &mut timers, now);
        let deadline = timers.next_deadline().unwrap();
        assert!(deadline - now >= MIN_LOOKAHEAD_DELAY);
        // 300 ms loop: fires 50 ms before the next cycle
        assert_eq!(deadline - now, Duration::from_millis(250));
    }

    #[test]
    fn test_missed_cycles_are_skipped() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(2, 120, RATE);
        let layers = layers(length);
        let content = CycleContent {
            layers: &layers,
            clicks: None,
        };
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(&graph, 0, length, content, &mut timers, now);
        // control thread stalls for 3.5 cycles
        graph.clock().advance(28000);
        let late = now + Duration::from_millis(3500);
        let (id, _) = timers.pop_due(late).unwrap();
        scheduler.on_timer(id, &graph, content, &mut timers, late);

        assert!(starts(&graph, 1).contains(&24000));
        assert!(!starts(&graph, 1).contains(&8000));
        assert_eq!(scheduler.next_cycle(), Some(32000));
    }

    #[test]
    fn test_stop_fades_and_cancels() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(2, 120, RATE);
        let layers = layers(length);
        let content = CycleContent {
            layers: &layers,
            clicks: None,
        };
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(&graph, 0, length, content, &mut timers, now);
        graph.clock().advance(400);
        scheduler.stop(&graph, &mut timers);

        assert!(!scheduler.is_running());
        assert!(timers.is_empty());
        let fades: Vec<_> = graph
            .with(|g| g.voices().iter().map(|v| v.fade_out).collect());
        assert!(fades.iter().all(|f| *f == Some((400, 160))));
    }

    #[test]
    fn test_reschedule_keeps_phase() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(2, 120, RATE);
        let mut layers = layers(length);
        let mut timers = TimerQueue::new();
        let now = Instant::now();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(
            &graph,
            0,
            length,
            CycleContent {
                layers: &layers,
                clicks: None,
            },
            &mut timers,
            now,
        );
        graph.clock().advance(11000);
        layers.remove(0);
        scheduler.reschedule(
            &graph,
            CycleContent {
                layers: &layers,
                clicks: None,
            },
            &mut timers,
            now + Duration::from_millis(1375),
        );

        let voice = graph
            .with(|g| {
                g.voices()
                    .iter()
                    .find(|v| v.kind == VoiceKind::Layer(2) && v.fade_in > 0)
                    .cloned()
            })
            .unwrap();
        assert_eq!(voice.start, 11000);
        assert_eq!(voice.offset, 3000);
        assert_eq!(scheduler.next_cycle(), Some(16000));
        assert_eq!(scheduler.position(11000), Some(3000));
    }

    #[test]
    fn test_muted_layers_get_no_voice() {
        let graph = AudioGraph::new(RATE, 1);
        let length = LoopLength::new(2, 120, RATE);
        let mut layers = layers(length);
        layers[0].toggle_mute();
        let mut timers = TimerQueue::new();
        let mut scheduler = PlaybackScheduler::new();

        scheduler.start(
            &graph,
            0,
            length,
            CycleContent {
                layers: &layers,
                clicks: None,
            },
            &mut timers,
            Instant::now(),
        );
        assert!(starts(&graph, 1).is_empty());
        assert_eq!(starts(&graph, 2), vec![0]);
    }
}
