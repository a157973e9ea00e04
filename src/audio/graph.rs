use std::sync::{Arc, Mutex};

use super::buffer::AudioBuffer;
use super::clock::SampleClock;
use super::layer::LayerId;
use super::simd_mixer::SimdMixer;

const DEFAULT_BLOCK_FRAMES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceKind {
    Layer(LayerId),
    Click,
}

/// A buffer scheduled to play from an exact audio clock frame.
#[derive(Debug, Clone)]
pub struct Voice {
    pub kind: VoiceKind,
    pub buffer: Arc<AudioBuffer>,
    /// Clock frame at which `offset` is heard
    pub start: u64,
    /// First buffer frame to play
    pub offset: usize,
    pub gain: f32,
    /// Frames of linear fade-in after `start`
    pub fade_in: usize,
    /// Linear fade-out `(from frame, length)` after which the voice ends
    pub fade_out: Option<(u64, usize)>,
}

impl Voice {
    pub fn new(kind: VoiceKind, buffer: Arc<AudioBuffer>, start: u64, gain: f32) -> Self {
        Self {
            kind,
            buffer,
            start,
            offset: 0,
            gain,
            fade_in: 0,
            fade_out: None,
        }
    }

    /// Clock frame after the last audible frame.
    pub fn end(&self) -> u64 {
        let natural = self.start + self.buffer.frames().saturating_sub(self.offset) as u64;
        match self.fade_out {
            Some((from, len)) => natural.min(from + len as u64),
            None => natural,
        }
    }

    fn envelope(&self, frame: u64) -> f32 {
        let mut env = 1.0;
        if self.fade_in > 0 {
            let since = frame.saturating_sub(self.start) as f32;
            env *= (since / self.fade_in as f32).min(1.0);
        }
        if let Some((from, len)) = self.fade_out
            && frame >= from
        {
            env *= 1.0 - ((frame - from) as f32 / len.max(1) as f32).min(1.0);
        }
        env
    }

    fn has_envelope_in(&self, from: u64, to: u64) -> bool {
        let fading_in = self.fade_in > 0 && from < self.start + self.fade_in as u64;
        let fading_out = self.fade_out.is_some_and(|(f, _)| to > f);
        fading_in || fading_out
    }
}

/// The set of scheduled voices, rendered by the output callback.
pub struct RenderGraph {
    voices: Vec<Voice>,
    mixer: SimdMixer,
    /// Per-frame gains of the voice being rendered while it fades
    gains: Vec<f32>,
}

impl RenderGraph {
    pub fn new(channels: usize) -> Self {
        Self {
            voices: Vec::with_capacity(64),
            mixer: SimdMixer::new(channels, DEFAULT_BLOCK_FRAMES),
            gains: vec![0.0; DEFAULT_BLOCK_FRAMES],
        }
    }

    pub fn schedule(&mut self, voice: Voice) {
        self.voices.push(voice);
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    /// Mix every voice overlapping `[block_start, block_start + frames)` into
    /// the interleaved `out`. Buffer channel `c` lands on bus `c % channels`.
    pub fn render(&mut self, block_start: u64, out: &mut [f32], out_channels: usize) {
        let out_channels = out_channels.max(1);
        let frames = out.len() / out_channels;
        let block_end = block_start + frames as u64;
        self.mixer.begin(frames);
        if self.gains.len() < frames {
            // only when the device block grows
            self.gains.resize(frames, 0.0);
        }
        let bus_channels = self.mixer.channels();

        for voice in &self.voices {
            let from = voice.start.max(block_start);
            let to = voice.end().min(block_end);
            if from >= to {
                continue;
            }
            let at = (from - block_start) as usize;
            let len = (to - from) as usize;
            let src_start = voice.offset + (from - voice.start) as usize;

            let enveloped = voice.has_envelope_in(from, to);
            if enveloped {
                for (i, gain) in self.gains[..len].iter_mut().enumerate() {
                    *gain = voice.gain * voice.envelope(from + i as u64);
                }
            }

            for channel in 0..voice.buffer.channel_count().max(bus_channels) {
                let src = &voice.buffer.channel(channel)[src_start..src_start + len];
                let bus = channel % bus_channels;
                if enveloped {
                    self.mixer.add_enveloped(bus, at, src, &self.gains[..len]);
                } else {
                    self.mixer.add(bus, at, src, voice.gain);
                }
            }
        }

        self.mixer.finish(out, out_channels);
    }

    /// Fade every voice sounding at `at` out over `len` frames and drop
    /// voices that would start later.
    pub fn fade_out_from(&mut self, at: u64, len: usize) {
        self.voices.retain(|voice| voice.start < at && voice.end() > at);
        for voice in &mut self.voices {
            let from = voice.fade_out.map_or(at, |(from, _)| from.min(at));
            voice.fade_out = Some((from, len));
        }
    }

    /// Drop voices that finished before `now`.
    pub fn collect_finished(&mut self, now: u64) -> usize {
        let before = self.voices.len();
        self.voices.retain(|voice| voice.end() > now);
        before - self.voices.len()
    }

    pub fn clear(&mut self) {
        self.voices.clear();
    }
}

/// Handle to the render graph and the audio clock it drives.
#[derive(Clone)]
pub struct AudioGraph {
    graph: Arc<Mutex<RenderGraph>>,
    clock: SampleClock,
    channels: usize,
}

impl AudioGraph {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        Self {
            graph: Arc::new(Mutex::new(RenderGraph::new(channels))),
            clock: SampleClock::new(sample_rate),
            channels: channels.max(1),
        }
    }

    pub fn clock(&self) -> &SampleClock {
        &self.clock
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate()
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Run `f` against the graph from the control thread.
    pub fn with<R>(&self, f: impl FnOnce(&mut RenderGraph) -> R) -> R {
        match self.graph.lock() {
            Ok(mut graph) => f(&mut graph),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Output callback body: render one block and advance the clock.
    ///
    /// Never blocks; a contended graph renders silence for the block, and the
    /// clock advances either way.
    pub fn render_block(&self, out: &mut [f32]) {
        let frames = (out.len() / self.channels) as u64;
        match self.graph.try_lock() {
            Ok(mut graph) => {
                // advanced under the lock so control-side edits see a stable clock
                graph.render(self.clock.now(), out, self.channels);
                self.clock.advance(frames);
            }
            Err(_) => {
                out.fill(0.0);
                self.clock.advance(frames);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ones(frames: usize) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(vec![vec![1.0; frames]], 1000))
    }

    fn ramp(frames: usize) -> Arc<AudioBuffer> {
        let samples = (0..frames).map(|i| i as f32 / 10.0).collect();
        Arc::new(AudioBuffer::new(vec![samples], 1000))
    }

    fn render(graph: &mut RenderGraph, start: u64, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        graph.render(start, &mut out, 1);
        out
    }

    #[test]
    fn test_voice_starts_on_exact_frame() {
        let mut graph = RenderGraph::new(1);
        graph.schedule(Voice::new(VoiceKind::Click, ones(4), 10, 0.5));

        let out = render(&mut graph, 8, 8);
        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_voice_spanning_blocks() {
        let mut graph = RenderGraph::new(1);
        let buffer = ramp(8);
        graph.schedule(Voice::new(VoiceKind::Layer(1), buffer, 2, 1.0));

        let first = render(&mut graph, 0, 4);
        let second = render(&mut graph, 4, 4);
        assert_eq!(first, vec![0.0, 0.0, 0.0, 0.1]);
        assert_eq!(second, vec![0.2, 0.3, 0.4, 0.5]);
    }

    #[test]
    fn test_late_voice_plays_from_its_position() {
        let mut graph = RenderGraph::new(1);
        let buffer = ramp(8);
        graph.schedule(Voice::new(VoiceKind::Layer(1), buffer, 0, 1.0));

        // the block after the start frame hears the buffer where it should be
        assert_eq!(render(&mut graph, 4, 2), vec![0.4, 0.5]);
    }

    #[test]
    fn test_fade_out_and_drop_pending() {
        let mut graph = RenderGraph::new(1);
        graph.schedule(Voice::new(VoiceKind::Layer(1), ones(100), 0, 1.0));
        graph.schedule(Voice::new(VoiceKind::Layer(1), ones(100), 100, 1.0));

        graph.fade_out_from(10, 4);
        assert_eq!(graph.voices().len(), 1);

        let out = render(&mut graph, 8, 8);
        assert_eq!(out, vec![1.0, 1.0, 1.0, 0.75, 0.5, 0.25, 0.0, 0.0]);
        assert_eq!(graph.collect_finished(20), 1);
    }

    #[test]
    fn test_fade_in_holds_at_voice_gain() {
        let mut graph = RenderGraph::new(1);
        let mut voice = Voice::new(VoiceKind::Layer(1), ones(12), 0, 0.5);
        voice.fade_in = 4;
        graph.schedule(voice);

        let out = render(&mut graph, 0, 12);
        assert_eq!(out, vec![0.0, 0.125, 0.25, 0.375, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_fade_in_then_fade_out_in_one_block() {
        let mut graph = RenderGraph::new(1);
        let mut voice = Voice::new(VoiceKind::Layer(1), ones(100), 0, 0.5);
        voice.fade_in = 2;
        voice.fade_out = Some((6, 4));
        graph.schedule(voice);

        let out = render(&mut graph, 0, 12);
        assert_eq!(out, vec![0.0, 0.25, 0.5, 0.5, 0.5, 0.5, 0.5, 0.375, 0.25, 0.125, 0.0, 0.0]);
    }

    #[test]
    fn test_stereo_voice_folds_onto_mono_output() {
        let mut graph = RenderGraph::new(1);
        let buffer = Arc::new(AudioBuffer::new(vec![vec![0.0; 4], vec![0.5; 4]], 1000));
        graph.schedule(Voice::new(VoiceKind::Layer(1), buffer, 0, 1.0));

        assert_eq!(render(&mut graph, 0, 4), vec![0.5; 4]);
    }

    #[test]
    fn test_mono_voice_feeds_every_output_channel() {
        let mut graph = RenderGraph::new(2);
        graph.schedule(Voice::new(VoiceKind::Click, ones(2), 0, 0.5));

        let mut out = vec![0.0; 4];
        graph.render(0, &mut out, 2);
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn test_render_block_advances_clock() {
        let graph = AudioGraph::new(1000, 2);
        graph.with(|g| g.schedule(Voice::new(VoiceKind::Click, ones(2), 1, 1.0)));

        let mut out = vec![0.0; 8];
        graph.render_block(&mut out);
        assert_eq!(graph.clock().now(), 4);
        assert_eq!(out, vec![0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
    }
}
