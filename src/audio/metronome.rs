use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::buffer::AudioBuffer;
use crate::error::{LooperError, Result};

pub const MIN_BPM: u32 = 40;
pub const MAX_BPM: u32 = 200;
pub const MAX_COUNT_IN_BEATS: u8 = 8;
pub const BEATS_PER_BAR: u64 = 4;

pub const FLASH_DURATION: Duration = Duration::from_millis(60);

/// Overdub start/stop fires immediately this close to a beat boundary.
pub const BEAT_SNAP_TOLERANCE: f64 = 0.050;

const DOWNBEAT_HZ: f32 = 1500.0;
const BEAT_HZ: f32 = 1000.0;
const CLICK_SECONDS: f32 = 0.040;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeSettings {
    /// Pulse while the loop plays (together with `while_looping`)
    pub enabled: bool,
    /// Synthesize a click for each pulse, otherwise flash only
    pub audible: bool,
    pub while_looping: bool,
    pub volume: f32,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            audible: true,
            while_looping: false,
            volume: 0.6,
        }
    }
}

/// Length of the session loop, fixed by the first committed layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopLength {
    pub beats: u32,
    pub bpm: u32,
    pub frames: usize,
    pub sample_rate: u32,
}

impl LoopLength {
    pub fn new(beats: u32, bpm: u32, sample_rate: u32) -> Self {
        let beats = beats.max(1);
        let frames = (beats as f64 * beat_seconds(bpm) * sample_rate as f64).round() as usize;
        Self {
            beats,
            bpm,
            frames,
            sample_rate,
        }
    }

    pub fn seconds(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }

    pub fn beat_frames(&self) -> f64 {
        beat_seconds(self.bpm) * self.sample_rate as f64
    }
}

pub fn beat_seconds(bpm: u32) -> f64 {
    60.0 / bpm as f64
}

/// Whole beats closest to `raw_seconds`, never less than one.
pub fn quantized_beats(raw_seconds: f64, beat: f64) -> u32 {
    ((raw_seconds / beat).round() as u32).max(1)
}

/// Seconds to wait from `position` until the action should fire.
///
/// Zero when `position` is within the snap tolerance of a boundary on either
/// side, otherwise the remainder of the current beat.
pub fn boundary_delay(position: f64, beat: f64) -> f64 {
    let phase = position.rem_euclid(beat);
    if phase <= BEAT_SNAP_TOLERANCE || beat - phase <= BEAT_SNAP_TOLERANCE {
        0.0
    } else {
        beat - phase
    }
}

/// One metronome pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse {
    pub index: u64,
    pub downbeat: bool,
}

impl Pulse {
    pub fn new(index: u64) -> Self {
        Self {
            index,
            downbeat: index % BEATS_PER_BAR == 0,
        }
    }
}

/// Progress through a count-in: N pulses one beat apart, recording starts on
/// the last one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountIn {
    beats: u8,
    emitted: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountInStep {
    pub pulse: Pulse,
    /// Number shown to the performer (N, N-1, ..., 1)
    pub remaining: u8,
    pub start_recording: bool,
}

impl CountIn {
    pub fn new(beats: u8) -> Self {
        Self {
            beats: beats.max(1),
            emitted: 0,
        }
    }

    pub fn remaining(&self) -> u8 {
        self.beats - self.emitted
    }

    pub fn pulse(&mut self) -> CountInStep {
        let remaining = self.remaining();
        let pulse = Pulse::new(self.emitted as u64);
        self.emitted = (self.emitted + 1).min(self.beats);
        CountInStep {
            pulse,
            remaining,
            start_recording: remaining <= 1,
        }
    }
}

/// Click sound pair, cached per sample rate.
#[derive(Debug, Clone)]
pub struct ClickSounds {
    pub sample_rate: u32,
    pub downbeat: Arc<AudioBuffer>,
    pub beat: Arc<AudioBuffer>,
}

impl ClickSounds {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            downbeat: Arc::new(synthesize_click(sample_rate, DOWNBEAT_HZ)),
            beat: Arc::new(synthesize_click(sample_rate, BEAT_HZ)),
        }
    }

    pub fn for_pulse(&self, pulse: Pulse) -> Arc<AudioBuffer> {
        if pulse.downbeat {
            Arc::clone(&self.downbeat)
        } else {
            Arc::clone(&self.beat)
        }
    }
}

/// Sine burst with an exponential decay over `CLICK_SECONDS`.
fn synthesize_click(sample_rate: u32, freq: f32) -> AudioBuffer {
    let frames = (sample_rate as f32 * CLICK_SECONDS).round() as usize;
    let samples = (0..frames)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let envelope = (-t * 5.0 / CLICK_SECONDS).exp();
            (t * freq * std::f32::consts::TAU).sin() * envelope
        })
        .collect();
    AudioBuffer::new(vec![samples], sample_rate)
}

/// Tempo, count-in and click settings of a session.
#[derive(Debug, Clone)]
pub struct Metronome {
    bpm: u32,
    count_in_beats: u8,
    pub settings: MetronomeSettings,
    clicks: Option<ClickSounds>,
}

impl Metronome {
    pub fn new(bpm: u32, count_in_beats: u8, settings: MetronomeSettings) -> Result<Self> {
        let mut metronome = Self {
            bpm: 120,
            count_in_beats: 0,
            settings,
            clicks: None,
        };
        metronome.set_bpm(bpm)?;
        metronome.set_count_in_beats(count_in_beats)?;
        Ok(metronome)
    }

    pub fn bpm(&self) -> u32 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: u32) -> Result<()> {
        LooperError::check_range("bpm", bpm as i64, MIN_BPM as i64, MAX_BPM as i64)?;
        self.bpm = bpm;
        Ok(())
    }

    pub fn count_in_beats(&self) -> u8 {
        self.count_in_beats
    }

    pub fn set_count_in_beats(&mut self, beats: u8) -> Result<()> {
        LooperError::check_range("count_in_beats", beats as i64, 0, MAX_COUNT_IN_BEATS as i64)?;
        self.count_in_beats = beats;
        Ok(())
    }

    pub fn beat_seconds(&self) -> f64 {
        beat_seconds(self.bpm)
    }

    pub fn beat_duration(&self) -> Duration {
        Duration::from_nanos((60e9 / self.bpm as f64).round() as u64)
    }

    /// Quantized loop length for a first take of `raw_seconds`.
    pub fn loop_length_for(&self, raw_seconds: f64, sample_rate: u32) -> LoopLength {
        LoopLength::new(
            quantized_beats(raw_seconds, self.beat_seconds()),
            self.bpm,
            sample_rate,
        )
    }

    /// Whether pulses follow the running loop.
    pub fn pulses_while_looping(&self) -> bool {
        self.settings.enabled && self.settings.while_looping
    }

    pub fn clicks(&mut self, sample_rate: u32) -> &ClickSounds {
        if self.clicks.as_ref().map(|c| c.sample_rate) != Some(sample_rate) {
            self.clicks = Some(ClickSounds::new(sample_rate));
        }
        self.clicks.get_or_insert_with(|| ClickSounds::new(sample_rate))
    }

    /// Click voices to lay under each loop cycle, if any.
    pub fn loop_clicks(&mut self, length: LoopLength) -> Option<LoopClicks> {
        if !(self.pulses_while_looping() && self.settings.audible) {
            return None;
        }
        let gain = self.settings.volume;
        let sounds = self.clicks(length.sample_rate).clone();
        Some(LoopClicks {
            sounds,
            gain,
            beats: length.beats,
            beat_frames: length.beat_frames(),
        })
    }
}

/// Clicks scheduled on the audio clock alongside a loop cycle.
#[derive(Debug, Clone)]
pub struct LoopClicks {
    pub sounds: ClickSounds,
    pub gain: f32,
    pub beats: u32,
    pub beat_frames: f64,
}

impl LoopClicks {
    /// (frame offset within the cycle, click) for every beat of the loop
    pub fn offsets(&self) -> impl Iterator<Item = (u64, Arc<AudioBuffer>)> + '_ {
        (0..self.beats as u64).map(|beat| {
            let offset = (beat as f64 * self.beat_frames).round() as u64;
            (offset, self.sounds.for_pulse(Pulse::new(beat)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_to_nearest_beat() {
        assert_eq!(quantized_beats(3.8, 0.5), 8);
        assert_eq!(quantized_beats(1.74, 0.5), 3);
        assert_eq!(quantized_beats(0.1, 0.5), 1);
        assert_eq!(quantized_beats(0.0, 0.5), 1);

        let length = LoopLength::new(8, 120, 8000);
        assert_eq!(length.seconds(), 4.0);
        assert_eq!(length.frames, 32000);
    }

    #[test]
    fn test_boundary_delay() {
        let beat = 0.5;
        assert_eq!(boundary_delay(1.0, beat), 0.0);
        assert_eq!(boundary_delay(1.04, beat), 0.0);
        assert_eq!(boundary_delay(1.46, beat), 0.0);
        assert!((boundary_delay(1.1, beat) - 0.4).abs() < 1e-9);
        assert!((boundary_delay(1.3, beat) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_count_in_sequence() {
        let mut count_in = CountIn::new(4);
        let steps: Vec<_> = (0..4).map(|_| count_in.pulse()).collect();

        assert_eq!(
            steps.iter().map(|s| s.remaining).collect::<Vec<_>>(),
            vec![4, 3, 2, 1]
        );
        assert!(steps[0].pulse.downbeat);
        assert!(!steps[1].pulse.downbeat);
        assert!(steps[..3].iter().all(|s| !s.start_recording));
        assert!(steps[3].start_recording);
    }

    #[test]
    fn test_setting_ranges() {
        let mut metronome = Metronome::new(120, 4, MetronomeSettings::default()).unwrap();
        assert!(metronome.set_bpm(39).is_err());
        assert!(metronome.set_bpm(201).is_err());
        assert!(metronome.set_bpm(200).is_ok());
        assert!(metronome.set_count_in_beats(9).is_err());
        assert!(metronome.set_count_in_beats(0).is_ok());
        assert_eq!(metronome.beat_duration(), Duration::from_millis(300));
    }

    #[test]
    fn test_click_pitches_differ() {
        let sounds = ClickSounds::new(48000);
        assert_eq!(sounds.downbeat.frames(), 1920);
        assert_ne!(sounds.downbeat.channel(0), sounds.beat.channel(0));
        // decays to near silence by the end of the burst
        assert!(sounds.beat.channel(0).last().unwrap().abs() < 0.01);
    }

    #[test]
    fn test_loop_clicks_follow_settings() {
        let mut metronome = Metronome::new(120, 0, MetronomeSettings::default()).unwrap();
        let length = LoopLength::new(4, 120, 8000);
        assert!(metronome.loop_clicks(length).is_none());

        metronome.settings.while_looping = true;
        let clicks = metronome.loop_clicks(length).unwrap();
        let offsets: Vec<u64> = clicks.offsets().map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![0, 4000, 8000, 12000]);
    }
}
