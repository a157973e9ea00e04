use crossbeam::channel::{self, Receiver, Sender};
use std::thread;
use std::time::{Duration, Instant};

use super::buffer::AudioBuffer;
use super::codec::{EncodedTake, TakeEncoder, decode_take};
use super::metronome::{LoopLength, Metronome};
use super::peak_meter::InputMeter;
use super::resources::InputStream;
use crate::error::{LooperError, Result};

pub type TakeId = u64;

/// Result of decoding a take on the worker thread.
#[derive(Debug)]
pub struct DecodedTake {
    pub take: TakeId,
    pub result: Result<AudioBuffer>,
}

struct DecodeJob {
    take: TakeId,
    encoded: EncodedTake,
    target_rate: u32,
}

/// Background thread that turns encoded takes back into PCM.
struct DecoderWorker {
    jobs: Sender<DecodeJob>,
    done: Receiver<DecodedTake>,
}

impl DecoderWorker {
    fn spawn() -> Self {
        let (jobs, job_rx) = channel::unbounded::<DecodeJob>();
        let (done_tx, done) = channel::unbounded();

        let spawned = thread::Builder::new()
            .name("take-decoder".to_string())
            .spawn(move || {
                for job in job_rx {
                    let result = decode_take(&job.encoded.bytes, job.target_rate);
                    if done_tx
                        .send(DecodedTake {
                            take: job.take,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
        // without a worker every stop() reports a DecodeError
        if let Err(e) = spawned {
            log::error!("failed to start take decoder: {}", e);
        }

        Self { jobs, done }
    }
}

struct ActiveTake {
    id: TakeId,
    encoder: TakeEncoder,
    started_at: Instant,
    start_frame: u64,
}

/// Where a running take came from, for quantization and alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeStart {
    pub take: TakeId,
    /// Audio clock frame at which the first captured sample arrived
    pub start_frame: u64,
}

/// Converts live input into takes, one at a time.
pub struct CapturePipeline {
    active: Option<ActiveTake>,
    decoding: Option<TakeId>,
    next_take: TakeId,
    worker: DecoderWorker,
    meter: InputMeter,
    scratch: Vec<f32>,
}

impl CapturePipeline {
    pub fn new() -> Self {
        Self {
            active: None,
            decoding: None,
            next_take: 1,
            worker: DecoderWorker::spawn(),
            meter: InputMeter::new(),
            scratch: Vec::new(),
        }
    }

    /// Begin buffering input into a new take.
    ///
    /// Input already queued before this call is discarded, so the take
    /// starts at `start_frame`.
    pub fn start(
        &mut self,
        input: Option<&mut InputStream>,
        now: Instant,
        start_frame: u64,
    ) -> Result<TakeStart> {
        let input = input.ok_or_else(|| {
            LooperError::DeviceUnavailable("no input stream acquired".to_string())
        })?;
        if self.is_busy() {
            debug_assert!(false, "second concurrent take requested");
            return Err(LooperError::ScheduleConflict("capture already running"));
        }

        let encoder = TakeEncoder::new(input.channels(), input.sample_rate())?;
        input.reader.discard();
        self.meter.reset();

        let id = self.next_take;
        self.next_take += 1;
        self.active = Some(ActiveTake {
            id,
            encoder,
            started_at: now,
            start_frame,
        });
        log::debug!("take {} started at frame {}", id, start_frame);
        Ok(TakeStart {
            take: id,
            start_frame,
        })
    }

    /// Drain the input ring, encoding into the running take if there is one.
    pub fn feed(&mut self, input: &mut InputStream) -> Result<()> {
        if input.reader.check_and_clear_overrun() {
            log::warn!("input overrun, audio was dropped");
        }

        self.scratch.clear();
        input.reader.drain_into(&mut self.scratch);
        if self.scratch.is_empty() {
            return Ok(());
        }
        self.meter.update(&self.scratch);
        match self.active.as_mut() {
            Some(take) => take.encoder.push(&self.scratch),
            None => Ok(()),
        }
    }

    /// Finalize the running take and hand it to the decoder.
    ///
    /// Fails with `DecodeError` when nothing was captured.
    pub fn stop(&mut self, target_rate: u32) -> Result<TakeId> {
        let take = self
            .active
            .take()
            .ok_or_else(|| LooperError::DecodeError("no take is recording".to_string()))?;
        let encoded = take.encoder.finish()?;
        if encoded.frames == 0 {
            return Err(LooperError::DecodeError("take is empty".to_string()));
        }

        log::debug!("take {} finished with {} frames", take.id, encoded.frames);
        self.worker
            .jobs
            .send(DecodeJob {
                take: take.id,
                encoded,
                target_rate,
            })
            .map_err(|_| LooperError::DecodeError("decoder thread is gone".to_string()))?;
        self.decoding = Some(take.id);
        Ok(take.id)
    }

    /// Forget the running or decoding take; its completion will be ignored.
    pub fn cancel(&mut self) {
        if let Some(take) = self.active.take() {
            log::debug!("take {} cancelled", take.id);
        }
        self.decoding = None;
    }

    /// Match a completion against the take being decoded. Stale completions
    /// (cancelled or from before a reset) yield `None`.
    pub fn accept(&mut self, done: DecodedTake) -> Option<Result<AudioBuffer>> {
        if self.decoding != Some(done.take) {
            log::debug!("ignoring stale completion for take {}", done.take);
            return None;
        }
        self.decoding = None;
        Some(done.result)
    }

    pub fn completions(&self) -> Receiver<DecodedTake> {
        self.worker.done.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.decoding.is_some()
    }

    pub fn active_start(&self) -> Option<TakeStart> {
        self.active.as_ref().map(|take| TakeStart {
            take: take.id,
            start_frame: take.start_frame,
        })
    }

    pub fn elapsed(&self, now: Instant) -> Option<Duration> {
        self.active
            .as_ref()
            .map(|take| now.saturating_duration_since(take.started_at))
    }

    pub fn input_level(&self) -> f32 {
        self.meter.peak()
    }

    /// Smoothed RMS of the live input in dBFS.
    pub fn input_db(&self) -> f32 {
        InputMeter::to_db(self.meter.rms())
    }
}

impl Default for CapturePipeline {
    fn default() -> Self {
        Self::new()
    }
}

/// A decoded take fitted to the session loop.
#[derive(Debug, Clone)]
pub struct QuantizedTake {
    pub buffer: AudioBuffer,
    pub length: LoopLength,
    /// Whole beats nearest to the raw take, before fitting
    pub raw_beats: u32,
}

/// Fit a decoded take to whole beats.
///
/// The first take of a session picks the nearest whole-beat length. Later
/// takes are padded or trimmed to the already fixed `fixed` length. An
/// overdub begun `loop_offset` frames into the loop is rotated so that its
/// frame 0 lines up with the loop start.
pub fn quantize(
    raw: &AudioBuffer,
    metronome: &Metronome,
    fixed: Option<LoopLength>,
    loop_offset: usize,
) -> QuantizedTake {
    let raw_length = metronome.loop_length_for(raw.duration(), raw.sample_rate());
    let length = fixed.unwrap_or(raw_length);
    let buffer = raw.resized(length.frames).rotated_right(loop_offset);
    QuantizedTake {
        buffer,
        length,
        raw_beats: raw_length.beats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::lockfree_buffer::input_ring;
    use crate::audio::metronome::MetronomeSettings;

    fn metronome(bpm: u32) -> Metronome {
        Metronome::new(bpm, 0, MetronomeSettings::default()).unwrap()
    }

    #[test]
    fn test_first_take_rounds_to_nearest_beat() {
        // 3.8 s at 120 BPM is 7.6 beats, rounds to 8 beats = 4.0 s
        let raw = AudioBuffer::new(vec![vec![0.5; 30400]], 8000);
        let take = quantize(&raw, &metronome(120), None, 0);

        assert_eq!(take.length.beats, 8);
        assert_eq!(take.length.seconds(), 4.0);
        assert_eq!(take.buffer.frames(), 32000);
        assert!(take.buffer.channel(0)[30400..].iter().all(|&s| s == 0.0));
        assert_eq!(take.buffer.channel(0)[30399], 0.5);
    }

    #[test]
    fn test_short_take_is_at_least_one_beat() {
        let raw = AudioBuffer::new(vec![vec![0.5; 400]], 8000);
        let take = quantize(&raw, &metronome(120), None, 0);
        assert_eq!(take.length.beats, 1);
        assert_eq!(take.buffer.frames(), 4000);
    }

    #[test]
    fn test_later_takes_use_fixed_length() {
        let fixed = LoopLength::new(4, 120, 8000);
        // drifted take: 2.7 s would be 5 beats on its own
        let raw = AudioBuffer::new(vec![vec![0.5; 21600]], 8000);
        let take = quantize(&raw, &metronome(120), Some(fixed), 0);

        assert_eq!(take.raw_beats, 5);
        assert_eq!(take.length, fixed);
        assert_eq!(take.buffer.frames(), fixed.frames);
    }

    #[test]
    fn test_overdub_is_aligned_to_loop_start() {
        let fixed = LoopLength::new(2, 120, 8000);
        let mut samples = vec![0.0; 8000];
        samples[0] = 1.0;
        let raw = AudioBuffer::new(vec![samples], 8000);

        let take = quantize(&raw, &metronome(120), Some(fixed), 4000);
        assert_eq!(take.buffer.channel(0)[4000], 1.0);
        assert_eq!(take.buffer.channel(0)[0], 0.0);
    }

    fn input_stream() -> (crate::audio::lockfree_buffer::InputWriter, InputStream) {
        let (writer, reader) = input_ring(8000, 1);
        (writer, InputStream::new(reader, 1, 8000, Box::new(())))
    }

    #[test]
    fn test_start_requires_input() {
        let mut capture = CapturePipeline::new();
        assert!(matches!(
            capture.start(None, Instant::now(), 0),
            Err(LooperError::DeviceUnavailable(_))
        ));
    }

    #[test]
    fn test_capture_and_decode() {
        let (mut writer, mut input) = input_stream();
        let mut capture = CapturePipeline::new();

        writer.write(&[0.9; 100]); // pre-roll, discarded on start
        let start = capture.start(Some(&mut input), Instant::now(), 0).unwrap();
        writer.write(&[0.25; 800]);
        capture.feed(&mut input).unwrap();
        assert!(capture.input_level() > 0.2);

        let take = capture.stop(8000).unwrap();
        assert_eq!(take, start.take);
        assert!(capture.is_busy());

        let done = capture
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        let buffer = capture.accept(done).unwrap().unwrap();
        assert_eq!(buffer.frames(), 800);
        assert!(!capture.is_busy());
    }

    #[test]
    fn test_empty_take_fails_on_stop() {
        let (_writer, mut input) = input_stream();
        let mut capture = CapturePipeline::new();
        capture.start(Some(&mut input), Instant::now(), 0).unwrap();

        assert!(matches!(capture.stop(8000), Err(LooperError::DecodeError(_))));
        assert!(!capture.is_busy());
    }

    #[test]
    fn test_second_take_is_a_conflict() {
        let (_writer, mut input) = input_stream();
        let mut capture = CapturePipeline::new();
        capture.start(Some(&mut input), Instant::now(), 0).unwrap();

        let second = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            capture.start(Some(&mut input), Instant::now(), 0)
        }));
        // debug builds assert, release builds return the error
        match second {
            Ok(result) => assert!(matches!(result, Err(LooperError::ScheduleConflict(_)))),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn test_cancelled_take_completion_is_ignored() {
        let (mut writer, mut input) = input_stream();
        let mut capture = CapturePipeline::new();
        capture.start(Some(&mut input), Instant::now(), 0).unwrap();
        writer.write(&[0.25; 800]);
        capture.feed(&mut input).unwrap();
        capture.stop(8000).unwrap();
        capture.cancel();

        let done = capture
            .completions()
            .recv_timeout(Duration::from_secs(5))
            .unwrap();
        assert!(capture.accept(done).is_none());
    }
}
