// src/audio/lockfree_buffer.rs
// Lock-free transport of input audio from the device callback to the
// control thread.

use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Create a single-producer single-consumer ring holding `capacity`
/// interleaved samples of `channels`-channel audio.
pub fn input_ring(capacity: usize, channels: u16) -> (InputWriter, InputReader) {
    let channels = channels.max(1) as usize;
    // whole frames only, so a reader never sees a split frame
    let capacity = (capacity.max(channels) / channels) * channels;
    let (producer, consumer) = RingBuffer::new(capacity);
    let overrun = Arc::new(AtomicBool::new(false));
    (
        InputWriter {
            producer,
            overrun: Arc::clone(&overrun),
        },
        InputReader {
            consumer,
            channels,
            overrun,
        },
    )
}

/// Audio-thread end of the ring.
pub struct InputWriter {
    producer: Producer<f32>,
    overrun: Arc<AtomicBool>,
}

impl InputWriter {
    /// Push a block of interleaved samples (real-time safe).
    ///
    /// The block is dropped as a whole when it does not fit, and the
    /// overrun flag is raised.
    pub fn write(&mut self, samples: &[f32]) -> bool {
        if self.producer.slots() < samples.len() {
            self.overrun.store(true, Ordering::Relaxed);
            return false;
        }
        for &sample in samples {
            // capacity checked above
            let _ = self.producer.push(sample);
        }
        true
    }
}

/// Control-thread end of the ring.
pub struct InputReader {
    consumer: Consumer<f32>,
    channels: usize,
    overrun: Arc<AtomicBool>,
}

impl InputReader {
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Whole frames currently buffered.
    pub fn available_frames(&self) -> usize {
        self.consumer.slots() / self.channels
    }

    /// Append every buffered whole frame to `out`, returning the frame count.
    pub fn drain_into(&mut self, out: &mut Vec<f32>) -> usize {
        let frames = self.available_frames();
        let samples = frames * self.channels;
        out.reserve(samples);
        for _ in 0..samples {
            match self.consumer.pop() {
                Ok(sample) => out.push(sample),
                Err(_) => break,
            }
        }
        frames
    }

    /// Throw away everything buffered so far.
    pub fn discard(&mut self) -> usize {
        let samples = self.available_frames() * self.channels;
        for _ in 0..samples {
            if self.consumer.pop().is_err() {
                break;
            }
        }
        samples / self.channels
    }

    /// True once after the writer had to drop a block.
    pub fn check_and_clear_overrun(&self) -> bool {
        self.overrun.swap(false, Ordering::Relaxed)
    }
}
