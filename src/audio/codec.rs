// src/audio/codec.rs
// In-memory encoding of a take while it records, and decoding back to PCM.

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use super::buffer::AudioBuffer;
use crate::error::{LooperError, Result};

/// Growable in-memory sink the WAV writer can seek in, readable after the
/// writer is finalized.
#[derive(Debug, Clone, Default)]
struct SharedCursor(Arc<Mutex<Cursor<Vec<u8>>>>);

impl SharedCursor {
    fn take(&self) -> Vec<u8> {
        self.0
            .lock()
            .map(|mut cursor| std::mem::take(cursor.get_mut()))
            .unwrap_or_default()
    }
}

impl Write for SharedCursor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("take buffer poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for SharedCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("take buffer poisoned"))?
            .seek(pos)
    }
}

/// A finished take in its encoded (16-bit PCM WAV) form.
#[derive(Debug, Clone)]
pub struct EncodedTake {
    pub bytes: Vec<u8>,
    pub frames: usize,
}

/// Encodes interleaved input into a 16-bit WAV stream chunk by chunk.
pub struct TakeEncoder {
    writer: WavWriter<SharedCursor>,
    sink: SharedCursor,
    channels: usize,
    frames: usize,
}

impl TakeEncoder {
    pub fn new(channels: u16, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: channels.max(1),
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let sink = SharedCursor::default();
        let writer = WavWriter::new(sink.clone(), spec).map_err(encode_error)?;
        Ok(Self {
            writer,
            sink,
            channels: channels.max(1) as usize,
            frames: 0,
        })
    }

    pub fn push(&mut self, interleaved: &[f32]) -> Result<()> {
        for &sample in interleaved {
            let quantized = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            self.writer.write_sample(quantized).map_err(encode_error)?;
        }
        self.frames += interleaved.len() / self.channels;
        Ok(())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn finish(self) -> Result<EncodedTake> {
        let frames = self.frames;
        self.writer.finalize().map_err(encode_error)?;
        Ok(EncodedTake {
            bytes: self.sink.take(),
            frames,
        })
    }
}

fn encode_error(e: hound::Error) -> LooperError {
    LooperError::DecodeError(format!("encoding take: {}", e))
}

fn decode_error(e: hound::Error) -> LooperError {
    LooperError::DecodeError(e.to_string())
}

/// Parse an encoded take back into planar PCM at `target_rate`.
pub fn decode_take(bytes: &[u8], target_rate: u32) -> Result<AudioBuffer> {
    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(decode_error)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(decode_error)?,
        SampleFormat::Int => {
            let max_value = 2_i32.pow((spec.bits_per_sample - 1) as u32) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(decode_error)?
        }
    };

    let decoded = AudioBuffer::from_interleaved(&samples, spec.channels as usize, spec.sample_rate);
    if decoded.is_empty() {
        return Err(LooperError::DecodeError("take is empty".to_string()));
    }

    if spec.sample_rate == target_rate {
        return Ok(decoded);
    }
    let channels = resample(decoded.into_channels(), spec.sample_rate, target_rate)?;
    Ok(AudioBuffer::new(channels, target_rate))
}

/// Resample the whole take in one chunk. The filter delay is trimmed from the
/// front and the tail is flushed out with a partial pass, so frame `n` of the
/// input lands on frame `n * ratio` of the output.
fn resample(channels: Vec<Vec<f32>>, input_rate: u32, output_rate: u32) -> Result<Vec<Vec<f32>>> {
    let frames = channels.first().map_or(0, Vec::len);
    let ratio = output_rate as f64 / input_rate as f64;
    let expected = (frames as f64 * ratio).round() as usize;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, frames, channels.len())
        .map_err(|e| LooperError::DecodeError(format!("resampler: {}", e)))?;
    let delay = resampler.output_delay();

    let mut output = resampler
        .process(&channels, None)
        .map_err(|e| LooperError::DecodeError(format!("resampling: {}", e)))?;
    let tail = resampler
        .process_partial::<Vec<f32>>(None, None)
        .map_err(|e| LooperError::DecodeError(format!("flushing resampler: {}", e)))?;

    for (channel, rest) in output.iter_mut().zip(tail) {
        channel.extend(rest);
        channel.drain(..delay.min(channel.len()));
        channel.resize(expected, 0.0);
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize, channels: usize) -> Vec<f32> {
        (0..frames * channels)
            .map(|i| (i % 100) as f32 / 100.0 - 0.5)
            .collect()
    }

    #[test]
    fn test_encoded_take_decodes_to_input() {
        let input = ramp(400, 2);
        let mut encoder = TakeEncoder::new(2, 8000).unwrap();
        encoder.push(&input[..300]).unwrap();
        encoder.push(&input[300..]).unwrap();
        assert_eq!(encoder.frames(), 400);

        let take = encoder.finish().unwrap();
        let decoded = decode_take(&take.bytes, 8000).unwrap();

        assert_eq!(decoded.channel_count(), 2);
        assert_eq!(decoded.frames(), 400);
        let expected = AudioBuffer::from_interleaved(&input, 2, 8000);
        for (a, b) in decoded.channel(1).iter().zip(expected.channel(1)) {
            assert!((a - b).abs() < 0.001);
        }
    }

    #[test]
    fn test_empty_take_is_a_decode_error() {
        let take = TakeEncoder::new(1, 8000).unwrap().finish().unwrap();
        assert!(matches!(
            decode_take(&take.bytes, 8000),
            Err(LooperError::DecodeError(_))
        ));
    }

    #[test]
    fn test_corrupt_bytes_are_a_decode_error() {
        assert!(matches!(
            decode_take(b"definitely not a wav stream", 8000),
            Err(LooperError::DecodeError(_))
        ));
    }

    #[test]
    fn test_resamples_to_session_rate() {
        let mut encoder = TakeEncoder::new(1, 16000).unwrap();
        encoder.push(&vec![0.25; 16000]).unwrap();
        let take = encoder.finish().unwrap();

        let decoded = decode_take(&take.bytes, 8000).unwrap();
        assert_eq!(decoded.sample_rate(), 8000);
        assert_eq!(decoded.frames(), 8000);
        // the tail survives the filter delay
        let last = decoded.channel(0)[7900];
        assert!((last - 0.25).abs() < 0.02, "tail sample {}", last);
    }

    #[test]
    fn test_resampling_keeps_events_in_place() {
        let mut input = vec![0.0; 16000];
        input[8000] = 0.8;
        let mut encoder = TakeEncoder::new(1, 16000).unwrap();
        encoder.push(&input).unwrap();
        let take = encoder.finish().unwrap();

        let decoded = decode_take(&take.bytes, 8000).unwrap();
        let peak = decoded
            .channel(0)
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, _)| i)
            .unwrap();
        assert!(peak.abs_diff(4000) <= 1, "impulse moved to frame {}", peak);
    }
}
