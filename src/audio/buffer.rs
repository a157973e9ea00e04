/// Decoded multi-channel PCM at a fixed sample rate.
///
/// Channels are stored planar and always have the same length.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty(), "buffer needs at least one channel");
        debug_assert!(
            channels.windows(2).all(|w| w[0].len() == w[1].len()),
            "channel lengths differ"
        );
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn silent(channel_count: usize, frames: usize, sample_rate: u32) -> Self {
        Self::new(vec![vec![0.0; frames]; channel_count.max(1)], sample_rate)
    }

    /// Split interleaved samples into channels. A trailing partial frame is dropped.
    pub fn from_interleaved(samples: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        let channel_count = channel_count.max(1);
        let frames = samples.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in samples.chunks_exact(channel_count) {
            for (channel, &sample) in channels.iter_mut().zip(frame) {
                channel.push(sample);
            }
        }
        Self::new(channels, sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels[0].len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Channel `index`, wrapping so mono material feeds every output channel.
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index % self.channels.len()]
    }

    pub fn into_channels(self) -> Vec<Vec<f32>> {
        self.channels
    }

    /// Copy into a buffer of exactly `frames` frames.
    ///
    /// Samples are copied one-for-one up to the shorter length; extra
    /// destination space stays silent and extra source is dropped. No
    /// time-stretching takes place.
    pub fn resized(&self, frames: usize) -> Self {
        let channels = self
            .channels
            .iter()
            .map(|source| {
                let mut dest = vec![0.0; frames];
                let copied = source.len().min(frames);
                dest[..copied].copy_from_slice(&source[..copied]);
                dest
            })
            .collect();
        Self::new(channels, self.sample_rate)
    }

    /// Rotate every channel right by `offset` frames, so the sample that was
    /// at index 0 ends up at `offset`.
    pub fn rotated_right(mut self, offset: usize) -> Self {
        let frames = self.frames();
        if frames > 0 && offset % frames != 0 {
            for channel in &mut self.channels {
                channel.rotate_right(offset % frames);
            }
        }
        self
    }
}
