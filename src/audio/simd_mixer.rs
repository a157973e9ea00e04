// src/audio/simd_mixer.rs
// SIMD mixing of voice segments into a planar block, then interleaving into
// the device buffer.

use wide::f32x4;

/// Planar mix bus reused across render blocks.
///
/// Real-time safe once the bus has grown to the device block size.
pub struct SimdMixer {
    planar: Vec<Vec<f32>>,
    frames: usize,
}

impl SimdMixer {
    pub fn new(channels: usize, max_frames: usize) -> Self {
        Self {
            planar: vec![vec![0.0; max_frames]; channels.max(1)],
            frames: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.planar.len()
    }

    /// Clear the bus for a block of `frames` frames.
    pub fn begin(&mut self, frames: usize) {
        for channel in &mut self.planar {
            if channel.len() < frames {
                // only when the device block grows
                channel.resize(frames, 0.0);
            }
            clear_simd(&mut channel[..frames]);
        }
        self.frames = frames;
    }

    /// dest[at..] += src * gain
    #[inline]
    pub fn add(&mut self, channel: usize, at: usize, src: &[f32], gain: f32) {
        let frames = self.frames;
        let dest = &mut self.planar[channel][at..frames];
        add_scaled_simd(dest, src, gain);
    }

    /// dest[at..] += src * gains
    #[inline]
    pub fn add_enveloped(&mut self, channel: usize, at: usize, src: &[f32], gains: &[f32]) {
        let frames = self.frames;
        let dest = &mut self.planar[channel][at..frames];
        add_multiplied_simd(dest, src, gains);
    }

    /// Limit to [-1, 1] and interleave into `out` (frames * channels samples).
    pub fn finish(&mut self, out: &mut [f32], out_channels: usize) {
        let frames = self.frames;
        for channel in &mut self.planar {
            hard_clip_simd(&mut channel[..frames]);
        }
        for (frame, slot) in out.chunks_exact_mut(out_channels).enumerate().take(frames) {
            for (c, sample) in slot.iter_mut().enumerate() {
                *sample = self.planar[c % self.planar.len()][frame];
            }
        }
    }
}

#[inline]
fn clear_simd(buffer: &mut [f32]) {
    let zero = f32x4::splat(0.0).to_array();
    let mut chunks = buffer.chunks_exact_mut(4);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&zero);
    }
    for item in chunks.into_remainder() {
        *item = 0.0;
    }
}

#[inline]
fn add_scaled_simd(dest: &mut [f32], src: &[f32], gain: f32) {
    let gain_vec = f32x4::splat(gain);
    let len = dest.len().min(src.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let d = f32x4::new([dest[idx], dest[idx + 1], dest[idx + 2], dest[idx + 3]]);
        let s = f32x4::new([src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]);
        dest[idx..idx + 4].copy_from_slice(&(d + s * gain_vec).to_array());
    }

    for i in chunks * 4..len {
        dest[i] += src[i] * gain;
    }
}

#[inline]
fn add_multiplied_simd(dest: &mut [f32], src: &[f32], gains: &[f32]) {
    let len = dest.len().min(src.len()).min(gains.len());
    let chunks = len / 4;

    for i in 0..chunks {
        let idx = i * 4;
        let d = f32x4::new([dest[idx], dest[idx + 1], dest[idx + 2], dest[idx + 3]]);
        let s = f32x4::new([src[idx], src[idx + 1], src[idx + 2], src[idx + 3]]);
        let g = f32x4::new([gains[idx], gains[idx + 1], gains[idx + 2], gains[idx + 3]]);
        dest[idx..idx + 4].copy_from_slice(&(d + s * g).to_array());
    }

    for i in chunks * 4..len {
        dest[i] += src[i] * gains[i];
    }
}

#[inline]
fn hard_clip_simd(buffer: &mut [f32]) {
    let one = f32x4::splat(1.0);
    let neg_one = f32x4::splat(-1.0);
    let mut chunks = buffer.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let v = f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&v.max(neg_one).min(one).to_array());
    }
    for item in chunks.into_remainder() {
        *item = item.clamp(-1.0, 1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_matches_scalar() {
        let src: Vec<f32> = (0..37).map(|i| i as f32 / 100.0).collect();
        let mut simd = vec![0.1; 37];
        let mut scalar = vec![0.1; 37];

        add_scaled_simd(&mut simd, &src, 0.5);
        for (d, s) in scalar.iter_mut().zip(&src) {
            *d += s * 0.5;
        }
        for (a, b) in simd.iter().zip(&scalar) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mix_and_interleave() {
        let mut mixer = SimdMixer::new(2, 8);
        mixer.begin(6);
        mixer.add(0, 0, &[0.5; 6], 1.0);
        mixer.add(0, 2, &[0.75; 4], 1.0);
        mixer.add(1, 3, &[0.25; 3], 0.5);

        let mut out = vec![9.0; 12];
        mixer.finish(&mut out, 2);
        assert_eq!(
            out,
            vec![0.5, 0.0, 0.5, 0.0, 1.0, 0.0, 1.0, 0.125, 1.0, 0.125, 1.0, 0.125]
        );
    }

    #[test]
    fn test_enveloped_add() {
        let mut mixer = SimdMixer::new(1, 6);
        mixer.begin(6);
        mixer.add_enveloped(0, 1, &[1.0; 5], &[1.0, 0.75, 0.5, 0.25, 0.0]);
        let mut out = vec![0.0; 6];
        mixer.finish(&mut out, 1);
        assert_eq!(out, vec![0.0, 1.0, 0.75, 0.5, 0.25, 0.0]);
    }

    #[test]
    fn test_block_growth() {
        let mut mixer = SimdMixer::new(1, 2);
        mixer.begin(5);
        mixer.add(0, 0, &[0.2; 5], 1.0);
        let mut out = vec![0.0; 5];
        mixer.finish(&mut out, 1);
        assert!(out.iter().all(|&s| (s - 0.2).abs() < 1e-6));
    }
}
