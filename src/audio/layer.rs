use std::sync::Arc;

use super::buffer::AudioBuffer;

pub type LayerId = u64;

/// Golden angle, so neighbouring layers get well separated hues.
const HUE_STEP: f32 = 137.5;

/// One committed take, mixed into every loop cycle unless muted.
///
/// The buffer is shared so undo snapshots of the layer list stay cheap.
#[derive(Debug, Clone)]
pub struct Layer {
    pub id: LayerId,
    pub buffer: Arc<AudioBuffer>,
    pub volume: f32,
    pub muted: bool,
    /// Display hue in degrees, derived from the layer's index
    pub hue: f32,
}

impl Layer {
    pub fn new(id: LayerId, index: usize, buffer: AudioBuffer) -> Self {
        Self {
            id,
            buffer: Arc::new(buffer),
            volume: 1.0,
            muted: false,
            hue: hue_for_index(index),
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    pub fn toggle_mute(&mut self) {
        self.muted = !self.muted;
    }

    /// Whether the scheduler should start a voice for this layer.
    pub fn is_audible(&self) -> bool {
        !self.muted && self.volume > 0.0
    }

    pub fn duration(&self) -> f64 {
        self.buffer.duration()
    }
}

pub fn hue_for_index(index: usize) -> f32 {
    (index as f32 * HUE_STEP) % 360.0
}
