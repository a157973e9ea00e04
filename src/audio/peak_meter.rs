// src/audio/peak_meter.rs
// Live input level metering with ballistics, fed from the control thread
// while input is drained.

/// Peak/RMS meter with instant attack and slow release.
#[derive(Debug, Clone, Default)]
pub struct InputMeter {
    peak: f32,
    rms: f32,
}

impl InputMeter {
    const RELEASE: f32 = 0.95;
    const RMS_SMOOTHING: f32 = 0.8;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);
        self.peak = if peak > self.peak {
            peak
        } else {
            self.peak * Self::RELEASE + peak * (1.0 - Self::RELEASE)
        };

        let mean_square = samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32;
        self.rms =
            self.rms * Self::RMS_SMOOTHING + mean_square.sqrt() * (1.0 - Self::RMS_SMOOTHING);
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    pub fn rms(&self) -> f32 {
        self.rms
    }

    pub fn reset(&mut self) {
        self.peak = 0.0;
        self.rms = 0.0;
    }

    /// Linear level to dBFS, floored at -96 dB.
    pub fn to_db(level: f32) -> f32 {
        if level <= 0.0 {
            -96.0
        } else {
            (20.0 * level.log10()).max(-96.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_attack_slow_release() {
        let mut meter = InputMeter::new();
        meter.update(&[0.0; 64]);
        assert_eq!(meter.peak(), 0.0);

        meter.update(&[0.8; 64]);
        assert_eq!(meter.peak(), 0.8);

        meter.update(&[0.1; 64]);
        assert!(meter.peak() > 0.7 && meter.peak() < 0.8);
    }

    #[test]
    fn test_rms_follows_steady_level() {
        let mut meter = InputMeter::new();
        for _ in 0..50 {
            meter.update(&[0.5, -0.5, 0.5, -0.5]);
        }
        assert!((meter.rms() - 0.5).abs() < 0.01);

        meter.reset();
        assert_eq!(meter.rms(), 0.0);
    }

    #[test]
    fn test_db_conversion() {
        assert_eq!(InputMeter::to_db(1.0), 0.0);
        assert!((InputMeter::to_db(0.5) + 6.02).abs() < 0.1);
        assert_eq!(InputMeter::to_db(0.0), -96.0);
    }
}
